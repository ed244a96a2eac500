//! Filesystem usage probe: `statvfs` wrapper reporting used bytes and percent.

#![allow(missing_docs)]

use std::path::Path;

use serde::Serialize;

use crate::core::errors::Result;
#[cfg(unix)]
use crate::core::errors::DclError;

/// Usage of the filesystem holding the monitored path.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SystemDiskUsage {
    pub bytes_used: u64,
    pub percent_used: f64,
}

impl SystemDiskUsage {
    /// Derive usage from raw block counts (already multiplied by block size).
    ///
    /// Percent is relative to what unprivileged users can reach
    /// (`used / (used + available)`), so it reads the same as `df`.
    #[must_use]
    pub fn from_counts(total_bytes: u64, free_bytes: u64, available_bytes: u64) -> Self {
        let bytes_used = total_bytes.saturating_sub(free_bytes);
        let reachable = bytes_used.saturating_add(available_bytes);
        if reachable == 0 {
            return Self {
                bytes_used,
                percent_used: 0.0,
            };
        }
        #[allow(clippy::cast_precision_loss)]
        let percent_used = (bytes_used as f64 * 100.0) / reachable as f64;
        Self {
            bytes_used,
            percent_used,
        }
    }
}

/// Filesystem usage source.
pub trait FsProbe: Send + Sync {
    fn usage(&self, path: &Path) -> Result<SystemDiskUsage>;
}

/// [`FsProbe`] backed by `statvfs(3)`.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsProbe;

#[cfg(unix)]
impl FsProbe for StatvfsProbe {
    fn usage(&self, path: &Path) -> Result<SystemDiskUsage> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|error| DclError::FsStats {
            path: path.to_path_buf(),
            details: error.to_string(),
        })?;
        let fragment = stat.fragment_size();
        Ok(SystemDiskUsage::from_counts(
            stat.blocks().saturating_mul(fragment),
            stat.blocks_free().saturating_mul(fragment),
            stat.blocks_available().saturating_mul(fragment),
        ))
    }
}
