//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use docker_cleaner::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, ConfigOverrides};
pub use crate::core::errors::{DclError, Result};

// Platform
pub use crate::platform::fs::{FsProbe, SystemDiskUsage};
#[cfg(unix)]
pub use crate::platform::fs::StatvfsProbe;

// Engine
#[cfg(feature = "docker")]
pub use crate::engine::docker::DockerEngine;
pub use crate::engine::{Category, EngineClient, Inventory, PruneFilter, PruneReport, PruneTarget};

// Monitor
pub use crate::monitor::usage::{DiskUsage, DiskUsageSummary, ImageReclaimPolicy, UsageAggregator};

// Daemon
pub use crate::daemon::loop_main::Daemon;
pub use crate::daemon::reclaimer::{CycleReport, ReclaimConfig, Reclaimer};
pub use crate::daemon::signals::SignalHandler;
pub use crate::daemon::state::{ExporterState, SharedState};

// Exporter
pub use crate::exporter::metrics::MetricsExporter;
