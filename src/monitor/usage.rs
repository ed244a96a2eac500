//! Usage accounting: turns engine inventory plus a filesystem reading into one
//! [`DiskUsage`] snapshot with per-category size and reclaimable estimates.
//!
//! Every rule here is a pure function over the inventory. The aggregator itself
//! only sequences the two collaborator calls and never mutates engine state.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::engine::{
    BuildCacheRecord, Category, ContainerRecord, EngineClient, ImageRecord, Inventory,
    VolumeRecord,
};
use crate::platform::fs::{FsProbe, SystemDiskUsage};

/// Container state fragments that mark a container as active. Matched as
/// case-insensitive substrings so `Restarting (1) 5 seconds ago` counts.
const ACTIVE_STATE_MARKERS: [&str; 3] = ["running", "paused", "restarting"];

/// Size and reclaimable estimate for one category.
///
/// Invariant: `reclaimable <= size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DiskUsageSummary {
    pub size: u64,
    pub reclaimable: u64,
}

/// One immutable usage snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DiskUsage {
    pub system: SystemDiskUsage,
    pub build_cache: DiskUsageSummary,
    pub containers: DiskUsageSummary,
    pub volumes: DiskUsageSummary,
    pub images: DiskUsageSummary,
}

impl DiskUsage {
    #[must_use]
    pub const fn summary(&self, category: Category) -> DiskUsageSummary {
        match category {
            Category::BuildCache => self.build_cache,
            Category::Containers => self.containers,
            Category::Volumes => self.volumes,
            Category::Images => self.images,
        }
    }
}

/// Which images count toward the reclaimable estimate.
///
/// The engine reports how many containers are attached to each image. Whether
/// attached images should be treated as reclaimable is not settled, so both
/// readings are available. `Attached` reproduces the estimate earlier releases
/// published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageReclaimPolicy {
    /// Count images whose attached-container count is not zero (including
    /// images whose count was not computed).
    #[default]
    Attached,
    /// Count only images with no attached containers.
    Unattached,
}

impl ImageReclaimPolicy {
    #[must_use]
    pub const fn counts(self, image: &ImageRecord) -> bool {
        let unattached = matches!(image.containers, Some(0));
        match self {
            Self::Attached => !unattached,
            Self::Unattached => unattached,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::Unattached => "unattached",
        }
    }
}

impl std::str::FromStr for ImageReclaimPolicy {
    type Err = String;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "attached" => Ok(Self::Attached),
            "unattached" => Ok(Self::Unattached),
            other => Err(format!(
                "unknown image policy {other:?} (expected attached or unattached)"
            )),
        }
    }
}

// ──────────────────── per-category rules ────────────────────

/// Build cache: shared entries are invisible; in-use entries are not reclaimable.
#[must_use]
pub fn build_cache_summary(entries: &[BuildCacheRecord]) -> DiskUsageSummary {
    let mut size = 0_u64;
    let mut in_use = 0_u64;
    for entry in entries.iter().filter(|entry| !entry.shared) {
        size = size.saturating_add(entry.size);
        if entry.in_use {
            in_use = in_use.saturating_add(entry.size);
        }
    }
    DiskUsageSummary {
        size,
        reclaimable: size - in_use,
    }
}

/// Whether a container's lifecycle state marks it as active.
#[must_use]
pub fn container_is_active(state: &str) -> bool {
    let state = state.to_ascii_lowercase();
    ACTIVE_STATE_MARKERS
        .iter()
        .any(|marker| state.contains(marker))
}

/// Containers: writable layers of non-active containers are reclaimable.
#[must_use]
pub fn containers_summary(containers: &[ContainerRecord]) -> DiskUsageSummary {
    containers
        .iter()
        .fold(DiskUsageSummary::default(), |mut acc, container| {
            acc.size = acc.size.saturating_add(container.size_rw);
            if !container_is_active(&container.state) {
                acc.reclaimable = acc.reclaimable.saturating_add(container.size_rw);
            }
            acc
        })
}

/// Volumes: unknown sizes are skipped; unreferenced volumes are reclaimable.
#[must_use]
pub fn volumes_summary(volumes: &[VolumeRecord]) -> DiskUsageSummary {
    let mut summary = DiskUsageSummary::default();
    for volume in volumes {
        let Some(size) = volume.size else {
            continue;
        };
        summary.size = summary.size.saturating_add(size);
        if volume.ref_count == 0 {
            summary.reclaimable = summary.reclaimable.saturating_add(size);
        }
    }
    summary
}

/// Images: total is the engine's aggregate layer size; the reclaimable estimate
/// sums unique (virtual minus shared) bytes of the images the policy selects,
/// capped at the total.
#[must_use]
pub fn images_summary(
    layers_size: u64,
    images: &[ImageRecord],
    policy: ImageReclaimPolicy,
) -> DiskUsageSummary {
    let estimate = images
        .iter()
        .filter(|image| policy.counts(image))
        .filter_map(|image| {
            let virtual_size = image.virtual_size?;
            let shared_size = image.shared_size?;
            Some(virtual_size.saturating_sub(shared_size))
        })
        .fold(0_u64, u64::saturating_add);
    DiskUsageSummary {
        size: layers_size,
        reclaimable: estimate.min(layers_size),
    }
}

/// Combine a filesystem reading with engine inventory into one snapshot.
#[must_use]
pub fn summarize(
    system: SystemDiskUsage,
    inventory: &Inventory,
    policy: ImageReclaimPolicy,
) -> DiskUsage {
    DiskUsage {
        system,
        build_cache: build_cache_summary(&inventory.build_cache),
        containers: containers_summary(&inventory.containers),
        volumes: volumes_summary(&inventory.volumes),
        images: images_summary(inventory.layers_size, &inventory.images, policy),
    }
}

// ──────────────────── aggregator ────────────────────

/// Produces snapshots for one monitored path.
pub struct UsageAggregator {
    engine: Arc<dyn EngineClient>,
    probe: Arc<dyn FsProbe>,
    monitored_path: PathBuf,
    image_policy: ImageReclaimPolicy,
}

impl UsageAggregator {
    #[must_use]
    pub fn new(
        engine: Arc<dyn EngineClient>,
        probe: Arc<dyn FsProbe>,
        monitored_path: PathBuf,
        image_policy: ImageReclaimPolicy,
    ) -> Self {
        Self {
            engine,
            probe,
            monitored_path,
            image_policy,
        }
    }

    /// Read the filesystem, then the engine inventory. Either failure is
    /// returned as-is.
    pub fn collect(&self) -> Result<DiskUsage> {
        let system = self.probe.usage(&self.monitored_path)?;
        let inventory = self.engine.inventory()?;
        Ok(summarize(system, &inventory, self.image_policy))
    }
}
