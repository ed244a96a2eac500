//! Container engine abstraction: inventory records, prune targets/filters, and the
//! [`EngineClient`] trait the reclaimer talks to.
//!
//! The records here are deliberately engine-agnostic. Adapters (see [`docker`])
//! normalize the engine's wire types into them, mapping "size not computed"
//! sentinels to `None`.

#![allow(missing_docs)]

#[cfg(feature = "docker")]
pub mod docker;

use std::fmt;
use std::time::Duration;


use crate::core::errors::Result;

// ──────────────────── inventory ────────────────────

/// One build-cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildCacheRecord {
    pub size: u64,
    pub in_use: bool,
    /// Shared with another builder instance; never attributed to this engine.
    pub shared: bool,
}

/// One container, as seen by the engine's disk-usage call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContainerRecord {
    /// Size of the writable layer.
    pub size_rw: u64,
    /// Free-form lifecycle state, e.g. `running` or `Exited (0) 2 hours ago`.
    pub state: String,
}

/// One volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeRecord {
    /// `None` when the engine reports the size as unknown.
    pub size: Option<u64>,
    pub ref_count: u64,
}

/// One image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageRecord {
    /// Number of containers attached to the image; `None` when the engine did
    /// not compute it.
    pub containers: Option<u64>,
    pub virtual_size: Option<u64>,
    pub shared_size: Option<u64>,
}

/// Full disk-usage inventory returned by the engine in one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Inventory {
    /// Aggregate size of all image layers, as reported by the engine.
    pub layers_size: u64,
    pub build_cache: Vec<BuildCacheRecord>,
    pub containers: Vec<ContainerRecord>,
    pub volumes: Vec<VolumeRecord>,
    pub images: Vec<ImageRecord>,
}

// ──────────────────── categories & prune targets ────────────────────

/// Reclaimable resource category tracked in every snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    BuildCache,
    Containers,
    Volumes,
    Images,
}

impl Category {
    /// All categories, in prune order.
    pub const ALL: [Self; 4] = [
        Self::BuildCache,
        Self::Containers,
        Self::Volumes,
        Self::Images,
    ];

    /// Metric label value.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BuildCache => "build_cache",
            Self::Containers => "containers",
            Self::Volumes => "volumes",
            Self::Images => "images",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a prune call removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PruneTarget {
    BuildCache,
    Containers,
    Volumes,
    Images,
    Networks,
}

impl PruneTarget {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::BuildCache => "build_cache",
            Self::Containers => "containers",
            Self::Volumes => "volumes",
            Self::Images => "images",
            Self::Networks => "networks",
        }
    }
}

impl From<Category> for PruneTarget {
    fn from(value: Category) -> Self {
        match value {
            Category::BuildCache => Self::BuildCache,
            Category::Containers => Self::Containers,
            Category::Volumes => Self::Volumes,
            Category::Images => Self::Images,
        }
    }
}

impl fmt::Display for PruneTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Filters passed along with a prune call. Adapters ignore the fields their
/// engine operation does not support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneFilter {
    /// Only prune objects older than this.
    pub until: Option<Duration>,
    /// Image prune only: restrict to dangling (`true`) or tagged (`false`) images.
    pub dangling: Option<bool>,
    /// Build-cache prune only: remove all cache types, not just dangling ones.
    pub all: bool,
}

impl PruneFilter {
    /// Filter selecting objects older than `ttl`.
    #[must_use]
    pub const fn older_than(ttl: Duration) -> Self {
        Self {
            until: Some(ttl),
            dangling: None,
            all: false,
        }
    }

    #[must_use]
    pub const fn with_dangling(mut self, dangling: bool) -> Self {
        self.dangling = Some(dangling);
        self
    }

    #[must_use]
    pub const fn with_all(mut self) -> Self {
        self.all = true;
        self
    }

    /// `until` rendered the way engines parse relative timestamps (`172800s`).
    #[must_use]
    pub fn until_value(&self) -> Option<String> {
        self.until.map(|ttl| format!("{}s", ttl.as_secs()))
    }
}

/// Result of one prune call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PruneReport {
    pub space_reclaimed: u64,
    pub objects_deleted: usize,
}

impl PruneReport {
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            space_reclaimed: self.space_reclaimed.saturating_add(other.space_reclaimed),
            objects_deleted: self.objects_deleted.saturating_add(other.objects_deleted),
        }
    }
}

// ──────────────────── client trait ────────────────────

/// Container engine operations used by the reclaimer.
///
/// Implementations own their transport and any timeout behavior; the daemon
/// adds none of its own.
pub trait EngineClient: Send + Sync {
    /// Liveness check.
    fn ping(&self) -> Result<()>;
    /// Per-object disk usage inventory.
    fn inventory(&self) -> Result<Inventory>;
    /// Prune one kind of object.
    fn prune(&self, target: PruneTarget, filter: &PruneFilter) -> Result<PruneReport>;
}
