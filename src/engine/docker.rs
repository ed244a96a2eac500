//! Docker engine adapter built on `bollard`.
//!
//! The daemon's reclaimer runs on a plain thread, so the adapter owns a
//! current-thread tokio runtime and blocks on each API call.

use std::collections::HashMap;

use bollard::Docker;
use bollard::models::{BuildCache, ContainerSummary, ImageSummary, SystemDataUsageResponse, Volume};
use bollard::query_parameters::{
    DataUsageOptions, PruneBuildOptions, PruneBuildOptionsBuilder, PruneContainersOptionsBuilder,
    PruneImagesOptionsBuilder, PruneNetworksOptionsBuilder, PruneVolumesOptionsBuilder,
};
use tokio::runtime::{Builder, Runtime};

use crate::core::errors::{DclError, Result};
use crate::engine::{
    BuildCacheRecord, ContainerRecord, EngineClient, ImageRecord, Inventory, PruneFilter,
    PruneReport, PruneTarget, VolumeRecord,
};

/// [`EngineClient`] talking to the local Docker daemon (honors `DOCKER_HOST`).
pub struct DockerEngine {
    docker: Docker,
    runtime: Runtime,
}

impl DockerEngine {
    /// Connect using the platform defaults (unix socket or named pipe, or
    /// `DOCKER_HOST` when set). No request is made until the first call.
    pub fn connect() -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| DclError::Runtime {
                details: format!("failed to build docker client runtime: {source}"),
            })?;
        let docker = {
            let _guard = runtime.enter();
            Docker::connect_with_local_defaults().map_err(|error| {
                DclError::EngineUnavailable {
                    details: error.to_string(),
                }
            })?
        };
        Ok(Self { docker, runtime })
    }
}

impl EngineClient for DockerEngine {
    fn ping(&self) -> Result<()> {
        self.runtime
            .block_on(self.docker.ping())
            .map(|_| ())
            .map_err(|error| DclError::engine("ping", error))
    }

    fn inventory(&self) -> Result<Inventory> {
        let usage = self
            .runtime
            .block_on(self.docker.df(None::<DataUsageOptions>))
            .map_err(|error| DclError::engine("disk usage", error))?;
        Ok(inventory_from(usage))
    }

    fn prune(&self, target: PruneTarget, filter: &PruneFilter) -> Result<PruneReport> {
        let filters = filter_args(filter);
        match target {
            PruneTarget::BuildCache => {
                let response = self
                    .runtime
                    .block_on(self.docker.prune_build(Some(build_cache_options(filter))))
                    .map_err(|error| DclError::engine("prune build cache", error))?;
                Ok(PruneReport {
                    space_reclaimed: response.space_reclaimed.reported().unwrap_or(0),
                    objects_deleted: response.caches_deleted.as_ref().map_or(0, Vec::len),
                })
            }
            PruneTarget::Containers => {
                let response = self
                    .runtime
                    .block_on(self.docker.prune_containers(Some(
                        PruneContainersOptionsBuilder::default()
                            .filters(&filters)
                            .build(),
                    )))
                    .map_err(|error| DclError::engine("prune containers", error))?;
                Ok(PruneReport {
                    space_reclaimed: response.space_reclaimed.reported().unwrap_or(0),
                    objects_deleted: response.containers_deleted.as_ref().map_or(0, Vec::len),
                })
            }
            PruneTarget::Volumes => {
                let response = self
                    .runtime
                    .block_on(self.docker.prune_volumes(Some(
                        PruneVolumesOptionsBuilder::default()
                            .filters(&filters)
                            .build(),
                    )))
                    .map_err(|error| DclError::engine("prune volumes", error))?;
                Ok(PruneReport {
                    space_reclaimed: response.space_reclaimed.reported().unwrap_or(0),
                    objects_deleted: response.volumes_deleted.as_ref().map_or(0, Vec::len),
                })
            }
            PruneTarget::Images => {
                let response = self
                    .runtime
                    .block_on(self.docker.prune_images(Some(
                        PruneImagesOptionsBuilder::default()
                            .filters(&filters)
                            .build(),
                    )))
                    .map_err(|error| DclError::engine("prune images", error))?;
                Ok(PruneReport {
                    space_reclaimed: response.space_reclaimed.reported().unwrap_or(0),
                    objects_deleted: response.images_deleted.as_ref().map_or(0, Vec::len),
                })
            }
            PruneTarget::Networks => {
                let response = self
                    .runtime
                    .block_on(self.docker.prune_networks(Some(
                        PruneNetworksOptionsBuilder::default()
                            .filters(&filters)
                            .build(),
                    )))
                    .map_err(|error| DclError::engine("prune networks", error))?;
                Ok(PruneReport {
                    space_reclaimed: 0,
                    objects_deleted: response.networks_deleted.as_ref().map_or(0, Vec::len),
                })
            }
        }
    }
}

// ──────────────────── wire → inventory ────────────────────

/// Sizes and counts the engine reports as `-1` (or omits) when it did not
/// compute them.
trait Reported {
    fn reported(self) -> Option<u64>;
}

impl Reported for i64 {
    fn reported(self) -> Option<u64> {
        u64::try_from(self).ok()
    }
}

impl Reported for Option<i64> {
    fn reported(self) -> Option<u64> {
        self.and_then(|value| u64::try_from(value).ok())
    }
}

fn inventory_from(usage: SystemDataUsageResponse) -> Inventory {
    Inventory {
        layers_size: usage.layers_size.reported().unwrap_or(0),
        build_cache: usage
            .build_cache
            .unwrap_or_default()
            .iter()
            .map(build_cache_record)
            .collect(),
        containers: usage
            .containers
            .unwrap_or_default()
            .iter()
            .map(container_record)
            .collect(),
        volumes: usage
            .volumes
            .unwrap_or_default()
            .iter()
            .map(volume_record)
            .collect(),
        images: usage
            .images
            .unwrap_or_default()
            .iter()
            .map(image_record)
            .collect(),
    }
}

fn build_cache_record(entry: &BuildCache) -> BuildCacheRecord {
    BuildCacheRecord {
        size: entry.size.reported().unwrap_or(0),
        in_use: entry.in_use.unwrap_or(false),
        shared: entry.shared.unwrap_or(false),
    }
}

fn container_record(container: &ContainerSummary) -> ContainerRecord {
    ContainerRecord {
        size_rw: container.size_rw.reported().unwrap_or(0),
        state: container
            .state
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default(),
    }
}

fn volume_record(volume: &Volume) -> VolumeRecord {
    volume
        .usage_data
        .as_ref()
        .map_or_else(VolumeRecord::default, |usage| VolumeRecord {
            size: usage.size.reported(),
            ref_count: usage.ref_count.reported().unwrap_or(0),
        })
}

/// Current engine APIs no longer send `VirtualSize`; `Size` carries the same
/// value (all layers, shared ones included).
fn image_record(image: &ImageSummary) -> ImageRecord {
    ImageRecord {
        containers: image.containers.reported(),
        virtual_size: image.size.reported(),
        shared_size: image.shared_size.reported(),
    }
}

fn build_cache_options(filter: &PruneFilter) -> PruneBuildOptions {
    PruneBuildOptionsBuilder::default()
        .all(filter.all)
        .filters(&filter_args(filter))
        .build()
}

fn filter_args(filter: &PruneFilter) -> HashMap<String, Vec<String>> {
    let mut args = HashMap::new();
    if let Some(until) = filter.until_value() {
        args.insert("until".to_string(), vec![until]);
    }
    if let Some(dangling) = filter.dangling {
        args.insert("dangling".to_string(), vec![dangling.to_string()]);
    }
    args
}
