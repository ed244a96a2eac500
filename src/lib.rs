#![forbid(unsafe_code)]

//! docker-cleaner: keeps a container engine's disk from filling up.
//!
//! A daemon that, on a fixed interval:
//! 1. **Measures** the filesystem holding the engine's data directory and the
//!    engine's own accounting of build cache, containers, volumes and images.
//! 2. **Prunes** the reclaimable categories, older than a TTL, once the
//!    filesystem's percent used crosses a threshold. Unused networks are pruned
//!    every cycle.
//! 3. **Exports** the latest snapshot as Prometheus text on an HTTP endpoint.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use docker_cleaner::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use docker_cleaner::core::config::Config;
//! use docker_cleaner::monitor::usage::{DiskUsage, UsageAggregator};
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod engine;
pub mod exporter;
pub mod logger;
pub mod monitor;
pub mod platform;
