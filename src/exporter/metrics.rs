//! Prometheus gauges mirroring the published exporter state.
//!
//! Every scrape copies [`SharedState`], sets the gauges from that copy and
//! encodes the registry. `last` joins the registry on the first scrape that
//! sees a reclamation.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::fmt;

use parking_lot::Mutex;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};

use crate::core::errors::{DclError, Result};
use crate::daemon::state::{ExporterState, SharedState};
use crate::engine::Category;

/// Metric name prefix.
pub const NAMESPACE: &str = "docker_cleaner";

/// Label value for the system-wide bytes-used sample of `disk_usage`.
const TOTAL_LABEL: &str = "total";

/// Gauges served on every scrape.
pub struct MetricsExporter {
    state: SharedState,
    registry: Registry,
    encoder: TextEncoder,
    up: Gauge,
    last: Gauge,
    disk_usage: GaugeVec,
    disk_reclaimable: GaugeVec,
    disk_usage_percents: Gauge,
    /// Serializes set-then-gather so concurrent scrapes never mix snapshots.
    /// Also records whether `last` is registered.
    scrape: Mutex<bool>,
}

impl MetricsExporter {
    pub fn new(state: SharedState) -> Result<Self> {
        let registry = Registry::new();

        let up = Gauge::with_opts(opts("up", "Whether the docker cleaner is up."))
            .map_err(|e| metric_error("up", &e))?;
        let last = Gauge::with_opts(opts(
            "last",
            "Unix time of the last reclamation, in seconds.",
        ))
        .map_err(|e| metric_error("last", &e))?;
        let disk_usage =
            GaugeVec::new(opts("disk_usage", "Disk usage in bytes by type."), &["type"])
                .map_err(|e| metric_error("disk_usage", &e))?;
        let disk_reclaimable = GaugeVec::new(
            opts(
                "disk_reclaimable",
                "Reclaimable disk space in bytes by type.",
            ),
            &["type"],
        )
        .map_err(|e| metric_error("disk_reclaimable", &e))?;
        let disk_usage_percents = Gauge::with_opts(opts(
            "disk_usage_percents",
            "Disk usage of the monitored filesystem in percent.",
        ))
        .map_err(|e| metric_error("disk_usage_percents", &e))?;

        registry
            .register(Box::new(up.clone()))
            .map_err(|e| metric_error("up", &e))?;
        registry
            .register(Box::new(disk_usage.clone()))
            .map_err(|e| metric_error("disk_usage", &e))?;
        registry
            .register(Box::new(disk_reclaimable.clone()))
            .map_err(|e| metric_error("disk_reclaimable", &e))?;
        registry
            .register(Box::new(disk_usage_percents.clone()))
            .map_err(|e| metric_error("disk_usage_percents", &e))?;

        Ok(Self {
            state,
            registry,
            encoder: TextEncoder::new(),
            up,
            last,
            disk_usage,
            disk_reclaimable,
            disk_usage_percents,
            scrape: Mutex::new(false),
        })
    }

    /// `Content-Type` of [`Self::render`] output.
    #[must_use]
    pub fn content_type(&self) -> &str {
        self.encoder.format_type()
    }

    /// Copy the current state (the state lock is released before any gauge is
    /// touched) and encode the registry.
    pub fn render(&self) -> Result<String> {
        let state = self.state.snapshot();
        let mut last_registered = self.scrape.lock();
        self.set_gauges(&state, &mut last_registered)?;

        let mut buffer = Vec::new();
        self.encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| DclError::Serialization {
                context: "metrics",
                details: e.to_string(),
            })?;
        String::from_utf8(buffer).map_err(|e| DclError::Serialization {
            context: "metrics",
            details: e.to_string(),
        })
    }

    fn set_gauges(&self, state: &ExporterState, last_registered: &mut bool) -> Result<()> {
        let usage = &state.usage;
        self.up.set(1.0);

        if let Some(at) = state.last_reclamation_at {
            if !*last_registered {
                self.registry
                    .register(Box::new(self.last.clone()))
                    .map_err(|e| metric_error("last", &e))?;
                *last_registered = true;
            }
            self.last.set(at.timestamp_millis() as f64 / 1000.0);
        }

        self.disk_usage
            .with_label_values(&[TOTAL_LABEL])
            .set(usage.system.bytes_used as f64);
        for category in Category::ALL {
            let summary = usage.summary(category);
            self.disk_usage
                .with_label_values(&[category.label()])
                .set(summary.size as f64);
            self.disk_reclaimable
                .with_label_values(&[category.label()])
                .set(summary.reclaimable as f64);
        }
        self.disk_usage_percents.set(usage.system.percent_used);
        Ok(())
    }
}

impl fmt::Debug for MetricsExporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsExporter")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

fn opts(name: &str, help: &str) -> Opts {
    Opts::new(name, help).namespace(NAMESPACE)
}

fn metric_error(name: &str, error: &prometheus::Error) -> DclError {
    DclError::Runtime {
        details: format!("failed to set up metric {NAMESPACE}_{name}: {error}"),
    }
}
