//! Daemon orchestration: binds the exporter, runs the reclaimer thread, and
//! shuts both down together.
//!
//! Threads:
//! - **Reclaimer** (`dcl-reclaimer`): sequential reconcile cycles, stopped by
//!   dropping its crossbeam stop sender.
//! - **Exporter** (main thread, tokio runtime): serves scrapes until a signal
//!   arrives or the reclaimer thread exits.
//!
//! The reclaimer exiting on its own means the engine became unreachable; the
//! exporter is stopped and the reclaimer's error is returned.

#![allow(missing_docs)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::core::config::Config;
use crate::core::errors::{DclError, Result};
use crate::daemon::reclaimer::{ReclaimConfig, Reclaimer};
use crate::daemon::signals::SignalHandler;
use crate::daemon::state::SharedState;
use crate::engine::EngineClient;
use crate::exporter::metrics::MetricsExporter;
use crate::exporter::server::{self, ServerConfig};
use crate::monitor::usage::UsageAggregator;
use crate::platform::fs::FsProbe;

/// How often the exporter checks for shutdown conditions.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);
/// Grace period for in-flight scrapes once the exporter stops.
const EXPORTER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);
const EXPORTER_WORKER_THREADS: usize = 2;

pub struct Daemon {
    config: Config,
    engine: Arc<dyn EngineClient>,
    probe: Arc<dyn FsProbe>,
    listener: std::net::TcpListener,
    signal_handler: SignalHandler,
    state: SharedState,
}

impl Daemon {
    /// Bind the metrics listener and register OS signal hooks.
    ///
    /// A bind failure is returned before any thread starts.
    pub fn init(
        config: Config,
        engine: Arc<dyn EngineClient>,
        probe: Arc<dyn FsProbe>,
    ) -> Result<Self> {
        Self::init_with_signals(config, engine, probe, SignalHandler::new())
    }

    /// Like [`Self::init`] with a caller-supplied signal handler.
    pub fn init_with_signals(
        config: Config,
        engine: Arc<dyn EngineClient>,
        probe: Arc<dyn FsProbe>,
        signal_handler: SignalHandler,
    ) -> Result<Self> {
        let addr = config.exporter.bind_addr()?;
        let listener = server::bind(addr)?;
        Ok(Self {
            config,
            engine,
            probe,
            listener,
            signal_handler,
            state: SharedState::new(),
        })
    }

    /// Address the exporter is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(|source| DclError::Runtime {
            details: format!("metrics listener has no local address: {source}"),
        })
    }

    #[must_use]
    pub fn state(&self) -> SharedState {
        self.state.clone()
    }

    /// Run until SIGTERM/SIGINT (returns `Ok`) or until the reclaimer
    /// terminates (returns its error).
    pub fn run(self) -> Result<()> {
        let start = Instant::now();
        let config_hash = self.config.stable_hash().unwrap_or_default();
        tracing::info!(
            version = env!("CARGO_PKG_VERSION"),
            config_hash = %config_hash,
            dir = %self.config.docker.dir.display(),
            dry_run = self.config.cleaner.dry_run,
            image_policy = self.config.docker.image_policy.as_str(),
            "docker cleaner starting"
        );

        let aggregator = UsageAggregator::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.probe),
            self.config.docker.dir.clone(),
            self.config.docker.image_policy,
        );
        let reclaimer = Reclaimer::new(
            Arc::clone(&self.engine),
            aggregator,
            self.state.clone(),
            ReclaimConfig::from(&self.config),
        );

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let reclaimer_join = thread::Builder::new()
            .name("dcl-reclaimer".to_string())
            .spawn(move || reclaimer.run(&stop_rx))
            .map_err(|source| DclError::Runtime {
                details: format!("failed to spawn reclaimer thread: {source}"),
            })?;

        let serve_result = self.serve_until_shutdown(&reclaimer_join);

        // Dropping the sender stops the reclaimer after its current cycle.
        drop(stop_tx);
        let reclaim_result = reclaimer_join.join().unwrap_or_else(|_| {
            Err(DclError::Runtime {
                details: "reclaimer thread panicked".to_string(),
            })
        });

        tracing::info!(uptime_secs = start.elapsed().as_secs(), "docker cleaner stopped");
        serve_result?;
        reclaim_result
    }

    fn serve_until_shutdown(
        &self,
        reclaimer: &thread::JoinHandle<Result<()>>,
    ) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(EXPORTER_WORKER_THREADS)
            .thread_name("dcl-exporter")
            .enable_all()
            .build()
            .map_err(|source| DclError::Runtime {
                details: format!("failed to build exporter runtime: {source}"),
            })?;

        let listener = self.listener.try_clone().map_err(|source| DclError::Runtime {
            details: format!("failed to hand metrics listener to exporter: {source}"),
        })?;
        let server_config = ServerConfig {
            telemetry_path: self.config.exporter.telemetry_path.clone(),
            timeout: self.config.exporter.timeout,
        };
        let exporter = MetricsExporter::new(self.state.clone())?;
        let result = runtime.block_on(server::serve(
            listener,
            exporter,
            server_config,
            shutdown_requested(&self.signal_handler, reclaimer),
        ));
        runtime.shutdown_timeout(EXPORTER_DRAIN_TIMEOUT);
        result
    }
}

async fn shutdown_requested(signals: &SignalHandler, reclaimer: &thread::JoinHandle<Result<()>>) {
    loop {
        if signals.should_shutdown() {
            tracing::info!("shutdown requested");
            return;
        }
        if reclaimer.is_finished() {
            tracing::warn!("reclaimer exited, stopping exporter");
            return;
        }
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }
}
