//! Threshold-triggered reclamation: one reconcile cycle plus the polling loop.
//!
//! A cycle pings the engine, collects a snapshot, publishes it, and (when the
//! monitored filesystem is over threshold) prunes every category that has
//! something reclaimable. Unused networks are pruned every cycle regardless.
//!
//! Only the liveness check is fatal. Collection failures skip the cycle and
//! prune failures skip only their category; the next cycle is the retry.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::core::config::Config;
use crate::core::errors::{DclError, Result};
use crate::daemon::state::SharedState;
use crate::engine::{Category, EngineClient, PruneFilter, PruneReport, PruneTarget};
use crate::monitor::usage::{DiskUsage, UsageAggregator};

// ──────────────────── configuration ────────────────────

/// Reclamation parameters, fixed for the daemon's lifetime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReclaimConfig {
    /// Prune filter cutoff: only objects older than this are removed.
    pub ttl: Duration,
    /// Reclaim when the monitored filesystem's percent used exceeds this.
    pub threshold_pct: f64,
    /// Sleep between cycles.
    pub interval: Duration,
    /// Log planned prunes without calling the engine.
    pub dry_run: bool,
}

impl From<&Config> for ReclaimConfig {
    fn from(config: &Config) -> Self {
        Self {
            ttl: config.docker.ttl,
            threshold_pct: config.docker.threshold_pct,
            interval: config.cleaner.interval,
            dry_run: config.cleaner.dry_run,
        }
    }
}

// ──────────────────── planning ────────────────────

/// One prune operation and the filter passes to issue for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPrune {
    pub target: PruneTarget,
    pub filters: Vec<PruneFilter>,
}

/// What a cycle will do for a given snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimPlan {
    pub threshold_exceeded: bool,
    /// Category prunes in order, then the network prune.
    pub prunes: Vec<PlannedPrune>,
}

/// Filter passes for one target. Images go in two passes (dangling, then
/// tagged); volumes carry no filter because the engine's volume prune has no
/// age cutoff.
#[must_use]
pub fn filters_for(target: PruneTarget, ttl: Duration) -> Vec<PruneFilter> {
    let aged = PruneFilter::older_than(ttl);
    match target {
        PruneTarget::BuildCache => vec![aged.with_all()],
        PruneTarget::Containers | PruneTarget::Networks => vec![aged],
        PruneTarget::Volumes => vec![PruneFilter::default()],
        PruneTarget::Images => vec![aged.with_dangling(true), aged.with_dangling(false)],
    }
}

/// Decide which prunes a snapshot calls for.
#[must_use]
pub fn plan(usage: &DiskUsage, config: &ReclaimConfig) -> ReclaimPlan {
    let threshold_exceeded = usage.system.percent_used > config.threshold_pct;
    let mut prunes = Vec::with_capacity(Category::ALL.len() + 1);
    if threshold_exceeded {
        for category in Category::ALL {
            if usage.summary(category).reclaimable > 0 {
                let target = PruneTarget::from(category);
                prunes.push(PlannedPrune {
                    target,
                    filters: filters_for(target, config.ttl),
                });
            }
        }
    }
    prunes.push(PlannedPrune {
        target: PruneTarget::Networks,
        filters: filters_for(PruneTarget::Networks, config.ttl),
    });
    ReclaimPlan {
        threshold_exceeded,
        prunes,
    }
}

// ──────────────────── cycle report ────────────────────

/// How one prune target went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    Reclaimed(PruneReport),
    /// At least one filter pass failed; `partial` sums the passes that succeeded.
    Failed { partial: PruneReport, error: String },
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneAttempt {
    pub target: PruneTarget,
    pub outcome: PruneOutcome,
}

/// Summary of one reconcile cycle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleReport {
    /// Published snapshot; `None` when collection failed.
    pub usage: Option<DiskUsage>,
    pub threshold_exceeded: bool,
    pub attempts: Vec<PruneAttempt>,
    /// Why the cycle was skipped, if it was.
    pub collect_error: Option<String>,
}

impl CycleReport {
    fn skipped(error: &DclError) -> Self {
        Self {
            collect_error: Some(error.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn attempted(&self, target: PruneTarget) -> bool {
        self.attempts.iter().any(|attempt| attempt.target == target)
    }

    /// Bytes the engine reported freeing this cycle, failed targets included.
    #[must_use]
    pub fn space_reclaimed(&self) -> u64 {
        self.attempts
            .iter()
            .map(|attempt| match &attempt.outcome {
                PruneOutcome::Reclaimed(report) | PruneOutcome::Failed { partial: report, .. } => {
                    report.space_reclaimed
                }
                PruneOutcome::DryRun => 0,
            })
            .fold(0, u64::saturating_add)
    }
}

// ──────────────────── reclaimer ────────────────────

pub struct Reclaimer {
    engine: Arc<dyn EngineClient>,
    aggregator: UsageAggregator,
    state: SharedState,
    config: ReclaimConfig,
}

impl Reclaimer {
    #[must_use]
    pub fn new(
        engine: Arc<dyn EngineClient>,
        aggregator: UsageAggregator,
        state: SharedState,
        config: ReclaimConfig,
    ) -> Self {
        Self {
            engine,
            aggregator,
            state,
            config,
        }
    }

    /// Run one reconcile cycle.
    ///
    /// Returns `Err` only when the engine fails its liveness check.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        self.engine.ping().map_err(unavailable)?;

        let usage = match self.aggregator.collect() {
            Ok(usage) => usage,
            Err(error) => {
                tracing::error!(code = error.code(), %error, "usage collection failed, skipping cycle");
                return Ok(CycleReport::skipped(&error));
            }
        };
        self.state.publish(usage);
        tracing::debug!(
            percent_used = usage.system.percent_used,
            bytes_used = usage.system.bytes_used,
            "published usage snapshot"
        );

        let plan = plan(&usage, &self.config);
        if plan.threshold_exceeded {
            tracing::info!(
                percent_used = usage.system.percent_used,
                threshold_pct = self.config.threshold_pct,
                dry_run = self.config.dry_run,
                "disk usage over threshold, reclaiming"
            );
            if !self.config.dry_run {
                self.state.record_reclamation(Utc::now());
            }
        }

        let attempts = plan
            .prunes
            .iter()
            .map(|planned| PruneAttempt {
                target: planned.target,
                outcome: self.execute(planned),
            })
            .collect();

        Ok(CycleReport {
            usage: Some(usage),
            threshold_exceeded: plan.threshold_exceeded,
            attempts,
            collect_error: None,
        })
    }

    /// Cycle until `stop` receives a message or its sender is dropped.
    ///
    /// The stop channel is only checked between cycles; a cycle in flight
    /// always runs to completion.
    pub fn run(&self, stop: &Receiver<()>) -> Result<()> {
        tracing::info!(
            interval = %humantime::format_duration(self.config.interval),
            ttl = %humantime::format_duration(self.config.ttl),
            threshold_pct = self.config.threshold_pct,
            "reclaimer started"
        );
        loop {
            if let Err(error) = self.run_cycle() {
                tracing::error!(code = error.code(), %error, "engine liveness check failed, reclaimer terminating");
                return Err(error);
            }
            match stop.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    tracing::info!("reclaimer stopped");
                    return Ok(());
                }
            }
        }
    }

    fn execute(&self, planned: &PlannedPrune) -> PruneOutcome {
        let target = planned.target;
        if self.config.dry_run {
            tracing::info!(%target, passes = planned.filters.len(), "dry run: would prune");
            return PruneOutcome::DryRun;
        }

        let mut total = PruneReport::default();
        let mut errors = Vec::new();
        for filter in &planned.filters {
            match self.engine.prune(target, filter) {
                Ok(report) => total = total.merge(report),
                Err(error) => {
                    tracing::warn!(%target, code = error.code(), %error, "prune failed");
                    errors.push(error.to_string());
                }
            }
        }

        if errors.is_empty() {
            if target == PruneTarget::Networks {
                tracing::debug!(%target, objects_deleted = total.objects_deleted, "pruned");
            } else {
                tracing::info!(
                    %target,
                    space_reclaimed = total.space_reclaimed,
                    objects_deleted = total.objects_deleted,
                    "pruned"
                );
            }
            PruneOutcome::Reclaimed(total)
        } else {
            PruneOutcome::Failed {
                partial: total,
                error: errors.join("; "),
            }
        }
    }
}

fn unavailable(error: DclError) -> DclError {
    match error {
        DclError::EngineUnavailable { .. } => error,
        DclError::Engine { details, .. } => DclError::EngineUnavailable { details },
        other => DclError::EngineUnavailable {
            details: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use crate::engine::{BuildCacheRecord, ImageRecord, Inventory};
    use crate::monitor::usage::{DiskUsageSummary, ImageReclaimPolicy};
    use crate::platform::fs::{FsProbe, SystemDiskUsage};

    const TTL: Duration = Duration::from_secs(48 * 3600);

    #[derive(Default)]
    struct FakeEngine {
        down: AtomicBool,
        inventory_fails: AtomicBool,
        failing: Mutex<Vec<(PruneTarget, Option<bool>)>>,
        inventory: Mutex<Inventory>,
        calls: Mutex<Vec<(PruneTarget, PruneFilter)>>,
    }

    impl EngineClient for FakeEngine {
        fn ping(&self) -> Result<()> {
            if self.down.load(Ordering::Relaxed) {
                return Err(DclError::engine("ping", "connection refused"));
            }
            Ok(())
        }

        fn inventory(&self) -> Result<Inventory> {
            if self.inventory_fails.load(Ordering::Relaxed) {
                return Err(DclError::engine("disk usage", "timeout"));
            }
            Ok(self.inventory.lock().clone())
        }

        fn prune(&self, target: PruneTarget, filter: &PruneFilter) -> Result<PruneReport> {
            self.calls.lock().push((target, *filter));
            if self.failing.lock().contains(&(target, filter.dangling)) {
                return Err(DclError::engine("prune", "locked"));
            }
            Ok(PruneReport {
                space_reclaimed: 100,
                objects_deleted: 1,
            })
        }
    }

    struct FixedProbe(f64);

    impl FsProbe for FixedProbe {
        fn usage(&self, _path: &Path) -> Result<SystemDiskUsage> {
            Ok(SystemDiskUsage {
                bytes_used: 1000,
                percent_used: self.0,
            })
        }
    }

    fn config(threshold_pct: f64) -> ReclaimConfig {
        ReclaimConfig {
            ttl: TTL,
            threshold_pct,
            interval: Duration::from_millis(5),
            dry_run: false,
        }
    }

    fn reclaimable_inventory() -> Inventory {
        Inventory {
            layers_size: 500,
            build_cache: vec![BuildCacheRecord {
                size: 10,
                in_use: false,
                shared: false,
            }],
            images: vec![ImageRecord {
                containers: Some(1),
                virtual_size: Some(50),
                shared_size: Some(0),
            }],
            ..Inventory::default()
        }
    }

    fn reclaimer(
        engine: &Arc<FakeEngine>,
        percent: f64,
        config: ReclaimConfig,
    ) -> (Reclaimer, SharedState) {
        let state = SharedState::new();
        let engine_dyn: Arc<dyn EngineClient> = Arc::clone(engine) as Arc<dyn EngineClient>;
        let aggregator = UsageAggregator::new(
            Arc::clone(&engine_dyn),
            Arc::new(FixedProbe(percent)),
            PathBuf::from("/var/lib/docker"),
            ImageReclaimPolicy::Attached,
        );
        (
            Reclaimer::new(engine_dyn, aggregator, state.clone(), config),
            state,
        )
    }

    fn targets(engine: &FakeEngine) -> Vec<PruneTarget> {
        engine.calls.lock().iter().map(|(target, _)| *target).collect()
    }

    #[test]
    fn plan_below_threshold_only_prunes_networks() {
        let mut usage = DiskUsage::default();
        usage.system.percent_used = 50.0;
        usage.images = DiskUsageSummary {
            size: 10,
            reclaimable: 10,
        };
        let plan = plan(&usage, &config(50.0));
        assert!(!plan.threshold_exceeded);
        assert_eq!(plan.prunes.len(), 1);
        assert_eq!(plan.prunes[0].target, PruneTarget::Networks);
    }

    #[test]
    fn plan_skips_categories_with_nothing_reclaimable() {
        let mut usage = DiskUsage::default();
        usage.system.percent_used = 90.0;
        usage.containers = DiskUsageSummary {
            size: 10,
            reclaimable: 3,
        };
        usage.volumes = DiskUsageSummary {
            size: 10,
            reclaimable: 0,
        };
        let plan = plan(&usage, &config(50.0));
        let targets: Vec<_> = plan.prunes.iter().map(|p| p.target).collect();
        assert_eq!(targets, [PruneTarget::Containers, PruneTarget::Networks]);
    }

    #[test]
    fn filter_passes_per_target() {
        assert_eq!(
            filters_for(PruneTarget::BuildCache, TTL),
            [PruneFilter::older_than(TTL).with_all()]
        );
        assert_eq!(filters_for(PruneTarget::Volumes, TTL), [PruneFilter::default()]);
        let images = filters_for(PruneTarget::Images, TTL);
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].dangling, Some(true));
        assert_eq!(images[1].dangling, Some(false));
        assert!(images.iter().all(|filter| filter.until == Some(TTL)));
        assert_eq!(
            filters_for(PruneTarget::Networks, TTL),
            [PruneFilter::older_than(TTL)]
        );
    }

    #[test]
    fn over_threshold_prunes_reclaimable_categories_and_records_time() {
        let engine = Arc::new(FakeEngine::default());
        *engine.inventory.lock() = reclaimable_inventory();
        let (reclaimer, state) = reclaimer(&engine, 80.0, config(50.0));

        let report = reclaimer.run_cycle().expect("cycle");
        assert!(report.threshold_exceeded);
        assert_eq!(
            targets(&engine),
            [
                PruneTarget::BuildCache,
                PruneTarget::Images,
                PruneTarget::Images,
                PruneTarget::Networks,
            ]
        );
        assert!(state.snapshot().last_reclamation_at.is_some());
        assert_eq!(report.space_reclaimed(), 400);
    }

    #[test]
    fn under_threshold_leaves_reclamation_time_unset() {
        let engine = Arc::new(FakeEngine::default());
        *engine.inventory.lock() = reclaimable_inventory();
        let (reclaimer, state) = reclaimer(&engine, 50.0, config(50.0));

        let report = reclaimer.run_cycle().expect("cycle");
        assert!(!report.threshold_exceeded);
        assert_eq!(targets(&engine), [PruneTarget::Networks]);
        assert!(state.snapshot().last_reclamation_at.is_none());
        assert_eq!(state.snapshot().usage.build_cache.reclaimable, 10);
    }

    #[test]
    fn failed_image_pass_does_not_skip_the_other_pass() {
        let engine = Arc::new(FakeEngine::default());
        *engine.inventory.lock() = reclaimable_inventory();
        engine
            .failing
            .lock()
            .push((PruneTarget::Images, Some(true)));
        let (reclaimer, _) = reclaimer(&engine, 99.0, config(50.0));

        let report = reclaimer.run_cycle().expect("cycle");
        let images = report
            .attempts
            .iter()
            .find(|attempt| attempt.target == PruneTarget::Images)
            .expect("images attempted");
        match &images.outcome {
            PruneOutcome::Failed { partial, error } => {
                assert_eq!(partial.space_reclaimed, 100);
                assert!(error.contains("DCL-2002"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(report.attempted(PruneTarget::Networks));
    }

    #[test]
    fn collection_failure_skips_cycle_and_keeps_state() {
        let engine = Arc::new(FakeEngine::default());
        *engine.inventory.lock() = reclaimable_inventory();
        let (reclaimer, state) = reclaimer(&engine, 90.0, config(50.0));
        reclaimer.run_cycle().expect("first cycle");
        let before = state.snapshot();
        engine.calls.lock().clear();

        engine.inventory_fails.store(true, Ordering::Relaxed);
        let report = reclaimer.run_cycle().expect("skipped cycle is not fatal");
        assert!(report.usage.is_none());
        assert!(report.collect_error.is_some());
        assert!(engine.calls.lock().is_empty());
        assert_eq!(state.snapshot(), before);
    }

    #[test]
    fn liveness_failure_is_fatal() {
        let engine = Arc::new(FakeEngine::default());
        engine.down.store(true, Ordering::Relaxed);
        let (reclaimer, _) = reclaimer(&engine, 90.0, config(50.0));
        let err = reclaimer.run_cycle().expect_err("ping failure");
        assert_eq!(err.code(), "DCL-2003");
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn dry_run_calls_no_prunes() {
        let engine = Arc::new(FakeEngine::default());
        *engine.inventory.lock() = reclaimable_inventory();
        let mut cfg = config(50.0);
        cfg.dry_run = true;
        let (reclaimer, state) = reclaimer(&engine, 90.0, cfg);

        let report = reclaimer.run_cycle().expect("cycle");
        assert!(engine.calls.lock().is_empty());
        assert!(
            report
                .attempts
                .iter()
                .all(|attempt| attempt.outcome == PruneOutcome::DryRun)
        );
        assert!(state.snapshot().last_reclamation_at.is_none());
    }

    #[test]
    fn run_stops_when_sender_dropped() {
        let engine = Arc::new(FakeEngine::default());
        let (reclaimer, _) = reclaimer(&engine, 10.0, config(50.0));
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        drop(stop_tx);
        reclaimer.run(&stop_rx).expect("clean stop");
        assert_eq!(targets(&engine), [PruneTarget::Networks]);
    }

    #[test]
    fn run_terminates_on_liveness_failure() {
        let engine = Arc::new(FakeEngine::default());
        engine.down.store(true, Ordering::Relaxed);
        let (reclaimer, _) = reclaimer(&engine, 10.0, config(50.0));
        let (_stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let err = reclaimer.run(&stop_rx).expect_err("fatal");
        assert!(matches!(err, DclError::EngineUnavailable { .. }));
    }
}
