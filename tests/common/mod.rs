#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use docker_cleaner::core::errors::{DclError, Result};
use docker_cleaner::engine::{
    BuildCacheRecord, EngineClient, Inventory, PruneFilter, PruneReport, PruneTarget,
};
use docker_cleaner::platform::fs::{FsProbe, SystemDiskUsage};
use parking_lot::Mutex;

pub const GIB: u64 = 1024 * 1024 * 1024;

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_docker-cleaner"))
}

/// Run the binary with `args` and extra environment, keeping a log of the
/// invocation under the temp dir for failed assertions.
pub fn run_cli_case(case_name: &str, args: &[&str], env: &[(&str, &str)]) -> CmdResult {
    let root = std::env::temp_dir().join("docker-cleaner-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env_remove("LOG_TYPE")
        .env_remove("LOG_LEVEL")
        .envs(env.iter().copied())
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute docker-cleaner");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("env={env:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

// ──────────────────── fakes ────────────────────

/// In-memory engine. A successful build-cache prune empties the build cache
/// so the next inventory reflects it.
#[derive(Default)]
pub struct FakeEngine {
    pub inventory: Mutex<Inventory>,
    pub prunes: Mutex<Vec<(PruneTarget, PruneFilter)>>,
    pub down: AtomicBool,
    pub failing: Mutex<Vec<PruneTarget>>,
}

impl FakeEngine {
    pub fn with_inventory(inventory: Inventory) -> Self {
        Self {
            inventory: Mutex::new(inventory),
            ..Self::default()
        }
    }

    pub fn with_build_cache(bytes: u64) -> Self {
        Self::with_inventory(Inventory {
            build_cache: vec![BuildCacheRecord {
                size: bytes,
                in_use: false,
                shared: false,
            }],
            ..Inventory::default()
        })
    }

    pub fn take_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn fail_prunes_of(&self, target: PruneTarget) {
        self.failing.lock().push(target);
    }

    pub fn pruned_targets(&self) -> Vec<PruneTarget> {
        self.prunes.lock().iter().map(|(target, _)| *target).collect()
    }
}

impl EngineClient for FakeEngine {
    fn ping(&self) -> Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(DclError::engine("ping", "connection refused"));
        }
        Ok(())
    }

    fn inventory(&self) -> Result<Inventory> {
        Ok(self.inventory.lock().clone())
    }

    fn prune(&self, target: PruneTarget, filter: &PruneFilter) -> Result<PruneReport> {
        self.prunes.lock().push((target, *filter));
        if self.failing.lock().contains(&target) {
            return Err(DclError::engine("prune", "engine busy"));
        }
        if target != PruneTarget::BuildCache {
            return Ok(PruneReport::default());
        }
        let mut inventory = self.inventory.lock();
        let freed = inventory
            .build_cache
            .iter()
            .filter(|entry| !entry.in_use && !entry.shared)
            .map(|entry| entry.size)
            .sum();
        let before = inventory.build_cache.len();
        inventory
            .build_cache
            .retain(|entry| entry.in_use || entry.shared);
        Ok(PruneReport {
            space_reclaimed: freed,
            objects_deleted: before - inventory.build_cache.len(),
        })
    }
}

/// Filesystem probe returning a settable reading.
pub struct FixedProbe {
    pub reading: Mutex<SystemDiskUsage>,
}

impl FixedProbe {
    pub fn new(percent_used: f64, bytes_used: u64) -> Self {
        Self {
            reading: Mutex::new(SystemDiskUsage {
                bytes_used,
                percent_used,
            }),
        }
    }

    pub fn set_percent(&self, percent_used: f64) {
        self.reading.lock().percent_used = percent_used;
    }
}

impl FsProbe for FixedProbe {
    fn usage(&self, _path: &Path) -> Result<SystemDiskUsage> {
        Ok(*self.reading.lock())
    }
}
