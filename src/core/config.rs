//! Configuration system: TOML file + env var overrides + CLI overrides + validation.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{DclError, Result};
use crate::monitor::usage::ImageReclaimPolicy;

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "DOCKER_CLEANER_";

/// Full docker-cleaner configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub docker: DockerConfig,
    pub cleaner: CleanerConfig,
    pub exporter: ExporterConfig,
}

/// What to watch and what counts as stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DockerConfig {
    /// Path whose filesystem is measured (the engine's data root).
    pub dir: PathBuf,
    /// Reclaim when percent used exceeds this.
    #[serde(rename = "threshold")]
    pub threshold_pct: f64,
    /// Prune only objects older than this.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub image_policy: ImageReclaimPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanerConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExporterConfig {
    pub host: String,
    pub port: u16,
    pub telemetry_path: String,
    /// Upper bound on one scrape connection.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/docker"),
            threshold_pct: 50.0,
            ttl: Duration::from_secs(48 * 3600),
            image_policy: ImageReclaimPolicy::default(),
        }
    }
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(15),
            dry_run: false,
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9203,
            telemetry_path: "/metrics".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

impl ExporterConfig {
    /// Resolve `host:port` to the first socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|error| DclError::InvalidConfig {
                details: format!("exporter.host {:?}: {error}", self.host),
            })?
            .next()
            .ok_or_else(|| DclError::InvalidConfig {
                details: format!("exporter.host {:?} resolved to no address", self.host),
            })
    }
}

/// Values set on the command line. `None` leaves the loaded value alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigOverrides {
    pub docker_dir: Option<PathBuf>,
    pub threshold_pct: Option<f64>,
    pub ttl: Option<Duration>,
    pub image_policy: Option<ImageReclaimPolicy>,
    pub interval: Option<Duration>,
    pub dry_run: bool,
    pub exporter_host: Option<String>,
    pub exporter_port: Option<u16>,
    pub telemetry_path: Option<String>,
    pub exporter_timeout: Option<Duration>,
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathBuf::from("/etc/docker-cleaner/config.toml")
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, env_var)
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DclError::io(&path_buf, source))?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if path.is_some() {
            return Err(DclError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.apply_env_overrides_from(lookup)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply command-line values on top of file and env, then re-validate.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        if let Some(dir) = &overrides.docker_dir {
            self.docker.dir.clone_from(dir);
        }
        if let Some(threshold) = overrides.threshold_pct {
            self.docker.threshold_pct = threshold;
        }
        if let Some(ttl) = overrides.ttl {
            self.docker.ttl = ttl;
        }
        if let Some(policy) = overrides.image_policy {
            self.docker.image_policy = policy;
        }
        if let Some(interval) = overrides.interval {
            self.cleaner.interval = interval;
        }
        if overrides.dry_run {
            self.cleaner.dry_run = true;
        }
        if let Some(host) = &overrides.exporter_host {
            self.exporter.host.clone_from(host);
        }
        if let Some(port) = overrides.exporter_port {
            self.exporter.port = port;
        }
        if let Some(path) = &overrides.telemetry_path {
            self.exporter.telemetry_path.clone_from(path);
        }
        if let Some(timeout) = overrides.exporter_timeout {
            self.exporter.timeout = timeout;
        }
        self.validate()?;
        Ok(self)
    }

    /// Deterministic hash of the effective config for startup logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &str| {
            let name = format!("{ENV_PREFIX}{key}");
            lookup(&name)
                .filter(|raw| !raw.trim().is_empty())
                .map(|raw| (name, raw))
        };

        if let Some((_, raw)) = get("DOCKER_DIR") {
            self.docker.dir = PathBuf::from(raw);
        }
        if let Some((name, raw)) = get("DOCKER_THRESHOLD") {
            self.docker.threshold_pct = parse_env(&name, &raw)?;
        }
        if let Some((name, raw)) = get("DOCKER_TTL") {
            self.docker.ttl = parse_env_duration(&name, &raw)?;
        }
        if let Some((name, raw)) = get("DOCKER_IMAGE_POLICY") {
            self.docker.image_policy = raw.parse().map_err(|details: String| {
                DclError::ConfigParse {
                    context: "env",
                    details: format!("{name}={raw:?}: {details}"),
                }
            })?;
        }
        if let Some((name, raw)) = get("CLEANER_INTERVAL") {
            self.cleaner.interval = parse_env_duration(&name, &raw)?;
        }
        if let Some((name, raw)) = get("CLEANER_DRY_RUN") {
            self.cleaner.dry_run = parse_env(&name, &raw)?;
        }
        if let Some((_, raw)) = get("EXPORTER_HOST") {
            self.exporter.host = raw;
        }
        if let Some((name, raw)) = get("EXPORTER_PORT") {
            self.exporter.port = parse_env(&name, &raw)?;
        }
        if let Some((_, raw)) = get("EXPORTER_TELEMETRY_PATH") {
            self.exporter.telemetry_path = raw;
        }
        if let Some((name, raw)) = get("EXPORTER_TIMEOUT") {
            self.exporter.timeout = parse_env_duration(&name, &raw)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let threshold = self.docker.threshold_pct;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(invalid(format!(
                "docker.threshold must be in [0, 100], got {threshold}"
            )));
        }
        if self.docker.dir.as_os_str().is_empty() {
            return Err(invalid("docker.dir must not be empty"));
        }
        if self.cleaner.interval.is_zero() {
            return Err(invalid("cleaner.interval must be > 0"));
        }
        if self.exporter.timeout.is_zero() {
            return Err(invalid("exporter.timeout must be > 0"));
        }
        if self.exporter.host.trim().is_empty() {
            return Err(invalid("exporter.host must not be empty"));
        }
        let path = &self.exporter.telemetry_path;
        if !path.starts_with('/') || path == "/" {
            return Err(invalid(format!(
                "exporter.telemetry_path must start with '/' and not be '/', got {path:?}"
            )));
        }
        Ok(())
    }
}

fn invalid(details: impl Into<String>) -> DclError {
    DclError::InvalidConfig {
        details: details.into(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok()
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| DclError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

fn parse_env_duration(name: &str, raw: &str) -> Result<Duration> {
    humantime::parse_duration(raw.trim()).map_err(|error| DclError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
