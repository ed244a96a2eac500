//! Top-level CLI definition and dispatch.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::json;
use thiserror::Error;

use docker_cleaner::core::config::{Config, ConfigOverrides};
use docker_cleaner::core::errors::DclError;
use docker_cleaner::daemon::loop_main::Daemon;
use docker_cleaner::daemon::reclaimer::{ReclaimConfig, ReclaimPlan, plan};
use docker_cleaner::engine::docker::DockerEngine;
use docker_cleaner::engine::{Category, EngineClient};
use docker_cleaner::logger::{self, LogSettings};
use docker_cleaner::monitor::usage::{DiskUsage, ImageReclaimPolicy, UsageAggregator};
use docker_cleaner::platform::fs::{FsProbe, StatvfsProbe};

/// Docker cleaner: prunes stale engine resources when disk usage crosses a
/// threshold and exports usage metrics.
#[derive(Debug, Parser)]
#[command(name = "docker-cleaner", author, version, long_about = None)]
pub struct Cli {
    /// Config file path [default: /etc/docker-cleaner/config.toml].
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    #[command(flatten)]
    settings: SettingsArgs,
    /// Subcommand to execute (defaults to `daemon`).
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Run the cleaner daemon and metrics exporter.
    Daemon,
    /// Print current disk usage and what a cycle would prune, without pruning.
    Usage(UsageArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
}

/// Settings that override the config file and environment.
#[derive(Debug, Clone, Args, Default)]
struct SettingsArgs {
    /// Engine data directory to measure [default: /var/lib/docker].
    #[arg(long = "docker.dir", global = true, value_name = "PATH")]
    docker_dir: Option<PathBuf>,
    /// Disk usage percent above which resources are pruned [default: 50].
    #[arg(long = "docker.threshold", global = true, value_name = "PERCENT")]
    threshold: Option<f64>,
    /// Only prune objects older than this [default: 48h].
    #[arg(long = "docker.ttl", global = true, value_name = "DURATION", value_parser = humantime::parse_duration)]
    ttl: Option<Duration>,
    /// Which images count as reclaimable: attached or unattached [default: attached].
    #[arg(long = "docker.image-policy", global = true, value_name = "POLICY")]
    image_policy: Option<ImageReclaimPolicy>,
    /// Time between cleaning cycles [default: 15s].
    #[arg(long = "cleaner.interval", global = true, value_name = "DURATION", value_parser = humantime::parse_duration)]
    interval: Option<Duration>,
    /// Log what would be pruned without pruning.
    #[arg(long, global = true)]
    dry_run: bool,
    /// Metrics listen host [default: 0.0.0.0].
    #[arg(long = "exporter.host", global = true, value_name = "HOST")]
    exporter_host: Option<String>,
    /// Metrics listen port [default: 9203].
    #[arg(long = "exporter.port", global = true, value_name = "PORT")]
    exporter_port: Option<u16>,
    /// Path under which metrics are exposed [default: /metrics].
    #[arg(long = "exporter.telemetry-path", global = true, value_name = "PATH")]
    telemetry_path: Option<String>,
    /// Per-connection timeout of the metrics server [default: 15s].
    #[arg(long = "exporter.timeout", global = true, value_name = "DURATION", value_parser = humantime::parse_duration)]
    exporter_timeout: Option<Duration>,
}

impl SettingsArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            docker_dir: self.docker_dir.clone(),
            threshold_pct: self.threshold,
            ttl: self.ttl,
            image_policy: self.image_policy,
            interval: self.interval,
            dry_run: self.dry_run,
            exporter_host: self.exporter_host.clone(),
            exporter_port: self.exporter_port,
            telemetry_path: self.telemetry_path.clone(),
            exporter_timeout: self.exporter_timeout,
        }
    }
}

#[derive(Debug, Clone, Args, Default)]
struct UsageArgs {
    /// Emit JSON instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completions for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

/// CLI error type. Every variant exits the process with status 1.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] DclError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color {
        control::set_override(false);
    }

    if let Some(Command::Completions(args)) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    logger::init(LogSettings::from_env()?)?;
    let config = Config::load(cli.config.as_deref())?.with_overrides(&cli.settings.overrides())?;

    match &cli.command {
        None | Some(Command::Daemon) => run_daemon(config),
        Some(Command::Usage(args)) => run_usage(&config, args),
        Some(Command::Completions(_)) => Ok(()),
    }
}

fn run_daemon(config: Config) -> Result<(), CliError> {
    let engine: Arc<dyn EngineClient> = Arc::new(DockerEngine::connect()?);
    let probe: Arc<dyn FsProbe> = Arc::new(StatvfsProbe);
    Daemon::init(config, engine, probe)?.run()?;
    Ok(())
}

fn run_usage(config: &Config, args: &UsageArgs) -> Result<(), CliError> {
    let engine: Arc<dyn EngineClient> = Arc::new(DockerEngine::connect()?);
    engine.ping().map_err(|error| DclError::EngineUnavailable {
        details: error.to_string(),
    })?;
    let aggregator = UsageAggregator::new(
        engine,
        Arc::new(StatvfsProbe),
        config.docker.dir.clone(),
        config.docker.image_policy,
    );
    let usage = aggregator.collect()?;
    let decision = plan(&usage, &ReclaimConfig::from(config));

    if args.json {
        let payload = json!({
            "dir": config.docker.dir,
            "threshold_pct": config.docker.threshold_pct,
            "image_policy": config.docker.image_policy,
            "usage": usage,
            "threshold_exceeded": decision.threshold_exceeded,
            "planned_prunes": decision
                .prunes
                .iter()
                .map(|planned| planned.target.label())
                .collect::<Vec<_>>(),
        });
        let mut stdout = io::stdout().lock();
        serde_json::to_writer_pretty(&mut stdout, &payload)?;
        writeln!(stdout)?;
    } else {
        print_usage_human(config, &usage, &decision);
    }
    Ok(())
}

fn print_usage_human(config: &Config, usage: &DiskUsage, decision: &ReclaimPlan) {
    println!("Docker cleaner v{}", env!("CARGO_PKG_VERSION"));
    println!("  Directory: {}", config.docker.dir.display());
    print_percent_bar(
        "Used",
        usage.system.percent_used,
        config.docker.threshold_pct,
    );
    println!(
        "  Threshold: {:.1}%  ({} used)",
        config.docker.threshold_pct,
        format_bytes(usage.system.bytes_used)
    );

    println!("\n  {:<12}  {:>10}  {:>12}", "Type", "Size", "Reclaimable");
    println!("  {}", "-".repeat(38));
    for category in Category::ALL {
        let summary = usage.summary(category);
        let reclaimable = format!("{:>12}", format_bytes(summary.reclaimable));
        let reclaimable = if summary.reclaimable > 0 {
            reclaimable.yellow().to_string()
        } else {
            reclaimable.dimmed().to_string()
        };
        println!(
            "  {:<12}  {:>10}  {}",
            category.label(),
            format_bytes(summary.size),
            reclaimable
        );
    }

    let targets: Vec<&str> = decision
        .prunes
        .iter()
        .map(|planned| planned.target.label())
        .collect();
    if decision.threshold_exceeded {
        println!(
            "\n  {} next cycle prunes: {}",
            "Over threshold:".red().bold(),
            targets.join(", ")
        );
    } else {
        println!(
            "\n  {} next cycle prunes: {}",
            "Under threshold:".green().bold(),
            targets.join(", ")
        );
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn print_percent_bar(label: &str, pct: f64, threshold: f64) {
    let bar_width = 30;
    let filled = ((pct / 100.0) * bar_width as f64).round().max(0.0) as usize;
    let bar: String = "#".repeat(filled.min(bar_width));
    let line = format!(
        "  {:<9} {:>5.1}% |{:<width$}|",
        label,
        pct,
        bar,
        width = bar_width
    );
    if pct > threshold {
        println!("{}", line.red());
    } else {
        println!("{}", line.green());
    }
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;
    const TIB: u64 = 1024 * GIB;

    if bytes >= TIB {
        format!("{:.1} TB", bytes as f64 / TIB as f64)
    } else if bytes >= GIB {
        format!("{:.1} GB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.1} MB", bytes as f64 / MIB as f64)
    } else if bytes >= KIB {
        format!("{:.1} KB", bytes as f64 / KIB as f64)
    } else {
        format!("{bytes} B")
    }
}
