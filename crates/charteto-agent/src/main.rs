//! charteto-agent — pushes process metrics to Charteto.
//!
//! Loads a `[charteto]` table from a TOML file, registers a handful of
//! process meters and runs the scheduled exporter until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! charteto-agent --config /etc/charteto.toml
//! charteto-agent --config /etc/charteto.toml --once
//! ```

use std::path::PathBuf;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use charteto_core::{ChartetoConfig, MeterId};
use charteto_export::ChartetoMeterRegistry;

#[derive(Parser, Debug)]
#[command(name = "charteto-agent", about = "Push process metrics to Charteto", version)]
struct Cli {
    /// TOML file containing a [charteto] table.
    #[arg(short, long)]
    config: PathBuf,

    /// Publish a single batch set and exit.
    #[arg(long)]
    once: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = ChartetoConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    info!(uri = %config.uri, step = ?config.step, "configuration loaded");

    let registry = ChartetoMeterRegistry::new(config).context("failed to build exporter")?;
    register_process_meters(&registry)?;

    if cli.once {
        let report = registry
            .publish()
            .await
            .context("publish cycle did not complete")?;
        info!(sent = report.sent(), failed = report.failed(), "published once");
        if !report.is_success() {
            anyhow::bail!("{} of {} batches failed", report.failed(), report.batches.len());
        }
        return Ok(());
    }

    registry.start()?;
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutdown signal received");
    registry.stop().await;

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,charteto=debug"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Uptime, start time and CPU count of this process.
fn register_process_meters(registry: &ChartetoMeterRegistry) -> anyhow::Result<()> {
    let started = Instant::now();
    let start_time = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get()) as f64;

    registry.gauge(
        MeterId::named("process.uptime").with_base_unit("seconds"),
        move || started.elapsed().as_secs_f64(),
    )?;
    registry.gauge(
        MeterId::named("process.start.time").with_base_unit("seconds"),
        move || start_time,
    )?;
    registry.gauge(MeterId::named("system.cpu.count"), move || cpus)?;
    Ok(())
}
