//! Tributary Collector Binary
//!
//! Entry point of the telemetry pipeline collector.

#![deny(unsafe_code)]

use anyhow::{Context, Result};
use clap::Parser;
use shared::config::Config;
use std::path::PathBuf;

/// Telemetry pipeline collector: OTLP in, processors, OTLP/HTTP out.
#[derive(Debug, Parser)]
#[command(name = "tributary-collector", version, about)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short, long, env = "TRIBUTARY_CONFIG", default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    collector::telemetry::init(&config.service.telemetry.logs)?;

    let report = collector::run(config).await?;
    if report.lost_items > 0 {
        tracing::warn!(
            lost_items = report.lost_items,
            "Collector stopped with data loss"
        );
    }
    Ok(())
}
