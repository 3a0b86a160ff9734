//! Tributary CLI
//!
//! Command-line interface for operating the Tributary collector.
//!
//! # Usage
//!
//! ```bash
//! tributary --help
//! tributary validate --config config.yaml
//! tributary health --url http://localhost:13133
//! ```

#![deny(unsafe_code)]

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use shared::config::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

/// Tributary CLI - validate collector configuration and probe a running collector
#[derive(Parser)]
#[command(name = "tributary")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file, then print the pipeline topology
    Validate {
        /// Path to the YAML configuration file
        #[arg(short, long, env = "TRIBUTARY_CONFIG", default_value = "config.yaml")]
        config: PathBuf,
    },
    /// Check liveness and readiness of a running collector
    Health {
        /// Base URL of the health check extension
        #[arg(
            short,
            long,
            env = "TRIBUTARY_HEALTH_URL",
            default_value = "http://localhost:13133"
        )]
        url: String,
    },
}

/// Outcome of a health probe.
#[derive(Debug)]
struct Probe {
    live: bool,
    ready: bool,
    readiness: Value,
}

/// Loads `path` and returns the topology lines of the configuration.
fn validate(path: &Path) -> Result<Vec<String>> {
    let config = Config::from_file(path)
        .with_context(|| format!("invalid configuration {}", path.display()))?;
    Ok(config.topology())
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn probe(client: &reqwest::Client, base: &str) -> Result<Probe> {
    let health = client
        .get(endpoint(base, "health"))
        .send()
        .await
        .with_context(|| format!("collector at {base} is unreachable"))?;
    let live = health.status().is_success();

    let ready = client
        .get(endpoint(base, "ready"))
        .send()
        .await
        .with_context(|| format!("collector at {base} is unreachable"))?;
    let status = ready.status();
    let body = ready.text().await.context("failed to read /ready response")?;
    let readiness = serde_json::from_str(&body).unwrap_or(Value::String(body));

    Ok(Probe {
        live,
        ready: status.is_success(),
        readiness,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Validate { config }) => {
            let topology = validate(&config)?;
            println!("{} is valid", config.display());
            for line in topology {
                println!("  {line}");
            }
        }
        Some(Commands::Health { url }) => {
            let client = reqwest::Client::new();
            let probe = probe(&client, &url).await?;
            println!("live:  {}", probe.live);
            println!("ready: {}", probe.ready);
            println!("{}", serde_json::to_string_pretty(&probe.readiness)?);
            if !(probe.live && probe.ready) {
                bail!("collector at {url} is not ready");
            }
        }
        None => {
            println!("Tributary CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for usage information");
        }
    }

    Ok(())
}
