//! Log Agent - access log metrics shipper.
//!
//! Tails a single access log, parses each new line into request metrics and writes
//! them to InfluxDB (or a local line protocol file).

use anyhow::{Context, Result};
use log_agent::config::{Config, CONFIG_PATH_ENV};
use log_agent::runner;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config_path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    runner::run(&config).await
}

fn init_tracing() {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
