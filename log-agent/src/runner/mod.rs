//! Application runner for the log-agent.
//!
//! Wires configuration into sinks, the pipeline and the monitor server, then runs
//! until the pipeline stops on its own or a shutdown signal arrives.

use crate::config::{Config, SinkConfig};
use crate::monitor::server;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::sink::worker::SinkWorkerConfig;
use crate::sink::{build_point_sink, PointSink, RetryPolicy};
use crate::tailer::TailerConfig;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Environment variable to force immediate batch flushing (testing mode).
pub const FORCE_FLUSH_ENV: &str = "LOG_AGENT_FORCE_FLUSH";

/// Run the agent until the pipeline exits or Ctrl+C drains it.
pub async fn run(config: &Config) -> Result<()> {
    info!(path = %config.log_path().display(), "log-agent starting");

    let sinks = connect_sinks(&config.sink, config.pipeline.sink_workers).await?;

    let monitor_addr = config.monitor_addr()?;
    let listener = TcpListener::bind(monitor_addr)
        .await
        .with_context(|| format!("failed to bind monitor server to {monitor_addr}"))?;

    let mut pipeline = Pipeline::start(pipeline_settings(config), sinks)?;

    let monitor_shutdown = CancellationToken::new();
    let monitor_task = tokio::spawn(server::serve(
        listener,
        pipeline.monitor(),
        monitor_shutdown.clone(),
    ));

    let finished = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received shutdown signal"),
                Err(err) => {
                    warn!(error = %err, "failed to listen for shutdown signal; shutting down")
                }
            }
            None
        }
        result = pipeline.wait() => Some(result),
    };

    let result = match finished {
        Some(result) => result,
        None => pipeline.shutdown().await,
    };

    monitor_shutdown.cancel();
    match monitor_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "monitor server exited with error"),
        Err(err) => warn!(error = %err, "monitor server task failed"),
    }

    match &result {
        Ok(()) => info!("log-agent stopped"),
        Err(err) => warn!(error = %err, "log-agent stopped with error"),
    }
    result
}

/// Build one sink per worker and make sure the destination answers before the
/// pipeline starts.
pub async fn connect_sinks(
    config: &SinkConfig,
    workers: usize,
) -> Result<Vec<Arc<dyn PointSink>>> {
    let sinks = (0..workers.max(1))
        .map(|_| build_point_sink(config))
        .collect::<Result<Vec<_>>>()?;

    let retry = retry_policy(config);
    let cancel_token = CancellationToken::new();
    for sink in &sinks {
        retry
            .run("ping", &cancel_token, move || sink.ping())
            .await
            .with_context(|| format!("sink {} is not reachable", sink.describe()))?;
    }

    info!(sink = %sinks[0].describe(), workers = sinks.len(), "sink ready");
    Ok(sinks)
}

pub fn pipeline_settings(config: &Config) -> PipelineSettings {
    PipelineSettings {
        log_path: config.log_path(),
        tailer: TailerConfig {
            poll_interval: config.poll_interval(),
            max_restarts: config.source.max_restarts,
            restart_base_delay: Duration::from_millis(config.source.restart_base_delay_ms),
            watch_events: config.source.watch_events,
        },
        read_queue_capacity: config.pipeline.read_queue_capacity,
        record_queue_capacity: config.pipeline.record_queue_capacity,
        parser_workers: config.pipeline.parser_workers,
        parse_policy: config.pipeline.parse_policy,
        sink_workers: config.pipeline.sink_workers,
        sink: SinkWorkerConfig {
            measurement: config.sink.measurement.clone(),
            batch_size: resolve_batch_size(config.sink.batch_size),
            flush_interval: config.sink.flush_interval(),
            retry: retry_policy(&config.sink),
            echo_points: config.sink.echo_points,
        },
        shutdown_timeout: config.shutdown_timeout(),
    }
}

fn retry_policy(config: &SinkConfig) -> RetryPolicy {
    RetryPolicy::new(config.retry_max_attempts, config.retry_base_delay())
}

/// Resolve the effective batch size based on config and environment overrides.
pub fn resolve_batch_size(configured: usize) -> usize {
    match std::env::var(FORCE_FLUSH_ENV) {
        Ok(value) => batch_size_override(&value, configured),
        Err(_) => configured.max(1),
    }
}

fn batch_size_override(value: &str, configured: usize) -> usize {
    let trimmed = value.trim();
    if trimmed.eq_ignore_ascii_case("true") || trimmed == "1" {
        warn!(
            env = FORCE_FLUSH_ENV,
            configured, "forcing batch size to 1 for immediate flush (testing mode)"
        );
        1
    } else if trimmed.eq_ignore_ascii_case("false") || trimmed == "0" {
        configured.max(1)
    } else {
        warn!(
            env = FORCE_FLUSH_ENV,
            value = trimmed,
            configured,
            "unrecognized value for {}; using configured batch size",
            FORCE_FLUSH_ENV
        );
        configured.max(1)
    }
}
