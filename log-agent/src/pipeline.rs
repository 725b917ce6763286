//! Pipeline assembly and lifecycle.
//!
//! ```text
//! tailer ──raw queue──▶ parser workers ──record queue──▶ sink workers ──▶ store
//! ```
//!
//! Both queues are bounded, so a slow sink backs up into the parsers and then the
//! tailer, which simply stops reading. Two tokens control shutdown:
//! - `shutdown` (graceful): the tailer stops, parsers and sinks drain what is queued
//!   and the sinks flush their last batch before exiting.
//! - `abort` (fatal): every stage stops as soon as it can. `shutdown` is a child of
//!   `abort`, so aborting also stops the tailer.

use crate::error::SinkError;
use crate::metrics::{PARSE_DURATION, PARSE_ERRORS_TOTAL};
use crate::monitor::{Monitor, PipelineStats};
use crate::parsers::utils::line_preview;
use crate::parsers::{AccessLogParser, MetricRecord, ParsePolicy, LINE_PREVIEW_LIMIT};
use crate::sink::worker::{SinkWorker, SinkWorkerConfig};
use crate::sink::PointSink;
use crate::tailer::{tail_file, RawLine, TailerConfig};
use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long stages get to stop after an abort that follows a shutdown timeout.
const ABORT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub log_path: PathBuf,
    pub tailer: TailerConfig,
    pub read_queue_capacity: usize,
    pub record_queue_capacity: usize,
    pub parser_workers: usize,
    pub parse_policy: ParsePolicy,
    pub sink_workers: usize,
    pub sink: SinkWorkerConfig,
    pub shutdown_timeout: Duration,
}

struct StageExit {
    stage: &'static str,
    id: usize,
    result: Result<()>,
}

pub struct Pipeline {
    monitor: Monitor,
    abort: CancellationToken,
    shutdown: CancellationToken,
    shutdown_timeout: Duration,
    tasks: JoinSet<StageExit>,
    first_error: Option<anyhow::Error>,
}

impl Pipeline {
    /// Spawn every stage. Sink worker `i` writes through `sinks[i % sinks.len()]`
    /// and keeps its own batch.
    pub fn start(settings: PipelineSettings, sinks: Vec<Arc<dyn PointSink>>) -> Result<Self> {
        if sinks.is_empty() {
            return Err(anyhow!("pipeline requires at least one sink"));
        }

        let stats = Arc::new(PipelineStats::new());
        let abort = CancellationToken::new();
        let shutdown = abort.child_token();
        let mut tasks = JoinSet::new();

        let (line_tx, line_rx) = flume::bounded::<RawLine>(settings.read_queue_capacity.max(1));
        let (record_tx, record_rx) =
            flume::bounded::<MetricRecord>(settings.record_queue_capacity.max(1));

        let monitor = Monitor::new(
            stats.clone(),
            Arc::new(line_rx.clone()),
            Arc::new(record_rx.clone()),
        );

        tasks.spawn({
            let path = settings.log_path.clone();
            let stats = stats.clone();
            let tailer_config = settings.tailer.clone();
            let shutdown = shutdown.clone();
            let abort = abort.clone();
            async move {
                let result = tail_file(
                    path,
                    line_tx,
                    stats,
                    tailer_config,
                    shutdown,
                    abort.clone(),
                )
                .await
                .map_err(anyhow::Error::from);
                if let Err(err) = &result {
                    error!(error = %err, "tailer failed; aborting pipeline");
                    abort.cancel();
                }
                StageExit {
                    stage: "tailer",
                    id: 0,
                    result,
                }
            }
        });

        let parser = Arc::new(AccessLogParser::new(settings.parse_policy));
        let parser_workers = settings.parser_workers.max(1);
        for id in 0..parser_workers {
            tasks.spawn(parse_lines(
                id,
                parser.clone(),
                line_rx.clone(),
                record_tx.clone(),
                stats.clone(),
                abort.clone(),
            ));
        }
        drop(line_rx);
        drop(record_tx);

        let sink_workers = settings.sink_workers.max(1);
        for id in 0..sink_workers {
            let worker = SinkWorker::new(
                id,
                sinks[id % sinks.len()].clone(),
                settings.sink.clone(),
                stats.clone(),
            );
            tasks.spawn(write_records(id, worker, record_rx.clone(), abort.clone()));
        }
        drop(record_rx);

        info!(
            path = %settings.log_path.display(),
            parser_workers,
            sink_workers,
            read_queue_capacity = settings.read_queue_capacity,
            record_queue_capacity = settings.record_queue_capacity,
            batch_size = settings.sink.batch_size,
            "pipeline started"
        );

        Ok(Self {
            monitor,
            abort,
            shutdown,
            shutdown_timeout: settings.shutdown_timeout,
            tasks,
            first_error: None,
        })
    }

    pub fn monitor(&self) -> Monitor {
        self.monitor.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Wait for every stage to exit and report the first stage error.
    ///
    /// Cancel-safe: stages that already exited are not waited on again.
    pub async fn wait(&mut self) -> Result<()> {
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(StageExit { stage, id, result }) => {
                    debug!(stage, id, ok = result.is_ok(), "pipeline stage exited");
                    if let Err(err) = result {
                        self.first_error.get_or_insert(err);
                    }
                }
                Err(join_err) => {
                    error!(error = %join_err, "pipeline stage panicked");
                    self.abort.cancel();
                    self.first_error
                        .get_or_insert(anyhow!("pipeline stage failed: {join_err}"));
                }
            }
        }

        match self.first_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop reading, drain both queues and flush pending batches.
    ///
    /// Stages still running after `shutdown_timeout` are aborted.
    pub async fn shutdown(mut self) -> Result<()> {
        info!(
            timeout_ms = self.shutdown_timeout.as_millis() as u64,
            "draining pipeline"
        );
        self.shutdown.cancel();

        if let Ok(result) = timeout(self.shutdown_timeout, self.wait()).await {
            info!("pipeline drained");
            return result;
        }

        warn!(
            remaining = self.tasks.len(),
            "pipeline did not drain before shutdown timeout; aborting"
        );
        self.abort.cancel();
        match timeout(ABORT_GRACE, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                self.tasks.abort_all();
                Err(anyhow!("pipeline stages did not stop after abort"))
            }
        }
    }
}

/// Parser worker: raw lines in, records out, until the raw queue disconnects.
async fn parse_lines(
    id: usize,
    parser: Arc<AccessLogParser>,
    lines: flume::Receiver<RawLine>,
    records: flume::Sender<MetricRecord>,
    stats: Arc<PipelineStats>,
    abort: CancellationToken,
) -> StageExit {
    let exit = StageExit {
        stage: "parser",
        id,
        result: Ok(()),
    };

    loop {
        let line = tokio::select! {
            biased;
            _ = abort.cancelled() => return exit,
            received = lines.recv_async() => match received {
                Ok(line) => line,
                Err(_) => {
                    debug!(worker = id, "raw queue drained; parser exiting");
                    return exit;
                }
            },
        };

        stats.record_line_processed();
        let timer = PARSE_DURATION.start_timer();
        let parsed = parser.parse_line(&line);
        timer.observe_duration();

        match parsed {
            Ok(record) => {
                tokio::select! {
                    biased;
                    _ = abort.cancelled() => return exit,
                    sent = records.send_async(record) => {
                        if sent.is_err() {
                            return exit;
                        }
                    }
                }
            }
            Err(err) => {
                stats.record_parse_error();
                PARSE_ERRORS_TOTAL.with_label_values(&[err.kind()]).inc();
                warn!(
                    worker = id,
                    error = %err,
                    line = %line_preview(&line, LINE_PREVIEW_LIMIT),
                    "dropping malformed line"
                );
            }
        }
    }
}

/// Sink worker wrapper: a write failure that survives retries is fatal.
async fn write_records(
    id: usize,
    worker: SinkWorker,
    records: flume::Receiver<MetricRecord>,
    abort: CancellationToken,
) -> StageExit {
    let result = match worker.run(records, abort.clone()).await {
        Ok(()) | Err(SinkError::Cancelled) => Ok(()),
        Err(err) => {
            error!(worker = id, error = %err, "sink worker failed; aborting pipeline");
            abort.cancel();
            Err(anyhow::Error::from(err).context(format!("sink worker {id} failed")))
        }
    };
    StageExit {
        stage: "sink",
        id,
        result,
    }
}
