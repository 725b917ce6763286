use super::point::Point;
use super::{PointSink, RetryPolicy};
use crate::error::SinkError;
use crate::metrics::{BATCHES_WRITTEN_TOTAL, POINTS_WRITTEN_TOTAL, SINK_WRITE_DURATION};
use crate::monitor::PipelineStats;
use crate::parsers::MetricRecord;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tracing target of the per-point echo, so it can be filtered on its own.
pub const ECHO_TARGET: &str = "log_agent::echo";

#[derive(Debug, Clone)]
pub struct SinkWorkerConfig {
    pub measurement: String,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
    pub echo_points: bool,
}

/// Batches records off the record queue and writes them through a [`PointSink`].
///
/// A batch is flushed when it reaches `batch_size`, when `flush_interval` elapses
/// with points pending, and once more when the queue disconnects.
pub struct SinkWorker {
    id: usize,
    sink: Arc<dyn PointSink>,
    config: SinkWorkerConfig,
    stats: Arc<PipelineStats>,
}

impl SinkWorker {
    pub fn new(
        id: usize,
        sink: Arc<dyn PointSink>,
        config: SinkWorkerConfig,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            id,
            sink,
            config,
            stats,
        }
    }

    /// Runs until the queue is drained and disconnected, or `abort` fires.
    ///
    /// A batch that still fails after retries is returned as an error; the caller
    /// decides whether that stops the pipeline.
    pub async fn run(
        self,
        records: flume::Receiver<MetricRecord>,
        abort: CancellationToken,
    ) -> Result<(), SinkError> {
        let batch_size = self.config.batch_size.max(1);
        let flush_interval = self.config.flush_interval;
        let mut batch: Vec<Point> = Vec::with_capacity(batch_size);
        let mut ticker = interval_at(
            tokio::time::Instant::now() + flush_interval,
            flush_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            worker = self.id,
            sink = %self.sink.describe(),
            batch_size,
            "sink worker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = abort.cancelled() => {
                    if !batch.is_empty() {
                        warn!(
                            worker = self.id,
                            dropped = batch.len(),
                            "sink worker aborted with unflushed points"
                        );
                    }
                    return Ok(());
                }
                received = records.recv_async() => match received {
                    Ok(record) => {
                        batch.push(Point::from_record(&self.config.measurement, &record));
                        if batch.len() >= batch_size {
                            self.flush(&mut batch, &abort).await?;
                        }
                    }
                    Err(_) => {
                        self.flush(&mut batch, &abort).await?;
                        debug!(worker = self.id, "record queue drained; sink worker exiting");
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    self.flush(&mut batch, &abort).await?;
                }
            }
        }
    }

    async fn flush(
        &self,
        batch: &mut Vec<Point>,
        abort: &CancellationToken,
    ) -> Result<(), SinkError> {
        if batch.is_empty() {
            return Ok(());
        }

        let started = Instant::now();
        let points: &[Point] = batch.as_slice();
        let sink = &self.sink;
        let result = self
            .config
            .retry
            .run("write_points", abort, move || sink.write_points(points))
            .await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(()) => {
                let count = points.len();
                SINK_WRITE_DURATION
                    .with_label_values(&["ok"])
                    .observe(elapsed);
                BATCHES_WRITTEN_TOTAL.with_label_values(&["ok"]).inc();
                POINTS_WRITTEN_TOTAL.inc_by(count as u64);
                self.stats.record_points_written(count as u64);

                if self.config.echo_points {
                    for point in points {
                        info!(target: ECHO_TARGET, worker = self.id, "{point}");
                    }
                }
                batch.clear();
                Ok(())
            }
            Err(SinkError::Cancelled) => Err(SinkError::Cancelled),
            Err(err) => {
                SINK_WRITE_DURATION
                    .with_label_values(&["error"])
                    .observe(elapsed);
                BATCHES_WRITTEN_TOTAL.with_label_values(&["error"]).inc();
                error!(
                    worker = self.id,
                    points = points.len(),
                    sink = %self.sink.describe(),
                    error = %err,
                    "failed to write batch"
                );
                Err(err)
            }
        }
    }
}
