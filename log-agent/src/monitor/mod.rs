//! Pipeline health counters and the point-in-time snapshot served at `/monitor`.
//!
//! Every stage receives an `Arc<PipelineStats>` at construction and bumps its
//! counters with relaxed atomics. [`Monitor::snapshot`] only loads those counters and
//! reads queue lengths, so it never contends with the data path.

pub mod server;

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct PipelineStats {
    started_at: Instant,
    lines_read: AtomicU64,
    lines_processed: AtomicU64,
    parse_errors: AtomicU64,
    points_written: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started_at: Instant) -> Self {
        Self {
            started_at,
            lines_read: AtomicU64::new(0),
            lines_processed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            points_written: AtomicU64::new(0),
        }
    }

    pub fn record_line_read(&self) {
        self.lines_read.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per line consumed by a parser worker, whether or not it parsed.
    pub fn record_line_processed(&self) {
        self.lines_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_points_written(&self, count: u64) {
        self.points_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn lines_read(&self) -> u64 {
        self.lines_read.load(Ordering::Relaxed)
    }

    pub fn lines_processed(&self) -> u64 {
        self.lines_processed.load(Ordering::Relaxed)
    }

    pub fn parse_errors(&self) -> u64 {
        self.parse_errors.load(Ordering::Relaxed)
    }

    pub fn points_written(&self) -> u64 {
        self.points_written.load(Ordering::Relaxed)
    }

    pub fn elapsed_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.started_at)
    }
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything whose current backlog the monitor can sample.
pub trait QueueDepth: Send + Sync {
    fn depth(&self) -> usize;
}

impl<T: Send> QueueDepth for flume::Receiver<T> {
    fn depth(&self) -> usize {
        self.len()
    }
}

/// Wire format of `GET /monitor`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineSnapshot {
    pub logline: u64,
    pub tps: f64,
    pub readchanlen: usize,
    pub writechanlen: usize,
    pub runtime: String,
    pub errnum: u64,
}

#[derive(Clone)]
pub struct Monitor {
    stats: Arc<PipelineStats>,
    read_queue: Arc<dyn QueueDepth>,
    record_queue: Arc<dyn QueueDepth>,
}

impl Monitor {
    pub fn new(
        stats: Arc<PipelineStats>,
        read_queue: Arc<dyn QueueDepth>,
        record_queue: Arc<dyn QueueDepth>,
    ) -> Self {
        Self {
            stats,
            read_queue,
            record_queue,
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> PipelineSnapshot {
        let elapsed = self.stats.elapsed_at(now);
        let logline = self.stats.lines_processed();
        PipelineSnapshot {
            logline,
            tps: throughput(logline, elapsed),
            readchanlen: self.read_queue.depth(),
            writechanlen: self.record_queue.depth(),
            runtime: format_runtime(elapsed),
            errnum: self.stats.parse_errors(),
        }
    }
}

/// Renders `1h2m3s` style: hours and minutes only once non-zero, fractional seconds
/// with trailing zeros trimmed, and `ms`/`µs`/`ns` below one second.
fn format_runtime(elapsed: Duration) -> String {
    let nanos = elapsed.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return with_fraction(nanos, 1_000, "µs");
    }
    if nanos < 1_000_000_000 {
        return with_fraction(nanos, 1_000_000, "ms");
    }

    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    let secs_nanos =
        u128::from(total_secs % 60) * 1_000_000_000 + u128::from(elapsed.subsec_nanos());
    out.push_str(&with_fraction(secs_nanos, 1_000_000_000, "s"));
    out
}

fn with_fraction(value: u128, unit: u128, suffix: &str) -> String {
    let whole = value / unit;
    let frac = value % unit;
    if frac == 0 {
        return format!("{whole}{suffix}");
    }
    let width = unit.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    format!("{whole}.{}{suffix}", digits.trim_end_matches('0'))
}

fn throughput(processed: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        processed as f64 / secs
    } else {
        0.0
    }
}
