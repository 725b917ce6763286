//! Prometheus metrics for monitoring log-agent performance and errors.
//!
//! All metrics use the default Prometheus registry and follow naming conventions:
//! - Histograms: *_seconds (for latency)
//! - Counters: *_total (for counts)
//!
//! These complement the `/monitor` snapshot, which is driven by
//! [`PipelineStats`](crate::monitor::PipelineStats) rather than this registry.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    Histogram, HistogramVec, IntCounter, IntCounterVec,
};

lazy_static! {
    // ==================== LATENCY METRICS ====================

    pub static ref PARSE_DURATION: Histogram = register_histogram!(
        "log_agent_parse_duration_seconds",
        "Time spent parsing a single access log line",
        vec![0.000_005, 0.00001, 0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01]
    )
    .unwrap();
    pub static ref SINK_WRITE_DURATION: HistogramVec = register_histogram_vec!(
        "log_agent_sink_write_duration_seconds",
        "Time spent writing a batch of points to the store",
        &["status"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]
    )
    .unwrap();

    // ==================== ERROR COUNTERS ====================
    pub static ref PARSE_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "log_agent_parse_errors_total",
        "Lines dropped by the parser, by error kind",
        &["kind"]
    )
    .unwrap();
    pub static ref DEGRADED_FIELDS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "log_agent_degraded_fields_total",
        "Fields that failed to parse and were zeroed under the tolerant policy",
        &["field"]
    )
    .unwrap();
    pub static ref SINK_RETRIES_TOTAL: IntCounter = register_int_counter!(
        "log_agent_sink_retries_total",
        "Store writes retried after a transient failure"
    )
    .unwrap();
    pub static ref TAILER_RESTARTS_TOTAL: IntCounter = register_int_counter!(
        "log_agent_tailer_restarts_total",
        "Times the tailer reopened the log file after a read failure"
    )
    .unwrap();

    // ==================== THROUGHPUT METRICS ====================
    pub static ref LINES_READ_TOTAL: IntCounter = register_int_counter!(
        "log_agent_lines_read_total",
        "Complete lines read from the tailed file"
    )
    .unwrap();
    pub static ref POINTS_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        "log_agent_points_written_total",
        "Points successfully written to the store"
    )
    .unwrap();
    pub static ref BATCHES_WRITTEN_TOTAL: IntCounterVec = register_int_counter_vec!(
        "log_agent_batches_written_total",
        "Batches handed to the store",
        &["status"]
    )
    .unwrap();
}
