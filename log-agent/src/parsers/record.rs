use chrono::{DateTime, Utc};

/// One request extracted from an access log line.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    /// Zero (Unix epoch) when the log timestamp could not be parsed.
    pub timestamp: DateTime<Utc>,
    pub bytes_sent: u64,
    /// Request path with query string and fragment removed.
    pub path: String,
    pub method: String,
    pub scheme: String,
    /// Third request-line token, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Three-digit status code kept verbatim.
    pub status: String,
    pub upstream_time: f64,
    pub request_time: f64,
}
