//! Log agent: tails an access log, turns each request line into a metric point and
//! ships the points to InfluxDB, with a live `/monitor` snapshot of pipeline health.

pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod parsers;
pub mod pipeline;
pub mod runner;
pub mod sink;
pub mod tailer;
pub mod watcher;
