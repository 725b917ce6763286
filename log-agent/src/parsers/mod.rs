//! Access log line parsing.
//!
//! [`AccessLogParser`] turns one raw line of the combined access log format into a
//! [`MetricRecord`]. The parser is stateless and `Sync`, so a single instance is shared
//! by every parser worker.

mod record;
pub(crate) mod utils;

pub use record::MetricRecord;
pub use utils::{LINE_PREVIEW_LIMIT, LOG_TIMESTAMP_FORMAT};

use crate::error::ParseError;
use crate::metrics::DEGRADED_FIELDS_TOTAL;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use utils::{is_absent, parse_log_timestamp, request_path};

/// `client - - [time] scheme "METHOD target PROTO" status bytes "ref" "agent" "fwd" upstream request`
const ACCESS_LOG_PATTERN: &str = r#"(?x)
    ^
    (?P<client>[0-9A-Fa-f.:]+) \s+
    [^\s\[]+ \s+
    [^\s\[]+ \s+
    \[ (?P<time>[^\]]+) \] \s+
    (?P<scheme>[a-z]+) \s+
    " (?P<request>[^"]+) " \s+
    (?P<status>\d{3}) \s+
    (?P<bytes>\d+) \s+
    " [^"]* " \s+
    " .*? " \s+
    " [\d.-]+ " \s+
    (?P<upstream>[\d.-]+) \s+
    (?P<request_time>[\d.-]+)
    \s* $
"#;

/// What to do with a field that matched the grammar but does not convert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParsePolicy {
    /// Zero the field, count it and keep the record.
    #[default]
    Tolerant,
    /// Reject the whole line.
    Strict,
}

pub struct AccessLogParser {
    pattern: Regex,
    policy: ParsePolicy,
}

impl AccessLogParser {
    pub fn new(policy: ParsePolicy) -> Self {
        Self {
            pattern: Regex::new(ACCESS_LOG_PATTERN).expect("access log pattern is valid"),
            policy,
        }
    }

    pub fn policy(&self) -> ParsePolicy {
        self.policy
    }

    /// Parse a single line with its newline already removed.
    pub fn parse_line(&self, line: &[u8]) -> Result<MetricRecord, ParseError> {
        let text = String::from_utf8_lossy(line);
        let caps = self
            .pattern
            .captures(&text)
            .ok_or(ParseError::GrammarMismatch)?;

        let tokens: Vec<&str> = caps["request"].split_whitespace().collect();
        let &[method, target, protocol] = tokens.as_slice() else {
            return Err(ParseError::RequestTokens(tokens.len()));
        };
        let path =
            request_path(target).ok_or_else(|| ParseError::InvalidTarget(target.to_string()))?;

        let timestamp = self.timestamp_field(&caps["time"])?;
        let bytes_sent = self.numeric_field("bytes_sent", &caps["bytes"])?;
        let upstream_time = self.timing_field("upstream_time", &caps["upstream"])?;
        let request_time = self.timing_field("request_time", &caps["request_time"])?;

        Ok(MetricRecord {
            timestamp,
            bytes_sent,
            path,
            method: method.to_string(),
            scheme: caps["scheme"].to_string(),
            protocol: protocol.to_string(),
            status: caps["status"].to_string(),
            upstream_time,
            request_time,
        })
    }

    fn timestamp_field(&self, raw: &str) -> Result<DateTime<Utc>, ParseError> {
        match parse_log_timestamp(raw) {
            Some(ts) => Ok(ts),
            None => self.degrade("timestamp", raw),
        }
    }

    fn numeric_field(&self, field: &'static str, raw: &str) -> Result<u64, ParseError> {
        match raw.parse::<u64>() {
            Ok(value) => Ok(value),
            Err(_) => self.degrade(field, raw),
        }
    }

    fn timing_field(&self, field: &'static str, raw: &str) -> Result<f64, ParseError> {
        if is_absent(raw) {
            return Ok(0.0);
        }
        match raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(value),
            _ => self.degrade(field, raw),
        }
    }

    fn degrade<T: Default>(&self, field: &'static str, raw: &str) -> Result<T, ParseError> {
        match self.policy {
            ParsePolicy::Strict => Err(ParseError::InvalidField {
                field,
                value: raw.to_string(),
            }),
            ParsePolicy::Tolerant => {
                DEGRADED_FIELDS_TOTAL.with_label_values(&[field]).inc();
                warn!(field, value = raw, "unparseable field; using zero value");
                Ok(T::default())
            }
        }
    }
}

impl Default for AccessLogParser {
    fn default() -> Self {
        Self::new(ParsePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = r#"172.0.0.12 - - [04/Mar/2018:13:49:52 +0000] http "GET /foo?query=t HTTP/1.0" 200 2133 "-" "KeepAliveClient" "-" 1.005 1.854"#;

    fn parse(line: &str) -> Result<MetricRecord, ParseError> {
        AccessLogParser::default().parse_line(line.as_bytes())
    }

    #[test]
    fn parses_reference_line() {
        let record = parse(SAMPLE).expect("sample should parse");

        assert_eq!(record.path, "/foo");
        assert_eq!(record.method, "GET");
        assert_eq!(record.scheme, "http");
        assert_eq!(record.protocol, "HTTP/1.0");
        assert_eq!(record.status, "200");
        assert_eq!(record.bytes_sent, 2133);
        assert_eq!(record.upstream_time, 1.005);
        assert_eq!(record.request_time, 1.854);
        assert_eq!(
            record.timestamp,
            Utc.with_ymd_and_hms(2018, 3, 4, 13, 49, 52).unwrap()
        );
    }

    #[test]
    fn parsing_is_deterministic() {
        let parser = AccessLogParser::default();
        let first = parser.parse_line(SAMPLE.as_bytes()).unwrap();
        let second = parser.parse_line(SAMPLE.as_bytes()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn accepts_tab_separated_fields_and_absent_upstream() {
        let line = "172.0.0.12 - - [22/Dec/2017:03:31:35 +0000]\thttps \"GET /status.html HTTP/1.0\" 200 3 \"-\"\t\"KeepAliveClient\" \t\"-\"\t- 0.000";
        let record = parse(line).expect("tab separated line should parse");

        assert_eq!(record.scheme, "https");
        assert_eq!(record.path, "/status.html");
        assert_eq!(record.bytes_sent, 3);
        assert_eq!(record.upstream_time, 0.0);
        assert_eq!(record.request_time, 0.0);
    }

    #[test]
    fn rejects_missing_request_section() {
        let line = r#"172.0.0.12 - - [04/Mar/2018:13:49:52 +0000] http 200 2133 "-" "KeepAliveClient" "-" 1.005 1.854"#;
        assert_eq!(parse(line), Err(ParseError::GrammarMismatch));
    }

    #[test]
    fn rejects_status_that_is_not_three_digits() {
        let line = SAMPLE.replace("\" 200 ", "\" 20 ");
        assert_eq!(parse(&line), Err(ParseError::GrammarMismatch));
        let line = SAMPLE.replace("\" 200 ", "\" 2000 ");
        assert_eq!(parse(&line), Err(ParseError::GrammarMismatch));
    }

    #[test]
    fn rejects_request_lines_without_three_tokens() {
        let line = SAMPLE.replace("GET /foo?query=t HTTP/1.0", "GET /foo");
        assert_eq!(parse(&line), Err(ParseError::RequestTokens(2)));
        let line = SAMPLE.replace("GET /foo?query=t HTTP/1.0", "GET /foo HTTP/1.0 extra");
        assert_eq!(parse(&line), Err(ParseError::RequestTokens(4)));
    }

    #[test]
    fn rejects_empty_and_garbage_lines() {
        assert_eq!(parse(""), Err(ParseError::GrammarMismatch));
        assert_eq!(parse("not an access log"), Err(ParseError::GrammarMismatch));
    }

    #[test]
    fn tolerant_policy_zeroes_bad_timestamp() {
        let line = SAMPLE.replace("04/Mar/2018", "04/Foo/2018");
        let record = parse(&line).expect("tolerant parser keeps the record");
        assert_eq!(record.timestamp, DateTime::<Utc>::default());
        assert_eq!(record.path, "/foo");
    }

    #[test]
    fn tolerant_policy_zeroes_unparseable_timings() {
        let line = SAMPLE.replace("1.005 1.854", "1.0.5 -");
        let record = parse(&line).expect("tolerant parser keeps the record");
        assert_eq!(record.upstream_time, 0.0);
        assert_eq!(record.request_time, 0.0);
    }

    #[test]
    fn strict_policy_rejects_bad_timestamp() {
        let parser = AccessLogParser::new(ParsePolicy::Strict);
        let line = SAMPLE.replace("04/Mar/2018", "04/Foo/2018");
        let err = parser.parse_line(line.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            ParseError::InvalidField {
                field: "timestamp",
                ..
            }
        ));
    }

    #[test]
    fn far_future_timestamp_is_treated_as_unparseable() {
        let line = SAMPLE.replace("04/Mar/2018", "04/Mar/3018");

        let record = parse(&line).expect("tolerant parser keeps the record");
        assert_eq!(record.timestamp, DateTime::<Utc>::default());

        let strict = AccessLogParser::new(ParsePolicy::Strict);
        assert!(matches!(
            strict.parse_line(line.as_bytes()),
            Err(ParseError::InvalidField {
                field: "timestamp",
                ..
            })
        ));
    }

    #[test]
    fn strict_policy_still_accepts_absent_timings() {
        let parser = AccessLogParser::new(ParsePolicy::Strict);
        let line = SAMPLE.replace("1.005 1.854", "- 0.250");
        let record = parser.parse_line(line.as_bytes()).unwrap();
        assert_eq!(record.upstream_time, 0.0);
        assert_eq!(record.request_time, 0.25);
    }

    #[test]
    fn strict_policy_rejects_malformed_timing() {
        let parser = AccessLogParser::new(ParsePolicy::Strict);
        let line = SAMPLE.replace("1.005 1.854", "1.0.5 1.854");
        let err = parser.parse_line(line.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), "field");
    }

    #[test]
    fn rejects_unparseable_request_target() {
        let line = SAMPLE.replace("/foo?query=t", "/foo\u{1}bar");
        assert!(matches!(parse(&line), Err(ParseError::InvalidTarget(_))));
    }
}
