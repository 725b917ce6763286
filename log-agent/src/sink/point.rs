use super::dsn::Precision;
use crate::parsers::MetricRecord;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

/// A single time-series point in the store's data model.
///
/// Tags and fields are kept sorted so the encoded line is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// Tags `path`, `method`, `scheme`, `status`; fields `bytesSent`, `upstreamTime`,
    /// `requestTime`.
    pub fn from_record(measurement: &str, record: &MetricRecord) -> Self {
        let tags = BTreeMap::from([
            ("path".to_string(), record.path.clone()),
            ("method".to_string(), record.method.clone()),
            ("scheme".to_string(), record.scheme.clone()),
            ("status".to_string(), record.status.clone()),
        ]);
        let fields = BTreeMap::from([
            (
                "bytesSent".to_string(),
                FieldValue::Integer(i64::try_from(record.bytes_sent).unwrap_or(i64::MAX)),
            ),
            (
                "upstreamTime".to_string(),
                FieldValue::Float(record.upstream_time),
            ),
            (
                "requestTime".to_string(),
                FieldValue::Float(record.request_time),
            ),
        ]);

        Self {
            measurement: measurement.to_string(),
            tags,
            fields,
            timestamp: record.timestamp,
        }
    }

    /// Encodes the point as one line of InfluxDB line protocol, without a trailing newline.
    ///
    /// Tags with empty values are omitted because the protocol cannot represent them.
    /// A timestamp outside the store's range is left off and the store assigns one.
    pub fn to_line_protocol(&self, precision: Precision) -> String {
        let mut line = String::with_capacity(128);
        push_escaped(&mut line, &self.measurement, &[',', ' ']);

        for (key, value) in &self.tags {
            if value.is_empty() {
                continue;
            }
            line.push(',');
            push_escaped(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            push_escaped(&mut line, value, &[',', '=', ' ']);
        }

        let mut separator = ' ';
        for (key, value) in &self.fields {
            line.push(separator);
            separator = ',';
            push_escaped(&mut line, key, &[',', '=', ' ']);
            line.push('=');
            // Writing to a String cannot fail.
            let _ = match value {
                FieldValue::Integer(v) => write!(line, "{v}i"),
                FieldValue::Float(v) => write!(line, "{v}"),
            };
        }

        if let Some(ts) = precision.timestamp(&self.timestamp) {
            let _ = write!(line, " {ts}");
        }
        line
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol(Precision::Nanoseconds))
    }
}

/// Joins points into a newline-terminated write body.
pub fn encode_batch(points: &[Point], precision: Precision) -> String {
    let mut body = String::with_capacity(points.len() * 128);
    for point in points {
        body.push_str(&point.to_line_protocol(precision));
        body.push('\n');
    }
    body
}

/// The store only unescapes the `special` characters, so other backslashes are written
/// as-is. A trailing backslash is doubled so it cannot escape the separator after it.
fn push_escaped(out: &mut String, raw: &str, special: &[char]) {
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\n' => out.push_str("\\n"),
            '\\' if chars.peek().is_none() => out.push_str("\\\\"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> MetricRecord {
        MetricRecord {
            timestamp: Utc.with_ymd_and_hms(2018, 3, 4, 13, 49, 52).unwrap(),
            bytes_sent: 2133,
            path: "/foo/".to_string(),
            method: "POST".to_string(),
            scheme: "http".to_string(),
            protocol: "HTTP/1.0".to_string(),
            status: "200".to_string(),
            upstream_time: 1.005,
            request_time: 1.854,
        }
    }

    #[test]
    fn maps_record_to_tags_and_fields() {
        let point = Point::from_record("log", &record());

        assert_eq!(point.measurement, "log");
        assert_eq!(point.tags["path"], "/foo/");
        assert_eq!(point.tags["method"], "POST");
        assert_eq!(point.tags["scheme"], "http");
        assert_eq!(point.tags["status"], "200");
        assert!(!point.tags.contains_key("protocol"));
        assert_eq!(point.fields["bytesSent"], FieldValue::Integer(2133));
        assert_eq!(point.fields["upstreamTime"], FieldValue::Float(1.005));
        assert_eq!(point.fields["requestTime"], FieldValue::Float(1.854));
    }

    #[test]
    fn encodes_line_protocol_in_seconds() {
        let line = Point::from_record("log", &record()).to_line_protocol(Precision::Seconds);
        assert_eq!(
            line,
            "log,method=POST,path=/foo/,scheme=http,status=200 \
             bytesSent=2133i,requestTime=1.854,upstreamTime=1.005 1520171392"
        );
    }

    #[test]
    fn escapes_tag_values_and_measurement() {
        let mut rec = record();
        rec.path = "/a b,c=d".to_string();
        let line = Point::from_record("http log", &rec).to_line_protocol(Precision::Seconds);

        assert!(line.starts_with("http\\ log,"));
        assert!(line.contains("path=/a\\ b\\,c\\=d,"));
    }

    #[test]
    fn backslashes_in_tags_are_kept_literally() {
        let mut rec = record();
        rec.path = r"/a\b".to_string();
        let line = Point::from_record("log", &rec).to_line_protocol(Precision::Seconds);
        assert!(line.contains(r"path=/a\b,"));

        rec.path = r"/dir\".to_string();
        let line = Point::from_record("log", &rec).to_line_protocol(Precision::Seconds);
        assert!(line.contains(r"path=/dir\\,"));
    }

    #[test]
    fn out_of_range_timestamp_is_left_to_the_store() {
        let mut rec = record();
        rec.timestamp = Utc.with_ymd_and_hms(3018, 3, 4, 13, 49, 52).unwrap();
        let line = Point::from_record("log", &rec).to_line_protocol(Precision::Seconds);
        assert!(line.ends_with("upstreamTime=1.005"));
    }

    #[test]
    fn omits_empty_tags_and_writes_zero_fields() {
        let mut rec = record();
        rec.path = String::new();
        rec.upstream_time = 0.0;
        let line = Point::from_record("log", &rec).to_line_protocol(Precision::Seconds);

        assert!(!line.contains("path="));
        assert!(line.contains("upstreamTime=0 "));
    }

    #[test]
    fn batch_body_is_newline_terminated() {
        let points = vec![
            Point::from_record("log", &record()),
            Point::from_record("log", &record()),
        ];
        let body = encode_batch(&points, Precision::Milliseconds);
        assert_eq!(body.lines().count(), 2);
        assert!(body.ends_with("1520171392000\n"));
    }
}
