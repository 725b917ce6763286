use chrono::{DateTime, Utc};
use hyper::Uri;
use percent_encoding::percent_decode_str;

pub const LINE_PREVIEW_LIMIT: usize = 256;

/// `[04/Mar/2018:13:49:52 +0000]` without the brackets.
pub const LOG_TIMESTAMP_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Strips trailing `\r` and spaces left after the newline was removed.
pub(crate) fn trim_line_bytes(mut line: Vec<u8>) -> Vec<u8> {
    while line.last().map(|b| *b == b'\r' || *b == b' ') == Some(true) {
        line.pop();
    }
    line
}

/// Creates a preview string from a byte slice, truncating at `limit` characters with ellipsis.
pub(crate) fn line_preview(line: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(line);
    let mut preview = String::new();
    for (idx, ch) in text.chars().enumerate() {
        if idx >= limit {
            preview.push('…');
            return preview;
        }
        preview.push(ch);
    }
    preview
}

/// Only times representable as `i64` nanoseconds since the epoch are accepted, which
/// is the range the store can hold (1677-09-21 to 2262-04-11).
pub(crate) fn parse_log_timestamp(input: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(input.trim(), LOG_TIMESTAMP_FORMAT)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
        .filter(|ts| ts.timestamp_nanos_opt().is_some())
}

/// Returns the percent-decoded path of a request target, dropping query and fragment.
pub(crate) fn request_path(target: &str) -> Option<String> {
    let uri: Uri = target.parse().ok()?;
    let decoded = percent_decode_str(uri.path()).decode_utf8().ok()?;
    Some(decoded.into_owned())
}

/// Timing fields use `-` when no upstream was contacted.
pub(crate) fn is_absent(value: &str) -> bool {
    value == "-"
}
