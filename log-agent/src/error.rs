//! Error types for the pipeline stage boundaries.
//!
//! Parse errors are recoverable and only ever counted. Tail and sink errors carry
//! enough information for the supervisor to decide between retrying and giving up.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek {} to offset {offset}: {source}", path.display())]
    Seek {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to read {} at offset {offset}: {source}", path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("tailer for {} gave up after {attempts} consecutive failures", path.display())]
    RestartsExhausted {
        path: PathBuf,
        attempts: u32,
        #[source]
        last: Box<TailError>,
    },
}

/// Reasons a line is rejected by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line does not match access log grammar")]
    GrammarMismatch,

    #[error("request line has {0} tokens, expected 3")]
    RequestTokens(usize),

    #[error("invalid request target {0:?}")]
    InvalidTarget(String),

    #[error("invalid {field} value {value:?}")]
    InvalidField { field: &'static str, value: String },
}

impl ParseError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::GrammarMismatch => "grammar",
            ParseError::RequestTokens(_) => "request_tokens",
            ParseError::InvalidTarget(_) => "target",
            ParseError::InvalidField { .. } => "field",
        }
    }
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("connection descriptor must have 5 '@'-separated parts, found {0}")]
    PartCount(usize),

    #[error("connection descriptor is missing the {0}")]
    Missing(&'static str),

    #[error("unsupported timestamp precision {0:?}")]
    Precision(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to connect to store: {0}")]
    Connect(String),

    #[error("failed to write points: {0}")]
    Write(String),

    #[error("store rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("sink I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        last: Box<SinkError>,
    },

    #[error("cancelled")]
    Cancelled,
}

impl SinkError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            SinkError::Connect(_) | SinkError::Write(_) | SinkError::Io(_) => true,
            SinkError::Rejected { status, .. } => *status == 429 || *status >= 500,
            SinkError::RetriesExhausted { .. } | SinkError::Cancelled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_restarts_keep_the_last_failure() {
        let path = PathBuf::from("/tmp/access.log");
        let err = TailError::RestartsExhausted {
            path: path.clone(),
            attempts: 3,
            last: Box::new(TailError::Read {
                path,
                offset: 10,
                source: io::Error::other("boom"),
            }),
        };
        assert!(err.to_string().contains("3 consecutive failures"));
        let source = std::error::Error::source(&err).expect("source is kept");
        assert!(source.to_string().contains("offset 10"));
    }

    #[test]
    fn classifies_store_status_codes() {
        let rejected = |status| SinkError::Rejected {
            status,
            body: String::new(),
        };
        assert!(rejected(503).is_retryable());
        assert!(rejected(429).is_retryable());
        assert!(!rejected(400).is_retryable());
        assert!(!rejected(401).is_retryable());
        assert!(SinkError::Connect("refused".into()).is_retryable());
        assert!(!SinkError::Cancelled.is_retryable());
    }
}
