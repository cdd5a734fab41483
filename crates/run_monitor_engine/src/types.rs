use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    HttpStatus(u16),
    Timeout,
    /// Response body did not have the expected shape.
    Validation,
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::Validation => write!(f, "validation error"),
            FailureKind::Network => write!(f, "network error"),
        }
    }
}

/// Failure of one snapshot fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{resource}: {kind}: {message}")]
pub struct SnapshotError {
    pub resource: &'static str,
    pub kind: FailureKind,
    pub message: String,
}

impl SnapshotError {
    pub(crate) fn new(resource: &'static str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            resource,
            kind,
            message: message.into(),
        }
    }
}

/// Transport-level failure of an event stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("stream request rejected with http status {0}")]
    HttpStatus(u16),
    #[error("stream transport error: {0}")]
    Transport(String),
    #[error("malformed stream message: {0}")]
    Malformed(String),
    #[error("stream ended before the run reached a terminal event")]
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReconcilerError {
    #[error("run reconciler has shut down")]
    Closed,
}
