//! Backend error types

use thiserror::Error;

/// Backend error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Http { status }, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Decode, message)
    }

    pub fn cancelled() -> Self {
        Self::new(BackendErrorKind::Cancelled, "request aborted")
    }

    /// True when the request was aborted through its cancellation token.
    pub fn is_cancelled(&self) -> bool {
        self.kind == BackendErrorKind::Cancelled
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::http(status.as_u16(), e.to_string())
        } else if e.is_decode() || e.is_body() {
            Self::decode(e.to_string())
        } else {
            Self::network(e.to_string())
        }
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Connection refused, reset, timed out, or the body stream broke mid-read
    Network,
    /// Non-success HTTP status
    Http { status: u16 },
    /// Response body was not what we expected
    Decode,
    /// Aborted by the caller; never a failure
    Cancelled,
}
