//! Error types for parity-remote

use parity_core::config::ConfigError;
use parity_core::proof::ProofError;
use parity_core::ErrorKind;
use thiserror::Error;

/// A single failed submission attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the per-attempt timeout
    #[error("attempt timed out after {0} ms")]
    Timeout(u64),

    /// Could not reach the validator
    #[error("connection error: {0}")]
    Connection(String),

    /// Validator answered with a non-success status
    #[error("validator returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not a `ReplayValidationResponse`
    #[error("invalid validator response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Timeouts, connection failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Connection(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Errors surfaced to callers. Only raised when `fail_on_error` is set,
/// or for misconfiguration.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("remote validation failed after {attempts} attempt(s): {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("validator rejected bundle {bundle_id}: {reason}")]
    Rejected { bundle_id: String, reason: String },

    #[error("cannot build replay envelope: {0}")]
    Envelope(#[from] ProofError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Client(err.to_string())
    }
}

impl RemoteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::InvalidInput,
            Self::Envelope(_) => ErrorKind::Schema,
            Self::Client(_) => ErrorKind::Internal,
            Self::Exhausted { .. } | Self::Rejected { .. } => ErrorKind::RemoteValidation,
        }
    }
}

pub type Result<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(TransportError::Timeout(10).is_retryable());
        assert!(TransportError::Connection("refused".into()).is_retryable());
        assert!(TransportError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(TransportError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!TransportError::Status { status: 400, body: String::new() }.is_retryable());
        assert!(!TransportError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn remote_failures_have_their_own_kind() {
        let err = RemoteError::Exhausted {
            attempts: 4,
            source: TransportError::Timeout(5000),
        };
        assert_eq!(err.kind(), ErrorKind::RemoteValidation);
        assert!(err.to_string().contains("4 attempt(s)"));
    }
}
