//! Crate-level error taxonomy and the boundary error envelope.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::canon::CanonError;
use crate::cas::CasError;
use crate::config::ConfigError;
use crate::decision::DecisionError;
use crate::dual_run::{EventError, ExecutionError, ReportError};
use crate::proof::ProofError;
use crate::signing::SigningError;

/// Classification every error maps onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Schema,
    InvalidInput,
    NotFound,
    Internal,
    Canon,
    Mismatch,
    CasIntegrity,
    EngineUnavailable,
    QueueFull,
    RemoteValidation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::EngineUnavailable | Self::QueueFull | Self::RemoteValidation)
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Mismatch | Self::CasIntegrity => Severity::Critical,
            Self::QueueFull | Self::RemoteValidation => Severity::Warning,
            _ => Severity::Error,
        }
    }

    /// Boundary code. Kinds without a dedicated code surface as `E_INTERNAL`.
    pub fn code(self) -> &'static str {
        match self {
            Self::Schema => "E_SCHEMA",
            Self::InvalidInput => "E_INVALID_INPUT",
            Self::NotFound => "E_NOT_FOUND",
            Self::Canon => "E_CANON",
            _ => "E_INTERNAL",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Schema => "schema",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
            Self::Canon => "canon",
            Self::Mismatch => "mismatch",
            Self::CasIntegrity => "cas_integrity",
            Self::EngineUnavailable => "engine_unavailable",
            Self::QueueFull => "queue_full",
            Self::RemoteValidation => "remote_validation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{code, message, details}` as returned across the decision boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ParityError {
    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Cas(#[from] CasError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error(transparent)]
    Signing(#[from] SigningError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("dual-run mismatch: primary {primary}, secondary {secondary}")]
    Mismatch { primary: String, secondary: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ParityError>;

fn decision_kind(e: &DecisionError) -> ErrorKind {
    match e {
        DecisionError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
        DecisionError::Canon(_) => ErrorKind::Canon,
        other => match other.code() {
            "E_SCHEMA" => ErrorKind::Schema,
            _ => ErrorKind::InvalidInput,
        },
    }
}

fn cas_kind(e: &CasError) -> ErrorKind {
    match e {
        CasError::NotFound(_) => ErrorKind::NotFound,
        CasError::InvalidCid(_) => ErrorKind::Schema,
        CasError::Integrity { .. } => ErrorKind::CasIntegrity,
        CasError::Canon(_) => ErrorKind::Canon,
        CasError::Io(_) => ErrorKind::Internal,
    }
}

fn proof_kind(e: &ProofError) -> ErrorKind {
    match e {
        ProofError::EmptyTree | ProofError::MalformedCid { .. } | ProofError::Serialization(_) => ErrorKind::Schema,
        ProofError::Inconsistent(_) => ErrorKind::InvalidInput,
        ProofError::Canon(_) => ErrorKind::Canon,
        ProofError::Cas(e) => cas_kind(e),
        ProofError::Io(_) => ErrorKind::Internal,
    }
}

impl ExecutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decision(e) => decision_kind(e),
            Self::Selection(_) => ErrorKind::EngineUnavailable,
            Self::Config(_) => ErrorKind::InvalidInput,
            Self::Proof(e) => proof_kind(e),
            Self::Join(_) => ErrorKind::Internal,
        }
    }
}

impl ParityError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Canon(_) => ErrorKind::Canon,
            Self::Decision(e) => decision_kind(e),
            Self::Cas(e) => cas_kind(e),
            Self::Proof(e) => proof_kind(e),
            Self::Signing(e) => match e {
                SigningError::UnknownSigner(_) => ErrorKind::NotFound,
                SigningError::Key { .. } | SigningError::Unsigned => ErrorKind::InvalidInput,
                SigningError::Proof(e) => proof_kind(e),
                SigningError::Io(_) => ErrorKind::Internal,
            },
            Self::Execution(e) => e.kind(),
            Self::Event(EventError::QueueFull) => ErrorKind::QueueFull,
            Self::Event(_) => ErrorKind::Internal,
            Self::Report(ReportError::NotFound(_)) => ErrorKind::NotFound,
            Self::Report(_) => ErrorKind::Internal,
            Self::Config(_) => ErrorKind::InvalidInput,
            Self::Mismatch { .. } => ErrorKind::Mismatch,
            Self::Serialization(_) => ErrorKind::Schema,
            Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Field path for caller errors that name one.
    fn field(&self) -> Option<String> {
        match self {
            Self::Decision(e) | Self::Execution(ExecutionError::Decision(e)) => e.field(),
            Self::Canon(CanonError::NonFinite { path }) => Some(path.clone()),
            Self::Proof(ProofError::MalformedCid { field, .. }) => Some(field.clone()),
            _ => None,
        }
    }

    pub fn to_envelope(&self) -> ErrorEnvelope {
        let kind = self.kind();
        let mut details = json!({
            "kind": kind,
            "retryable": kind.is_retryable(),
            "severity": kind.severity(),
        });
        if let Some(field) = self.field() {
            details["field"] = Value::String(field);
        }
        ErrorEnvelope {
            code: kind.code().to_string(),
            message: self.to_string(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::Cid;

    #[test]
    fn kinds_map_to_boundary_codes() {
        let err = ParityError::from(DecisionError::NoActions);
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_envelope().code, "E_INVALID_INPUT");

        let err = ParityError::from(DecisionError::UnknownScenario {
            action_id: "a".into(),
            scenario_id: "zzz".into(),
        });
        assert_eq!(err.to_envelope().code, "E_SCHEMA");

        let err = ParityError::from(CasError::NotFound(Cid::compute(b"x")));
        assert_eq!(err.to_envelope().code, "E_NOT_FOUND");
    }

    #[test]
    fn critical_kinds_are_not_retryable() {
        for kind in [ErrorKind::Mismatch, ErrorKind::CasIntegrity] {
            assert_eq!(kind.severity(), Severity::Critical);
            assert!(!kind.is_retryable());
            assert_eq!(kind.code(), "E_INTERNAL");
        }
        assert!(ErrorKind::EngineUnavailable.is_retryable());
        assert!(ErrorKind::QueueFull.is_retryable());
        assert_eq!(ErrorKind::QueueFull.severity(), Severity::Warning);
    }

    #[test]
    fn envelope_carries_field_path() {
        let err = ParityError::from(DecisionError::OutOfRange {
            field: "scenarios[1].probability".into(),
            value: 1.5,
        });
        let env = err.to_envelope();
        assert_eq!(env.details["field"], "scenarios[1].probability");
        assert_eq!(env.details["kind"], "invalid_input");
        assert_eq!(env.details["retryable"], false);
    }

    #[test]
    fn execution_errors_unwrap_to_their_cause() {
        let err = ParityError::from(ExecutionError::from(DecisionError::NoScenarios));
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert_eq!(err.to_envelope().details["field"], "scenarios");
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(serde_json::to_value(ErrorKind::CasIntegrity).unwrap(), "cas_integrity");
        assert_eq!(ErrorKind::RemoteValidation.to_string(), "remote_validation");
    }
}
