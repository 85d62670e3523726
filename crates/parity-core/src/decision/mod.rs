//! Robust decision evaluation under scenario uncertainty.
//!
//! Three criteria feed a weighted composite:
//! - worst-case (maximin) utility
//! - minimax regret, inverted so lower regret scores higher
//! - worst-case over the adversarial scenario subset
//!
//! [`NativeEngine`] and [`PortableEngine`] compute the metric tables with
//! different data layouts and share ranking, confidence and fingerprinting,
//! so identical input yields byte-identical fingerprints.

pub mod native;
pub mod portable;
mod scoring;
pub mod sensitivity;
pub mod types;

use crate::canon::CanonError;

pub use native::NativeEngine;
pub use portable::PortableEngine;
pub use sensitivity::{
    compute_flip_distances, explain_decision_boundary, generate_regret_bounded_plan, rank_evidence_by_voi,
    referee_proposal,
};
pub use types::*;

/// Decision evaluation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecisionError {
    #[error("no actions provided")]
    NoActions,

    #[error("no scenarios provided")]
    NoScenarios,

    #[error("empty id at {field}")]
    EmptyId { field: String },

    #[error("duplicate id in {field}: {id}")]
    DuplicateId { field: &'static str, id: String },

    #[error("outcome ({action_id}, {scenario_id}) references unknown action {action_id}")]
    UnknownAction {
        action_id: String,
        scenario_id: String,
    },

    #[error("outcome ({action_id}, {scenario_id}) references unknown scenario {scenario_id}")]
    UnknownScenario {
        action_id: String,
        scenario_id: String,
    },

    #[error("duplicate outcome for ({action_id}, {scenario_id})")]
    DuplicateOutcome {
        action_id: String,
        scenario_id: String,
    },

    #[error("{field} out of range [0, 1]: {value}")]
    OutOfRange { field: String, value: f64 },

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error("engine {engine} is unavailable")]
    EngineUnavailable { engine: String },
}

impl DecisionError {
    /// Boundary error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActions | Self::NoScenarios | Self::OutOfRange { .. } => "E_INVALID_INPUT",
            Self::EmptyId { .. }
            | Self::DuplicateId { .. }
            | Self::UnknownAction { .. }
            | Self::UnknownScenario { .. }
            | Self::DuplicateOutcome { .. } => "E_SCHEMA",
            Self::Canon(_) => "E_CANON",
            Self::EngineUnavailable { .. } => "E_INTERNAL",
        }
    }

    /// Field path the error refers to, when there is one.
    pub fn field(&self) -> Option<String> {
        match self {
            Self::NoActions => Some("actions".into()),
            Self::NoScenarios => Some("scenarios".into()),
            Self::EmptyId { field } | Self::OutOfRange { field, .. } => Some(field.clone()),
            Self::DuplicateId { field, .. } => Some((*field).to_string()),
            Self::UnknownAction { .. } | Self::UnknownScenario { .. } | Self::DuplicateOutcome { .. } => {
                Some("outcomes".into())
            }
            Self::Canon(CanonError::NonFinite { path }) => Some(path.clone()),
            Self::Canon(_) | Self::EngineUnavailable { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DecisionError>;

/// One implementation of the decision contract.
///
/// `evaluate` is pure and callable concurrently.
pub trait DecisionEngine: Send + Sync {
    /// Stable identifier, e.g. `"native"`.
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// Whether the engine can currently serve requests.
    fn is_available(&self) -> bool {
        true
    }

    fn evaluate(&self, input: &DecisionInput) -> Result<DecisionOutput>;
}

/// Evaluate with the portable reference engine.
pub fn evaluate(input: &DecisionInput) -> Result<DecisionOutput> {
    PortableEngine::new().evaluate(input)
}
