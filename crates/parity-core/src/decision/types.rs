//! Decision problem and result types.
//!
//! Wire form is camelCase JSON. Collection order in a [`DecisionInput`] never
//! affects the result; engines work over id-sorted views.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::DecisionError;
use crate::canon;

/// Tie-break rule recorded in every trace.
pub const TIE_BREAK_RULE: &str = "lexicographic_by_action_id";

/// A candidate action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOption {
    pub id: String,
    pub label: String,
}

/// A possible state of the world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    /// In `[0, 1]` when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(default)]
    pub adversarial: bool,
}

/// `(actionId, scenarioId, utility)`, serialized as a JSON triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "(String, String, f64)", into = "(String, String, f64)")]
pub struct Outcome {
    pub action_id: String,
    pub scenario_id: String,
    pub utility: f64,
}

impl Outcome {
    pub fn new(action_id: impl Into<String>, scenario_id: impl Into<String>, utility: f64) -> Self {
        Self {
            action_id: action_id.into(),
            scenario_id: scenario_id.into(),
            utility,
        }
    }
}

impl From<(String, String, f64)> for Outcome {
    fn from((action_id, scenario_id, utility): (String, String, f64)) -> Self {
        Self {
            action_id,
            scenario_id,
            utility,
        }
    }
}

impl From<Outcome> for (String, String, f64) {
    fn from(o: Outcome) -> Self {
        (o.action_id, o.scenario_id, o.utility)
    }
}

/// Lifecycle of a constraint's truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintStatus {
    Assumption,
    Verified,
    Violated,
}

/// Closed set of constraint shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionConstraint {
    Deadline {
        id: String,
        /// Duration literal such as `"7d"`.
        value: String,
        status: ConstraintStatus,
    },
    Budget {
        id: String,
        limit: f64,
        status: ConstraintStatus,
    },
    Policy {
        id: String,
        rule: String,
        status: ConstraintStatus,
    },
    Custom {
        id: String,
        name: String,
        value: String,
        status: ConstraintStatus,
    },
}

impl DecisionConstraint {
    pub fn id(&self) -> &str {
        match self {
            Self::Deadline { id, .. }
            | Self::Budget { id, .. }
            | Self::Policy { id, .. }
            | Self::Custom { id, .. } => id,
        }
    }

    pub fn status(&self) -> ConstraintStatus {
        match self {
            Self::Deadline { status, .. }
            | Self::Budget { status, .. }
            | Self::Policy { status, .. }
            | Self::Custom { status, .. } => *status,
        }
    }
}

/// Evidence quality signals. All scores in `[0, 1]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<String>,
}

/// Typed opaque metadata value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

/// Caller metadata. Never scored and never fingerprinted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, MetaValue>,
}

/// A decision problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub actions: Vec<ActionOption>,
    pub scenarios: Vec<Scenario>,
    pub outcomes: Vec<Outcome>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<DecisionConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<DecisionEvidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DecisionMeta>,
}

impl DecisionInput {
    /// Structural and numeric validation.
    ///
    /// Caller errors are reported before any arithmetic: empty sets and
    /// out-of-range scores are `E_INVALID_INPUT`, id problems are `E_SCHEMA`,
    /// non-finite numbers are `E_CANON`.
    pub fn validate(&self) -> Result<(), DecisionError> {
        if self.actions.is_empty() {
            return Err(DecisionError::NoActions);
        }
        if self.scenarios.is_empty() {
            return Err(DecisionError::NoScenarios);
        }

        let mut action_ids = BTreeSet::new();
        for (i, action) in self.actions.iter().enumerate() {
            if action.id.is_empty() {
                return Err(DecisionError::EmptyId {
                    field: format!("actions[{i}].id"),
                });
            }
            if !action_ids.insert(action.id.as_str()) {
                return Err(DecisionError::DuplicateId {
                    field: "actions",
                    id: action.id.clone(),
                });
            }
        }

        let mut scenario_ids = BTreeSet::new();
        for (i, scenario) in self.scenarios.iter().enumerate() {
            if scenario.id.is_empty() {
                return Err(DecisionError::EmptyId {
                    field: format!("scenarios[{i}].id"),
                });
            }
            if !scenario_ids.insert(scenario.id.as_str()) {
                return Err(DecisionError::DuplicateId {
                    field: "scenarios",
                    id: scenario.id.clone(),
                });
            }
            if let Some(p) = scenario.probability {
                let p = canon::ensure_finite(&format!("scenarios[{i}].probability"), p)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(DecisionError::OutOfRange {
                        field: format!("scenarios[{i}].probability"),
                        value: p,
                    });
                }
            }
        }

        let mut cells = BTreeSet::new();
        for (i, outcome) in self.outcomes.iter().enumerate() {
            if !action_ids.contains(outcome.action_id.as_str()) {
                return Err(DecisionError::UnknownAction {
                    action_id: outcome.action_id.clone(),
                    scenario_id: outcome.scenario_id.clone(),
                });
            }
            if !scenario_ids.contains(outcome.scenario_id.as_str()) {
                return Err(DecisionError::UnknownScenario {
                    action_id: outcome.action_id.clone(),
                    scenario_id: outcome.scenario_id.clone(),
                });
            }
            if !cells.insert((outcome.action_id.as_str(), outcome.scenario_id.as_str())) {
                return Err(DecisionError::DuplicateOutcome {
                    action_id: outcome.action_id.clone(),
                    scenario_id: outcome.scenario_id.clone(),
                });
            }
            canon::ensure_finite(&format!("outcomes[{i}][2]"), outcome.utility)?;
        }

        let mut constraint_ids = BTreeSet::new();
        for (i, constraint) in self.constraints.iter().enumerate() {
            if !constraint_ids.insert(constraint.id()) {
                return Err(DecisionError::DuplicateId {
                    field: "constraints",
                    id: constraint.id().to_string(),
                });
            }
            if let DecisionConstraint::Budget { limit, .. } = constraint {
                canon::ensure_finite(&format!("constraints[{i}].limit"), *limit)?;
            }
        }

        if let Some(evidence) = &self.evidence {
            for (name, value) in [
                ("drift", evidence.drift),
                ("trust", evidence.trust),
                ("policy", evidence.policy),
            ] {
                if let Some(v) = value {
                    let field = format!("evidence.{name}");
                    let v = canon::ensure_finite(&field, v)?;
                    if !(0.0..=1.0).contains(&v) {
                        return Err(DecisionError::OutOfRange { field, value: v });
                    }
                }
            }
        }

        if let Some(meta) = &self.meta {
            for (key, value) in &meta.labels {
                if let MetaValue::Float(f) = value {
                    canon::ensure_finite(&format!("meta.labels.{key}"), *f)?;
                }
            }
        }

        Ok(())
    }

    /// Id-sorted view used for fingerprinting. `meta` is excluded.
    pub fn normalized(&self) -> DecisionInput {
        let mut actions = self.actions.clone();
        actions.sort_by(|a, b| a.id.cmp(&b.id));
        let mut scenarios = self.scenarios.clone();
        scenarios.sort_by(|a, b| a.id.cmp(&b.id));
        let mut outcomes = self.outcomes.clone();
        outcomes.sort_by(|a, b| {
            a.action_id
                .cmp(&b.action_id)
                .then_with(|| a.scenario_id.cmp(&b.scenario_id))
        });
        let mut constraints = self.constraints.clone();
        constraints.sort_by(|a, b| a.id().cmp(b.id()));

        DecisionInput {
            id: self.id.clone(),
            actions,
            scenarios,
            outcomes,
            constraints,
            evidence: self.evidence.clone(),
            meta: None,
        }
    }
}

/// Raw metric values for one action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetrics {
    /// Minimum utility across all scenarios. Higher is better.
    pub worst_case: f64,
    /// Maximum regret across all scenarios. Lower is better.
    pub minimax_regret: f64,
    /// Minimum utility across adversarial scenarios, `0` when there are none.
    pub adversarial: f64,
}

/// One entry of the ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedAction {
    pub action_id: String,
    /// Composite score in `[0, 1]`.
    pub score: f64,
    pub metrics: ActionMetrics,
    pub confidence: f64,
    /// 1-based position.
    pub rank: usize,
    pub recommended: bool,
}

/// Composite score weights. Regret is inverted before weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeWeights {
    pub worst_case: f64,
    pub minimax_regret: f64,
    pub adversarial: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            worst_case: 0.4,
            minimax_regret: 0.4,
            adversarial: 0.2,
        }
    }
}

/// Intermediate tables, keyed by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTrace {
    pub utility_table: BTreeMap<String, BTreeMap<String, f64>>,
    pub worst_case_table: BTreeMap<String, f64>,
    pub regret_table: BTreeMap<String, BTreeMap<String, f64>>,
    pub max_regret_table: BTreeMap<String, f64>,
    pub adversarial_table: BTreeMap<String, f64>,
    pub composite_weights: CompositeWeights,
    pub tie_break_rule: String,
}

/// Result of an evaluation. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionOutput {
    pub ranked_actions: Vec<RankedAction>,
    pub determinism_fingerprint: String,
    pub trace: DecisionTrace,
}

impl DecisionOutput {
    pub fn recommended_action_id(&self) -> Option<&str> {
        self.ranked_actions
            .iter()
            .find(|a| a.recommended)
            .map(|a| a.action_id.as_str())
    }
}

/// Sensitivity of the current top action to one scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlipDistance {
    pub scenario_id: String,
    pub distance: f64,
    pub new_top_action: String,
}

/// Current top action and the nearest ways to displace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionBoundary {
    pub top_action: String,
    pub nearest_flips: Vec<FlipDistance>,
}

/// Verdict on an agent's claimed top action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefereeAdjudication {
    pub accepted: bool,
    pub agent_claim: Option<String>,
    pub boundary: DecisionBoundary,
    pub what_would_change: Vec<String>,
}

/// When a piece of evidence is worth gathering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiRecommendation {
    DoNow,
    PlanLater,
    Defer,
}

/// Evidence-gathering action ranked by expected value of information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiRanking {
    pub action_id: String,
    pub evoi: f64,
    pub recommendation: VoiRecommendation,
    pub rationale: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub id: String,
    pub rationale: Vec<String>,
}

/// Evidence actions worth doing now, capped at `bounded_horizon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegretBoundedPlan {
    pub id: String,
    pub decision_id: String,
    pub actions: Vec<PlannedAction>,
    pub bounded_horizon: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> DecisionInput {
        DecisionInput {
            id: Some("d1".into()),
            actions: vec![
                ActionOption { id: "a".into(), label: "A".into() },
                ActionOption { id: "b".into(), label: "B".into() },
            ],
            scenarios: vec![Scenario { id: "s".into(), probability: Some(1.0), adversarial: false }],
            outcomes: vec![Outcome::new("a", "s", 1.0), Outcome::new("b", "s", 2.0)],
            constraints: vec![],
            evidence: None,
            meta: None,
        }
    }

    #[test]
    fn outcome_serializes_as_triple() {
        let json = serde_json::to_value(Outcome::new("a", "s", 1.5)).unwrap();
        assert_eq!(json, json!(["a", "s", 1.5]));
    }

    #[test]
    fn input_wire_form_is_camel_case() {
        let raw = json!({
            "actions": [{"id": "a", "label": "A"}],
            "scenarios": [{"id": "s"}],
            "outcomes": [["a", "s", 3]],
            "constraints": [{"type": "deadline", "id": "c1", "value": "7d", "status": "assumption"}],
            "meta": {"createdAt": "2026-01-01T00:00:00Z", "labels": {"team": {"type": "text", "value": "ops"}}}
        });
        let parsed: DecisionInput = serde_json::from_value(raw).unwrap();
        assert_eq!(parsed.outcomes[0].utility, 3.0);
        assert_eq!(parsed.constraints[0].id(), "c1");
        assert_eq!(parsed.constraints[0].status(), ConstraintStatus::Assumption);
        let meta = parsed.meta.unwrap();
        assert_eq!(meta.labels["team"], MetaValue::Text("ops".into()));
        assert!(!parsed.scenarios[0].adversarial);
    }

    #[test]
    fn validate_rejects_empty_actions() {
        let mut i = input();
        i.actions.clear();
        let err = i.validate().unwrap_err();
        assert_eq!(err.code(), "E_INVALID_INPUT");
    }

    #[test]
    fn validate_rejects_unknown_reference() {
        let mut i = input();
        i.outcomes.push(Outcome::new("ghost", "s", 0.0));
        assert_eq!(i.validate().unwrap_err().code(), "E_SCHEMA");

        let mut i = input();
        i.outcomes.push(Outcome::new("a", "nowhere", 0.0));
        assert_eq!(i.validate().unwrap_err().code(), "E_SCHEMA");
    }

    #[test]
    fn validate_rejects_duplicate_ids_and_cells() {
        let mut i = input();
        i.actions.push(ActionOption { id: "a".into(), label: "again".into() });
        assert!(matches!(i.validate(), Err(DecisionError::DuplicateId { field: "actions", .. })));

        let mut i = input();
        i.outcomes.push(Outcome::new("a", "s", 9.0));
        assert!(matches!(i.validate(), Err(DecisionError::DuplicateOutcome { .. })));
    }

    #[test]
    fn validate_rejects_non_finite_utility() {
        let mut i = input();
        i.outcomes[0].utility = f64::NAN;
        let err = i.validate().unwrap_err();
        assert_eq!(err.code(), "E_CANON");
        assert!(err.to_string().contains("outcomes[0][2]"));
    }

    #[test]
    fn validate_rejects_out_of_range_probability() {
        let mut i = input();
        i.scenarios[0].probability = Some(1.5);
        assert_eq!(i.validate().unwrap_err().code(), "E_INVALID_INPUT");
    }

    #[test]
    fn normalized_is_order_independent_and_drops_meta() {
        let mut a = input();
        a.meta = Some(DecisionMeta { created_at: Some("now".into()), ..Default::default() });
        let mut b = input();
        b.actions.reverse();
        b.outcomes.reverse();
        assert_eq!(a.normalized(), b.normalized());
        assert!(a.normalized().meta.is_none());
    }

    #[test]
    fn composite_weights_sum_to_one() {
        let w = CompositeWeights::default();
        assert!((w.worst_case + w.minimax_regret + w.adversarial - 1.0).abs() < 1e-12);
    }
}
