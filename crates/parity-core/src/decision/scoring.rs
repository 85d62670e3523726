//! Ranking, confidence and fingerprinting shared by every engine.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use super::types::*;
use super::Result;
use crate::canon;

/// Metric tables produced by an engine kernel. Values are already quantized.
pub(crate) struct MetricTables {
    pub utility: BTreeMap<String, BTreeMap<String, f64>>,
    pub worst_case: BTreeMap<String, f64>,
    pub regret: BTreeMap<String, BTreeMap<String, f64>>,
    pub max_regret: BTreeMap<String, f64>,
    /// Empty when the input has no adversarial scenarios.
    pub adversarial: BTreeMap<String, f64>,
    /// Number of (action, scenario) cells with an explicit outcome.
    pub filled_cells: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintPayload<'a> {
    input: DecisionInput,
    ranked_actions: &'a [RankedAction],
}

fn bounds<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

/// Map `value` into `[0, 1]`. A degenerate range maps to `1`.
fn normalize_to_range(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < 1e-12 {
        return 1.0;
    }
    canon::quantize((value - min) / (max - min))
}

fn evidence_density(input: &DecisionInput, filled_cells: usize) -> f64 {
    let cells = (input.actions.len() * input.scenarios.len()) as f64;
    let fill = if cells > 0.0 { filled_cells as f64 / cells } else { 0.0 };
    let (trust, drift) = input
        .evidence
        .as_ref()
        .map(|e| (e.trust.unwrap_or(1.0), e.drift.unwrap_or(0.0)))
        .unwrap_or((1.0, 0.0));
    fill * trust * (1.0 - drift)
}

fn compare_ranked(a: &RankedAction, b: &RankedAction) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.action_id.cmp(&b.action_id))
}

/// Every table cell must be finite before anything is ranked or hashed.
/// Finite utilities can still overflow into an infinite regret.
fn ensure_finite_tables(tables: &MetricTables) -> Result<()> {
    for (name, table) in [("utilityTable", &tables.utility), ("regretTable", &tables.regret)] {
        for (action_id, row) in table {
            for (scenario_id, &value) in row {
                canon::ensure_finite(&format!("trace.{name}.{action_id}.{scenario_id}"), value)?;
            }
        }
    }
    for (name, column) in [
        ("worstCaseTable", &tables.worst_case),
        ("maxRegretTable", &tables.max_regret),
        ("adversarialTable", &tables.adversarial),
    ] {
        for (action_id, &value) in column {
            canon::ensure_finite(&format!("trace.{name}.{action_id}"), value)?;
        }
    }
    Ok(())
}

/// Rank actions and seal the output with its fingerprint.
pub(crate) fn assemble(input: &DecisionInput, tables: MetricTables) -> Result<DecisionOutput> {
    ensure_finite_tables(&tables)?;

    let weights = CompositeWeights::default();
    let has_adversarial = !tables.adversarial.is_empty();

    let (wc_min, wc_max) = bounds(tables.worst_case.values());
    let (mr_min, mr_max) = bounds(tables.max_regret.values());
    let (adv_min, adv_max) = bounds(tables.adversarial.values());
    let density = evidence_density(input, tables.filled_cells);

    let mut ranked: Vec<RankedAction> = tables
        .worst_case
        .iter()
        .map(|(action_id, &worst_case)| {
            let minimax_regret = tables.max_regret.get(action_id).copied().unwrap_or(0.0);
            let adversarial = tables.adversarial.get(action_id).copied().unwrap_or(0.0);

            let norm_wc = normalize_to_range(worst_case, wc_min, wc_max);
            let norm_mr = 1.0 - normalize_to_range(minimax_regret, mr_min, mr_max);
            let norm_adv = if has_adversarial {
                normalize_to_range(adversarial, adv_min, adv_max)
            } else {
                0.0
            };

            let score = canon::quantize(
                weights.worst_case * norm_wc
                    + weights.minimax_regret * norm_mr
                    + weights.adversarial * norm_adv,
            );
            let confidence = canon::quantize((0.5 * score + 0.5 * density).clamp(0.0, 1.0));

            RankedAction {
                action_id: action_id.clone(),
                score,
                metrics: ActionMetrics {
                    worst_case,
                    minimax_regret,
                    adversarial,
                },
                confidence,
                rank: 0,
                recommended: false,
            }
        })
        .collect();

    // Normalization over a range wider than f64::MAX yields NaN.
    for action in &ranked {
        let id = &action.action_id;
        canon::ensure_finite(&format!("rankedActions.{id}.score"), action.score)?;
        canon::ensure_finite(&format!("rankedActions.{id}.confidence"), action.confidence)?;
    }

    ranked.sort_by(compare_ranked);
    for (i, action) in ranked.iter_mut().enumerate() {
        action.rank = i + 1;
        action.recommended = i == 0;
    }

    let determinism_fingerprint = canon::fingerprint_serializable(&FingerprintPayload {
        input: input.normalized(),
        ranked_actions: &ranked,
    })?;

    Ok(DecisionOutput {
        ranked_actions: ranked,
        determinism_fingerprint,
        trace: DecisionTrace {
            utility_table: tables.utility,
            worst_case_table: tables.worst_case,
            regret_table: tables.regret,
            max_regret_table: tables.max_regret,
            adversarial_table: tables.adversarial,
            composite_weights: weights,
            tie_break_rule: TIE_BREAK_RULE.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canon::CanonError;
    use crate::decision::{DecisionEngine, DecisionError, NativeEngine, PortableEngine};

    fn extreme_input(high: f64, low: f64) -> DecisionInput {
        DecisionInput {
            id: None,
            actions: vec![
                ActionOption { id: "a".into(), label: "A".into() },
                ActionOption { id: "b".into(), label: "B".into() },
            ],
            scenarios: vec![Scenario { id: "s".into(), probability: None, adversarial: false }],
            outcomes: vec![Outcome::new("a", "s", high), Outcome::new("b", "s", low)],
            constraints: vec![],
            evidence: None,
            meta: None,
        }
    }

    #[test]
    fn degenerate_range_is_one() {
        assert_eq!(normalize_to_range(5.0, 5.0, 5.0), 1.0);
        assert_eq!(normalize_to_range(5.0, 0.0, 10.0), 0.5);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let mk = |id: &str, score: f64| RankedAction {
            action_id: id.into(),
            score,
            metrics: ActionMetrics { worst_case: 0.0, minimax_regret: 0.0, adversarial: 0.0 },
            confidence: 0.0,
            rank: 0,
            recommended: false,
        };
        let mut v = vec![mk("zeta", 0.5), mk("alpha", 0.5), mk("mid", 0.9)];
        v.sort_by(compare_ranked);
        let ids: Vec<_> = v.iter().map(|a| a.action_id.as_str()).collect();
        assert_eq!(ids, ["mid", "alpha", "zeta"]);
    }

    #[test]
    fn overflowing_regret_is_rejected_before_hashing() {
        let input = extreme_input(1e308, -1e308);
        let engines: [&dyn DecisionEngine; 2] = [&NativeEngine::new(), &PortableEngine::new()];
        for engine in engines {
            let err = engine.evaluate(&input).unwrap_err();
            assert_eq!(err.code(), "E_CANON", "{}", engine.id());
            match err {
                DecisionError::Canon(CanonError::NonFinite { path }) => {
                    assert_eq!(path, "trace.regretTable.b.s");
                }
                other => panic!("unexpected error from {}: {other:?}", engine.id()),
            }
        }
    }

    #[test]
    fn wide_but_finite_utilities_still_rank() {
        let input = extreme_input(1e300, -1e300);
        let native = NativeEngine::new().evaluate(&input).unwrap();
        let portable = PortableEngine::new().evaluate(&input).unwrap();
        assert_eq!(native.determinism_fingerprint, portable.determinism_fingerprint);
        assert_eq!(native.ranked_actions[0].action_id, "a");
        assert!(native.ranked_actions.iter().all(|a| a.score.is_finite()));
    }
}
