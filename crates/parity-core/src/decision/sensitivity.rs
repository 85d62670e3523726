//! Sensitivity of a computed ranking: how close each scenario is to
//! displacing the recommended action.

use std::cmp::Ordering;

use serde_json::json;

use super::types::*;
use super::Result;
use crate::canon::{self, quantize};

/// Utility delta that corresponds to a flip distance of `1.0`.
const FLIP_SCALE: f64 = 100.0;

fn utility(output: &DecisionOutput, action_id: &str, scenario_id: &str) -> f64 {
    output
        .trace
        .utility_table
        .get(action_id)
        .and_then(|row| row.get(scenario_id))
        .copied()
        .unwrap_or(0.0)
}

/// Per-scenario distance for the top action to be overtaken.
///
/// For each scenario the nearest challenger is the action whose utility is
/// closest to the top action's; ties go to the smaller action id. Results are
/// sorted by distance, then scenario id.
pub fn compute_flip_distances(input: &DecisionInput, output: &DecisionOutput) -> Vec<FlipDistance> {
    let Some(top) = output.recommended_action_id() else {
        return Vec::new();
    };

    let mut challengers: Vec<&str> = input
        .actions
        .iter()
        .map(|a| a.id.as_str())
        .filter(|id| *id != top)
        .collect();
    challengers.sort_unstable();

    let mut scenario_ids: Vec<&str> = input.scenarios.iter().map(|s| s.id.as_str()).collect();
    scenario_ids.sort_unstable();

    let mut flips: Vec<FlipDistance> = scenario_ids
        .into_iter()
        .filter_map(|scenario_id| {
            let top_utility = utility(output, top, scenario_id);
            challengers
                .iter()
                .map(|alt| {
                    let d = quantize((top_utility - utility(output, alt, scenario_id)).abs() / FLIP_SCALE);
                    (*alt, d)
                })
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal).then_with(|| a.0.cmp(b.0)))
                .map(|(alt, distance)| FlipDistance {
                    scenario_id: scenario_id.to_string(),
                    distance,
                    new_top_action: alt.to_string(),
                })
        })
        .collect();

    flips.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.scenario_id.cmp(&b.scenario_id))
    });
    flips
}

/// Rank evidence gathering by expected value of information.
///
/// One candidate per scenario, named `evidence_<scenarioId>`. Scenarios
/// nearer to flipping the ranking are worth more. An EVOI above twice
/// `min_evoi` is `do_now`, above `min_evoi` is `plan_later`, otherwise
/// `defer`. Sorted by EVOI descending, then id.
pub fn rank_evidence_by_voi(input: &DecisionInput, output: &DecisionOutput, min_evoi: f64) -> Vec<VoiRanking> {
    let mut rankings: Vec<VoiRanking> = compute_flip_distances(input, output)
        .into_iter()
        .enumerate()
        .map(|(i, flip)| {
            let evoi = quantize(1.0 / (i as f64 + 1.0 + flip.distance));
            let recommendation = if evoi > 2.0 * min_evoi {
                VoiRecommendation::DoNow
            } else if evoi > min_evoi {
                VoiRecommendation::PlanLater
            } else {
                VoiRecommendation::Defer
            };
            VoiRanking {
                action_id: format!("evidence_{}", flip.scenario_id),
                evoi,
                recommendation,
                rationale: vec![
                    format!(
                        "scenario {} flips to {} at distance {:.4}",
                        flip.scenario_id, flip.new_top_action, flip.distance
                    ),
                    format!("expected value of information {evoi:.4}"),
                ],
            }
        })
        .collect();

    rankings.sort_by(|a, b| {
        b.evoi
            .partial_cmp(&a.evoi)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.action_id.cmp(&b.action_id))
    });
    rankings
}

/// Plan up to `horizon` evidence actions, taking only `do_now` rankings in
/// rank order.
///
/// The plan id is the fingerprint of the decision id, the output's
/// fingerprint, `horizon` and `min_evoi`, so the same request always yields
/// the same plan. A non-finite `min_evoi` is rejected with `E_CANON`.
pub fn generate_regret_bounded_plan(
    input: &DecisionInput,
    output: &DecisionOutput,
    horizon: usize,
    min_evoi: f64,
) -> Result<RegretBoundedPlan> {
    let decision_id = input.id.clone().unwrap_or_default();
    let id = canon::fingerprint(&json!({
        "decisionId": decision_id,
        "determinismFingerprint": output.determinism_fingerprint,
        "horizon": horizon,
        "minEvoi": canon::ensure_finite("minEvoi", min_evoi)?,
    }))?;

    let actions = rank_evidence_by_voi(input, output, min_evoi)
        .into_iter()
        .filter(|r| r.recommendation == VoiRecommendation::DoNow)
        .take(horizon)
        .map(|r| PlannedAction {
            id: r.action_id,
            rationale: r.rationale,
        })
        .collect();

    Ok(RegretBoundedPlan {
        id,
        decision_id,
        actions,
        bounded_horizon: horizon,
    })
}

/// Top action plus its two nearest flips.
pub fn explain_decision_boundary(input: &DecisionInput, output: &DecisionOutput) -> DecisionBoundary {
    DecisionBoundary {
        top_action: output.recommended_action_id().unwrap_or_default().to_string(),
        nearest_flips: compute_flip_distances(input, output).into_iter().take(2).collect(),
    }
}

/// Accept `claim` only if it names the computed top action.
pub fn referee_proposal(
    input: &DecisionInput,
    output: &DecisionOutput,
    claim: Option<&str>,
) -> RefereeAdjudication {
    let boundary = explain_decision_boundary(input, output);
    let accepted = claim == Some(boundary.top_action.as_str());

    let what_would_change = if accepted {
        vec!["claim matches the computed top action".to_string()]
    } else {
        let mut notes = vec![format!(
            "claimed action '{}' differs from computed top action '{}'",
            claim.unwrap_or("none"),
            boundary.top_action
        )];
        match boundary.nearest_flips.first() {
            Some(flip) => notes.push(format!(
                "nearest flip: scenario {} at distance {:.4} promotes {}",
                flip.scenario_id, flip.distance, flip.new_top_action
            )),
            None => notes.push("no scenario can flip the ranking".to_string()),
        }
        notes
    };

    RefereeAdjudication {
        accepted,
        agent_claim: claim.map(str::to_string),
        boundary,
        what_would_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{evaluate, ActionOption, Outcome, Scenario};

    fn input() -> DecisionInput {
        DecisionInput {
            id: Some("commit".into()),
            actions: vec![
                ActionOption { id: "verify_terms".into(), label: "Verify".into() },
                ActionOption { id: "commit_now".into(), label: "Commit".into() },
            ],
            scenarios: vec![
                Scenario { id: "favorable".into(), probability: Some(0.5), adversarial: false },
                Scenario { id: "unfavorable".into(), probability: Some(0.5), adversarial: true },
            ],
            outcomes: vec![
                Outcome::new("verify_terms", "favorable", 60.0),
                Outcome::new("verify_terms", "unfavorable", 50.0),
                Outcome::new("commit_now", "favorable", 100.0),
                Outcome::new("commit_now", "unfavorable", -40.0),
            ],
            constraints: vec![],
            evidence: None,
            meta: None,
        }
    }

    #[test]
    fn flip_distances_sorted_ascending() {
        let i = input();
        let out = evaluate(&i).unwrap();
        assert_eq!(out.recommended_action_id(), Some("verify_terms"));

        let flips = compute_flip_distances(&i, &out);
        assert_eq!(flips.len(), 2);
        assert_eq!(flips[0].scenario_id, "favorable");
        assert!((flips[0].distance - 0.4).abs() < 1e-9);
        assert!((flips[1].distance - 0.9).abs() < 1e-9);
        assert!(flips.iter().all(|f| f.new_top_action == "commit_now"));
    }

    #[test]
    fn boundary_keeps_two_nearest() {
        let mut i = input();
        i.scenarios.push(Scenario { id: "flat".into(), probability: None, adversarial: false });
        let out = evaluate(&i).unwrap();
        let boundary = explain_decision_boundary(&i, &out);
        assert_eq!(boundary.nearest_flips.len(), 2);
        assert_eq!(boundary.top_action, out.recommended_action_id().unwrap());
    }

    #[test]
    fn referee_accepts_matching_claim() {
        let i = input();
        let out = evaluate(&i).unwrap();
        let verdict = referee_proposal(&i, &out, Some("verify_terms"));
        assert!(verdict.accepted);
        assert_eq!(verdict.what_would_change.len(), 1);
    }

    #[test]
    fn referee_rejects_with_notes() {
        let i = input();
        let out = evaluate(&i).unwrap();
        let verdict = referee_proposal(&i, &out, Some("commit_now"));
        assert!(!verdict.accepted);
        assert!(verdict.what_would_change[0].contains("commit_now"));
        assert!(verdict.what_would_change[1].contains("favorable"));

        let none = referee_proposal(&i, &out, None);
        assert!(!none.accepted);
        assert!(none.what_would_change[0].contains("'none'"));
    }

    #[test]
    fn voi_favors_the_most_sensitive_scenario() {
        let i = input();
        let out = evaluate(&i).unwrap();
        let rankings = rank_evidence_by_voi(&i, &out, 0.2);

        let ids: Vec<_> = rankings.iter().map(|r| r.action_id.as_str()).collect();
        assert_eq!(ids, ["evidence_favorable", "evidence_unfavorable"]);
        assert!((rankings[0].evoi - 0.714285714).abs() < 1e-9);
        assert!((rankings[1].evoi - 0.344827586).abs() < 1e-9);
        assert_eq!(rankings[0].recommendation, VoiRecommendation::DoNow);
        assert_eq!(rankings[1].recommendation, VoiRecommendation::PlanLater);

        let high_bar = rank_evidence_by_voi(&i, &out, 1.0);
        assert!(high_bar.iter().all(|r| r.recommendation == VoiRecommendation::Defer));
    }

    #[test]
    fn plan_takes_do_now_actions_up_to_horizon() {
        let i = input();
        let out = evaluate(&i).unwrap();

        let plan = generate_regret_bounded_plan(&i, &out, 5, 0.2).unwrap();
        assert_eq!(plan.decision_id, "commit");
        assert_eq!(plan.bounded_horizon, 5);
        let ids: Vec<_> = plan.actions.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, ["evidence_favorable"]);

        let wide = generate_regret_bounded_plan(&i, &out, 5, 0.1).unwrap();
        assert_eq!(wide.actions.len(), 2);
        let capped = generate_regret_bounded_plan(&i, &out, 1, 0.1).unwrap();
        assert_eq!(capped.actions.len(), 1);
        assert!(generate_regret_bounded_plan(&i, &out, 0, 0.1).unwrap().actions.is_empty());
    }

    #[test]
    fn plan_id_is_deterministic() {
        let i = input();
        let out = evaluate(&i).unwrap();
        let a = generate_regret_bounded_plan(&i, &out, 3, 0.2).unwrap();
        let b = generate_regret_bounded_plan(&i, &out, 3, 0.2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id.len(), 64);
        assert_ne!(a.id, generate_regret_bounded_plan(&i, &out, 2, 0.2).unwrap().id);

        let err = generate_regret_bounded_plan(&i, &out, 3, f64::NAN).unwrap_err();
        assert_eq!(err.code(), "E_CANON");
    }
}
