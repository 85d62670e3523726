//! Sealing a decision run into a proof bundle.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::cas::CasStore;
use crate::decision::{CompositeWeights, DecisionInput, DecisionOutput, TIE_BREAK_RULE};
use crate::metrics::METRICS;
use crate::obs;
use crate::proof::{
    create_proof_bundle, BundleInputs, BundleMetadata, BundleOutputs, BundleRequest, EngineInfo, ProofBundle,
    Result,
};

/// One finished evaluation, ready to be proven.
#[derive(Debug, Clone)]
pub struct DecisionRun<'a> {
    pub request_id: &'a str,
    pub engine: EngineInfo,
    pub algorithm: &'a str,
    pub input: &'a DecisionInput,
    pub output: &'a DecisionOutput,
    pub duration_ms: u64,
    pub tenant_hash: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Transcript<'a> {
    request_id: &'a str,
    engine: &'a str,
    engine_version: &'a str,
    algorithm: &'a str,
    determinism_fingerprint: &'a str,
    recommended_action_id: Option<&'a str>,
    duration_ms: u64,
}

/// Store the run's artifacts in `cas` and seal them into a bundle.
///
/// Artifacts: canonical input (`params`), scoring policy (`policy`), ranked
/// result (`result`), run transcript (`transcript`) and metric tables
/// (`trace`). Identical runs store identical blobs.
pub fn prove_decision(cas: &dyn CasStore, run: DecisionRun<'_>) -> Result<ProofBundle> {
    let params = cas.put_json("params", &serde_json::to_value(run.input.normalized())?)?;
    let policy = cas.put_json(
        "policy",
        &json!({
            "compositeWeights": CompositeWeights::default(),
            "tieBreakRule": TIE_BREAK_RULE,
        }),
    )?;
    let result = cas.put_json(
        "result",
        &json!({
            "rankedActions": run.output.ranked_actions,
            "determinismFingerprint": run.output.determinism_fingerprint,
        }),
    )?;
    let transcript = cas.put_json(
        "transcript",
        &serde_json::to_value(Transcript {
            request_id: run.request_id,
            engine: &run.engine.engine_type,
            engine_version: &run.engine.version,
            algorithm: run.algorithm,
            determinism_fingerprint: &run.output.determinism_fingerprint,
            recommended_action_id: run.output.recommended_action_id(),
            duration_ms: run.duration_ms,
        })?,
    )?;
    let trace = cas.put_json("trace", &serde_json::to_value(&run.output.trace)?)?;

    let bundle = create_proof_bundle(BundleRequest {
        request_id: run.request_id.to_string(),
        timestamp: Utc::now(),
        inputs: BundleInputs {
            params: params.cid.to_string(),
            policy: policy.cid.to_string(),
            context: None,
            extras: None,
        },
        outputs: BundleOutputs {
            result: result.cid.to_string(),
            transcript: transcript.cid.to_string(),
            trace: Some(trace.cid.to_string()),
            extras: None,
        },
        engine: run.engine,
        metadata: BundleMetadata {
            duration_ms: run.duration_ms,
            algorithm: run.algorithm.to_string(),
            tenant_hash: run.tenant_hash,
        },
    })?;

    METRICS.inc_bundles_created();
    obs::emit_bundle_created(&bundle.bundle_id, &bundle.merkle_root, bundle.referenced_cids().len());
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::{Cid, MemoryCasStore};
    use crate::decision::{self, ActionOption, Outcome, Scenario};
    use crate::proof::verify_bundle_consistency;

    fn input() -> DecisionInput {
        DecisionInput {
            id: Some("d-1".into()),
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

    fn run<'a>(input: &'a DecisionInput, output: &'a DecisionOutput) -> DecisionRun<'a> {
        DecisionRun {
            request_id: "req-9",
            engine: EngineInfo::current("portable", crate::VERSION),
            algorithm: "robust",
            input,
            output,
            duration_ms: 3,
            tenant_hash: None,
        }
    }

    #[test]
    fn proven_bundle_verifies_and_resolves() {
        let cas = MemoryCasStore::new();
        let input = input();
        let output = decision::evaluate(&input).unwrap();
        let bundle = prove_decision(&cas, run(&input, &output)).unwrap();

        assert!(verify_bundle_consistency(&bundle).valid);
        for (_, cid) in bundle.referenced_cids() {
            assert!(cas.exists(&cid.parse::<Cid>().unwrap()).unwrap());
        }
        assert_eq!(cas.len(), 5);
    }

    #[test]
    fn same_run_same_root() {
        let cas = MemoryCasStore::new();
        let input = input();
        let output = decision::evaluate(&input).unwrap();
        let a = prove_decision(&cas, run(&input, &output)).unwrap();
        let b = prove_decision(&cas, run(&input, &output)).unwrap();
        assert_eq!(a.merkle_root, b.merkle_root);
        assert_eq!(a.bundle_id, b.bundle_id);
        assert_eq!(cas.len(), 5);
    }
}
