//! Offline bundle verification. Signatures and storage presence are out of
//! scope here; see [`crate::signing`] and [`crate::cas`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bundle::{collect_cids, compute_bundle_id, ProofBundle};
use super::merkle::merkle_root;
use super::{BUNDLE_VERSION, CONTRACT_VERSION};
use crate::cas::Cid;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl VerificationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

const REQUIRED_FIELDS: &[&str] = &[
    "version",
    "bundleId",
    "timestamp",
    "requestId",
    "merkleRoot",
    "inputs",
    "inputs.params",
    "inputs.policy",
    "outputs",
    "outputs.result",
    "outputs.transcript",
    "engine",
    "engine.type",
    "engine.version",
    "engine.protocolVersion",
    "engine.contractVersion",
    "metadata",
    "metadata.durationMs",
    "metadata.algorithm",
];

fn lookup<'a>(value: &'a Value, dotted: &str) -> Option<&'a Value> {
    dotted
        .split('.')
        .try_fold(value, |v, key| v.get(key))
        .filter(|v| !v.is_null())
}

/// Verify a bundle in its raw JSON form, e.g. freshly read from disk.
///
/// Missing fields are reported by dotted path before any typed checks run.
pub fn verify_bundle_value(value: &Value) -> VerificationReport {
    let mut report = VerificationReport::default();

    for field in REQUIRED_FIELDS {
        if lookup(value, field).is_none() {
            report.errors.push(format!("missing field {field}"));
        }
    }
    if !report.errors.is_empty() {
        return report.finish();
    }

    match serde_json::from_value::<ProofBundle>(value.clone()) {
        Ok(bundle) => verify_bundle_consistency(&bundle),
        Err(e) => {
            report.errors.push(format!("invalid bundle structure: {e}"));
            report.finish()
        }
    }
}

/// Recompute the Merkle root and bundle id and compare with the declared ones.
pub fn verify_bundle_consistency(bundle: &ProofBundle) -> VerificationReport {
    let mut report = VerificationReport::default();

    for (field, value) in [
        ("version", &bundle.version),
        ("bundleId", &bundle.bundle_id),
        ("timestamp", &bundle.timestamp),
        ("requestId", &bundle.request_id),
        ("merkleRoot", &bundle.merkle_root),
        ("engine.type", &bundle.engine.engine_type),
        ("engine.version", &bundle.engine.version),
    ] {
        if value.is_empty() {
            report.errors.push(format!("missing field {field}"));
        }
    }

    let refs = collect_cids(&bundle.inputs, &bundle.outputs);
    let mut cids = Vec::with_capacity(refs.len());
    for (field, value) in &refs {
        match value.parse::<Cid>() {
            Ok(cid) => cids.push(cid),
            Err(_) => report
                .errors
                .push(format!("malformed CID at {field}: {value:?} (expected 64-128 lowercase hex)")),
        }
    }

    if cids.len() == refs.len() {
        match merkle_root(&cids) {
            Ok(root) if root != bundle.merkle_root => report.errors.push(format!(
                "Merkle root mismatch: expected {root}, got {}",
                bundle.merkle_root
            )),
            Ok(_) => {}
            Err(e) => report.errors.push(e.to_string()),
        }
    }

    let expected_id = compute_bundle_id(&bundle.request_id, &bundle.merkle_root, &bundle.engine.version);
    if expected_id != bundle.bundle_id {
        report.errors.push(format!(
            "Bundle ID mismatch: expected {expected_id}, got {}",
            bundle.bundle_id
        ));
    }

    if chrono::DateTime::parse_from_rfc3339(&bundle.timestamp).is_err() && !bundle.timestamp.is_empty() {
        report
            .warnings
            .push(format!("timestamp is not RFC 3339: {}", bundle.timestamp));
    }
    if bundle.version != BUNDLE_VERSION {
        report.warnings.push(format!(
            "bundle version {} differs from supported {BUNDLE_VERSION}",
            bundle.version
        ));
    }
    if bundle.engine.contract_version != CONTRACT_VERSION {
        report.warnings.push(format!(
            "contract version {} differs from {CONTRACT_VERSION}",
            bundle.engine.contract_version
        ));
    }
    if bundle.signature.is_some() {
        report
            .warnings
            .push("signature present but not checked by consistency verification".to_string());
    }

    report.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proof::bundle::create_proof_bundle;
    use crate::proof::bundle::tests::sample_request;

    fn flip_hex_char(s: &str) -> String {
        let mut chars: Vec<char> = s.chars().collect();
        chars[0] = if chars[0] == '0' { '1' } else { '0' };
        chars.into_iter().collect()
    }

    #[test]
    fn fresh_bundle_is_valid() {
        let bundle = create_proof_bundle(sample_request()).unwrap();
        let report = verify_bundle_consistency(&bundle);
        assert!(report.valid, "{report:?}");
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn tampered_result_yields_single_root_mismatch() {
        let mut bundle = create_proof_bundle(sample_request()).unwrap();
        bundle.outputs.result = flip_hex_char(&bundle.outputs.result);

        let report = verify_bundle_consistency(&bundle);
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
        assert!(report.errors[0].starts_with("Merkle root mismatch: expected "));
        assert!(report.errors[0].contains(&format!("got {}", bundle.merkle_root)));
    }

    #[test]
    fn tampered_bundle_id_detected() {
        let mut bundle = create_proof_bundle(sample_request()).unwrap();
        bundle.bundle_id = flip_hex_char(&bundle.bundle_id);
        let report = verify_bundle_consistency(&bundle);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Bundle ID mismatch"));
    }

    #[test]
    fn malformed_cid_reported_by_field() {
        let mut bundle = create_proof_bundle(sample_request()).unwrap();
        bundle.inputs.policy = "NOT-HEX".into();
        let report = verify_bundle_consistency(&bundle);
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.contains("inputs.policy")));
        assert!(!report.errors.iter().any(|e| e.contains("Merkle root mismatch")));
    }

    #[test]
    fn missing_fields_named_in_raw_form() {
        let bundle = create_proof_bundle(sample_request()).unwrap();
        let mut raw = serde_json::to_value(&bundle).unwrap();
        raw.as_object_mut().unwrap().remove("merkleRoot");
        raw["outputs"].as_object_mut().unwrap().remove("transcript");

        let report = verify_bundle_value(&raw);
        assert!(!report.valid);
        assert!(report.errors.contains(&"missing field merkleRoot".to_string()));
        assert!(report.errors.contains(&"missing field outputs.transcript".to_string()));
    }

    #[test]
    fn signature_is_a_warning_only() {
        let mut bundle = create_proof_bundle(sample_request()).unwrap();
        bundle.signature = Some(crate::proof::SignatureInfo {
            algorithm: "sha256-dev".into(),
            key_id: "k".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            signer_plugin: "dev".into(),
            signature_ref: "00".into(),
        });
        let report = verify_bundle_consistency(&bundle);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }
}
