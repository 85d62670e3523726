//! Replay envelope: a deterministic projection of a proof bundle.

use std::collections::BTreeMap;

use parity_core::canon;
use parity_core::proof::{bundle_cid, EngineInfo};
use parity_core::ProofBundle;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the validator receives. Every field is copied or derived from the
/// bundle; nothing is chosen at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayRequestEnvelope {
    pub timestamp: String,
    pub bundle_id: String,
    pub request_id: String,
    /// CID of the bundle's own canonical bytes
    pub bundle_cid: String,
    pub merkle_root: String,
    pub engine: EngineInfo,
    pub input_refs: BTreeMap<String, String>,
    pub output_refs: BTreeMap<String, String>,
    pub algorithm: String,
}

impl ReplayRequestEnvelope {
    pub fn from_bundle(bundle: &ProofBundle) -> Result<Self> {
        let mut input_refs = BTreeMap::new();
        let mut output_refs = BTreeMap::new();
        for (field, cid) in bundle.referenced_cids() {
            if let Some(name) = field.strip_prefix("inputs.") {
                input_refs.insert(name.to_string(), cid.to_string());
            } else if let Some(name) = field.strip_prefix("outputs.") {
                output_refs.insert(name.to_string(), cid.to_string());
            }
        }

        Ok(Self {
            timestamp: bundle.timestamp.clone(),
            bundle_id: bundle.bundle_id.clone(),
            request_id: bundle.request_id.clone(),
            bundle_cid: bundle_cid(bundle)?.to_string(),
            merkle_root: bundle.merkle_root.clone(),
            engine: bundle.engine.clone(),
            input_refs,
            output_refs,
            algorithm: bundle.metadata.algorithm.clone(),
        })
    }

    /// Canonical request body.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = canon::canonicalize_serializable(self).map_err(parity_core::ProofError::from)?;
        Ok(bytes)
    }
}

/// Validator's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayValidationResponse {
    pub valid: bool,
    pub bundle_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merkle_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,
}

/// Outcome of one `validate` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub attempted: bool,
    pub success: bool,
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ReplayValidationResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn skipped() -> Self {
        Self {
            attempted: false,
            success: false,
            retries: 0,
            response: None,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::sample_bundle;

    #[test]
    fn envelope_is_a_projection_of_the_bundle() {
        let bundle = sample_bundle("req-env-1").unwrap();
        let env = ReplayRequestEnvelope::from_bundle(&bundle).unwrap();

        assert_eq!(env.bundle_id, bundle.bundle_id);
        assert_eq!(env.merkle_root, bundle.merkle_root);
        assert_eq!(env.input_refs["params"], bundle.inputs.params);
        assert_eq!(env.output_refs["result"], bundle.outputs.result);
        assert_eq!(env.algorithm, "robust");
        assert_eq!(env.bundle_cid.len(), 64);
    }

    #[test]
    fn same_bundle_same_bytes() {
        let bundle = sample_bundle("req-env-2").unwrap();
        let a = ReplayRequestEnvelope::from_bundle(&bundle).unwrap().to_bytes().unwrap();
        let b = ReplayRequestEnvelope::from_bundle(&bundle.clone()).unwrap().to_bytes().unwrap();
        assert_eq!(a, b);

        let text = String::from_utf8(a).unwrap();
        assert!(text.starts_with(r#"{"algorithm":"robust","bundleCid":"#));
        assert!(!text.contains(' '));
    }

    #[test]
    fn response_tolerates_minimal_body() {
        let resp: ReplayValidationResponse =
            serde_json::from_str(r#"{"valid":true,"bundleId":"abc","extra":1}"#).unwrap();
        assert!(resp.valid);
        assert!(resp.message.is_none());
    }
}
