use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::merkle::merkle_root;
use super::{ProofError, Result, BUNDLE_VERSION};
use crate::canon;
use crate::cas::Cid;

/// CIDs of everything that went into an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleInputs {
    pub params: String,
    pub policy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<BTreeMap<String, String>>,
}

/// CIDs of everything an execution produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleOutputs {
    pub result: String,
    pub transcript: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extras: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineInfo {
    #[serde(rename = "type")]
    pub engine_type: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    pub protocol_version: String,
    pub contract_version: String,
}

impl EngineInfo {
    /// Engine descriptor at the current protocol and contract versions.
    pub fn current(engine_type: &str, version: &str) -> Self {
        Self {
            engine_type: engine_type.to_string(),
            version: version.to_string(),
            commit: None,
            protocol_version: super::PROTOCOL_VERSION.to_string(),
            contract_version: super::CONTRACT_VERSION.to_string(),
        }
    }
}

/// Detached signature metadata. Never part of the signed payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureInfo {
    pub algorithm: String,
    pub key_id: String,
    pub timestamp: String,
    pub signer_plugin: String,
    pub signature_ref: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleMetadata {
    pub duration_ms: u64,
    pub algorithm: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_hash: Option<String>,
}

/// Immutable record of one execution. Verified, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofBundle {
    pub version: String,
    pub bundle_id: String,
    pub timestamp: String,
    pub request_id: String,
    pub merkle_root: String,
    pub inputs: BundleInputs,
    pub outputs: BundleOutputs,
    pub engine: EngineInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureInfo>,
    pub metadata: BundleMetadata,
}

impl ProofBundle {
    /// Every referenced CID with the field it came from, in field order.
    pub fn referenced_cids(&self) -> Vec<(String, &str)> {
        collect_cids(&self.inputs, &self.outputs)
    }
}

pub(crate) fn collect_cids<'a>(inputs: &'a BundleInputs, outputs: &'a BundleOutputs) -> Vec<(String, &'a str)> {
    let mut out = vec![
        ("inputs.params".to_string(), inputs.params.as_str()),
        ("inputs.policy".to_string(), inputs.policy.as_str()),
    ];
    if let Some(ctx) = &inputs.context {
        out.push(("inputs.context".to_string(), ctx.as_str()));
    }
    for (k, v) in inputs.extras.iter().flatten() {
        out.push((format!("inputs.extras.{k}"), v.as_str()));
    }
    out.push(("outputs.result".to_string(), outputs.result.as_str()));
    out.push(("outputs.transcript".to_string(), outputs.transcript.as_str()));
    if let Some(trace) = &outputs.trace {
        out.push(("outputs.trace".to_string(), trace.as_str()));
    }
    for (k, v) in outputs.extras.iter().flatten() {
        out.push((format!("outputs.extras.{k}"), v.as_str()));
    }
    out
}

/// Parse every referenced CID, naming the first malformed field.
pub(crate) fn parse_cids(refs: &[(String, &str)]) -> Result<Vec<Cid>> {
    refs.iter()
        .map(|(field, value)| {
            value.parse::<Cid>().map_err(|_| ProofError::MalformedCid {
                field: field.clone(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// `H(requestId || merkleRoot || engineVersion)`, first 32 hex characters.
pub fn compute_bundle_id(request_id: &str, merkle_root: &str, engine_version: &str) -> String {
    let mut payload = String::with_capacity(request_id.len() + merkle_root.len() + engine_version.len());
    payload.push_str(request_id);
    payload.push_str(merkle_root);
    payload.push_str(engine_version);
    let mut id = canon::sha256_hex(payload.as_bytes());
    id.truncate(32);
    id
}

/// Everything needed to seal a bundle.
#[derive(Debug, Clone)]
pub struct BundleRequest {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub inputs: BundleInputs,
    pub outputs: BundleOutputs,
    pub engine: EngineInfo,
    pub metadata: BundleMetadata,
}

/// Seal a bundle. Pure: the timestamp is carried as metadata and does not
/// influence the Merkle root or bundle id.
pub fn create_proof_bundle(req: BundleRequest) -> Result<ProofBundle> {
    let refs = collect_cids(&req.inputs, &req.outputs);
    let cids = parse_cids(&refs)?;
    let root = merkle_root(&cids)?;
    let bundle_id = compute_bundle_id(&req.request_id, &root, &req.engine.version);

    Ok(ProofBundle {
        version: BUNDLE_VERSION.to_string(),
        bundle_id,
        timestamp: req.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        request_id: req.request_id,
        merkle_root: root,
        inputs: req.inputs,
        outputs: req.outputs,
        engine: req.engine,
        signature: None,
        metadata: req.metadata,
    })
}
