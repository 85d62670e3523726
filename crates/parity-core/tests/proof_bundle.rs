//! Proof bundle lifecycle against a filesystem CAS: prove, export, import,
//! verify, tamper and sign.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use parity_core::cas::{CasStore, Cid, FsCasStore};
use parity_core::decision::{ActionOption, DecisionInput, Outcome, Scenario};
use parity_core::proof::{
    bundle_bytes, bundle_cid, read_bundle, verify_bundle_consistency, verify_bundle_value, write_bundle, EngineInfo,
    MerkleTree,
};
use parity_core::signing::{sign_bundle, verify_bundle_signature, FileKeySigner, SignOptions, SignerRegistry};
use parity_core::{evaluate, prove_decision, DecisionRun, ProofBundle};

fn input() -> DecisionInput {
    DecisionInput {
        id: Some("vendor-choice".into()),
        actions: vec![
            ActionOption { id: "vendor_a".into(), label: "Vendor A".into() },
            ActionOption { id: "vendor_b".into(), label: "Vendor B".into() },
        ],
        scenarios: vec![
            Scenario { id: "demand_up".into(), probability: Some(0.7), adversarial: false },
            Scenario { id: "supply_shock".into(), probability: Some(0.3), adversarial: true },
        ],
        outcomes: vec![
            Outcome::new("vendor_a", "demand_up", 40.0),
            Outcome::new("vendor_a", "supply_shock", -10.0),
            Outcome::new("vendor_b", "demand_up", 25.0),
            Outcome::new("vendor_b", "supply_shock", 5.0),
        ],
        constraints: vec![],
        evidence: None,
        meta: None,
    }
}

fn prove(cas: &dyn CasStore) -> ProofBundle {
    let input = input();
    let output = evaluate(&input).unwrap();
    prove_decision(
        cas,
        DecisionRun {
            request_id: "req-proof-1",
            engine: EngineInfo::current("portable", parity_core::VERSION),
            algorithm: "robust",
            input: &input,
            output: &output,
            duration_ms: 2,
            tenant_hash: None,
        },
    )
    .unwrap()
}

fn flip_first_hex(s: &str) -> String {
    let mut chars: Vec<char> = s.chars().collect();
    chars[0] = if chars[0] == '0' { '1' } else { '0' };
    chars.into_iter().collect()
}

#[test]
fn proven_bundle_exports_and_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let cas = FsCasStore::new(dir.path().join("cas")).unwrap();
    let bundle = prove(&cas);

    let report = verify_bundle_consistency(&bundle);
    assert!(report.valid, "{report:?}");

    let path = dir.path().join("out/bundle.json");
    write_bundle(&path, &bundle).unwrap();
    let on_disk = std::fs::read(&path).unwrap();
    assert_eq!(on_disk, bundle_bytes(&bundle).unwrap());

    let imported = read_bundle(&path).unwrap();
    assert_eq!(imported, bundle);
    assert_eq!(bundle_cid(&imported).unwrap(), Cid::compute(&on_disk));

    let raw: serde_json::Value = serde_json::from_slice(&on_disk).unwrap();
    assert!(verify_bundle_value(&raw).valid);

    // Every artifact the bundle names is retrievable and intact.
    for (_, cid) in bundle.referenced_cids() {
        let cid: Cid = cid.parse().unwrap();
        assert!(!cas.get(&cid).unwrap().is_empty());
    }
}

#[test]
fn single_cid_tamper_is_one_root_mismatch() {
    let cas = parity_core::MemoryCasStore::new();
    let mut bundle = prove(&cas);
    bundle.outputs.result = flip_first_hex(&bundle.outputs.result);

    let report = verify_bundle_consistency(&bundle);
    assert!(!report.valid);
    assert_eq!(report.errors.len(), 1, "{:?}", report.errors);
    assert!(report.errors[0].starts_with("Merkle root mismatch"));
}

#[test]
fn missing_fields_are_named() {
    let cas = parity_core::MemoryCasStore::new();
    let mut raw = serde_json::to_value(prove(&cas)).unwrap();
    raw["outputs"].as_object_mut().unwrap().remove("transcript");

    let report = verify_bundle_value(&raw);
    assert!(!report.valid);
    assert!(report.errors.iter().any(|e| e == "missing field outputs.transcript"));
}

#[test]
fn inclusion_proof_for_every_artifact() {
    let cas = parity_core::MemoryCasStore::new();
    let bundle = prove(&cas);
    let cids: Vec<Cid> = bundle
        .referenced_cids()
        .into_iter()
        .map(|(_, c)| c.parse().unwrap())
        .collect();

    let tree = MerkleTree::build(&cids).unwrap();
    assert_eq!(tree.root_hex(), bundle.merkle_root);
    for cid in &cids {
        let proof = tree.proof(cid).unwrap();
        assert!(proof.verify(&bundle.merkle_root));
    }
}

#[test]
fn file_key_signature_survives_export() {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("signing.key");
    std::fs::write(&key_path, b"0123456789abcdef-local-test-key").unwrap();

    let signer = Arc::new(FileKeySigner::from_file(&key_path).unwrap());
    let mut registry = SignerRegistry::with_defaults();
    registry.register(signer.clone());

    let cas = parity_core::MemoryCasStore::new();
    let bundle = prove(&cas);
    let opts = SignOptions {
        key_id: None,
        timestamp: Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
    };
    let signed = sign_bundle(&bundle, signer.as_ref(), &opts).unwrap();
    assert_eq!(signed.signature.as_ref().unwrap().signer_plugin, "file-key");

    let path = dir.path().join("signed.json");
    write_bundle(&path, &signed).unwrap();
    let imported = read_bundle(&path).unwrap();
    assert!(verify_bundle_signature(&imported, &registry).unwrap());

    // Signing leaves the verified content untouched.
    let report = verify_bundle_consistency(&imported);
    assert!(report.valid);
    assert!(report.warnings.iter().any(|w| w.contains("signature")));

    let mut forged = imported.clone();
    forged.request_id = "req-forged".into();
    assert!(!verify_bundle_signature(&forged, &registry).unwrap());
}
