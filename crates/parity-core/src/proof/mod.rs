//! Proof bundles: tamper-evident records of one execution.

pub mod bundle;
pub mod io;
pub mod merkle;
pub mod verify;

use thiserror::Error;

use crate::canon::CanonError;
use crate::cas::CasError;

pub use bundle::{
    compute_bundle_id, create_proof_bundle, BundleInputs, BundleMetadata, BundleOutputs, BundleRequest,
    EngineInfo, ProofBundle, SignatureInfo,
};
pub use io::{bundle_bytes, bundle_cid, read_bundle, signing_payload, write_bundle};
pub use merkle::{merkle_root, InclusionProof, MerkleTree};
pub use verify::{verify_bundle_consistency, verify_bundle_value, VerificationReport};

/// Bundle schema version written by this crate.
pub const BUNDLE_VERSION: &str = "1.0.0";

/// Wire protocol version of the engines.
pub const PROTOCOL_VERSION: &str = "1";

/// Decision contract version all engines implement.
pub const CONTRACT_VERSION: &str = "decision-contract/v1";

#[derive(Debug, Error)]
pub enum ProofError {
    #[error("cannot build a Merkle tree with no leaves")]
    EmptyTree,

    #[error("malformed CID at {field}: {value:?}")]
    MalformedCid { field: String, value: String },

    #[error("bundle failed verification: {}", .0.join("; "))]
    Inconsistent(Vec<String>),

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error(transparent)]
    Cas(#[from] CasError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProofError>;
