//! Parity Core Library
//!
//! Deterministic decision evaluation with interchangeable engines, canonical
//! fingerprints, content-addressed proof bundles, and the dual-run cutover
//! controller that keeps the engines honest against each other.

pub mod canon;
pub mod cas;
pub mod config;
pub mod decision;
pub mod dual_run;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod obs;
pub mod proof;
pub mod signing;
pub mod telemetry;

/// Crate version, reported as the engine version of the built-in engines.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use canon::{canonical_json, canonicalize, fingerprint, CanonError};

pub use cas::{ArtifactRef, CasError, CasStore, Cid, FsCasStore, MemoryCasStore};

pub use decision::{
    evaluate, DecisionEngine, DecisionError, DecisionInput, DecisionOutput, NativeEngine, PortableEngine,
    RankedAction,
};

pub use dual_run::{
    CutoverController, DualRunConfig, ExecutionError, ExecutionOutcome, ExecutionRequest, SamplingStore,
};

pub use error::{ErrorEnvelope, ErrorKind, ParityError, Result};

pub use execution::{prove_decision, DecisionRun};

pub use proof::{
    create_proof_bundle, verify_bundle_consistency, ProofBundle, ProofError, VerificationReport,
};

pub use signing::{sign_bundle, verify_bundle_signature, Signer, SignerRegistry, SigningError};
