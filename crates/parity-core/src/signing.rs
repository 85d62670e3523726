//! Delegated bundle signing.
//!
//! Signing never touches bundle content: the signed bytes are
//! [`signing_payload`](crate::proof::signing_payload) and the result is
//! attached as detached [`SignatureInfo`] metadata.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

use crate::canon::sha256_hex;
use crate::proof::{self, ProofBundle, ProofError, SignatureInfo};

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("unknown signer plugin: {0}")]
    UnknownSigner(String),

    #[error("signer {signer} rejected key: {reason}")]
    Key { signer: String, reason: String },

    #[error("bundle is not signed")]
    Unsigned,

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SigningError>;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct SignOptions {
    /// Overrides the signer's default key id.
    pub key_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Default for SignOptions {
    fn default() -> Self {
        Self {
            key_id: None,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureMetadata {
    pub algorithm: String,
    pub key_id: String,
    pub timestamp: String,
    pub signer_plugin: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignOutput {
    pub metadata: SignatureMetadata,
    pub signature_ref: String,
}

/// A signing backend. Implementations may call out to HSMs or KMS.
pub trait Signer: Send + Sync {
    /// Registry name, recorded as `signerPlugin`.
    fn name(&self) -> &str;

    fn sign(&self, data: &[u8], opts: &SignOptions) -> Result<SignOutput>;

    fn verify(&self, data: &[u8], signature_ref: &str, key_id: &str) -> Result<bool>;
}

/// Deterministic digest stub for local development. Not a real signature.
#[derive(Debug, Default, Clone, Copy)]
pub struct DevSigner;

impl DevSigner {
    pub const NAME: &'static str = "dev";
    const ALGORITHM: &'static str = "sha256-dev";
    const DEFAULT_KEY: &'static str = "dev-key";

    fn digest(key_id: &str, data: &[u8]) -> String {
        let mut buf = Vec::with_capacity(key_id.len() + data.len() + 1);
        buf.extend_from_slice(key_id.as_bytes());
        buf.push(b':');
        buf.extend_from_slice(data);
        sha256_hex(&buf)
    }
}

impl Signer for DevSigner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn sign(&self, data: &[u8], opts: &SignOptions) -> Result<SignOutput> {
        let key_id = opts.key_id.clone().unwrap_or_else(|| Self::DEFAULT_KEY.to_string());
        Ok(SignOutput {
            signature_ref: Self::digest(&key_id, data),
            metadata: SignatureMetadata {
                algorithm: Self::ALGORITHM.to_string(),
                key_id,
                timestamp: opts.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                signer_plugin: Self::NAME.to_string(),
            },
        })
    }

    fn verify(&self, data: &[u8], signature_ref: &str, key_id: &str) -> Result<bool> {
        Ok(Self::digest(key_id, data) == signature_ref)
    }
}

/// HMAC-SHA256 over a secret read from a key file.
pub struct FileKeySigner {
    key: Vec<u8>,
    key_id: String,
}

impl FileKeySigner {
    pub const NAME: &'static str = "file-key";
    const ALGORITHM: &'static str = "hmac-sha256";

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(key: Vec<u8>) -> Result<Self> {
        if key.len() < 16 {
            return Err(SigningError::Key {
                signer: Self::NAME.to_string(),
                reason: format!("key must be at least 16 bytes, got {}", key.len()),
            });
        }
        let mut key_id = sha256_hex(&key);
        key_id.truncate(16);
        Ok(Self { key, key_id })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key).map_err(|e| SigningError::Key {
            signer: Self::NAME.to_string(),
            reason: e.to_string(),
        })?;
        mac.update(data);
        Ok(mac)
    }
}

impl Signer for FileKeySigner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn sign(&self, data: &[u8], opts: &SignOptions) -> Result<SignOutput> {
        if let Some(requested) = &opts.key_id {
            if requested != &self.key_id {
                return Err(SigningError::Key {
                    signer: Self::NAME.to_string(),
                    reason: format!("loaded key is {}, not {requested}", self.key_id),
                });
            }
        }
        Ok(SignOutput {
            signature_ref: hex::encode(self.mac(data)?.finalize().into_bytes()),
            metadata: SignatureMetadata {
                algorithm: Self::ALGORITHM.to_string(),
                key_id: self.key_id.clone(),
                timestamp: opts.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                signer_plugin: Self::NAME.to_string(),
            },
        })
    }

    /// Tag comparison is constant-time. A malformed `signature_ref` simply
    /// fails to verify.
    fn verify(&self, data: &[u8], signature_ref: &str, key_id: &str) -> Result<bool> {
        if key_id != self.key_id {
            return Ok(false);
        }
        let Ok(tag) = hex::decode(signature_ref) else {
            return Ok(false);
        };
        Ok(self.mac(data)?.verify_slice(&tag).is_ok())
    }
}

/// Named signer implementations.
#[derive(Clone, Default)]
pub struct SignerRegistry {
    signers: BTreeMap<String, Arc<dyn Signer>>,
}

impl SignerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `dev` signer installed.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DevSigner));
        registry
    }

    /// Install `signer` under its own name, replacing any previous entry.
    pub fn register(&mut self, signer: Arc<dyn Signer>) {
        self.signers.insert(signer.name().to_string(), signer);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Signer>> {
        self.signers
            .get(name)
            .cloned()
            .ok_or_else(|| SigningError::UnknownSigner(name.to_string()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.signers.keys().map(String::as_str).collect()
    }
}

/// Sign `bundle`, returning a copy with signature metadata attached.
pub fn sign_bundle(bundle: &ProofBundle, signer: &dyn Signer, opts: &SignOptions) -> Result<ProofBundle> {
    let payload = proof::signing_payload(bundle)?;
    let out = signer.sign(&payload, opts)?;
    tracing::info!(
        bundle_id = %bundle.bundle_id,
        signer = signer.name(),
        key_id = %out.metadata.key_id,
        "bundle signed"
    );

    let mut signed = bundle.clone();
    signed.signature = Some(SignatureInfo {
        algorithm: out.metadata.algorithm,
        key_id: out.metadata.key_id,
        timestamp: out.metadata.timestamp,
        signer_plugin: out.metadata.signer_plugin,
        signature_ref: out.signature_ref,
    });
    Ok(signed)
}

/// Check a bundle's signature with the plugin it names.
pub fn verify_bundle_signature(bundle: &ProofBundle, registry: &SignerRegistry) -> Result<bool> {
    let sig = bundle.signature.as_ref().ok_or(SigningError::Unsigned)?;
    let signer = registry.get(&sig.signer_plugin)?;
    let payload = proof::signing_payload(bundle)?;
    signer.verify(&payload, &sig.signature_ref, &sig.key_id)
}
