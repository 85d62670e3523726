pub mod fs;
pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::canon::{self, CanonError};

pub use fs::FsCasStore;
pub use memory::MemoryCasStore;

fn cid_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new("^[0-9a-f]{64,128}$").ok())
        .as_ref()
}

/// Content identifier: lowercase hex digest, 64 to 128 characters.
///
/// CIDs minted by this crate are SHA-256 (64 chars). Longer digests are
/// accepted when they arrive from external bundles.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

impl Cid {
    /// SHA-256 content address of `data`.
    pub fn compute(data: &[u8]) -> Self {
        Self(canon::sha256_hex(data))
    }

    pub fn is_valid(s: &str) -> bool {
        cid_pattern().is_some_and(|re| re.is_match(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this CID was produced by [`Cid::compute`] and can be re-derived.
    pub fn is_sha256(&self) -> bool {
        self.0.len() == 64
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", &self.0[..12])
    }
}

impl FromStr for Cid {
    type Err = CasError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(CasError::InvalidCid(s.to_string()))
        }
    }
}

impl TryFrom<String> for Cid {
    type Error = CasError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(CasError::InvalidCid(s))
        }
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.0
    }
}

impl AsRef<str> for Cid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lightweight back-reference to bytes owned by a [`CasStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRef {
    pub name: String,
    pub cid: Cid,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Errors from CAS operations.
#[derive(Debug, Error)]
pub enum CasError {
    #[error("blob not found: {0}")]
    NotFound(Cid),

    #[error("malformed CID: {0:?}")]
    InvalidCid(String),

    #[error("content integrity violation: expected {expected}, got {actual}")]
    Integrity { expected: Cid, actual: Cid },

    #[error(transparent)]
    Canon(#[from] CanonError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CasError>;

/// Content-addressed store interface.
///
/// `put` is idempotent: concurrent writers of the same bytes converge on one
/// blob. `get` re-derives SHA-256 CIDs and fails with
/// [`CasError::Integrity`] on corruption.
pub trait CasStore: Send + Sync {
    /// Store `data` and return its CID. Deduplicates automatically.
    fn put(&self, data: &[u8]) -> Result<Cid>;

    /// Retrieve the blob for `cid`.
    fn get(&self, cid: &Cid) -> Result<Vec<u8>>;

    /// Check whether `cid` exists without reading the blob.
    fn exists(&self, cid: &Cid) -> Result<bool>;

    /// Store `data` and describe it as a named artifact.
    fn put_artifact(&self, name: &str, data: &[u8], content_type: Option<&str>) -> Result<ArtifactRef> {
        let cid = self.put(data)?;
        Ok(ArtifactRef {
            name: name.to_string(),
            cid,
            size: data.len() as u64,
            content_type: content_type.map(str::to_string),
        })
    }

    /// Store the canonical bytes of a JSON value.
    fn put_json(&self, name: &str, value: &Value) -> Result<ArtifactRef> {
        let bytes = canon::canonicalize(value)?;
        self.put_artifact(name, &bytes, Some("application/json"))
    }
}

/// Re-hash `data` and compare against `expected`.
pub(crate) fn check_integrity(expected: &Cid, data: &[u8]) -> Result<()> {
    if !expected.is_sha256() {
        return Ok(());
    }
    let actual = Cid::compute(data);
    if &actual != expected {
        return Err(CasError::Integrity {
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_display_fromstr_roundtrip() {
        let c = Cid::compute(b"hello world");
        let hex = c.to_string();
        assert_eq!(hex.len(), 64);
        let parsed: Cid = hex.parse().unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn cid_pattern_compiles_and_accepts_long_digests() {
        assert!(cid_pattern().is_some());
        assert!(Cid::is_valid(&"0f".repeat(32)));
        assert!(Cid::is_valid(&"0f".repeat(64)));
        assert!(!Cid::is_valid(&"0f".repeat(65)));
    }

    #[test]
    fn cid_rejects_uppercase_and_short() {
        assert!("ABCD".repeat(16).parse::<Cid>().is_err());
        assert!("abcd".parse::<Cid>().is_err());
        assert!("not-valid-hex".parse::<Cid>().is_err());
    }

    #[test]
    fn cid_accepts_up_to_128_chars() {
        assert!(Cid::is_valid(&"a".repeat(128)));
        assert!(!Cid::is_valid(&"a".repeat(129)));
        assert!(!Cid::is_valid(&"a".repeat(63)));
    }

    #[test]
    fn cid_serde_validates() {
        let bad: std::result::Result<Cid, _> = serde_json::from_str("\"zz\"");
        assert!(bad.is_err());
        let good = Cid::compute(b"x");
        let json = serde_json::to_string(&good).unwrap();
        assert_eq!(serde_json::from_str::<Cid>(&json).unwrap(), good);
    }

    #[test]
    fn cid_debug_is_truncated() {
        let c = Cid::compute(b"debug");
        assert_eq!(format!("{c:?}"), format!("Cid({})", &c.as_str()[..12]));
    }

    #[test]
    fn integrity_check_detects_mutation() {
        let cid = Cid::compute(b"original");
        assert!(check_integrity(&cid, b"original").is_ok());
        assert!(matches!(
            check_integrity(&cid, b"tampered"),
            Err(CasError::Integrity { .. })
        ));
    }
}
