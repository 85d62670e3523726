//! Canonical JSON encoding and fingerprint computation.
//!
//! Every engine implementation hashes its results through this module, so the
//! byte form produced here is the cross-engine parity contract:
//! - object keys ordered by UTF-16 code units, recursively (RFC 8785 §3.2.3)
//! - array order preserved
//! - numbers quantized to [`FLOAT_PRECISION`] (round half away from zero),
//!   integer-valued floats written as integers, `-0` written as `0`
//! - compact output, no whitespace
//! - NaN and infinities rejected with `E_CANON`
//!
//! `serde_json::Value` cannot hold a non-finite number, so typed values that
//! carry floats must pass them through [`ensure_finite`] before serialization
//! (see `DecisionInput::validate`).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Quantum applied to every fractional number before it is written.
pub const FLOAT_PRECISION: f64 = 1e-9;

const SCALE: f64 = 1e9;

/// 2^53: above this scaled magnitude quantization cannot be expressed exactly
/// and the value is written unchanged.
const MAX_EXACT_SCALED: f64 = 9_007_199_254_740_992.0;

/// Canonicalization failure. Always reported with the `E_CANON` code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CanonError {
    #[error("non-finite number at {path}")]
    NonFinite { path: String },

    #[error("value cannot be represented as canonical JSON: {0}")]
    Unrepresentable(String),

    #[error("input is not valid JSON: {0}")]
    Parse(String),
}

impl CanonError {
    /// Boundary error code.
    pub fn code(&self) -> &'static str {
        "E_CANON"
    }
}

pub type Result<T> = std::result::Result<T, CanonError>;

/// Reject NaN and infinities, naming the offending field.
pub fn ensure_finite(path: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(CanonError::NonFinite {
            path: path.to_string(),
        })
    }
}

/// Quantize a finite float to [`FLOAT_PRECISION`].
///
/// Rounding is half away from zero on `value * 1e9`; the quotient by `1e9`
/// is then correctly rounded by IEEE-754 division. `-0.0` becomes `0.0`.
pub fn quantize(value: f64) -> f64 {
    let scaled = value * SCALE;
    if !scaled.is_finite() || scaled.abs() >= MAX_EXACT_SCALED {
        return if value == 0.0 { 0.0 } else { value };
    }
    let q = scaled.round() / SCALE;
    if q == 0.0 {
        0.0
    } else {
        q
    }
}

/// Finite check followed by [`quantize`].
pub fn normalize_float(path: &str, value: f64) -> Result<f64> {
    ensure_finite(path, value).map(quantize)
}

/// Canonical bytes for a JSON value.
pub fn canonicalize(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(128);
    write_value(value, "$", &mut out)?;
    Ok(out)
}

/// Canonical bytes for any serializable value.
pub fn canonicalize_serializable<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let json = serde_json::to_value(value).map_err(|e| CanonError::Unrepresentable(e.to_string()))?;
    canonicalize(&json)
}

/// Re-canonicalize raw JSON bytes. Already-canonical input is returned unchanged.
pub fn canonicalize_bytes(raw: &[u8]) -> Result<Vec<u8>> {
    let json: Value = serde_json::from_slice(raw).map_err(|e| CanonError::Parse(e.to_string()))?;
    canonicalize(&json)
}

/// Canonical form as a `String`.
pub fn canonical_json(value: &Value) -> Result<String> {
    let bytes = canonicalize(value)?;
    // The writer only emits UTF-8 produced by serde_json and ASCII punctuation.
    String::from_utf8(bytes).map_err(|e| CanonError::Unrepresentable(e.to_string()))
}

/// SHA-256 of the canonical bytes as 64 lowercase hex characters.
pub fn fingerprint(value: &Value) -> Result<String> {
    Ok(sha256_hex(&canonicalize(value)?))
}

/// [`fingerprint`] for any serializable value.
pub fn fingerprint_serializable<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha256_hex(&canonicalize_serializable(value)?))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Parse canonical bytes back into a `Value` with quantized numbers.
///
/// Used where a structural view of canonical content is needed (diffing).
pub fn normalized_value(value: &Value) -> Result<Value> {
    let bytes = canonicalize(value)?;
    serde_json::from_slice(&bytes).map_err(|e| CanonError::Parse(e.to_string()))
}

fn write_value(value: &Value, path: &str, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, path, out)?,
        Value::String(s) => write_string(s, out)?,
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, &format!("{path}[{i}]"), out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));

            out.push(b'{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_string(key, out)?;
                out.push(b':');
                if let Some(v) = map.get(key) {
                    write_value(v, &format!("{path}.{key}"), out)?;
                }
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn write_number(n: &serde_json::Number, path: &str, out: &mut Vec<u8>) -> Result<()> {
    if n.is_i64() || n.is_u64() {
        out.extend_from_slice(n.to_string().as_bytes());
        return Ok(());
    }
    let raw = n
        .as_f64()
        .ok_or_else(|| CanonError::Unrepresentable(format!("number at {path}")))?;
    let q = normalize_float(path, raw)?;

    if q.fract() == 0.0 && q >= i64::MIN as f64 && q < i64::MAX as f64 {
        out.extend_from_slice((q as i64).to_string().as_bytes());
        return Ok(());
    }
    let num = serde_json::Number::from_f64(q).ok_or_else(|| CanonError::NonFinite {
        path: path.to_string(),
    })?;
    out.extend_from_slice(num.to_string().as_bytes());
    Ok(())
}

fn write_string(s: &str, out: &mut Vec<u8>) -> Result<()> {
    serde_json::to_writer(&mut *out, s).map_err(|e| CanonError::Unrepresentable(e.to_string()))
}
