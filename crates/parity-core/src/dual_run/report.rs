//! Per-request dual-run diff reports. Write-once, keyed by request id.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use super::state::SamplingPhase;
use crate::canon::sha256_hex;

/// One leaf-level divergence, addressed by RFC 6901 pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Difference {
    pub pointer: String,
    pub primary: Value,
    pub secondary: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalComparison {
    pub primary_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_fingerprint: Option<String>,
    pub fingerprint_match: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingMetadata {
    pub tenant_hash: String,
    pub phase: SamplingPhase,
    pub rate_applied: f64,
    pub draw: f64,
    pub consecutive_matches: u64,
    pub is_new_tenant: bool,
    pub is_new_version: bool,
    pub is_new_algorithm: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportTimestamps {
    pub started_at: DateTime<Utc>,
    pub compared_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffReport {
    pub request_id: String,
    pub timestamps: ReportTimestamps,
    pub engine_version: String,
    pub contract_version: String,
    pub algorithm: String,
    pub primary_engine: String,
    pub secondary_engine: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub differences: Vec<Difference>,
    pub canonical_comparison: CanonicalComparison,
    pub sampling_metadata: SamplingMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_error: Option<String>,
}

/// Structural differences between two JSON documents, in pointer order.
pub fn json_diff(prefix: &str, primary: &Value, secondary: &Value) -> Vec<Difference> {
    if primary == secondary {
        return Vec::new();
    }

    match (primary, secondary) {
        (Value::Object(a), Value::Object(b)) => {
            let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
            keys.into_iter()
                .flat_map(|key| {
                    let path = format!("{prefix}/{}", escape_pointer(key));
                    json_diff(
                        &path,
                        a.get(key).unwrap_or(&Value::Null),
                        b.get(key).unwrap_or(&Value::Null),
                    )
                })
                .collect()
        }
        (Value::Array(a), Value::Array(b)) => (0..a.len().max(b.len()))
            .flat_map(|i| {
                json_diff(
                    &format!("{prefix}/{i}"),
                    a.get(i).unwrap_or(&Value::Null),
                    b.get(i).unwrap_or(&Value::Null),
                )
            })
            .collect(),
        _ => vec![Difference {
            pointer: if prefix.is_empty() { "/".to_string() } else { prefix.to_string() },
            primary: primary.clone(),
            secondary: secondary.clone(),
        }],
    }
}

fn escape_pointer(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("diff report already exists for request {0}")]
    AlreadyExists(String),

    #[error("diff report not found for request {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub trait DiffReportStore: Send + Sync {
    /// Persist `report`. A second write for the same request id fails.
    fn write(&self, report: &DiffReport) -> Result<(), ReportError>;

    fn read(&self, request_id: &str) -> Result<DiffReport, ReportError>;
}

/// One `<requestId>.json` file per report under a directory.
pub struct FsDiffReportStore {
    dir: PathBuf,
}

impl FsDiffReportStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, ReportError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Request ids outside `[A-Za-z0-9._-]` are stored under their SHA-256.
    pub fn report_path(&self, request_id: &str) -> PathBuf {
        let safe = !request_id.is_empty()
            && !request_id.starts_with('.')
            && request_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        let stem = if safe {
            request_id.to_string()
        } else {
            sha256_hex(request_id.as_bytes())
        };
        self.dir.join(format!("{stem}.json"))
    }
}

impl DiffReportStore for FsDiffReportStore {
    fn write(&self, report: &DiffReport) -> Result<(), ReportError> {
        let path = self.report_path(&report.request_id);
        let bytes = serde_json::to_vec_pretty(report)?;

        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                ReportError::AlreadyExists(report.request_id.clone())
            } else {
                ReportError::Io(e.error)
            }
        })?;
        tracing::debug!(path = %path.display(), "diff report written");
        Ok(())
    }

    fn read(&self, request_id: &str) -> Result<DiffReport, ReportError> {
        let bytes = fs::read(self.report_path(request_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ReportError::NotFound(request_id.to_string())
            } else {
                ReportError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Default)]
pub struct MemoryDiffReportStore {
    reports: Mutex<HashMap<String, DiffReport>>,
}

impl MemoryDiffReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DiffReportStore for MemoryDiffReportStore {
    fn write(&self, report: &DiffReport) -> Result<(), ReportError> {
        let mut reports = self
            .reports
            .lock()
            .map_err(|e| ReportError::Io(std::io::Error::other(e.to_string())))?;
        if reports.contains_key(&report.request_id) {
            return Err(ReportError::AlreadyExists(report.request_id.clone()));
        }
        reports.insert(report.request_id.clone(), report.clone());
        Ok(())
    }

    fn read(&self, request_id: &str) -> Result<DiffReport, ReportError> {
        self.reports
            .lock()
            .map_err(|e| ReportError::Io(std::io::Error::other(e.to_string())))?
            .get(request_id)
            .cloned()
            .ok_or_else(|| ReportError::NotFound(request_id.to_string()))
    }
}
