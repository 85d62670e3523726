//! Control-plane event stream.
//!
//! Events are NDJSON, one per line, append-only. The schema is additive:
//! readers ignore unknown fields and new event types only ever get added.
//! Tenant, request and action identifiers are hashed before they enter an
//! event.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::canon::sha256_hex;
use crate::metrics::METRICS;

const IDENTIFIER_DOMAIN: &str = "parity.identifier.v1:";

/// One-way short hash for identifiers that may carry customer data.
pub fn hash_identifier(raw: &str) -> String {
    let mut h = sha256_hex(format!("{IDENTIFIER_DOMAIN}{raw}").as_bytes());
    h.truncate(16);
    h
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        EventId(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStartEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub request_hash: String,
    pub tenant_hash: String,
    pub engine: String,
    pub engine_version: String,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCompleteEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub request_hash: String,
    pub tenant_hash: String,
    pub engine: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub sampled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualRunMismatchEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub request_hash: String,
    pub tenant_hash: String,
    pub primary_engine: String,
    pub secondary_engine: String,
    pub primary_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_fingerprint: Option<String>,
    pub difference_count: usize,
    pub algorithm: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSwitchEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackEvent {
    pub event_id: EventId,
    pub timestamp: DateTime<Utc>,
    pub to: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlPlaneEvent {
    ExecutionStart(ExecutionStartEvent),
    ExecutionComplete(ExecutionCompleteEvent),
    DualRunMismatch(DualRunMismatchEvent),
    EngineSwitch(EngineSwitchEvent),
    Rollback(RollbackEvent),
}

impl ControlPlaneEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExecutionStart(_) => "execution_start",
            Self::ExecutionComplete(_) => "execution_complete",
            Self::DualRunMismatch(_) => "dual_run_mismatch",
            Self::EngineSwitch(_) => "engine_switch",
            Self::Rollback(_) => "rollback",
        }
    }
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event queue is full")]
    QueueFull,

    #[error("event sink is closed")]
    Closed,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Destination for control-plane events. `emit` never blocks on I/O
/// backpressure; a saturated sink returns [`EventError::QueueFull`].
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ControlPlaneEvent) -> Result<(), EventError>;
}

/// Append-only NDJSON file.
pub struct NdjsonEventLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl NdjsonEventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for NdjsonEventLog {
    fn emit(&self, event: &ControlPlaneEvent) -> Result<(), EventError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().map_err(|_| EventError::Closed)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Read every event from an NDJSON log. Blank lines are skipped.
pub fn read_events(path: impl AsRef<Path>) -> Result<Vec<ControlPlaneEvent>, EventError> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

/// Bounded queue in front of another sink, drained by a writer task.
///
/// Must be created inside a tokio runtime.
pub struct BufferedEventSink {
    tx: mpsc::Sender<ControlPlaneEvent>,
}

impl BufferedEventSink {
    pub fn new(inner: Arc<dyn EventSink>, capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ControlPlaneEvent>(capacity.max(1));
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(e) = inner.emit(&event) {
                    METRICS.inc_events_dropped();
                    tracing::warn!(event_type = event.kind(), error = %e, "event write failed");
                }
            }
        });
        (Self { tx }, handle)
    }
}

impl EventSink for BufferedEventSink {
    fn emit(&self, event: &ControlPlaneEvent) -> Result<(), EventError> {
        self.tx.try_send(event.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EventError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => EventError::Closed,
        })
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<ControlPlaneEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ControlPlaneEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(ControlPlaneEvent::kind).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn emit(&self, event: &ControlPlaneEvent) -> Result<(), EventError> {
        self.events
            .lock()
            .map_err(|_| EventError::Closed)?
            .push(event.clone());
        Ok(())
    }
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: &ControlPlaneEvent) -> Result<(), EventError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch_event() -> ControlPlaneEvent {
        ControlPlaneEvent::EngineSwitch(EngineSwitchEvent {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            from: "native".into(),
            to: "portable".into(),
            reason: "fallback".into(),
        })
    }

    #[test]
    fn hash_identifier_is_stable_and_opaque() {
        let h = hash_identifier("tenant-acme");
        assert_eq!(h.len(), 16);
        assert_eq!(h, hash_identifier("tenant-acme"));
        assert!(!h.contains("acme"));
    }

    #[test]
    fn wire_form_is_tagged() {
        let json = serde_json::to_value(switch_event()).unwrap();
        assert_eq!(json["type"], "engine_switch");
        assert_eq!(json["data"]["from"], "native");
        assert!(json["data"].get("eventId").is_some());
    }

    #[test]
    fn readers_ignore_unknown_fields() {
        let raw = r#"{"type":"rollback","data":{"eventId":"6f1c1e3e-8b0a-4b7e-9d7a-2f1f4c3b5a6d","timestamp":"2026-01-01T00:00:00Z","to":"portable","reason":"operator","futureField":42}}"#;
        let event: ControlPlaneEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.kind(), "rollback");
    }

    #[test]
    fn ndjson_appends_one_line_per_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/events.ndjson");
        {
            let log = NdjsonEventLog::open(&path).unwrap();
            log.emit(&switch_event()).unwrap();
            log.emit(&switch_event()).unwrap();
        }
        // Reopening appends rather than truncating.
        NdjsonEventLog::open(&path).unwrap().emit(&switch_event()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 3);
        assert_eq!(read_events(&path).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn buffered_sink_reports_queue_full() {
        // Writer task cannot run until we yield, so the queue fills up.
        let memory = Arc::new(MemoryEventSink::new());
        let (sink, handle) = BufferedEventSink::new(memory.clone(), 2);
        sink.emit(&switch_event()).unwrap();
        sink.emit(&switch_event()).unwrap();
        assert!(matches!(sink.emit(&switch_event()), Err(EventError::QueueFull)));

        drop(sink);
        handle.await.unwrap();
        assert_eq!(memory.events().len(), 2);
    }
}
