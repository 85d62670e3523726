//! Cutover controller: routes each request, shadows a sample of them on the
//! other engine, and records what it saw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::Instrument;

use super::config::{DualRunConfig, DualRunMode};
use super::events::{
    hash_identifier, ControlPlaneEvent, DualRunMismatchEvent, EngineSwitchEvent, EventError, EventId, EventSink,
    ExecutionCompleteEvent, ExecutionStartEvent, RollbackEvent,
};
use super::report::{
    json_diff, CanonicalComparison, DiffReport, DiffReportStore, ReportTimestamps, SamplingMetadata,
};
use super::selection::{select_engine, shadow_for, Selection, SelectionError, SelectionReason, PRIMARY, SECONDARY};
use super::state::{sample_draw, SamplingState, WorkloadKey};
use super::store::SamplingStore;
use crate::cas::CasStore;
use crate::config::ConfigError;
use crate::decision::{DecisionEngine, DecisionError, DecisionInput, DecisionOutput};
use crate::error::ParityError;
use crate::execution::{prove_decision, DecisionRun};
use crate::metrics::METRICS;
use crate::obs;
use crate::proof::{EngineInfo, ProofBundle, ProofError, CONTRACT_VERSION};

/// Attempts made against a full event queue before the event is dropped.
const EVENT_EMIT_ATTEMPTS: u32 = 3;
const EVENT_RETRY_BASE: Duration = Duration::from_millis(5);

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Decision(#[from] DecisionError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Proof(#[from] ProofError),

    #[error("engine task failed: {0}")]
    Join(String),
}

impl ExecutionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decision(e) => e.code(),
            Self::Proof(ProofError::Canon(_)) => "E_CANON",
            _ => "E_INTERNAL",
        }
    }
}

/// One request to route.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub request_id: String,
    /// Raw tenant id. Hashed before it is stored or emitted.
    pub tenant_id: String,
    pub algorithm: String,
    pub input: DecisionInput,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonSummary {
    pub secondary_engine: String,
    #[serde(rename = "match")]
    pub matched: bool,
    pub difference_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_error: Option<String>,
}

/// What a request returned. `output` is always the serving engine's result,
/// whether or not the shadow agreed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub request_id: String,
    pub engine: String,
    pub selection: Selection,
    pub output: DecisionOutput,
    pub duration_ms: u64,
    pub sampled: bool,
    pub sampling: SamplingMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<ProofBundle>,
}

type EngineRun = Result<(DecisionOutput, u64), ExecutionError>;

/// Orchestrates routing, sampling, comparison and event emission for an
/// ordered list of engines (primary first, portable reference second).
pub struct CutoverController {
    config: DualRunConfig,
    engines: Vec<Arc<dyn DecisionEngine>>,
    store: Arc<SamplingStore>,
    reports: Arc<dyn DiffReportStore>,
    events: Arc<dyn EventSink>,
    cas: Option<Arc<dyn CasStore>>,
    active: Mutex<Option<usize>>,
    rolled_back: AtomicBool,
}

impl CutoverController {
    pub fn new(
        config: DualRunConfig,
        primary: Arc<dyn DecisionEngine>,
        secondary: Arc<dyn DecisionEngine>,
        store: Arc<SamplingStore>,
        reports: Arc<dyn DiffReportStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            engines: vec![primary, secondary],
            store,
            reports,
            events,
            cas: None,
            active: Mutex::new(None),
            rolled_back: AtomicBool::new(false),
        })
    }

    /// Append another provider to the fallback chain.
    pub fn with_fallback(mut self, engine: Arc<dyn DecisionEngine>) -> Self {
        self.engines.push(engine);
        self
    }

    /// Seal every served result into a proof bundle stored in `cas`.
    pub fn with_cas(mut self, cas: Arc<dyn CasStore>) -> Self {
        self.cas = Some(cas);
        self
    }

    pub fn config(&self) -> &DualRunConfig {
        &self.config
    }

    fn active_slot(&self) -> MutexGuard<'_, Option<usize>> {
        self.active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn availability(&self) -> Vec<bool> {
        self.engines.iter().map(|e| e.is_available()).collect()
    }

    /// Where the next request would go. Does not move the active pointer.
    pub fn route(&self) -> Result<Selection, SelectionError> {
        select_engine(&self.config, &self.availability(), self.is_rolled_back())
    }

    /// Id of the engine that served the most recent request.
    pub fn active_engine(&self) -> Option<&str> {
        let index = (*self.active_slot())?;
        self.engines.get(index).map(|e| e.id())
    }

    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::SeqCst)
    }

    pub fn sampling_state(&self, key: &WorkloadKey) -> Option<SamplingState> {
        self.store.snapshot(key)
    }

    /// Pin routing to the portable reference engine.
    pub async fn rollback(&self, reason: &str) {
        self.roll_back(reason, None).await;
    }

    /// Lift an earlier rollback. Routing resumes normal precedence.
    pub fn clear_rollback(&self) {
        if self.rolled_back.swap(false, Ordering::SeqCst) {
            tracing::info!(event = "rollback.cleared", "routing restored");
        }
    }

    async fn roll_back(&self, reason: &str, request_hash: Option<String>) {
        if self.rolled_back.swap(true, Ordering::SeqCst) {
            return;
        }
        let to = self.engines[SECONDARY].id().to_string();
        tracing::warn!(event = "rollback", to = %to, reason = %reason);
        self.emit(ControlPlaneEvent::Rollback(RollbackEvent {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            to,
            reason: reason.to_string(),
            request_hash,
        }))
        .await;
        self.activate(SECONDARY, &SelectionReason::RolledBack.to_string()).await;
    }

    /// Move the active pointer, logging and emitting `engine_switch` on change.
    async fn activate(&self, index: usize, reason: &str) {
        let previous = self.active_slot().replace(index).unwrap_or(PRIMARY);
        if previous == index {
            return;
        }
        let from = self.engines[previous].id().to_string();
        let to = self.engines[index].id().to_string();
        METRICS.inc_engine_switches();
        obs::emit_engine_switch(&from, &to, reason);
        self.emit(ControlPlaneEvent::EngineSwitch(EngineSwitchEvent {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            from,
            to,
            reason: reason.to_string(),
        }))
        .await;
    }

    /// Hand an event to the sink. A full queue is retried with short backoff;
    /// after that, or on any other failure, the event is dropped and counted.
    async fn emit(&self, event: ControlPlaneEvent) {
        for attempt in 0..EVENT_EMIT_ATTEMPTS {
            match self.events.emit(&event) {
                Ok(()) => return,
                Err(EventError::QueueFull) if attempt + 1 < EVENT_EMIT_ATTEMPTS => {
                    tokio::time::sleep(EVENT_RETRY_BASE * 2u32.pow(attempt)).await;
                }
                Err(e) => {
                    METRICS.inc_events_dropped();
                    tracing::warn!(event_type = event.kind(), error = %e, "control-plane event dropped");
                    return;
                }
            }
        }
    }

    async fn emit_failure(
        &self,
        request_hash: String,
        tenant_hash: &str,
        engine: &str,
        duration_ms: u64,
        sampled: bool,
        error: &ExecutionError,
    ) {
        self.emit(ControlPlaneEvent::ExecutionComplete(ExecutionCompleteEvent {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            request_hash,
            tenant_hash: tenant_hash.to_string(),
            engine: engine.to_string(),
            success: false,
            duration_ms,
            fingerprint: None,
            action_hash: None,
            error_code: Some(error.code().to_string()),
            sampled,
        }))
        .await;
    }

    /// Serve one request.
    pub async fn execute(&self, req: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        let span = obs::request_span(&req.request_id);
        self.execute_inner(req).instrument(span).await
    }

    async fn execute_inner(&self, req: ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        let started_at = Utc::now();
        let request_hash = hash_identifier(&req.request_id);
        let key = WorkloadKey::new(&req.tenant_id, self.engines[PRIMARY].version(), &req.algorithm);

        let mut selection = self.route()?;
        self.activate(selection.index, &selection.reason.to_string()).await;
        let mut serving = self.engines[selection.index].clone();

        self.emit(ControlPlaneEvent::ExecutionStart(ExecutionStartEvent {
            event_id: EventId::new(),
            timestamp: started_at,
            request_hash: request_hash.clone(),
            tenant_hash: key.tenant_hash.clone(),
            engine: serving.id().to_string(),
            engine_version: serving.version().to_string(),
            algorithm: req.algorithm.clone(),
        }))
        .await;

        let shadow = if self.config.enabled {
            shadow_for(selection.index, &self.availability())
        } else {
            None
        };
        let draw = sample_draw(&req.request_id);
        let config = &self.config;
        let sampling = self.store.update(&key, |state| {
            let rate = state.rate(config);
            state.rate_applied = rate;
            SamplingMetadata {
                tenant_hash: key.tenant_hash.clone(),
                phase: state.phase(config),
                rate_applied: rate,
                draw,
                consecutive_matches: state.consecutive_matches,
                is_new_tenant: state.is_new_tenant,
                is_new_version: state.is_new_version,
                is_new_algorithm: state.is_new_algorithm,
            }
        });
        let shadow = shadow.filter(|_| draw < sampling.rate_applied);

        let input = Arc::new(req.input);
        let (mut primary, secondary) = match shadow {
            Some(index) => {
                let other = self.engines[index].clone();
                let (a, b) = match self.config.mode {
                    DualRunMode::Concurrent => {
                        tokio::join!(run_engine(serving.clone(), input.clone()), run_engine(other, input.clone()))
                    }
                    DualRunMode::Sequential => {
                        let a = run_engine(serving.clone(), input.clone()).await;
                        (a, run_engine(other, input.clone()).await)
                    }
                };
                (a, Some((index, b)))
            }
            None => (run_engine(serving.clone(), input.clone()).await, None),
        };

        let mut secondary = secondary;
        let went_down = matches!(
            &primary,
            Err(ExecutionError::Decision(DecisionError::EngineUnavailable { .. }))
        );
        if went_down {
            tracing::warn!(engine = %serving.id(), "engine reported unavailable mid-request");
            let mut availability = self.availability();
            availability[selection.index] = false;
            let fallback = select_engine(&self.config, &availability, self.is_rolled_back())?;
            self.activate(fallback.index, &SelectionReason::Fallback.to_string()).await;
            selection = Selection {
                index: fallback.index,
                fell_back: true,
                reason: SelectionReason::Fallback,
            };
            serving = self.engines[fallback.index].clone();
            // The shadow result cannot be compared against a different engine.
            secondary = None;
            primary = run_engine(serving.clone(), input.clone()).await;
        }

        let (output, duration_ms) = match primary {
            Ok(ok) => ok,
            Err(e) => {
                self.emit_failure(request_hash, &key.tenant_hash, serving.id(), 0, secondary.is_some(), &e)
                    .await;
                return Err(e);
            }
        };

        METRICS.inc_evaluations();
        obs::emit_evaluation_finished(
            serving.id(),
            &output.determinism_fingerprint,
            output.ranked_actions.len(),
            duration_ms,
        );

        let sampled = secondary.is_some();
        let comparison = match secondary {
            Some((index, result)) => Some(
                self.compare(
                    &req.request_id,
                    &request_hash,
                    &req.algorithm,
                    &key,
                    started_at,
                    serving.as_ref(),
                    self.engines[index].as_ref(),
                    &output,
                    result,
                    &sampling,
                )
                .await,
            ),
            None => None,
        };

        // Success is only reported once the result is sealed.
        let bundle = match &self.cas {
            Some(cas) => {
                let run = DecisionRun {
                    request_id: &req.request_id,
                    engine: EngineInfo::current(serving.id(), serving.version()),
                    algorithm: &req.algorithm,
                    input: input.as_ref(),
                    output: &output,
                    duration_ms,
                    tenant_hash: Some(key.tenant_hash.clone()),
                };
                match prove_decision(cas.as_ref(), run) {
                    Ok(bundle) => Some(bundle),
                    Err(e) => {
                        let e = ExecutionError::from(e);
                        tracing::error!(error = %e, "proof bundle not sealed");
                        self.emit_failure(request_hash, &key.tenant_hash, serving.id(), duration_ms, sampled, &e)
                            .await;
                        return Err(e);
                    }
                }
            }
            None => None,
        };

        self.emit(ControlPlaneEvent::ExecutionComplete(ExecutionCompleteEvent {
            event_id: EventId::new(),
            timestamp: Utc::now(),
            request_hash,
            tenant_hash: key.tenant_hash.clone(),
            engine: serving.id().to_string(),
            success: true,
            duration_ms,
            fingerprint: Some(output.determinism_fingerprint.clone()),
            action_hash: output.recommended_action_id().map(hash_identifier),
            error_code: None,
            sampled,
        }))
        .await;

        Ok(ExecutionOutcome {
            request_id: req.request_id,
            engine: serving.id().to_string(),
            selection,
            output,
            duration_ms,
            sampled,
            sampling,
            comparison,
            bundle,
        })
    }

    /// Compare canonical fingerprints, persist the diff report, advance the
    /// sampling state and raise mismatch events.
    ///
    /// A shadow that failed to produce an output is not a mismatch: the report
    /// still records its error, but sampling state and rollback are untouched.
    #[allow(clippy::too_many_arguments)]
    async fn compare(
        &self,
        request_id: &str,
        request_hash: &str,
        algorithm: &str,
        key: &WorkloadKey,
        started_at: chrono::DateTime<Utc>,
        primary_engine: &dyn DecisionEngine,
        secondary_engine: &dyn DecisionEngine,
        primary: &DecisionOutput,
        secondary: EngineRun,
        sampling: &SamplingMetadata,
    ) -> ComparisonSummary {
        let (secondary_fingerprint, differences, secondary_error) = match &secondary {
            Ok((out, _)) => {
                let differences = if out.determinism_fingerprint == primary.determinism_fingerprint {
                    Vec::new()
                } else {
                    json_diff(
                        "",
                        &serde_json::to_value(primary).unwrap_or_default(),
                        &serde_json::to_value(out).unwrap_or_default(),
                    )
                };
                (Some(out.determinism_fingerprint.clone()), differences, None)
            }
            Err(e) => (None, Vec::new(), Some(e.to_string())),
        };
        let matched = secondary_fingerprint.as_deref() == Some(primary.determinism_fingerprint.as_str());

        match &secondary {
            Err(e) => {
                let kind = e.kind();
                tracing::warn!(
                    request_id = %request_id,
                    engine = %secondary_engine.id(),
                    kind = %kind,
                    severity = ?kind.severity(),
                    error = %e,
                    "shadow engine failed, comparison skipped"
                );
            }
            Ok(_) => {
                let state = self.store.update(key, |s| {
                    s.record(matched);
                    s.clone()
                });
                METRICS.record_comparison(matched);
                obs::emit_dual_run_compared(request_id, matched, sampling.rate_applied, state.consecutive_matches);
            }
        }

        let report = DiffReport {
            request_id: request_id.to_string(),
            timestamps: ReportTimestamps {
                started_at,
                compared_at: Utc::now(),
            },
            engine_version: primary_engine.version().to_string(),
            contract_version: CONTRACT_VERSION.to_string(),
            algorithm: algorithm.to_string(),
            primary_engine: primary_engine.id().to_string(),
            secondary_engine: secondary_engine.id().to_string(),
            matched,
            differences,
            canonical_comparison: CanonicalComparison {
                primary_fingerprint: primary.determinism_fingerprint.clone(),
                secondary_fingerprint: secondary_fingerprint.clone(),
                fingerprint_match: matched,
            },
            sampling_metadata: sampling.clone(),
            secondary_error: secondary_error.clone(),
        };
        if let Err(e) = self.reports.write(&report) {
            tracing::warn!(error = %e, "diff report not written");
        }

        if let Some(secondary_fingerprint) = secondary_fingerprint.filter(|_| !matched) {
            let err = ParityError::Mismatch {
                primary: primary.determinism_fingerprint.clone(),
                secondary: secondary_fingerprint.clone(),
            };
            let kind = err.kind();
            tracing::error!(request_id = %request_id, kind = %kind, severity = ?kind.severity(), error = %err, "dual-run mismatch");
            self.emit(ControlPlaneEvent::DualRunMismatch(DualRunMismatchEvent {
                event_id: EventId::new(),
                timestamp: Utc::now(),
                request_hash: request_hash.to_string(),
                tenant_hash: key.tenant_hash.clone(),
                primary_engine: primary_engine.id().to_string(),
                secondary_engine: secondary_engine.id().to_string(),
                primary_fingerprint: primary.determinism_fingerprint.clone(),
                secondary_fingerprint: Some(secondary_fingerprint),
                difference_count: report.differences.len(),
                algorithm: algorithm.to_string(),
            }))
            .await;
            if self.config.rollback_on_mismatch {
                if self.engines[SECONDARY].is_available() {
                    self.roll_back("dual-run mismatch", Some(request_hash.to_string())).await;
                } else {
                    tracing::warn!(
                        engine = %self.engines[SECONDARY].id(),
                        "reference engine unavailable, rollback skipped"
                    );
                }
            }
        }

        ComparisonSummary {
            secondary_engine: secondary_engine.id().to_string(),
            matched,
            difference_count: report.differences.len(),
            secondary_error,
        }
    }
}

/// Evaluate on the blocking pool and time it.
async fn run_engine(engine: Arc<dyn DecisionEngine>, input: Arc<DecisionInput>) -> EngineRun {
    tokio::task::spawn_blocking(move || -> EngineRun {
        let started = Instant::now();
        let output = engine.evaluate(&input)?;
        Ok((output, started.elapsed().as_millis() as u64))
    })
    .await
    .map_err(|e| ExecutionError::Join(e.to_string()))?
}
