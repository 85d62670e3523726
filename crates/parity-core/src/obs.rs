//! Structured log hooks for decision, bundle and cutover lifecycle events.
//!
//! Every record carries a stable `event = "..."` field so log pipelines can
//! route on it. These are diagnostics only; the durable control-plane stream
//! lives in [`crate::dual_run::events`].

use tracing::{info, warn};

/// RAII guard that enters a request-scoped span.
///
/// ```ignore
/// let _span = RequestSpan::enter("req-12345");
/// // tracing calls below carry request_id = "req-12345"
/// ```
pub struct RequestSpan {
    _span: tracing::span::EnteredSpan,
}

impl RequestSpan {
    pub fn enter(request_id: &str) -> Self {
        Self {
            _span: request_span(request_id).entered(),
        }
    }
}

/// The request span itself, for `Instrument`ing futures that cross `.await`.
pub fn request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!("parity.request", request_id = %request_id)
}

pub fn emit_evaluation_finished(engine: &str, fingerprint: &str, actions: usize, duration_ms: u64) {
    info!(
        event = "decision.evaluated",
        engine = %engine,
        fingerprint = %fingerprint,
        actions = actions,
        duration_ms = duration_ms,
    );
}

pub fn emit_bundle_created(bundle_id: &str, merkle_root: &str, artifacts: usize) {
    info!(
        event = "bundle.created",
        bundle_id = %bundle_id,
        merkle_root = %merkle_root,
        artifacts = artifacts,
    );
}

/// Dual-run comparison outcome. Mismatches log at `warn`.
pub fn emit_dual_run_compared(request_id: &str, matched: bool, rate_applied: f64, consecutive_matches: u64) {
    if matched {
        info!(
            event = "dual_run.compared",
            request_id = %request_id,
            matched = true,
            rate_applied = rate_applied,
            consecutive_matches = consecutive_matches,
        );
    } else {
        warn!(
            event = "dual_run.mismatch",
            request_id = %request_id,
            matched = false,
            rate_applied = rate_applied,
        );
    }
}

pub fn emit_engine_switch(from: &str, to: &str, reason: &str) {
    warn!(event = "engine.switch", from = %from, to = %to, reason = %reason);
}

pub fn emit_remote_validation_failed(request_id: &str, attempts: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "remote.validation_failed",
        request_id = %request_id,
        attempts = attempts,
        error = %error,
    );
}
