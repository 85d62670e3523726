//! Process-wide atomic counters.
//!
//! Counters are incremented silently at the call site. [`Metrics::flush`]
//! emits current values as one `tracing::info!` record. They are never read
//! back into routing or sampling decisions.

use std::sync::atomic::{AtomicU64, Ordering};

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    evaluations: AtomicU64,
    bundles_created: AtomicU64,
    comparisons: AtomicU64,
    mismatches: AtomicU64,
    engine_switches: AtomicU64,
    events_dropped: AtomicU64,
    remote_validation_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            evaluations: AtomicU64::new(0),
            bundles_created: AtomicU64::new(0),
            comparisons: AtomicU64::new(0),
            mismatches: AtomicU64::new(0),
            engine_switches: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            remote_validation_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_evaluations(&self) {
        self.evaluations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_bundles_created(&self) {
        self.bundles_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dual-run comparison and whether it matched.
    pub fn record_comparison(&self, matched: bool) {
        self.comparisons.fetch_add(1, Ordering::Relaxed);
        if !matched {
            self.mismatches.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "comparisons", matched, "counter incremented");
    }

    pub fn inc_engine_switches(&self) {
        self.engine_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_events_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "events_dropped", "counter incremented");
    }

    pub fn inc_remote_validation_failures(&self) {
        self.remote_validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit all counters as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            evaluations = self.evaluations(),
            bundles_created = self.bundles_created(),
            comparisons = self.comparisons(),
            mismatches = self.mismatches(),
            engine_switches = self.engine_switches(),
            events_dropped = self.events_dropped(),
            remote_validation_failures = self.remote_validation_failures(),
        );
    }

    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn bundles_created(&self) -> u64 {
        self.bundles_created.load(Ordering::Relaxed)
    }

    pub fn comparisons(&self) -> u64 {
        self.comparisons.load(Ordering::Relaxed)
    }

    pub fn mismatches(&self) -> u64 {
        self.mismatches.load(Ordering::Relaxed)
    }

    pub fn engine_switches(&self) -> u64 {
        self.engine_switches.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn remote_validation_failures(&self) -> u64 {
        self.remote_validation_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (tests).
    pub fn reset(&self) {
        for counter in [
            &self.evaluations,
            &self.bundles_created,
            &self.comparisons,
            &self.mismatches,
            &self.engine_switches,
            &self.events_dropped,
            &self.remote_validation_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_track_mismatches() {
        let m = Metrics::new();
        m.record_comparison(true);
        m.record_comparison(false);
        m.record_comparison(true);
        assert_eq!(m.comparisons(), 3);
        assert_eq!(m.mismatches(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_evaluations();
        m.inc_bundles_created();
        m.inc_engine_switches();
        m.inc_events_dropped();
        m.inc_remote_validation_failures();
        m.record_comparison(false);
        m.reset();
        assert_eq!(m.evaluations(), 0);
        assert_eq!(m.bundles_created(), 0);
        assert_eq!(m.mismatches(), 0);
        assert_eq!(m.events_dropped(), 0);
        assert_eq!(m.remote_validation_failures(), 0);
    }
}
