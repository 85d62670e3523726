use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::config::DualRunConfig;
use super::events::hash_identifier;

/// Sampling is tracked per (tenant, engine version, algorithm).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadKey {
    pub tenant_hash: String,
    pub engine_version: String,
    pub algorithm: String,
}

impl WorkloadKey {
    /// Key for a raw tenant id. Only the hash is retained.
    pub fn new(tenant_id: &str, engine_version: &str, algorithm: &str) -> Self {
        Self {
            tenant_hash: hash_identifier(tenant_id),
            engine_version: engine_version.to_string(),
            algorithm: algorithm.to_string(),
        }
    }
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant_hash, self.engine_version, self.algorithm)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SamplingPhase {
    /// Unseen tenant, version or algorithm: sample everything.
    ColdStart,
    /// Rate falls linearly with consecutive matches.
    Tapering,
    /// Stability threshold reached: base rate.
    SteadyState,
    /// A mismatch was observed: sample everything until the next match.
    PostMismatch,
}

impl fmt::Display for SamplingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ColdStart => "cold-start",
            Self::Tapering => "tapering",
            Self::SteadyState => "steady-state",
            Self::PostMismatch => "post-mismatch",
        })
    }
}

/// Per-workload sampling state. Mutated only through
/// [`SamplingStore::update`](super::store::SamplingStore::update).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingState {
    pub consecutive_matches: u64,
    pub is_new_tenant: bool,
    pub is_new_version: bool,
    pub is_new_algorithm: bool,
    pub post_mismatch: bool,
    pub rate_applied: f64,
    pub total_comparisons: u64,
    pub total_mismatches: u64,
}

impl SamplingState {
    pub fn new(is_new_tenant: bool, is_new_version: bool, is_new_algorithm: bool) -> Self {
        Self {
            consecutive_matches: 0,
            is_new_tenant,
            is_new_version,
            is_new_algorithm,
            post_mismatch: false,
            rate_applied: 1.0,
            total_comparisons: 0,
            total_mismatches: 0,
        }
    }

    fn is_new(&self) -> bool {
        self.is_new_tenant || self.is_new_version || self.is_new_algorithm
    }

    pub fn phase(&self, cfg: &DualRunConfig) -> SamplingPhase {
        if self.post_mismatch {
            SamplingPhase::PostMismatch
        } else if self.is_new() && self.consecutive_matches == 0 {
            SamplingPhase::ColdStart
        } else if self.consecutive_matches >= cfg.stability_threshold {
            SamplingPhase::SteadyState
        } else {
            SamplingPhase::Tapering
        }
    }

    /// `max(base, 1 - matches / threshold)`, or `1` in cold-start and
    /// post-mismatch.
    pub fn rate(&self, cfg: &DualRunConfig) -> f64 {
        match self.phase(cfg) {
            SamplingPhase::ColdStart | SamplingPhase::PostMismatch => 1.0,
            SamplingPhase::SteadyState => cfg.base_sample_rate,
            SamplingPhase::Tapering => {
                let taper = 1.0 - self.consecutive_matches as f64 / cfg.stability_threshold as f64;
                taper.max(cfg.base_sample_rate)
            }
        }
    }

    /// Record a completed comparison.
    pub fn record(&mut self, matched: bool) {
        self.total_comparisons += 1;
        if matched {
            self.consecutive_matches += 1;
            self.post_mismatch = false;
            self.is_new_tenant = false;
            self.is_new_version = false;
            self.is_new_algorithm = false;
        } else {
            self.total_mismatches += 1;
            self.consecutive_matches = 0;
            self.post_mismatch = true;
        }
    }
}

/// Uniform draw in `[0, 1)` derived from the request id.
///
/// A replayed request makes the same sampling decision.
pub fn sample_draw(request_id: &str) -> f64 {
    let digest = Sha256::digest(request_id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    // 53 high bits give an exactly representable fraction.
    (u64::from_be_bytes(head) >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DualRunConfig {
        DualRunConfig::default()
            .with_base_sample_rate(0.01)
            .with_stability_threshold(100)
    }

    fn state_after(matches: u64) -> SamplingState {
        let mut s = SamplingState::new(true, true, true);
        for _ in 0..matches {
            s.record(true);
        }
        s
    }

    #[test]
    fn new_workload_starts_cold() {
        let s = SamplingState::new(true, false, false);
        assert_eq!(s.phase(&cfg()), SamplingPhase::ColdStart);
        assert_eq!(s.rate(&cfg()), 1.0);
    }

    #[test]
    fn taper_law() {
        assert_eq!(state_after(50).rate(&cfg()), 0.5);
        assert_eq!(state_after(50).phase(&cfg()), SamplingPhase::Tapering);
        assert!((state_after(99).rate(&cfg()) - 0.01).abs() < 1e-12);
        assert_eq!(state_after(100).rate(&cfg()), 0.01);
        assert_eq!(state_after(100).phase(&cfg()), SamplingPhase::SteadyState);
        assert_eq!(state_after(250).rate(&cfg()), 0.01);
    }

    #[test]
    fn mismatch_forces_full_sampling() {
        let mut s = state_after(80);
        assert!((s.rate(&cfg()) - 0.2).abs() < 1e-12);
        s.record(false);
        assert_eq!(s.phase(&cfg()), SamplingPhase::PostMismatch);
        assert_eq!(s.rate(&cfg()), 1.0);
        assert_eq!(s.consecutive_matches, 0);
        assert_eq!(s.total_mismatches, 1);

        s.record(true);
        assert_eq!(s.phase(&cfg()), SamplingPhase::Tapering);
        assert!((s.rate(&cfg()) - 0.99).abs() < 1e-12);
    }

    #[test]
    fn draw_is_deterministic_and_bounded() {
        let a = sample_draw("req-1");
        assert_eq!(a, sample_draw("req-1"));
        assert_ne!(a, sample_draw("req-2"));
        for i in 0..1000 {
            let d = sample_draw(&format!("req-{i}"));
            assert!((0.0..1.0).contains(&d));
        }
    }

    #[test]
    fn draw_tracks_rate() {
        let sampled = (0..10_000)
            .filter(|i| sample_draw(&format!("request-{i}")) < 0.1)
            .count();
        assert!((800..1200).contains(&sampled), "sampled {sampled}");
    }

    #[test]
    fn workload_key_hashes_tenant() {
        let key = WorkloadKey::new("acme-corp", "0.3.1", "robust");
        assert_ne!(key.tenant_hash, "acme-corp");
        assert_eq!(key, WorkloadKey::new("acme-corp", "0.3.1", "robust"));
    }
}
