use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::{env_lookup, parse_bool, parse_string, parse_value, ConfigError, Result};

pub const ENV_DUAL_RUN: &str = "PARITY_DUAL_RUN";
pub const ENV_FORCE_PRIMARY: &str = "PARITY_FORCE_PRIMARY";
pub const ENV_FORCE_SECONDARY: &str = "PARITY_FORCE_SECONDARY";
pub const ENV_DISABLE_FALLBACK: &str = "PARITY_DISABLE_FALLBACK";
pub const ENV_ROLLBACK_ON_MISMATCH: &str = "PARITY_ROLLBACK_ON_MISMATCH";
pub const ENV_BASE_SAMPLE_RATE: &str = "PARITY_BASE_SAMPLE_RATE";
pub const ENV_STABILITY_THRESHOLD: &str = "PARITY_STABILITY_THRESHOLD";
pub const ENV_DIFF_REPORT_DIR: &str = "PARITY_DIFF_REPORT_DIR";
pub const ENV_EVENT_LOG: &str = "PARITY_EVENT_LOG";
pub const ENV_DUAL_RUN_MODE: &str = "PARITY_DUAL_RUN_MODE";

pub const DEFAULT_BASE_SAMPLE_RATE: f64 = 0.01;
pub const DEFAULT_STABILITY_THRESHOLD: u64 = 100;

/// How the secondary engine runs relative to the primary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DualRunMode {
    #[default]
    Concurrent,
    Sequential,
}

impl FromStr for DualRunMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "concurrent" => Ok(Self::Concurrent),
            "sequential" => Ok(Self::Sequential),
            other => Err(format!("expected concurrent or sequential, got {other}")),
        }
    }
}

impl fmt::Display for DualRunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Concurrent => "concurrent",
            Self::Sequential => "sequential",
        })
    }
}

/// Cutover control surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualRunConfig {
    /// Master switch for sampling the secondary engine.
    pub enabled: bool,
    /// Pin routing to the primary. Selection fails with
    /// `SelectionError::PinnedUnavailable` while the primary is down.
    pub force_primary: bool,
    /// Route to the secondary regardless of the primary's health.
    pub force_secondary: bool,
    /// Never fall back; an unavailable primary is an error.
    pub disable_fallback: bool,
    /// Pin routing to the reference engine on the first mismatch.
    pub rollback_on_mismatch: bool,
    /// Steady-state sampling rate, `0 < rate <= 1`.
    pub base_sample_rate: f64,
    /// Consecutive matches before steady state, `>= 1`.
    pub stability_threshold: u64,
    pub diff_report_dir: PathBuf,
    pub event_log: PathBuf,
    pub mode: DualRunMode,
}

impl Default for DualRunConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            force_primary: false,
            force_secondary: false,
            disable_fallback: false,
            rollback_on_mismatch: false,
            base_sample_rate: DEFAULT_BASE_SAMPLE_RATE,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            diff_report_dir: PathBuf::from(".parity/diff-reports"),
            event_log: PathBuf::from(".parity/events.ndjson"),
            mode: DualRunMode::Concurrent,
        }
    }
}

impl DualRunConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(env_lookup)
    }

    /// Build from an arbitrary variable source. Unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let d = Self::default();
        let cfg = Self {
            enabled: parse_bool(ENV_DUAL_RUN, lookup(ENV_DUAL_RUN))?.unwrap_or(d.enabled),
            force_primary: parse_bool(ENV_FORCE_PRIMARY, lookup(ENV_FORCE_PRIMARY))?.unwrap_or(false),
            force_secondary: parse_bool(ENV_FORCE_SECONDARY, lookup(ENV_FORCE_SECONDARY))?.unwrap_or(false),
            disable_fallback: parse_bool(ENV_DISABLE_FALLBACK, lookup(ENV_DISABLE_FALLBACK))?.unwrap_or(false),
            rollback_on_mismatch: parse_bool(ENV_ROLLBACK_ON_MISMATCH, lookup(ENV_ROLLBACK_ON_MISMATCH))?
                .unwrap_or(false),
            base_sample_rate: parse_value(ENV_BASE_SAMPLE_RATE, lookup(ENV_BASE_SAMPLE_RATE))?
                .unwrap_or(d.base_sample_rate),
            stability_threshold: parse_value(ENV_STABILITY_THRESHOLD, lookup(ENV_STABILITY_THRESHOLD))?
                .unwrap_or(d.stability_threshold),
            diff_report_dir: parse_string(lookup(ENV_DIFF_REPORT_DIR))
                .map(PathBuf::from)
                .unwrap_or(d.diff_report_dir),
            event_log: parse_string(lookup(ENV_EVENT_LOG)).map(PathBuf::from).unwrap_or(d.event_log),
            mode: parse_value(ENV_DUAL_RUN_MODE, lookup(ENV_DUAL_RUN_MODE))?.unwrap_or(d.mode),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_sample_rate > 0.0 && self.base_sample_rate <= 1.0) {
            return Err(ConfigError::invalid(
                ENV_BASE_SAMPLE_RATE,
                &self.base_sample_rate.to_string(),
                "must satisfy 0 < rate <= 1",
            ));
        }
        if self.stability_threshold == 0 {
            return Err(ConfigError::invalid(ENV_STABILITY_THRESHOLD, "0", "must be at least 1"));
        }
        if self.force_primary && self.force_secondary {
            return Err(ConfigError::Conflict(format!(
                "{ENV_FORCE_PRIMARY} and {ENV_FORCE_SECONDARY} are mutually exclusive"
            )));
        }
        Ok(())
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_base_sample_rate(mut self, rate: f64) -> Self {
        self.base_sample_rate = rate;
        self
    }

    pub fn with_stability_threshold(mut self, threshold: u64) -> Self {
        self.stability_threshold = threshold;
        self
    }

    pub fn with_mode(mut self, mode: DualRunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rollback_on_mismatch(mut self, rollback: bool) -> Self {
        self.rollback_on_mismatch = rollback;
        self
    }

    pub fn with_diff_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diff_report_dir = dir.into();
        self
    }
}
