//! Remote validator configuration.

use std::time::Duration;

use parity_core::config::{env_lookup, parse_bool, parse_string, parse_value, ConfigError};
use serde::{Deserialize, Serialize};

pub const ENV_REMOTE_VALIDATION: &str = "PARITY_REMOTE_VALIDATION";
pub const ENV_REMOTE_ENDPOINT: &str = "PARITY_REMOTE_ENDPOINT";
pub const ENV_REMOTE_TIMEOUT_MS: &str = "PARITY_REMOTE_TIMEOUT_MS";
pub const ENV_REMOTE_MAX_RETRIES: &str = "PARITY_REMOTE_MAX_RETRIES";
pub const ENV_REMOTE_INITIAL_RETRY_DELAY_MS: &str = "PARITY_REMOTE_INITIAL_RETRY_DELAY_MS";
pub const ENV_REMOTE_MAX_RETRY_DELAY_MS: &str = "PARITY_REMOTE_MAX_RETRY_DELAY_MS";
pub const ENV_REMOTE_FAIL_ON_ERROR: &str = "PARITY_REMOTE_FAIL_ON_ERROR";

/// Remote replay client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteReplayConfig {
    /// Submit bundles at all
    pub enabled: bool,
    /// Validator URL; required when enabled
    pub endpoint: Option<String>,
    /// Per-attempt timeout
    pub timeout_ms: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Surface exhaustion and rejection as errors instead of a failed result
    pub fail_on_error: bool,
}

impl Default for RemoteReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            timeout_ms: 5_000,
            max_retries: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 5_000,
            fail_on_error: false,
        }
    }
}

impl RemoteReplayConfig {
    /// Enabled config for a specific validator
    pub fn new(endpoint: &str) -> Self {
        Self {
            enabled: true,
            endpoint: Some(endpoint.to_string()),
            ..Self::default()
        }
    }

    /// Create a new config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_lookup)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let cfg = Self {
            enabled: parse_bool(ENV_REMOTE_VALIDATION, lookup(ENV_REMOTE_VALIDATION))?.unwrap_or(d.enabled),
            endpoint: parse_string(lookup(ENV_REMOTE_ENDPOINT)),
            timeout_ms: parse_value(ENV_REMOTE_TIMEOUT_MS, lookup(ENV_REMOTE_TIMEOUT_MS))?.unwrap_or(d.timeout_ms),
            max_retries: parse_value(ENV_REMOTE_MAX_RETRIES, lookup(ENV_REMOTE_MAX_RETRIES))?
                .unwrap_or(d.max_retries),
            initial_retry_delay_ms: parse_value(
                ENV_REMOTE_INITIAL_RETRY_DELAY_MS,
                lookup(ENV_REMOTE_INITIAL_RETRY_DELAY_MS),
            )?
            .unwrap_or(d.initial_retry_delay_ms),
            max_retry_delay_ms: parse_value(ENV_REMOTE_MAX_RETRY_DELAY_MS, lookup(ENV_REMOTE_MAX_RETRY_DELAY_MS))?
                .unwrap_or(d.max_retry_delay_ms),
            fail_on_error: parse_bool(ENV_REMOTE_FAIL_ON_ERROR, lookup(ENV_REMOTE_FAIL_ON_ERROR))?
                .unwrap_or(d.fail_on_error),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled {
            match self.endpoint.as_deref() {
                None => {
                    return Err(ConfigError::invalid(
                        ENV_REMOTE_ENDPOINT,
                        "",
                        "required when remote validation is enabled",
                    ))
                }
                Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
                    return Err(ConfigError::invalid(ENV_REMOTE_ENDPOINT, url, "must be an http(s) URL"))
                }
                Some(_) => {}
            }
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid(ENV_REMOTE_TIMEOUT_MS, "0", "must be positive"));
        }
        if self.initial_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigError::Conflict(format!(
                "{ENV_REMOTE_INITIAL_RETRY_DELAY_MS} ({}) exceeds {ENV_REMOTE_MAX_RETRY_DELAY_MS} ({})",
                self.initial_retry_delay_ms, self.max_retry_delay_ms
            )));
        }
        Ok(())
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delays(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_retry_delay_ms = initial_ms;
        self.max_retry_delay_ms = max_ms;
        self
    }

    pub fn with_fail_on_error(mut self, fail_on_error: bool) -> Self {
        self.fail_on_error = fail_on_error;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before retry number `retry` (0-based): `initial * 2^retry`,
    /// capped at the maximum.
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 1u64.checked_shl(retry).unwrap_or(u64::MAX);
        let ms = self
            .initial_retry_delay_ms
            .saturating_mul(factor)
            .min(self.max_retry_delay_ms);
        Duration::from_millis(ms)
    }
}
