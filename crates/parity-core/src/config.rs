//! Environment-variable parsing shared by every configuration struct.
//!
//! Configs expose `from_env()` plus `from_lookup(..)` so tests can inject a
//! variable map instead of mutating the process environment.

use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },

    #[error("conflicting configuration: {0}")]
    Conflict(String),
}

impl ConfigError {
    pub fn invalid(var: &str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var: var.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Read the process environment.
pub fn env_lookup(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// `1/true/yes/on` and `0/false/no/off`, case-insensitive. Empty means unset.
pub fn parse_bool(var: &str, raw: Option<String>) -> Result<Option<bool>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::invalid(var, &raw, "expected a boolean")),
    }
}

/// Parse any `FromStr` value. Empty means unset.
pub fn parse_value<T: FromStr>(var: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::invalid(var, &raw, e.to_string()))
}

/// Non-empty string value.
pub fn parse_string(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}
