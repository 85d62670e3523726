//! Pure routing: `(config, availability) -> engine`.
//!
//! Providers are ordered. Index 0 is the primary, index 1 the secondary
//! (portable reference); later entries are extra fallbacks.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::DualRunConfig;

pub const PRIMARY: usize = 0;
pub const SECONDARY: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionReason {
    Default,
    ForcedPrimary,
    ForcedSecondary,
    Fallback,
    RolledBack,
}

impl fmt::Display for SelectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "default",
            Self::ForcedPrimary => "forced_primary",
            Self::ForcedSecondary => "forced_secondary",
            Self::Fallback => "fallback",
            Self::RolledBack => "rolled_back",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub index: usize,
    pub fell_back: bool,
    pub reason: SelectionReason,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectionError {
    #[error("engine #{index} is pinned but unavailable")]
    PinnedUnavailable { index: usize },

    #[error("primary engine unavailable and fallback is disabled")]
    FallbackDisabled,

    #[error("no engine available")]
    NoneAvailable,
}

/// Choose the engine for the next request.
///
/// Precedence: forced secondary, forced primary, rollback pin, then the
/// first available provider in order (unless fallback is disabled).
pub fn select_engine(
    cfg: &DualRunConfig,
    availability: &[bool],
    rolled_back: bool,
) -> Result<Selection, SelectionError> {
    let available = |i: usize| availability.get(i).copied().unwrap_or(false);

    let pinned = if cfg.force_secondary {
        Some((SECONDARY, SelectionReason::ForcedSecondary))
    } else if cfg.force_primary {
        Some((PRIMARY, SelectionReason::ForcedPrimary))
    } else if rolled_back {
        Some((SECONDARY, SelectionReason::RolledBack))
    } else {
        None
    };

    if let Some((index, reason)) = pinned {
        return if available(index) {
            Ok(Selection {
                index,
                fell_back: false,
                reason,
            })
        } else {
            Err(SelectionError::PinnedUnavailable { index })
        };
    }

    if available(PRIMARY) {
        return Ok(Selection {
            index: PRIMARY,
            fell_back: false,
            reason: SelectionReason::Default,
        });
    }
    if cfg.disable_fallback {
        return Err(SelectionError::FallbackDisabled);
    }
    (1..availability.len())
        .find(|&i| available(i))
        .map(|index| Selection {
            index,
            fell_back: true,
            reason: SelectionReason::Fallback,
        })
        .ok_or(SelectionError::NoneAvailable)
}

/// Engine to shadow `active` on a sampled request: the other member of the
/// primary/secondary pair, if it is up.
pub fn shadow_for(active: usize, availability: &[bool]) -> Option<usize> {
    let other = match active {
        PRIMARY => SECONDARY,
        _ => PRIMARY,
    };
    (other != active && availability.get(other).copied().unwrap_or(false)).then_some(other)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> DualRunConfig {
        DualRunConfig::default()
    }

    #[test]
    fn primary_by_default() {
        let s = select_engine(&cfg(), &[true, true], false).unwrap();
        assert_eq!(s.index, PRIMARY);
        assert!(!s.fell_back);
        assert_eq!(s.reason, SelectionReason::Default);
    }

    #[test]
    fn falls_back_when_primary_down() {
        let s = select_engine(&cfg(), &[false, true], false).unwrap();
        assert_eq!(s.index, SECONDARY);
        assert!(s.fell_back);
        assert_eq!(s.reason, SelectionReason::Fallback);
    }

    #[test]
    fn fallback_chain_skips_down_providers() {
        let s = select_engine(&cfg(), &[false, false, true], false).unwrap();
        assert_eq!(s.index, 2);
    }

    #[test]
    fn disable_fallback_errors() {
        let mut c = cfg();
        c.disable_fallback = true;
        assert_eq!(
            select_engine(&c, &[false, true], false),
            Err(SelectionError::FallbackDisabled)
        );
    }

    #[test]
    fn force_flags_win() {
        let mut c = cfg();
        c.force_secondary = true;
        let s = select_engine(&c, &[true, true], false).unwrap();
        assert_eq!((s.index, s.reason), (SECONDARY, SelectionReason::ForcedSecondary));

        let mut c = cfg();
        c.force_primary = true;
        let s = select_engine(&c, &[true, true], true).unwrap();
        assert_eq!((s.index, s.reason), (PRIMARY, SelectionReason::ForcedPrimary));
        assert_eq!(
            select_engine(&c, &[false, true], false),
            Err(SelectionError::PinnedUnavailable { index: PRIMARY })
        );
    }

    #[test]
    fn rollback_pins_secondary() {
        let s = select_engine(&cfg(), &[true, true], true).unwrap();
        assert_eq!((s.index, s.reason), (SECONDARY, SelectionReason::RolledBack));
    }

    #[test]
    fn nothing_available() {
        assert_eq!(
            select_engine(&cfg(), &[false, false], false),
            Err(SelectionError::NoneAvailable)
        );
    }

    #[test]
    fn shadow_is_the_other_pair_member() {
        assert_eq!(shadow_for(PRIMARY, &[true, true]), Some(SECONDARY));
        assert_eq!(shadow_for(SECONDARY, &[true, true]), Some(PRIMARY));
        assert_eq!(shadow_for(PRIMARY, &[true, false]), None);
        assert_eq!(shadow_for(2, &[true, true, true]), Some(PRIMARY));
    }
}
