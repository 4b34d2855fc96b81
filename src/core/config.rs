//! Scheduler configuration
//!
//! Timing knobs for snooze, escalation and the missed-dose grace window.
//! Defaults match the shipped product behavior; every value can be
//! overridden through `MEDMINDER_*` environment variables (loaded from
//! `.env` by the daemon before this module is consulted).

use log::warn;

// ============================================================================
// Defaults
// ============================================================================

/// Maximum number of times a single reminder can be postponed
pub const DEFAULT_MAX_SNOOZE: u32 = 3;

/// How far a postpone pushes the reminder, in minutes
pub const DEFAULT_SNOOZE_MINUTES: i64 = 15;

/// Grace window after the due time before a pending reminder counts as missed
pub const DEFAULT_GRACE_MINUTES: i64 = 15;

/// Escalation repeat offsets past the nominal fire time, in minutes
pub const DEFAULT_ESCALATION_OFFSETS: [i64; 3] = [5, 10, 15];

// ============================================================================
// Config
// ============================================================================

/// Timing configuration shared by the engine, resolver and reconciler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on `snooze_count` for any reminder
    pub max_snooze: u32,
    /// Postpone duration in minutes
    pub snooze_minutes: i64,
    /// Minutes past the due time before a pending reminder ages to missed
    pub grace_minutes: i64,
    /// Minutes past the nominal fire time at which escalation triggers repeat
    pub escalation_offsets_minutes: Vec<i64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_snooze: DEFAULT_MAX_SNOOZE,
            snooze_minutes: DEFAULT_SNOOZE_MINUTES,
            grace_minutes: DEFAULT_GRACE_MINUTES,
            escalation_offsets_minutes: DEFAULT_ESCALATION_OFFSETS.to_vec(),
        }
    }
}

impl SchedulerConfig {
    /// Build a config from `MEDMINDER_*` environment variables, falling back
    /// to defaults for anything unset or malformed.
    pub fn from_env() -> Self {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            max_snooze: env_parsed("MEDMINDER_MAX_SNOOZE", defaults.max_snooze),
            snooze_minutes: env_parsed("MEDMINDER_SNOOZE_MINUTES", defaults.snooze_minutes),
            grace_minutes: env_parsed("MEDMINDER_GRACE_MINUTES", defaults.grace_minutes),
            escalation_offsets_minutes: std::env::var("MEDMINDER_ESCALATION_OFFSETS")
                .ok()
                .and_then(|raw| parse_offsets(&raw))
                .unwrap_or(defaults.escalation_offsets_minutes),
        }
    }

    /// Snooze duration in milliseconds
    pub fn snooze_millis(&self) -> i64 {
        self.snooze_minutes * 60_000
    }

    /// Grace window in milliseconds
    pub fn grace_millis(&self) -> i64 {
        self.grace_minutes * 60_000
    }
}

fn env_parsed<T: std::str::FromStr + Copy>(name: &str, fallback: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring malformed {}: {:?}", name, raw);
                fallback
            }
        },
        Err(_) => fallback,
    }
}

/// Parse a comma-separated offset list like `"5,10,15"`.
///
/// Returns None when the list is empty or any entry is not a positive
/// number of minutes.
fn parse_offsets(raw: &str) -> Option<Vec<i64>> {
    let offsets: Vec<i64> = raw
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if offsets.is_empty() || offsets.iter().any(|minutes| *minutes <= 0) {
        warn!("Ignoring malformed MEDMINDER_ESCALATION_OFFSETS: {:?}", raw);
        return None;
    }
    Some(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_snooze, 3);
        assert_eq!(config.snooze_minutes, 15);
        assert_eq!(config.grace_minutes, 15);
        assert_eq!(config.escalation_offsets_minutes, vec![5, 10, 15]);
    }

    #[test]
    fn test_parse_offsets_valid() {
        assert_eq!(parse_offsets("5,10,15"), Some(vec![5, 10, 15]));
        assert_eq!(parse_offsets(" 3 , 6 "), Some(vec![3, 6]));
    }

    #[test]
    fn test_parse_offsets_rejects_garbage() {
        assert_eq!(parse_offsets(""), None);
        assert_eq!(parse_offsets("5,abc"), None);
        assert_eq!(parse_offsets("5,-10"), None);
        assert_eq!(parse_offsets("0"), None);
    }

    #[test]
    fn test_millis_helpers() {
        let config = SchedulerConfig::default();
        assert_eq!(config.snooze_millis(), 15 * 60_000);
        assert_eq!(config.grace_millis(), 15 * 60_000);
    }
}
