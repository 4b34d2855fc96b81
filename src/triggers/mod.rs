//! # Trigger Module
//!
//! Boundary with the timed wake-up backend. A trigger is a one-shot
//! wake-up registered at an absolute timestamp; when it fires it can
//! render a prompt and report back which action the user chose. The
//! scheduler only ever talks to [`TriggerBackend`], so a platform alarm
//! service, a push gateway or the in-process [`local::LocalTriggerBackend`]
//! are interchangeable.
//!
//! Inbound events may be delivered more than once and may arrive in a
//! process with no prior in-memory state; consumers must treat every
//! event as if a restart happened immediately before it.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.1.0: Payload carries snooze count for prompt rendering
//! - 1.0.0: Initial trait + local tokio backend

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod local;

pub use local::LocalTriggerBackend;

// ============================================================================
// Types
// ============================================================================

/// Errors surfaced by a trigger backend
#[derive(Debug, Error)]
pub enum TriggerError {
    /// The backend rejected or failed the call
    #[error("trigger backend unavailable: {0}")]
    Unavailable(String),
}

/// Action a user can choose on a fired reminder prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderAction {
    /// Dose was taken
    Acknowledge,
    /// Defer the reminder by the configured snooze duration
    Postpone,
    /// Dose is being skipped
    Dismiss,
}

impl std::fmt::Display for ReminderAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderAction::Acknowledge => write!(f, "acknowledge"),
            ReminderAction::Postpone => write!(f, "postpone"),
            ReminderAction::Dismiss => write!(f, "dismiss"),
        }
    }
}

impl std::str::FromStr for ReminderAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "acknowledge" => Ok(ReminderAction::Acknowledge),
            "postpone" => Ok(ReminderAction::Postpone),
            "dismiss" => Ok(ReminderAction::Dismiss),
            _ => Err(anyhow::anyhow!("Invalid reminder action: {}", s)),
        }
    }
}

/// Data attached to every registered trigger.
///
/// The payload travels to the backend and comes back verbatim in fired
/// events, so action handling works even when the process restarted in
/// between. `snooze_count` lets the prompt suppress the postpone option
/// once the maximum has been reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Owning reminder id
    pub reminder_id: String,
    /// Snooze count at registration time
    pub snooze_count: u32,
    /// Whether this is an escalation repeat rather than the primary trigger
    pub is_escalation: bool,
    /// Offset past the nominal fire time, minutes; escalations only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_offset_minutes: Option<i64>,
}

/// A trigger currently registered with the backend
#[derive(Debug, Clone)]
pub struct LiveTrigger {
    pub id: String,
    pub fire_at_millis: i64,
    pub payload: TriggerPayload,
}

/// Inbound event: a trigger fired, possibly with a chosen action
#[derive(Debug, Clone)]
pub struct FiredTrigger {
    pub trigger_id: String,
    pub payload: TriggerPayload,
    /// None when the prompt was shown but no action was chosen
    pub action: Option<ReminderAction>,
}

// ============================================================================
// Backend contract
// ============================================================================

/// One-shot timed wake-up backend
#[async_trait]
pub trait TriggerBackend: Send + Sync {
    /// Schedule a wake-up at `fire_at_millis` (epoch milliseconds).
    ///
    /// Returns the backend's id for the trigger, which is always the
    /// caller-supplied `id` for the implementations in this crate.
    async fn request_trigger(
        &self,
        id: &str,
        fire_at_millis: i64,
        payload: TriggerPayload,
    ) -> Result<String, TriggerError>;

    /// Cancel a scheduled trigger; a missing id is not an error
    async fn cancel_trigger(&self, id: &str) -> Result<(), TriggerError>;

    /// Snapshot of every trigger currently scheduled
    async fn list_live_triggers(&self) -> Result<Vec<LiveTrigger>, TriggerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_action_from_str() {
        assert_eq!(
            ReminderAction::from_str("acknowledge").unwrap(),
            ReminderAction::Acknowledge
        );
        assert_eq!(
            ReminderAction::from_str("POSTPONE").unwrap(),
            ReminderAction::Postpone
        );
        assert!(ReminderAction::from_str("snooze").is_err());
    }

    #[test]
    fn test_action_display_roundtrip() {
        for action in [
            ReminderAction::Acknowledge,
            ReminderAction::Postpone,
            ReminderAction::Dismiss,
        ] {
            assert_eq!(
                ReminderAction::from_str(&action.to_string()).unwrap(),
                action
            );
        }
    }
}
