//! Scheduled trigger ledger
//!
//! Persisted index of every trigger currently registered with the
//! backend, keyed by trigger id. One reminder owns up to one primary
//! trigger (id == reminder id) plus one escalation trigger per configured
//! offset (id == `{reminderId}_repeat_{offsetMinutes}`).
//!
//! Rows are stored as a `BTreeMap` so two serializations of the same
//! ledger are byte-identical, which keeps repeated reconciliation runs
//! comparable.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage key for the ordered reminder record sequence
pub const REMINDERS_KEY: &str = "reminders";

/// Storage key for the trigger ledger
pub const LEDGER_KEY: &str = "scheduled_triggers";

/// Infix separating a reminder id from its escalation offset
pub const ESCALATION_INFIX: &str = "_repeat_";

/// One registered trigger: owning reminder plus absolute fire time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub reminder_id: String,
    pub fire_at_millis: i64,
}

/// The whole ledger, keyed by trigger id
pub type TriggerLedger = BTreeMap<String, LedgerEntry>;

/// Trigger id of the escalation repeat at `offset_minutes` past nominal
pub fn escalation_id(reminder_id: &str, offset_minutes: i64) -> String {
    format!("{}{}{}", reminder_id, ESCALATION_INFIX, offset_minutes)
}

/// Reminder id owning a trigger id (primary or escalation)
pub fn owner_of(trigger_id: &str) -> &str {
    match trigger_id.find(ESCALATION_INFIX) {
        Some(index) => &trigger_id[..index],
        None => trigger_id,
    }
}

/// Whether `trigger_id` is the primary or an escalation trigger of `reminder_id`
pub fn belongs_to(trigger_id: &str, reminder_id: &str) -> bool {
    trigger_id == reminder_id
        || (trigger_id.len() > reminder_id.len()
            && trigger_id.starts_with(reminder_id)
            && trigger_id[reminder_id.len()..].starts_with(ESCALATION_INFIX))
}
