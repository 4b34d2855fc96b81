//! Reminder records and status rules
//!
//! One record per dose instance. Status moves `pending -> taken` or
//! `pending -> missed` and never back; postponing loops `pending ->
//! pending` while updating the scheduled date/time, bounded by the snooze
//! counter. The grace-window aging rule lives here too, applied whenever
//! records are loaded so the visible status eventually reflects reality
//! even if every trigger delivery was lost.

use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use super::ledger::REMINDERS_KEY;
use super::SchedulerError;
use crate::core::SchedulerConfig;
use crate::storage::CoordinatedStore;

/// Calendar day format used in persisted records
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Time-of-day format used in persisted records
pub const TIME_FORMAT: &str = "%H:%M";

// ============================================================================
// Enums
// ============================================================================

/// Form of the medication, used for prompt rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MedicationKind {
    Tablet,
    Capsule,
    Liquid,
    Injection,
    Other,
}

impl std::fmt::Display for MedicationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MedicationKind::Tablet => write!(f, "tablet"),
            MedicationKind::Capsule => write!(f, "capsule"),
            MedicationKind::Liquid => write!(f, "liquid"),
            MedicationKind::Injection => write!(f, "injection"),
            MedicationKind::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for MedicationKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "tablet" => Ok(MedicationKind::Tablet),
            "capsule" => Ok(MedicationKind::Capsule),
            "liquid" => Ok(MedicationKind::Liquid),
            "injection" => Ok(MedicationKind::Injection),
            "other" => Ok(MedicationKind::Other),
            _ => Err(anyhow::anyhow!("Invalid medication kind: {}", s)),
        }
    }
}

/// Lifecycle status of a reminder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    /// Waiting for the user to act
    Pending,
    /// Dose confirmed taken
    Taken,
    /// Dose skipped, either explicitly or by aging out
    Missed,
}

impl std::fmt::Display for ReminderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderStatus::Pending => write!(f, "pending"),
            ReminderStatus::Taken => write!(f, "taken"),
            ReminderStatus::Missed => write!(f, "missed"),
        }
    }
}

// ============================================================================
// Record
// ============================================================================

/// Outcome of a postpone attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostponeOutcome {
    /// Date/time moved forward, snooze counter incremented
    Rescheduled,
    /// The snooze counter already sits at the configured maximum
    LimitReached,
    /// The reminder is already taken or missed
    NotPending,
}

/// One dose instance a user must act on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reminder {
    /// Opaque unique id, immutable after creation
    pub id: String,
    pub medication_name: String,
    pub dosage: String,
    pub kind: MedicationKind,
    /// Scheduled calendar day, `YYYY-MM-DD`
    pub date: String,
    /// Scheduled time of day, `HH:mm`
    pub time: String,
    pub status: ReminderStatus,
    /// Groups reminders created together, for bulk deletion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    /// Number of postpones applied so far
    #[serde(default)]
    pub snooze_count: u32,
    /// Pre-postpone date, kept for display once the reminder has been snoozed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_date: Option<String>,
    /// Pre-postpone time, kept for display once the reminder has been snoozed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_time: Option<String>,
}

impl Reminder {
    /// Due instant in epoch milliseconds, combining `date` and `time` in
    /// the local timezone. An ambiguous local time (DST fold) resolves to
    /// the earliest instant.
    pub fn due_at_millis(&self) -> Result<i64, SchedulerError> {
        let invalid = || SchedulerError::InvalidDateTime {
            id: self.id.clone(),
            value: format!("{} {}", self.date, self.time),
        };
        let date = NaiveDate::parse_from_str(&self.date, DATE_FORMAT).map_err(|_| invalid())?;
        let time = NaiveTime::parse_from_str(&self.time, TIME_FORMAT).map_err(|_| invalid())?;
        let instant = Local
            .from_local_datetime(&NaiveDateTime::new(date, time))
            .earliest()
            .ok_or_else(invalid)?;
        Ok(instant.timestamp_millis())
    }

    pub fn is_pending(&self) -> bool {
        self.status == ReminderStatus::Pending
    }

    /// Mark the dose taken. An explicit acknowledgement also corrects a
    /// record the aging rule already marked missed. Returns whether the
    /// record changed.
    pub fn acknowledge(&mut self) -> bool {
        match self.status {
            ReminderStatus::Pending | ReminderStatus::Missed => {
                self.status = ReminderStatus::Taken;
                true
            }
            ReminderStatus::Taken => false,
        }
    }

    /// Mark the dose missed. No-op on any terminal status. Returns whether
    /// the record changed.
    pub fn dismiss(&mut self) -> bool {
        match self.status {
            ReminderStatus::Pending => {
                self.status = ReminderStatus::Missed;
                true
            }
            ReminderStatus::Taken | ReminderStatus::Missed => false,
        }
    }

    /// Push the reminder `snooze_minutes` past `now`, bounded by
    /// `max_snooze`. The first postpone preserves the original date/time.
    pub fn postpone(
        &mut self,
        now: DateTime<Local>,
        snooze_minutes: i64,
        max_snooze: u32,
    ) -> PostponeOutcome {
        if !self.is_pending() {
            return PostponeOutcome::NotPending;
        }
        if self.snooze_count >= max_snooze {
            return PostponeOutcome::LimitReached;
        }
        if self.snooze_count == 0 {
            self.original_date = Some(self.date.clone());
            self.original_time = Some(self.time.clone());
        }
        let due = now + Duration::minutes(snooze_minutes);
        self.date = due.format(DATE_FORMAT).to_string();
        self.time = due.format(TIME_FORMAT).to_string();
        self.snooze_count += 1;
        PostponeOutcome::Rescheduled
    }
}

// ============================================================================
// Aging rule
// ============================================================================

/// Age out pending reminders whose due time plus the grace window has
/// elapsed. Returns the number of records transitioned to missed.
pub fn age_out_overdue(reminders: &mut [Reminder], now_millis: i64, grace_millis: i64) -> usize {
    let mut aged = 0;
    for reminder in reminders.iter_mut().filter(|r| r.is_pending()) {
        match reminder.due_at_millis() {
            Ok(due) if due + grace_millis <= now_millis => {
                reminder.status = ReminderStatus::Missed;
                aged += 1;
            }
            Ok(_) => {}
            Err(err) => warn!("Skipping aging for {}: {}", reminder.id, err),
        }
    }
    aged
}

/// Load the full record set with the aging rule applied; any aged-out
/// statuses are persisted before returning.
pub(crate) async fn load_reminders_aged(
    store: &CoordinatedStore,
    config: &SchedulerConfig,
) -> Result<Vec<Reminder>, SchedulerError> {
    let now = Utc::now().timestamp_millis();
    let grace = config.grace_millis();
    let mut reminders: Vec<Reminder> = store.get_json(REMINDERS_KEY).await?.unwrap_or_default();
    if age_out_overdue(&mut reminders, now, grace) == 0 {
        return Ok(reminders);
    }
    // Re-apply on the stored value under the key lock so a concurrent
    // writer's change is not clobbered.
    let persisted = store
        .update_json::<Vec<Reminder>, _>(REMINDERS_KEY, |current| {
            let mut records = current.unwrap_or_default();
            age_out_overdue(&mut records, now, grace);
            records
        })
        .await?;
    Ok(persisted)
}
