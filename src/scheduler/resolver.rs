//! # Action Resolver
//!
//! Applies a user's chosen action (acknowledge, postpone, dismiss) to the
//! owning reminder record, then delegates the trigger-side consequences
//! to the scheduling engine. The record write always happens first, under
//! the store's key lock, so a crash between the two leaves the ledger
//! merely stale for the next recovery pass rather than losing the user's
//! decision.
//!
//! Every transition is idempotent: fired triggers can be delivered more
//! than once (an escalation can race the resolution it was meant to back
//! up), and replays land on a record that is already in the target state.
//! An action for an unknown reminder id is a logged no-op.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.2.0: Record persisted before any engine call
//! - 1.1.0: Snooze bound enforced here as well as in the prompt
//! - 1.0.0: Initial release

use chrono::Local;
use log::{debug, info, warn};
use std::sync::Arc;

use super::engine::ReminderScheduler;
use super::ledger::REMINDERS_KEY;
use super::reminder::{PostponeOutcome, Reminder};
use super::SchedulerError;
use crate::core::SchedulerConfig;
use crate::storage::CoordinatedStore;
use crate::triggers::ReminderAction;

/// What the record write decided, driving the trigger-side follow-up
enum Applied {
    /// No record with the given id
    Missing,
    /// Record already in the target state (or the action was defended against)
    Unchanged(Reminder),
    /// Record reached a terminal status; triggers must go
    Resolved(Reminder),
    /// Record moved to a later time; triggers must be replaced
    Postponed(Reminder),
}

/// Applies action transitions to reminder records
pub struct ActionResolver {
    store: Arc<CoordinatedStore>,
    scheduler: Arc<ReminderScheduler>,
    config: SchedulerConfig,
}

impl ActionResolver {
    pub fn new(
        store: Arc<CoordinatedStore>,
        scheduler: Arc<ReminderScheduler>,
        config: SchedulerConfig,
    ) -> Self {
        ActionResolver {
            store,
            scheduler,
            config,
        }
    }

    /// Apply `action` to the reminder, persist the record, then adjust
    /// triggers. Returns the updated record, or None for an unknown id.
    pub async fn apply(
        &self,
        reminder_id: &str,
        action: ReminderAction,
    ) -> Result<Option<Reminder>, SchedulerError> {
        let snooze_minutes = self.config.snooze_minutes;
        let max_snooze = self.config.max_snooze;

        let mut applied = Applied::Missing;
        self.store
            .update_json::<Vec<Reminder>, _>(REMINDERS_KEY, |current| {
                let mut reminders = current.unwrap_or_default();
                if let Some(reminder) = reminders.iter_mut().find(|r| r.id == reminder_id) {
                    applied = match action {
                        ReminderAction::Acknowledge => {
                            if reminder.acknowledge() {
                                Applied::Resolved(reminder.clone())
                            } else {
                                Applied::Unchanged(reminder.clone())
                            }
                        }
                        ReminderAction::Dismiss => {
                            if reminder.dismiss() {
                                Applied::Resolved(reminder.clone())
                            } else {
                                Applied::Unchanged(reminder.clone())
                            }
                        }
                        ReminderAction::Postpone => {
                            match reminder.postpone(Local::now(), snooze_minutes, max_snooze) {
                                PostponeOutcome::Rescheduled => {
                                    Applied::Postponed(reminder.clone())
                                }
                                PostponeOutcome::LimitReached => {
                                    // The prompt should not have offered it;
                                    // defend anyway.
                                    Applied::Unchanged(reminder.clone())
                                }
                                PostponeOutcome::NotPending => {
                                    Applied::Unchanged(reminder.clone())
                                }
                            }
                        }
                    };
                }
                reminders
            })
            .await?;

        match applied {
            Applied::Missing => {
                info!("Ignoring {} for unknown reminder {}", action, reminder_id);
                Ok(None)
            }
            Applied::Unchanged(reminder) => {
                debug!(
                    "{} on reminder {} is a no-op (status {}, snoozed {}x)",
                    action, reminder_id, reminder.status, reminder.snooze_count
                );
                Ok(Some(reminder))
            }
            Applied::Resolved(reminder) => {
                info!("Reminder {} -> {}", reminder_id, reminder.status);
                // The record holds the decision; a stale ledger is repaired
                // on the next recovery pass.
                if let Err(err) = self.scheduler.cancel(reminder_id).await {
                    warn!("Trigger cleanup for {} failed: {}", reminder_id, err);
                }
                Ok(Some(reminder))
            }
            Applied::Postponed(reminder) => {
                info!(
                    "Reminder {} postponed to {} {} ({}x)",
                    reminder_id, reminder.date, reminder.time, reminder.snooze_count
                );
                let due = reminder.due_at_millis()?;
                if let Err(err) = self.scheduler.reschedule(&reminder, due).await {
                    warn!("Rescheduling {} failed: {}", reminder_id, err);
                }
                Ok(Some(reminder))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ledger::{belongs_to, TriggerLedger, LEDGER_KEY};
    use crate::scheduler::reminder::{
        MedicationKind, ReminderStatus, DATE_FORMAT, TIME_FORMAT,
    };
    use crate::storage::MemoryKeyValueStore;
    use crate::triggers::{LocalTriggerBackend, TriggerBackend};
    use chrono::{Duration, Utc};

    struct Fixture {
        store: Arc<CoordinatedStore>,
        scheduler: Arc<ReminderScheduler>,
        backend: Arc<LocalTriggerBackend>,
        resolver: ActionResolver,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(CoordinatedStore::new(Arc::new(MemoryKeyValueStore::new())));
        let (backend, _events) = LocalTriggerBackend::new();
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::clone(&store),
            Arc::clone(&backend) as Arc<dyn TriggerBackend>,
            SchedulerConfig::default(),
        ));
        let resolver = ActionResolver::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            SchedulerConfig::default(),
        );
        Fixture {
            store,
            scheduler,
            backend,
            resolver,
        }
    }

    fn reminder_due_in(minutes: i64) -> Reminder {
        let due = Local::now() + Duration::minutes(minutes);
        Reminder {
            id: uuid::Uuid::new_v4().to_string(),
            medication_name: "Lisinopril".to_string(),
            dosage: "10mg".to_string(),
            kind: MedicationKind::Tablet,
            date: due.format(DATE_FORMAT).to_string(),
            time: due.format(TIME_FORMAT).to_string(),
            status: ReminderStatus::Pending,
            course_id: None,
            snooze_count: 0,
            original_date: None,
            original_time: None,
        }
    }

    async fn seed(fixture: &Fixture, reminder: &Reminder) {
        fixture
            .store
            .set_json(REMINDERS_KEY, &vec![reminder.clone()])
            .await
            .unwrap();
        fixture
            .scheduler
            .register(reminder, reminder.due_at_millis().unwrap())
            .await
            .unwrap();
    }

    async fn stored(fixture: &Fixture, id: &str) -> Reminder {
        let all: Vec<Reminder> = fixture
            .store
            .get_json(REMINDERS_KEY)
            .await
            .unwrap()
            .unwrap();
        all.into_iter().find(|r| r.id == id).unwrap()
    }

    async fn ledger(fixture: &Fixture) -> TriggerLedger {
        fixture
            .store
            .get_json(LEDGER_KEY)
            .await
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_acknowledge_resolves_and_cancels() {
        let f = fixture();
        let reminder = reminder_due_in(30);
        seed(&f, &reminder).await;

        let updated = f
            .resolver
            .apply(&reminder.id, ReminderAction::Acknowledge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Taken);
        assert_eq!(stored(&f, &reminder.id).await.status, ReminderStatus::Taken);
        assert!(ledger(&f).await.is_empty());
        assert!(f.backend.list_live_triggers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_replay_is_idempotent() {
        let f = fixture();
        let reminder = reminder_due_in(30);
        seed(&f, &reminder).await;

        let once = f
            .resolver
            .apply(&reminder.id, ReminderAction::Acknowledge)
            .await
            .unwrap()
            .unwrap();
        let twice = f
            .resolver
            .apply(&reminder.id, ReminderAction::Acknowledge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_dismiss_marks_missed() {
        let f = fixture();
        let reminder = reminder_due_in(30);
        seed(&f, &reminder).await;

        let updated = f
            .resolver
            .apply(&reminder.id, ReminderAction::Dismiss)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Missed);
        assert!(ledger(&f).await.is_empty());
    }

    #[tokio::test]
    async fn test_postpone_moves_due_and_replaces_triggers() {
        let f = fixture();
        let reminder = reminder_due_in(5);
        seed(&f, &reminder).await;

        let before = Utc::now().timestamp_millis();
        let updated = f
            .resolver
            .apply(&reminder.id, ReminderAction::Postpone)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.status, ReminderStatus::Pending);
        assert_eq!(updated.snooze_count, 1);
        assert_eq!(updated.original_date.as_deref(), Some(reminder.date.as_str()));
        assert_eq!(updated.original_time.as_deref(), Some(reminder.time.as_str()));

        let due = updated.due_at_millis().unwrap();
        assert!(due >= before + 14 * 60_000, "due {} too early", due);
        assert!(due <= before + 16 * 60_000, "due {} too late", due);

        // Fresh triggers carry the bumped snooze count
        let ledger = ledger(&f).await;
        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger[&reminder.id].fire_at_millis, due);
        let live = f.backend.list_live_triggers().await.unwrap();
        assert!(live.iter().all(|t| t.payload.snooze_count == 1));
        assert!(live.iter().all(|t| belongs_to(&t.id, &reminder.id)));
    }

    #[tokio::test]
    async fn test_postpone_at_limit_is_a_no_op() {
        let f = fixture();
        let mut reminder = reminder_due_in(30);
        reminder.snooze_count = 3;
        reminder.original_date = Some(reminder.date.clone());
        reminder.original_time = Some(reminder.time.clone());
        seed(&f, &reminder).await;

        let updated = f
            .resolver
            .apply(&reminder.id, ReminderAction::Postpone)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.snooze_count, 3);
        assert_eq!(updated.date, reminder.date);
        assert_eq!(updated.time, reminder.time);
        // Triggers stay as they were
        assert_eq!(ledger(&f).await.len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_reminder_is_a_logged_no_op() {
        let f = fixture();
        let result = f
            .resolver
            .apply("ghost", ReminderAction::Acknowledge)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_acknowledge_corrects_aged_out_miss() {
        let f = fixture();
        let mut reminder = reminder_due_in(30);
        reminder.status = ReminderStatus::Missed;
        f.store
            .set_json(REMINDERS_KEY, &vec![reminder.clone()])
            .await
            .unwrap();

        let updated = f
            .resolver
            .apply(&reminder.id, ReminderAction::Acknowledge)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ReminderStatus::Taken);

        // But dismiss never downgrades the corrected record
        let after = f
            .resolver
            .apply(&reminder.id, ReminderAction::Dismiss)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, ReminderStatus::Taken);
    }
}
