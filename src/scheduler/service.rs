//! # Reminder Service
//!
//! The surface the presentation layer talks to: create, list and delete
//! reminders, apply in-app actions, and feed fired-trigger events in.
//! Construction runs the recovery pass to completion before the service
//! is handed out, so nothing schedules against an unrepaired ledger.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.4.0
//!
//! ## Changelog
//! - 1.2.0: Course-grouped bulk deletion
//! - 1.1.0: Fired-event handling shares the resolver with in-app actions
//! - 1.0.0: Initial release

use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use super::engine::ReminderScheduler;
use super::ledger::REMINDERS_KEY;
use super::recovery::{ReconcileReport, Reconciler};
use super::reminder::{load_reminders_aged, MedicationKind, Reminder, ReminderStatus};
use super::resolver::ActionResolver;
use super::SchedulerError;
use crate::core::SchedulerConfig;
use crate::storage::CoordinatedStore;
use crate::triggers::{FiredTrigger, ReminderAction, TriggerBackend};

/// Fields for a new reminder; id and status are assigned here
#[derive(Debug, Clone)]
pub struct NewReminder {
    pub medication_name: String,
    pub dosage: String,
    pub kind: MedicationKind,
    /// Scheduled calendar day, `YYYY-MM-DD`
    pub date: String,
    /// Scheduled time of day, `HH:mm`
    pub time: String,
    /// Set when several reminders are created together as one course
    pub course_id: Option<String>,
}

/// Reminder lifecycle API over the engine, resolver and recovery pass
pub struct ReminderService {
    store: Arc<CoordinatedStore>,
    scheduler: Arc<ReminderScheduler>,
    resolver: ActionResolver,
    reconciler: Reconciler,
    config: SchedulerConfig,
}

impl ReminderService {
    /// Build the service and run the recovery pass to completion. No
    /// scheduling call is accepted until the pass has finished.
    pub async fn start(
        store: Arc<CoordinatedStore>,
        backend: Arc<dyn TriggerBackend>,
        config: SchedulerConfig,
    ) -> Result<Self, SchedulerError> {
        let scheduler = Arc::new(ReminderScheduler::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            config.clone(),
        ));
        let reconciler = Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&backend),
            Arc::clone(&scheduler),
            config.clone(),
        );
        reconciler.run().await?;

        let resolver = ActionResolver::new(
            Arc::clone(&store),
            Arc::clone(&scheduler),
            config.clone(),
        );
        Ok(ReminderService {
            store,
            scheduler,
            resolver,
            reconciler,
            config,
        })
    }

    /// Create a reminder and register its triggers.
    ///
    /// The due time must be in the future. The record is persisted before
    /// registration, so a backend failure surfaces to the caller while the
    /// record survives for the next recovery pass to repair.
    pub async fn create_reminder(&self, new: NewReminder) -> Result<Reminder, SchedulerError> {
        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            medication_name: new.medication_name,
            dosage: new.dosage,
            kind: new.kind,
            date: new.date,
            time: new.time,
            status: ReminderStatus::Pending,
            course_id: new.course_id,
            snooze_count: 0,
            original_date: None,
            original_time: None,
        };
        let due = reminder.due_at_millis()?;
        if due <= Utc::now().timestamp_millis() {
            return Err(SchedulerError::PastDeadline {
                trigger_id: reminder.id,
                fire_at: due,
            });
        }

        self.store
            .update_json::<Vec<Reminder>, _>(REMINDERS_KEY, |current| {
                let mut reminders = current.unwrap_or_default();
                reminders.push(reminder.clone());
                reminders
            })
            .await?;
        self.scheduler.register(&reminder, due).await?;

        info!(
            "Created reminder {} ({} {} at {} {})",
            reminder.id, reminder.medication_name, reminder.dosage, reminder.date, reminder.time
        );
        Ok(reminder)
    }

    /// All reminders in creation order, with the aging rule applied
    pub async fn list_reminders(&self) -> Result<Vec<Reminder>, SchedulerError> {
        load_reminders_aged(&self.store, &self.config).await
    }

    /// One reminder by id, with the aging rule applied
    pub async fn get_reminder(&self, reminder_id: &str) -> Result<Reminder, SchedulerError> {
        load_reminders_aged(&self.store, &self.config)
            .await?
            .into_iter()
            .find(|r| r.id == reminder_id)
            .ok_or_else(|| SchedulerError::NotFound(reminder_id.to_string()))
    }

    /// Delete one reminder and cancel all of its triggers. Deleting an
    /// unknown id still sweeps triggers and is not an error.
    pub async fn delete_reminder(&self, reminder_id: &str) -> Result<(), SchedulerError> {
        let mut removed = false;
        self.store
            .update_json::<Vec<Reminder>, _>(REMINDERS_KEY, |current| {
                let mut reminders = current.unwrap_or_default();
                let before = reminders.len();
                reminders.retain(|r| r.id != reminder_id);
                removed = reminders.len() != before;
                reminders
            })
            .await?;
        if !removed {
            debug!("Delete of unknown reminder {}", reminder_id);
        }
        self.scheduler.cancel(reminder_id).await?;
        info!("Deleted reminder {}", reminder_id);
        Ok(())
    }

    /// Delete every reminder in a course and cancel their triggers.
    /// Returns how many records were removed.
    pub async fn delete_by_course(&self, course_id: &str) -> Result<usize, SchedulerError> {
        let mut deleted_ids = Vec::new();
        self.store
            .update_json::<Vec<Reminder>, _>(REMINDERS_KEY, |current| {
                let mut reminders = current.unwrap_or_default();
                reminders.retain(|r| {
                    if r.course_id.as_deref() == Some(course_id) {
                        deleted_ids.push(r.id.clone());
                        false
                    } else {
                        true
                    }
                });
                reminders
            })
            .await?;
        self.scheduler.cancel_many(&deleted_ids).await?;
        info!(
            "Deleted {} reminder(s) from course {}",
            deleted_ids.len(),
            course_id
        );
        Ok(deleted_ids.len())
    }

    /// Apply an in-app action; mirrors fired-event handling
    pub async fn apply_action(
        &self,
        reminder_id: &str,
        action: ReminderAction,
    ) -> Result<Option<Reminder>, SchedulerError> {
        self.resolver.apply(reminder_id, action).await
    }

    /// Consume one fired-trigger event. Safe to call from a cold-started
    /// process and tolerant of duplicate delivery.
    pub async fn handle_fired(&self, event: FiredTrigger) -> Result<(), SchedulerError> {
        debug!(
            "Trigger {} fired for reminder {} (action {:?})",
            event.trigger_id, event.payload.reminder_id, event.action
        );
        self.scheduler.note_fired(&event.trigger_id).await?;
        if let Some(action) = event.action {
            self.resolver.apply(&event.payload.reminder_id, action).await?;
        }
        Ok(())
    }

    /// Re-run the recovery pass on demand
    pub async fn reconcile(&self) -> Result<ReconcileReport, SchedulerError> {
        self.reconciler.run().await
    }

    /// Cancel every trigger and clear the ledger; full-reset path
    pub async fn cancel_all_triggers(&self) -> Result<(), SchedulerError> {
        self.scheduler.cancel_all().await
    }
}
