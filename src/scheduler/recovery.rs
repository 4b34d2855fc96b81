//! # Recovery Pass
//!
//! Runs once at process start, before the service accepts any scheduling
//! call, and can be re-run on demand. Reminder records are the ground
//! truth for intent; the ledger and the backend's live trigger set are
//! both caches that can drift while the process is down: the backend can
//! hold triggers the process never persisted, and the ledger can
//! reference triggers whose absolute time passed while nothing was
//! running. The pass prunes stale ledger rows, then re-registers triggers
//! for every pending reminder the backend has forgotten.
//!
//! Backend trouble while repairing an individual reminder is logged and
//! left for the next pass; the pass as a whole either completes or the
//! caller knows it did not.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.4.0
//!
//! ## Changelog
//! - 1.1.0: Repairs carry the current snooze count forward
//! - 1.0.0: Initial release

use chrono::Utc;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;

use super::engine::ReminderScheduler;
use super::reminder::load_reminders_aged;
use super::SchedulerError;
use crate::core::SchedulerConfig;
use crate::storage::CoordinatedStore;
use crate::triggers::TriggerBackend;

/// What one recovery pass changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ledger rows removed because their fire time had passed
    pub pruned: Vec<String>,
    /// Reminder ids whose triggers were re-registered
    pub repaired: Vec<String>,
}

/// Repairs drift between records, ledger and backend
pub struct Reconciler {
    store: Arc<CoordinatedStore>,
    backend: Arc<dyn TriggerBackend>,
    scheduler: Arc<ReminderScheduler>,
    config: SchedulerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<CoordinatedStore>,
        backend: Arc<dyn TriggerBackend>,
        scheduler: Arc<ReminderScheduler>,
        config: SchedulerConfig,
    ) -> Self {
        Reconciler {
            store,
            backend,
            scheduler,
            config,
        }
    }

    /// One full pass: snapshot live triggers, prune stale ledger rows,
    /// re-register missing triggers for future pending reminders.
    pub async fn run(&self) -> Result<ReconcileReport, SchedulerError> {
        let now = Utc::now().timestamp_millis();

        let live = self.backend.list_live_triggers().await?;
        let live_reminder_ids: HashSet<&str> = live
            .iter()
            .map(|trigger| trigger.payload.reminder_id.as_str())
            .collect();

        let pruned = self.scheduler.prune_stale(now).await?;

        let reminders = load_reminders_aged(&self.store, &self.config).await?;
        let mut repaired = Vec::new();
        for reminder in reminders.iter().filter(|r| r.is_pending()) {
            let due = match reminder.due_at_millis() {
                Ok(due) => due,
                Err(err) => {
                    warn!("Skipping repair of {}: {}", reminder.id, err);
                    continue;
                }
            };
            if due <= now {
                // Still inside the grace window; it will either be acted on
                // or age out, and there is no future instant to schedule.
                continue;
            }
            if live_reminder_ids.contains(reminder.id.as_str()) {
                continue;
            }
            match self.scheduler.register(reminder, due).await {
                Ok(trigger_ids) => {
                    info!(
                        "Repaired {} trigger(s) for reminder {}",
                        trigger_ids.len(),
                        reminder.id
                    );
                    repaired.push(reminder.id.clone());
                }
                Err(SchedulerError::Backend(err)) => {
                    warn!(
                        "Could not repair triggers for {}, retrying next pass: {}",
                        reminder.id, err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        info!(
            "Recovery pass: {} stale row(s) pruned, {} reminder(s) repaired",
            pruned.len(),
            repaired.len()
        );
        Ok(ReconcileReport { pruned, repaired })
    }
}
