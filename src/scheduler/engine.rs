//! # Scheduling Engine
//!
//! Registers and cancels backend triggers for reminders and keeps the
//! trigger ledger in line with what the backend was told. A reminder gets
//! one primary trigger at its nominal time plus escalation repeats at the
//! configured offsets, all tagged with the reminder id so resolving the
//! reminder through any one of them cancels the rest. A missed prompt
//! carries real-world cost, so failure handling leans toward duplicated
//! notifications over lost ones: escalation registration and cancel
//! failures are logged and skipped, only the primary registration and
//! storage failures propagate.
//!
//! Operations on one reminder id are serialized through a per-id lock;
//! `reschedule` holds it across the cancel/register pair so no
//! interleaving can register a trigger the cancel was meant to supersede.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.3.0: Per-id locks, `reschedule` pair operation
//! - 1.2.0: Pattern-based cascade cancel picks up stale offsets
//! - 1.1.0: Escalation repeats
//! - 1.0.0: Initial release

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::ledger::{belongs_to, escalation_id, owner_of, LedgerEntry, TriggerLedger, LEDGER_KEY};
use super::reminder::Reminder;
use super::SchedulerError;
use crate::core::SchedulerConfig;
use crate::storage::CoordinatedStore;
use crate::triggers::{TriggerBackend, TriggerPayload};

/// Drives the trigger backend and owns every write to the trigger ledger
pub struct ReminderScheduler {
    store: Arc<CoordinatedStore>,
    backend: Arc<dyn TriggerBackend>,
    config: SchedulerConfig,
    id_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<CoordinatedStore>,
        backend: Arc<dyn TriggerBackend>,
        config: SchedulerConfig,
    ) -> Self {
        ReminderScheduler {
            store,
            backend,
            config,
            id_locks: DashMap::new(),
        }
    }

    fn id_lock(&self, reminder_id: &str) -> Arc<Mutex<()>> {
        self.id_locks
            .entry(reminder_id.to_string())
            .or_default()
            .clone()
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Register the primary trigger at `fire_at_millis` plus escalation
    /// repeats at each configured offset. Offsets whose computed time has
    /// already elapsed are skipped. Returns the trigger ids registered.
    pub async fn register(
        &self,
        reminder: &Reminder,
        fire_at_millis: i64,
    ) -> Result<Vec<String>, SchedulerError> {
        let lock = self.id_lock(&reminder.id);
        let _guard = lock.lock().await;
        self.register_locked(reminder, fire_at_millis).await
    }

    /// Cancel the primary trigger and every escalation trigger derived
    /// from `reminder_id`, on the backend and in the ledger. Idempotent;
    /// absence of any trigger is not an error.
    pub async fn cancel(&self, reminder_id: &str) -> Result<(), SchedulerError> {
        let lock = self.id_lock(reminder_id);
        let _guard = lock.lock().await;
        self.cancel_locked(reminder_id).await
    }

    /// Cancel-then-register under one per-id critical section, used when a
    /// postpone replaces a reminder's triggers with later ones.
    pub async fn reschedule(
        &self,
        reminder: &Reminder,
        fire_at_millis: i64,
    ) -> Result<Vec<String>, SchedulerError> {
        let lock = self.id_lock(&reminder.id);
        let _guard = lock.lock().await;
        self.cancel_locked(&reminder.id).await?;
        self.register_locked(reminder, fire_at_millis).await
    }

    /// Batched cancel. Every id is attempted; a failure on one never
    /// prevents the others, and the first storage failure is reported
    /// after the batch completes.
    pub async fn cancel_many(&self, reminder_ids: &[String]) -> Result<(), SchedulerError> {
        let mut first_error = None;
        for reminder_id in reminder_ids {
            if let Err(err) = self.cancel(reminder_id).await {
                warn!("Cancel of {} failed, continuing batch: {}", reminder_id, err);
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Clear every backend trigger and the whole ledger. Full-reset path.
    pub async fn cancel_all(&self) -> Result<(), SchedulerError> {
        let mut ids: Vec<String> = match self.backend.list_live_triggers().await {
            Ok(live) => live.into_iter().map(|t| t.id).collect(),
            Err(err) => {
                warn!("Could not list live triggers for full reset: {}", err);
                Vec::new()
            }
        };
        let ledger: TriggerLedger = self.store.get_json(LEDGER_KEY).await?.unwrap_or_default();
        for trigger_id in ledger.keys() {
            if !ids.contains(trigger_id) {
                ids.push(trigger_id.clone());
            }
        }
        for trigger_id in &ids {
            if let Err(err) = self.backend.cancel_trigger(trigger_id).await {
                warn!("Backend cancel of {} failed during reset: {}", trigger_id, err);
            }
        }
        self.store.set_json(LEDGER_KEY, &TriggerLedger::new()).await?;
        info!("Cancelled all triggers ({} ids)", ids.len());
        Ok(())
    }

    /// Drop a single ledger row after its trigger fired
    pub async fn note_fired(&self, trigger_id: &str) -> Result<(), SchedulerError> {
        let lock = self.id_lock(owner_of(trigger_id));
        let _guard = lock.lock().await;
        self.store
            .update_json::<TriggerLedger, _>(LEDGER_KEY, |current| {
                let mut ledger = current.unwrap_or_default();
                ledger.remove(trigger_id);
                ledger
            })
            .await?;
        Ok(())
    }

    /// Remove ledger rows whose fire time is at or before `now_millis`.
    /// Stale rows are garbage and must never be re-delivered. Returns the
    /// pruned trigger ids.
    pub async fn prune_stale(&self, now_millis: i64) -> Result<Vec<String>, SchedulerError> {
        let mut pruned = Vec::new();
        self.store
            .update_json::<TriggerLedger, _>(LEDGER_KEY, |current| {
                let mut ledger = current.unwrap_or_default();
                ledger.retain(|trigger_id, entry| {
                    if entry.fire_at_millis <= now_millis {
                        pruned.push(trigger_id.clone());
                        false
                    } else {
                        true
                    }
                });
                ledger
            })
            .await?;
        if !pruned.is_empty() {
            debug!("Pruned {} stale ledger rows", pruned.len());
        }
        Ok(pruned)
    }

    // ========================================================================
    // Locked internals
    // ========================================================================

    async fn register_locked(
        &self,
        reminder: &Reminder,
        fire_at_millis: i64,
    ) -> Result<Vec<String>, SchedulerError> {
        let now = Utc::now().timestamp_millis();
        if fire_at_millis <= now {
            return Err(SchedulerError::PastDeadline {
                trigger_id: reminder.id.clone(),
                fire_at: fire_at_millis,
            });
        }

        let primary_payload = TriggerPayload {
            reminder_id: reminder.id.clone(),
            snooze_count: reminder.snooze_count,
            is_escalation: false,
            escalation_offset_minutes: None,
        };
        self.backend
            .request_trigger(&reminder.id, fire_at_millis, primary_payload)
            .await?;
        self.insert_rows(vec![(
            reminder.id.clone(),
            LedgerEntry {
                reminder_id: reminder.id.clone(),
                fire_at_millis,
            },
        )])
        .await?;

        let mut registered = vec![reminder.id.clone()];
        let mut escalation_rows = Vec::new();
        for offset_minutes in &self.config.escalation_offsets_minutes {
            let escalation_at = fire_at_millis + offset_minutes * 60_000;
            if escalation_at <= now {
                continue;
            }
            let trigger_id = escalation_id(&reminder.id, *offset_minutes);
            let payload = TriggerPayload {
                reminder_id: reminder.id.clone(),
                snooze_count: reminder.snooze_count,
                is_escalation: true,
                escalation_offset_minutes: Some(*offset_minutes),
            };
            match self
                .backend
                .request_trigger(&trigger_id, escalation_at, payload)
                .await
            {
                Ok(_) => {
                    escalation_rows.push((
                        trigger_id.clone(),
                        LedgerEntry {
                            reminder_id: reminder.id.clone(),
                            fire_at_millis: escalation_at,
                        },
                    ));
                    registered.push(trigger_id);
                }
                Err(err) => {
                    warn!("Escalation {} not registered, continuing: {}", trigger_id, err);
                }
            }
        }
        if !escalation_rows.is_empty() {
            self.insert_rows(escalation_rows).await?;
        }

        debug!(
            "Registered {} trigger(s) for reminder {} at {}",
            registered.len(),
            reminder.id,
            fire_at_millis
        );
        Ok(registered)
    }

    async fn cancel_locked(&self, reminder_id: &str) -> Result<(), SchedulerError> {
        // Candidates: the primary id, every configured offset, and any
        // ledger row matching the pattern from an older offset configuration.
        let mut trigger_ids = vec![reminder_id.to_string()];
        for offset_minutes in &self.config.escalation_offsets_minutes {
            trigger_ids.push(escalation_id(reminder_id, *offset_minutes));
        }
        let ledger: TriggerLedger = self.store.get_json(LEDGER_KEY).await?.unwrap_or_default();
        for trigger_id in ledger.keys() {
            if belongs_to(trigger_id, reminder_id) && !trigger_ids.contains(trigger_id) {
                trigger_ids.push(trigger_id.clone());
            }
        }

        for trigger_id in &trigger_ids {
            if let Err(err) = self.backend.cancel_trigger(trigger_id).await {
                warn!("Backend cancel of {} failed: {}", trigger_id, err);
            }
        }

        // The ledger rows go regardless: the backend side is a cache, and a
        // trigger that survives over there resolves to a harmless no-op.
        self.store
            .update_json::<TriggerLedger, _>(LEDGER_KEY, |current| {
                let mut ledger = current.unwrap_or_default();
                ledger.retain(|trigger_id, _| !belongs_to(trigger_id, reminder_id));
                ledger
            })
            .await?;
        debug!("Cancelled triggers for reminder {}", reminder_id);
        Ok(())
    }

    async fn insert_rows(
        &self,
        rows: Vec<(String, LedgerEntry)>,
    ) -> Result<(), SchedulerError> {
        self.store
            .update_json::<TriggerLedger, _>(LEDGER_KEY, |current| {
                let mut ledger = current.unwrap_or_default();
                ledger.extend(rows);
                ledger
            })
            .await?;
        Ok(())
    }
}
