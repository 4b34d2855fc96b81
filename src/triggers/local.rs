//! # Local Trigger Backend
//!
//! In-process trigger backend built on tokio timers. Each registered
//! trigger is one sleeping task; firing removes the trigger from the live
//! set and pushes a [`FiredTrigger`] onto an unbounded channel that the
//! daemon's event loop consumes. Cancellation aborts the task.
//!
//! This backend never renders a prompt, so fired events carry no chosen
//! action; in-app action handling goes through
//! `ReminderService::apply_action` instead.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0

use chrono::Utc;
use dashmap::DashMap;
use log::debug;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{FiredTrigger, LiveTrigger, TriggerBackend, TriggerError, TriggerPayload};
use async_trait::async_trait;

struct LocalTrigger {
    fire_at_millis: i64,
    payload: TriggerPayload,
    task: Option<JoinHandle<()>>,
}

/// Tokio-timer trigger backend with channel delivery
pub struct LocalTriggerBackend {
    triggers: DashMap<String, LocalTrigger>,
    events: mpsc::UnboundedSender<FiredTrigger>,
    self_ref: Weak<LocalTriggerBackend>,
}

impl LocalTriggerBackend {
    /// Create the backend and the receiving end of its event channel
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FiredTrigger>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let backend = Arc::new_cyclic(|self_ref| LocalTriggerBackend {
            triggers: DashMap::new(),
            events,
            self_ref: self_ref.clone(),
        });
        (backend, receiver)
    }

    fn fire(&self, id: &str) {
        let Some((_, trigger)) = self.triggers.remove(id) else {
            // Cancelled while the timer was completing
            return;
        };
        debug!("Trigger {} fired", id);
        let event = FiredTrigger {
            trigger_id: id.to_string(),
            payload: trigger.payload,
            action: None,
        };
        if self.events.send(event).is_err() {
            debug!("Dropping fired trigger {}: event channel closed", id);
        }
    }
}

#[async_trait]
impl TriggerBackend for LocalTriggerBackend {
    async fn request_trigger(
        &self,
        id: &str,
        fire_at_millis: i64,
        payload: TriggerPayload,
    ) -> Result<String, TriggerError> {
        // Re-registration replaces the previous timer for the same id
        self.cancel_trigger(id).await?;

        let delay_millis = (fire_at_millis - Utc::now().timestamp_millis()).max(0) as u64;
        self.triggers.insert(
            id.to_string(),
            LocalTrigger {
                fire_at_millis,
                payload,
                task: None,
            },
        );

        let weak = self.self_ref.clone();
        let trigger_id = id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_millis)).await;
            if let Some(backend) = weak.upgrade() {
                backend.fire(&trigger_id);
            }
        });
        if let Some(mut entry) = self.triggers.get_mut(id) {
            entry.task = Some(task);
        }

        debug!("Registered trigger {} firing in {}ms", id, delay_millis);
        Ok(id.to_string())
    }

    async fn cancel_trigger(&self, id: &str) -> Result<(), TriggerError> {
        if let Some((_, trigger)) = self.triggers.remove(id) {
            if let Some(task) = trigger.task {
                task.abort();
            }
            debug!("Cancelled trigger {}", id);
        }
        Ok(())
    }

    async fn list_live_triggers(&self) -> Result<Vec<LiveTrigger>, TriggerError> {
        Ok(self
            .triggers
            .iter()
            .map(|entry| LiveTrigger {
                id: entry.key().clone(),
                fire_at_millis: entry.value().fire_at_millis,
                payload: entry.value().payload.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn payload(reminder_id: &str) -> TriggerPayload {
        TriggerPayload {
            reminder_id: reminder_id.to_string(),
            snooze_count: 0,
            is_escalation: false,
            escalation_offset_minutes: None,
        }
    }

    #[tokio::test]
    async fn test_trigger_fires_and_leaves_live_set() {
        let (backend, mut events) = LocalTriggerBackend::new();
        let fire_at = Utc::now().timestamp_millis() + 30;
        backend
            .request_trigger("r1", fire_at, payload("r1"))
            .await
            .unwrap();

        assert_eq!(backend.list_live_triggers().await.unwrap().len(), 1);

        let fired = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("trigger should fire")
            .expect("channel open");
        assert_eq!(fired.trigger_id, "r1");
        assert_eq!(fired.payload.reminder_id, "r1");
        assert_eq!(fired.action, None);

        assert!(backend.list_live_triggers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_prevents_delivery() {
        let (backend, mut events) = LocalTriggerBackend::new();
        let fire_at = Utc::now().timestamp_millis() + 40;
        backend
            .request_trigger("r2", fire_at, payload("r2"))
            .await
            .unwrap();
        backend.cancel_trigger("r2").await.unwrap();

        assert!(backend.list_live_triggers().await.unwrap().is_empty());
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(events.try_recv().is_err(), "cancelled trigger must not fire");
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_ok() {
        let (backend, _events) = LocalTriggerBackend::new();
        backend.cancel_trigger("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_reregistration_replaces_timer() {
        let (backend, _events) = LocalTriggerBackend::new();
        let base = Utc::now().timestamp_millis() + 60_000;
        backend
            .request_trigger("r3", base, payload("r3"))
            .await
            .unwrap();
        backend
            .request_trigger("r3", base + 60_000, payload("r3"))
            .await
            .unwrap();

        let live = backend.list_live_triggers().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].fire_at_millis, base + 60_000);
    }
}
