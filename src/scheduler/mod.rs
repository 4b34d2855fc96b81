//! # Scheduler Module
//!
//! The reminder lifecycle state machine: the engine that keeps backend
//! triggers in line with reminder intent, the resolver that applies user
//! actions, and the recovery pass that repairs drift after a restart.
//!
//! Reminder records are the source of truth for what *should* be
//! scheduled; the trigger ledger is a derived index of what *is*
//! registered with the backend. The engine is the only writer of the
//! ledger, and the resolver (plus creation/deletion in the service) is
//! the only writer of record status and snooze fields.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.3.0
//!
//! ## Changelog
//! - 1.3.0: Per-reminder locks around cancel/register pairs
//! - 1.2.0: Startup recovery pass
//! - 1.1.0: Escalation repeats and snooze bookkeeping
//! - 1.0.0: Initial release with engine + resolver

use thiserror::Error;

use crate::storage::StorageError;
use crate::triggers::TriggerError;

pub mod engine;
pub mod ledger;
pub mod recovery;
pub mod reminder;
pub mod resolver;
pub mod service;

pub use engine::ReminderScheduler;
pub use recovery::{ReconcileReport, Reconciler};
pub use reminder::{MedicationKind, Reminder, ReminderStatus};
pub use resolver::ActionResolver;
pub use service::{NewReminder, ReminderService};

/// Errors surfaced by scheduling operations
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The requested fire time is not in the future
    #[error("cannot schedule trigger `{trigger_id}`: fire time {fire_at} is not in the future")]
    PastDeadline { trigger_id: String, fire_at: i64 },
    /// No reminder with this id exists
    #[error("reminder not found: {0}")]
    NotFound(String),
    /// A reminder carries an unparsable date or time
    #[error("invalid date/time on reminder {id}: {value}")]
    InvalidDateTime { id: String, value: String },
    /// The persistence layer failed
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The trigger backend failed
    #[error(transparent)]
    Backend(#[from] TriggerError),
}
