// Core layer - configuration shared across components
pub mod core;

// Storage layer - durable key-value persistence with coordination
pub mod storage;

// Trigger layer - timed wake-up backends and fired-event types
pub mod triggers;

// Scheduling layer - reminder lifecycle state machine
pub mod scheduler;

// Re-export core config for convenience
pub use crate::core::SchedulerConfig;

// Re-export the scheduling surface
pub use scheduler::{
    // Engine and recovery
    ReminderScheduler, ReconcileReport, Reconciler,
    // Records
    MedicationKind, Reminder, ReminderStatus,
    // Resolution
    ActionResolver, SchedulerError,
    // Service surface
    NewReminder, ReminderService,
};

// Re-export storage items
pub use storage::{CoordinatedStore, KeyValueStore, MemoryKeyValueStore, SqliteKeyValueStore};

// Re-export trigger items
pub use triggers::{
    FiredTrigger, LiveTrigger, LocalTriggerBackend, ReminderAction, TriggerBackend,
    TriggerPayload,
};
