// Reminders - tiered deadline reminder dispatch
pub mod reminders;

pub use reminders::{
    CycleOptions, CycleSummary, DispatchOutcome, DispatchResult, MemoryTaskStore, MessageTemplate,
    NotificationSender, ReminderEngine, ReminderTier, ResendSender, Task, TaskStore, TierTable,
    UserDirectory,
};
