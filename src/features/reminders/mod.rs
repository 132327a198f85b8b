//! # Reminders Feature
//!
//! Deadline reminders: a tier table of lead times, a pure window matcher and
//! an engine that dispatches each due tier at most once per task.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Tiered deadline reminders with claim-based dispatch
//! - 1.0.0: Initial scheduled reminders

pub mod engine;
pub mod matcher;
pub mod message;
pub mod sender;
pub mod store;
pub mod tiers;

pub use engine::{
    CycleOptions, CycleSummary, DispatchOutcome, DispatchResult, EngineSettings, PendingReminder,
    ReminderEngine,
};
pub use matcher::{due_tier, due_tier_for};
pub use message::{greeting_name, MessageTemplate, ReminderMessage};
pub use sender::{NotificationSender, ResendSender, SendReceipt};
pub use store::{MemoryTaskStore, ReminderClaim, ReminderState, Task, TaskStore, UserDirectory};
pub use tiers::{ReminderTier, TierTable};
