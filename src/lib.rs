// Core layer - shared types and configuration
pub mod core;

// Features layer - reminder dispatch
pub mod features;

// IPC layer - manual triggers and status over a Unix socket
pub mod ipc;

// Infrastructure
pub mod app;
pub mod database;

pub use crate::core::{Config, ReminderError};
pub use database::Database;

pub use features::{
    CycleOptions, CycleSummary, DispatchOutcome, DispatchResult, MemoryTaskStore, MessageTemplate,
    NotificationSender, ReminderEngine, ReminderTier, ResendSender, Task, TaskStore, TierTable,
    UserDirectory,
};

pub use ipc::{ControlCommand, ControlReply, IpcClient, IpcServer};
