//! # IPC Module
//!
//! Control channel between `remindctl` and the running daemon.
//!
//! - **Version**: 2.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 2.0.0: Manual trigger and status commands
//! - 1.0.0: Initial IPC implementation with Unix socket protocol

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{ControlCommand, ControlReply};
pub use server::IpcServer;

pub use crate::core::config::DEFAULT_SOCKET_PATH;

/// Get the socket path from environment or use default
pub fn get_socket_path() -> String {
    std::env::var("REMINDER_IPC_SOCKET")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string())
}
