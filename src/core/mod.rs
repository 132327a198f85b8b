//! # Core Module
//!
//! Configuration, error taxonomy and the compact duration syntax shared by
//! every other layer.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Add duration module (moved out of the reminder parser)
//! - 1.0.0: Initial creation with config and error modules

pub mod config;
pub mod duration;
pub mod error;

// Re-export commonly used items
pub use config::Config;
pub use duration::{format_duration, parse_duration};
pub use error::{ReminderError, Result};
