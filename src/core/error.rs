//! Error taxonomy for the reminder dispatcher
//!
//! Only [`ReminderError::Configuration`] and [`ReminderError::Fetch`] ever
//! propagate to a caller. Send and persistence errors are per-task and end up
//! as reasons inside a cycle summary.

/// Reminder dispatcher error
#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    /// Missing secrets or endpoints, or an invalid tier table. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The candidate-task query failed. Fatal for the cycle.
    #[error("failed to fetch candidate tasks: {0:#}")]
    Fetch(#[source] anyhow::Error),

    /// A single notification could not be delivered.
    #[error("notification send failed: {0}")]
    Send(String),

    /// A reminder flag or claim could not be written.
    #[error("reminder state not persisted: {0}")]
    Persistence(String),

    /// A manual trigger carried unusable parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Convenience result type
pub type Result<T> = std::result::Result<T, ReminderError>;

impl ReminderError {
    /// Shorthand for configuration failures
    pub fn config(msg: impl Into<String>) -> Self {
        ReminderError::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_keeps_cause_chain() {
        let cause = anyhow::anyhow!("disk I/O error").context("query tasks");
        let err = ReminderError::Fetch(cause);
        let text = err.to_string();
        assert!(text.starts_with("failed to fetch candidate tasks"));
        assert!(text.contains("disk I/O error"));
    }

    #[test]
    fn test_config_shorthand() {
        let err = ReminderError::config("RESEND_API_KEY not set");
        assert!(matches!(err, ReminderError::Configuration(_)));
        assert_eq!(err.to_string(), "configuration error: RESEND_API_KEY not set");
    }
}
