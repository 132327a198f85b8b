//! Process configuration loaded from the environment (and `.env` via dotenvy)

use crate::core::duration::parse_duration;
use crate::core::error::{ReminderError, Result};
use chrono::{Duration, FixedOffset};

pub const DEFAULT_DATABASE_PATH: &str = "tasks.db";
pub const DEFAULT_FROM_ADDRESS: &str = "Task Reminders <notifications@resend.dev>";
pub const DEFAULT_RESEND_API_URL: &str = "https://api.resend.com/emails";
pub const DEFAULT_APP_URL: &str = "http://localhost:8080";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/deadline-reminders.sock";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub resend_api_key: String,
    pub resend_api_url: String,
    pub from_address: String,
    pub app_url: String,
    pub log_level: String,
    /// Optional YAML tier table; built-in tiers when absent
    pub tiers_path: Option<String>,
    /// How often the daemon triggers a cycle
    pub trigger_interval: Duration,
    pub workers: usize,
    pub send_timeout: Duration,
    /// Age after which another cycle may take over an unfinished claim
    pub claim_lease: Duration,
    /// Offset used when formatting deadlines for humans
    pub display_offset: FixedOffset,
    pub ipc_socket_path: String,
    pub trigger_secret: Option<String>,
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let resend_api_key = get("RESEND_API_KEY")
            .ok_or_else(|| ReminderError::config("RESEND_API_KEY is not set"))?;

        let duration_var = |key: &str, default: &str| -> Result<Duration> {
            let raw = get(key).unwrap_or_else(|| default.to_string());
            parse_duration(&raw)
                .ok_or_else(|| ReminderError::config(format!("{key} is not a valid duration: {raw:?}")))
        };

        let trigger_interval = duration_var("REMINDER_TRIGGER_INTERVAL", "5m")?;
        let send_timeout = duration_var("REMINDER_SEND_TIMEOUT", "30s")?;
        let claim_lease = duration_var("REMINDER_CLAIM_LEASE", "15m")?;

        if claim_lease <= send_timeout {
            return Err(ReminderError::config(format!(
                "REMINDER_CLAIM_LEASE ({}s) must be longer than REMINDER_SEND_TIMEOUT ({}s)",
                claim_lease.num_seconds(),
                send_timeout.num_seconds()
            )));
        }

        let workers = match get("REMINDER_WORKERS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    ReminderError::config(format!("REMINDER_WORKERS must be a positive integer: {raw:?}"))
                })?,
            None => 4,
        };

        let display_offset = match get("REMINDER_DISPLAY_OFFSET") {
            Some(raw) => parse_utc_offset(&raw).ok_or_else(|| {
                ReminderError::config(format!(
                    "REMINDER_DISPLAY_OFFSET must look like +07:00: {raw:?}"
                ))
            })?,
            None => FixedOffset::east_opt(0).ok_or_else(|| ReminderError::config("UTC offset"))?,
        };

        Ok(Config {
            database_path: get("DATABASE_PATH").unwrap_or_else(|| DEFAULT_DATABASE_PATH.to_string()),
            resend_api_key,
            resend_api_url: get("RESEND_API_URL")
                .unwrap_or_else(|| DEFAULT_RESEND_API_URL.to_string()),
            from_address: get("REMINDER_FROM_ADDRESS")
                .unwrap_or_else(|| DEFAULT_FROM_ADDRESS.to_string()),
            app_url: get("APP_URL").unwrap_or_else(|| DEFAULT_APP_URL.to_string()),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            tiers_path: get("REMINDER_TIERS_PATH"),
            trigger_interval,
            workers,
            send_timeout,
            claim_lease,
            display_offset,
            ipc_socket_path: get("REMINDER_IPC_SOCKET")
                .unwrap_or_else(|| DEFAULT_SOCKET_PATH.to_string()),
            trigger_secret: get("REMINDER_TRIGGER_SECRET"),
        })
    }
}

/// Parse `+HH:MM`, `-HH:MM` or `Z` into a fixed offset
pub fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("z") || raw.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 23 || minutes > 59 {
        return None;
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
