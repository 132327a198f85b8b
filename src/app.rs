//! Process wiring shared by `reminderd` and `remindctl`

use crate::core::config::Config;
use crate::core::duration::format_duration;
use crate::core::error::{ReminderError, Result};
use crate::database::Database;
use crate::features::reminders::{EngineSettings, MessageTemplate, ReminderEngine, ResendSender, TierTable};
use log::info;
use std::sync::Arc;

/// Configured tier table (YAML file or built-in), checked against the cadence
/// and the claim lease
pub fn load_tiers(config: &Config) -> Result<TierTable> {
    let tiers = match &config.tiers_path {
        Some(path) => {
            info!("Loading reminder tiers from {}", path);
            TierTable::load(path, config.trigger_interval)?
        }
        None => TierTable::standard(),
    };
    tiers.validate_cadence(config.trigger_interval)?;

    if config.claim_lease <= tiers.widest_window() {
        return Err(ReminderError::config(format!(
            "REMINDER_CLAIM_LEASE ({}) must be longer than the widest tier window ({})",
            format_duration(config.claim_lease),
            format_duration(tiers.widest_window())
        )));
    }
    Ok(tiers)
}

/// Open the database and assemble an engine around it
pub async fn build_engine(config: &Config) -> Result<(Database, ReminderEngine)> {
    let tiers = load_tiers(config)?;
    let settings = EngineSettings::from_config(config)?;

    let database = Database::new(&config.database_path)
        .await
        .map_err(|e| ReminderError::config(format!("{e:#}")))?;

    let sender = ResendSender::new(
        &config.resend_api_url,
        &config.resend_api_key,
        &config.from_address,
        settings.send_timeout,
    )
    .map_err(|e| ReminderError::config(format!("{e:#}")))?;

    let store = Arc::new(database.clone());
    let engine = ReminderEngine::new(
        tiers,
        store.clone(),
        store,
        Arc::new(sender),
        MessageTemplate::new(&config.app_url, config.display_offset),
    )
    .with_settings(settings)?;

    Ok((database, engine))
}
