//! # reminderd
//!
//! Deadline reminder daemon: runs a dispatch cycle every trigger interval and
//! serves manual triggers on the control socket.

use anyhow::Result;
use deadline_reminders::app::build_engine;
use deadline_reminders::core::duration::format_duration;
use deadline_reminders::features::reminders::CycleOptions;
use deadline_reminders::{Config, IpcServer};
use dotenvy::dotenv;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::from_env()?;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level))
        .init();

    info!("Starting deadline reminder daemon...");

    let (_database, engine) = build_engine(&config).await?;
    let tier_names: Vec<_> = engine.tiers().iter().map(|t| t.name.as_str()).collect();
    info!("Reminder tiers: {}", tier_names.join(", "));

    let server = Arc::new(
        IpcServer::new(Arc::new(engine), &config.ipc_socket_path)
            .with_secret(config.trigger_secret.clone()),
    );
    if let Err(e) = server.clone().start().await {
        error!("Failed to start IPC server: {e}. Manual triggers will be unavailable.");
    }

    let period = config.trigger_interval.to_std()?;
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(
        "Running a reminder cycle every {}",
        format_duration(config.trigger_interval)
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Cycles may overlap; tiers are claimed before sending
                let server = server.clone();
                tokio::spawn(async move {
                    if let Err(e) = server.run_cycle(&CycleOptions::default()).await {
                        error!("Reminder cycle failed: {e}");
                    }
                });
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for shutdown signal: {e}");
                }
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = std::fs::remove_file(&config.ipc_socket_path) {
        warn!("Could not remove socket {}: {e}", config.ipc_socket_path);
    }
    Ok(())
}
