//! # remindctl
//!
//! Operator CLI: trigger or inspect the running daemon, or run a cycle
//! in-process.

use anyhow::{bail, Result};
use chrono::Duration;
use clap::{Parser, Subcommand};
use deadline_reminders::app::{build_engine, load_tiers};
use deadline_reminders::core::duration::{format_duration, parse_duration};
use deadline_reminders::features::reminders::CycleOptions;
use deadline_reminders::ipc::get_socket_path;
use deadline_reminders::{Config, ControlCommand, ControlReply, IpcClient};
use dotenvy::dotenv;

#[derive(Parser, Debug)]
#[command(name = "remindctl", version, about = "Deadline reminder control", propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the running daemon to run a cycle now
    Trigger {
        /// Candidate lookahead override, e.g. 7d
        #[arg(long, value_parser = parse_lookahead)]
        lookahead: Option<Duration>,
    },
    /// Show daemon uptime and the last cycle summary
    Status,
    /// Run one cycle in this process against the configured database
    RunOnce {
        #[arg(long, value_parser = parse_lookahead)]
        lookahead: Option<Duration>,
    },
    /// List reminders that would go out now, without sending
    Preview {
        #[arg(long, value_parser = parse_lookahead)]
        lookahead: Option<Duration>,
    },
    /// Print the configured tier table
    Tiers,
}

fn parse_lookahead(raw: &str) -> std::result::Result<Duration, String> {
    parse_duration(raw).ok_or_else(|| format!("not a duration: {raw:?} (try 3d, 12h, 1h30m)"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Trigger { lookahead } => {
            let command = ControlCommand::RunCycle {
                request_id: uuid::Uuid::new_v4().to_string(),
                secret: std::env::var("REMINDER_TRIGGER_SECRET").ok(),
                lookahead_secs: lookahead.map(|d| d.num_seconds()),
            };
            match request(&command).await? {
                ControlReply::CycleCompleted { summary, .. } => {
                    println!("{}", serde_json::to_string_pretty(&summary)?);
                }
                ControlReply::CycleFailed { error, .. } => bail!("Cycle failed: {error}"),
                ControlReply::Unauthorized { .. } => bail!("Daemon rejected the trigger secret"),
                other => bail!("Unexpected reply: {other:?}"),
            }
        }
        Commands::Status => match request(&ControlCommand::GetStatus).await? {
            ControlReply::Status {
                uptime_seconds,
                cycles_run,
                last_summary,
            } => {
                println!("Uptime: {}", format_duration(Duration::seconds(uptime_seconds as i64)));
                println!("Cycles run: {cycles_run}");
                match last_summary {
                    Some(summary) => println!("Last cycle: {}", serde_json::to_string_pretty(&summary)?),
                    None => println!("Last cycle: none yet"),
                }
            }
            other => bail!("Unexpected reply: {other:?}"),
        },
        Commands::RunOnce { lookahead } => {
            let config = Config::from_env()?;
            let (_database, engine) = build_engine(&config).await?;
            let summary = engine.run_cycle(&CycleOptions { lookahead }).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Preview { lookahead } => {
            let config = Config::from_env()?;
            let (_database, engine) = build_engine(&config).await?;
            let pending = engine.preview(&CycleOptions { lookahead }).await?;
            if pending.is_empty() {
                println!("No reminders due");
            }
            for reminder in pending {
                println!(
                    "{:<36} {:<6} {}  {}",
                    reminder.task_id,
                    reminder.tier,
                    reminder.deadline.format("%Y-%m-%d %H:%M UTC"),
                    reminder.title
                );
            }
        }
        Commands::Tiers => {
            let config = Config::from_env()?;
            let tiers = load_tiers(&config)?;
            for tier in &tiers {
                println!(
                    "{:<8} {:<10} offset {:<10} tolerance ±{}",
                    tier.name,
                    tier.label,
                    format_duration(tier.offset),
                    format_duration(tier.tolerance)
                );
            }
            println!("Lookahead: {}", format_duration(tiers.scan_window()));
        }
    }

    Ok(())
}

async fn request(command: &ControlCommand) -> Result<ControlReply> {
    let socket_path = get_socket_path();
    let mut client = IpcClient::connect(&socket_path).await?;
    client.request(command).await
}
