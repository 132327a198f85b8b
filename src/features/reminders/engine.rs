//! # Reminder Engine
//!
//! Runs one dispatch cycle: snapshot the clock, fetch candidate tasks, ask
//! the window matcher which tier is due, claim it, send, then mark it sent.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.3.0: Claims stamped with the cycle time, lease checked against tier windows,
//!   bounded lookahead
//! - 1.2.0: Store-level claims so overlapping cycles never double-send
//! - 1.1.0: Bounded concurrent task processing, per-send timeout
//! - 1.0.0: Initial sequential cycle

use crate::core::config::Config;
use crate::core::duration::format_duration;
use crate::core::error::{ReminderError, Result};
use crate::features::reminders::matcher::due_tier_for;
use crate::features::reminders::message::{greeting_name, MessageTemplate};
use crate::features::reminders::sender::{NotificationSender, SendReceipt};
use crate::features::reminders::store::{ReminderClaim, Task, TaskStore, UserDirectory};
use crate::features::reminders::tiers::{ReminderTier, TierTable};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest candidate lookahead a caller may request
const MAX_LOOKAHEAD_DAYS: i64 = 366;

/// Per-invocation options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOptions {
    /// Override of the candidate lookahead (diagnostic invocations)
    pub lookahead: Option<Duration>,
}

impl CycleOptions {
    pub fn with_lookahead(lookahead: Duration) -> Self {
        Self {
            lookahead: Some(lookahead),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOutcome {
    Sent,
    Failed,
}

/// Outcome for one matched (task, tier) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResult {
    pub task_id: String,
    pub tier: String,
    pub outcome: DispatchOutcome,
    /// Failure reason, or the bookkeeping problem behind a `sent` result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DispatchResult {
    fn sent(task: &Task, tier: &ReminderTier, note: Option<String>) -> Self {
        Self {
            task_id: task.id.clone(),
            tier: tier.name.clone(),
            outcome: DispatchOutcome::Sent,
            reason: note,
        }
    }

    fn failed(task: &Task, tier: &ReminderTier, err: &ReminderError) -> Self {
        Self {
            task_id: task.id.clone(),
            tier: tier.name.clone(),
            outcome: DispatchOutcome::Failed,
            reason: Some(err.to_string()),
        }
    }
}

/// What a cycle reports back to its trigger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    pub started_at: DateTime<Utc>,
    pub tasks_checked: usize,
    pub reminders_sent: usize,
    pub reminders_failed: usize,
    pub per_task_results: Vec<DispatchResult>,
}

impl CycleSummary {
    fn from_results(started_at: DateTime<Utc>, tasks_checked: usize, mut results: Vec<DispatchResult>) -> Self {
        results.sort_by(|a, b| a.task_id.cmp(&b.task_id).then_with(|| a.tier.cmp(&b.tier)));
        let reminders_sent = results
            .iter()
            .filter(|r| r.outcome == DispatchOutcome::Sent)
            .count();
        Self {
            started_at,
            tasks_checked,
            reminders_sent,
            reminders_failed: results.len() - reminders_sent,
            per_task_results: results,
        }
    }
}

/// A reminder that would go out if a cycle ran now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingReminder {
    pub task_id: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub tier: String,
    pub label: String,
}

/// Tunables for a [`ReminderEngine`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Tasks processed concurrently within one cycle
    pub workers: usize,
    pub send_timeout: std::time::Duration,
    pub claim_lease: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 4,
            send_timeout: std::time::Duration::from_secs(30),
            claim_lease: Duration::minutes(15),
        }
    }
}

impl EngineSettings {
    /// Reject a lease that a stale-claim takeover could beat inside a window
    ///
    /// Claims carry the claiming cycle's time. A takeover needs a cycle at
    /// least one lease later, and with `lease > 2 × tolerance` that cycle is
    /// past the window, so a tier sent without its flag is never sent again.
    pub fn validate(&self, tiers: &TierTable) -> Result<()> {
        let widest = tiers.widest_window();
        if self.claim_lease <= widest {
            return Err(ReminderError::config(format!(
                "claim lease ({}) must be longer than the widest tier window ({})",
                format_duration(self.claim_lease),
                format_duration(widest)
            )));
        }
        let send_timeout = Duration::from_std(self.send_timeout)
            .map_err(|e| ReminderError::config(format!("invalid send timeout: {e}")))?;
        if self.claim_lease <= send_timeout {
            return Err(ReminderError::config(format!(
                "claim lease ({}) must be longer than the send timeout ({})",
                format_duration(self.claim_lease),
                format_duration(send_timeout)
            )));
        }
        if self.workers == 0 {
            return Err(ReminderError::config("workers must be at least 1"));
        }
        Ok(())
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let send_timeout = config
            .send_timeout
            .to_std()
            .map_err(|e| ReminderError::config(format!("invalid send timeout: {e}")))?;
        Ok(Self {
            workers: config.workers.max(1),
            send_timeout,
            claim_lease: config.claim_lease,
        })
    }
}

/// Dispatches deadline reminders, one cycle per call
pub struct ReminderEngine {
    tiers: TierTable,
    store: Arc<dyn TaskStore>,
    directory: Arc<dyn UserDirectory>,
    sender: Arc<dyn NotificationSender>,
    template: MessageTemplate,
    settings: EngineSettings,
}

impl ReminderEngine {
    pub fn new(
        tiers: TierTable,
        store: Arc<dyn TaskStore>,
        directory: Arc<dyn UserDirectory>,
        sender: Arc<dyn NotificationSender>,
        template: MessageTemplate,
    ) -> Self {
        let mut settings = EngineSettings::default();
        if settings.claim_lease <= tiers.widest_window() {
            settings.claim_lease = tiers.widest_window() * 2;
        }
        Self {
            tiers,
            store,
            directory,
            sender,
            template,
            settings,
        }
    }

    pub fn with_settings(mut self, settings: EngineSettings) -> Result<Self> {
        settings.validate(&self.tiers)?;
        self.settings = settings;
        Ok(self)
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    /// Run one cycle against the current time
    pub async fn run_cycle(&self, options: &CycleOptions) -> Result<CycleSummary> {
        self.run_cycle_at(Utc::now(), options).await
    }

    /// Run one cycle with `now` as the single logical time for every task
    pub async fn run_cycle_at(&self, now: DateTime<Utc>, options: &CycleOptions) -> Result<CycleSummary> {
        let within = self.lookahead(options, now)?;
        let cycle_id = uuid::Uuid::new_v4().to_string();
        info!(
            "Reminder cycle {} started at {} (lookahead {})",
            cycle_id,
            now.to_rfc3339(),
            format_duration(within)
        );

        let tasks = self
            .store
            .fetch_candidates(now, within)
            .await
            .map_err(ReminderError::Fetch)?;
        let tasks_checked = tasks.len();
        debug!("Cycle {} fetched {} candidate tasks", cycle_id, tasks_checked);

        let results: Vec<DispatchResult> = stream::iter(tasks)
            .map(|task| self.process_task(task, now, &cycle_id))
            .buffer_unordered(self.settings.workers.max(1))
            .filter_map(futures::future::ready)
            .collect()
            .await;

        let summary = CycleSummary::from_results(now, tasks_checked, results);
        info!(
            "Reminder cycle {} finished: {} checked, {} sent, {} failed",
            cycle_id, summary.tasks_checked, summary.reminders_sent, summary.reminders_failed
        );
        Ok(summary)
    }

    /// List what a cycle would dispatch right now, without side effects
    pub async fn preview(&self, options: &CycleOptions) -> Result<Vec<PendingReminder>> {
        self.preview_at(Utc::now(), options).await
    }

    /// List what a cycle would dispatch at `now` without claiming or sending
    pub async fn preview_at(&self, now: DateTime<Utc>, options: &CycleOptions) -> Result<Vec<PendingReminder>> {
        let within = self.lookahead(options, now)?;
        let tasks = self
            .store
            .fetch_candidates(now, within)
            .await
            .map_err(ReminderError::Fetch)?;

        Ok(tasks
            .iter()
            .filter_map(|task| {
                due_tier_for(&self.tiers, task, now).map(|tier| PendingReminder {
                    task_id: task.id.clone(),
                    title: task.title.clone(),
                    deadline: task.deadline,
                    tier: tier.name.clone(),
                    label: tier.label.clone(),
                })
            })
            .collect())
    }

    fn lookahead(&self, options: &CycleOptions, now: DateTime<Utc>) -> Result<Duration> {
        let within = match options.lookahead {
            Some(lookahead) if lookahead <= Duration::zero() => {
                return Err(ReminderError::InvalidRequest(
                    "lookahead must be positive".to_string(),
                ));
            }
            Some(lookahead) if lookahead > Duration::days(MAX_LOOKAHEAD_DAYS) => {
                return Err(ReminderError::InvalidRequest(format!(
                    "lookahead must be at most {MAX_LOOKAHEAD_DAYS} days"
                )));
            }
            Some(lookahead) => {
                if lookahead < self.tiers.scan_window() {
                    info!(
                        "Lookahead {} is narrower than the tier table's {}",
                        format_duration(lookahead),
                        format_duration(self.tiers.scan_window())
                    );
                }
                lookahead
            }
            None => self.tiers.scan_window(),
        };

        if now.checked_add_signed(within).is_none() {
            return Err(ReminderError::InvalidRequest(format!(
                "lookahead of {} runs past the representable time range",
                format_duration(within)
            )));
        }
        Ok(within)
    }

    /// Handle one candidate. `None` means nothing was due (or another cycle
    /// holds the tier).
    async fn process_task(&self, task: Task, now: DateTime<Utc>, cycle_id: &str) -> Option<DispatchResult> {
        let tier = due_tier_for(&self.tiers, &task, now)?;
        debug!("Task {} is due for its {} reminder", task.id, tier.name);

        let claim = ReminderClaim {
            id: cycle_id.to_string(),
            claimed_at: now,
            lease: self.settings.claim_lease,
        };

        match self.store.try_claim_reminder(&task.id, &tier.name, &claim).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(
                    "Task {} tier {} already claimed or sent elsewhere, skipping",
                    task.id, tier.name
                );
                return None;
            }
            Err(e) => {
                let err = ReminderError::Persistence(format!("claim failed: {e:#}"));
                warn!("Task {}: {}", task.id, err);
                return Some(DispatchResult::failed(&task, tier, &err));
            }
        }

        match self.deliver(&task, tier).await {
            Ok(receipt) => Some(self.record_sent(&task, tier, now, receipt).await),
            Err(err) => {
                warn!("Task {} tier {}: {}", task.id, tier.name, err);
                if let Err(e) = self.store.release_reminder_claim(&task.id, &tier.name, &claim).await {
                    warn!(
                        "Failed to release claim on task {} tier {}: {:#}",
                        task.id, tier.name, e
                    );
                }
                Some(DispatchResult::failed(&task, tier, &err))
            }
        }
    }

    async fn deliver(&self, task: &Task, tier: &ReminderTier) -> Result<SendReceipt> {
        let email = match self.directory.email_for(&task.owner).await {
            Ok(Some(email)) => email,
            Ok(None) => {
                return Err(ReminderError::Send("owner has no email address".to_string()));
            }
            Err(e) => {
                return Err(ReminderError::Send(format!("owner lookup failed: {e:#}")));
            }
        };

        let display_name = self
            .directory
            .display_name_for(&task.owner)
            .await
            .unwrap_or_else(|e| {
                warn!("Display name lookup failed for {}: {:#}", task.owner, e);
                None
            });
        let name = greeting_name(display_name.as_deref(), Some(&email));
        let message = self.template.render(task, tier, &name);

        debug!("Sending {} reminder for task {} to {}", tier.name, task.id, email);
        match tokio::time::timeout(self.settings.send_timeout, self.sender.send(&email, &message)).await {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(e)) => Err(ReminderError::Send(format!("{e:#}"))),
            Err(_) => Err(ReminderError::Send(format!(
                "timed out after {}s",
                self.settings.send_timeout.as_secs_f64()
            ))),
        }
    }

    /// Flip the flag after a successful send. Never re-sends.
    async fn record_sent(
        &self,
        task: &Task,
        tier: &ReminderTier,
        now: DateTime<Utc>,
        receipt: SendReceipt,
    ) -> DispatchResult {
        match self.store.try_set_reminder_flag(&task.id, &tier.name, now).await {
            Ok(true) => {
                info!(
                    "Sent {} reminder for task {} (message id: {})",
                    tier.label,
                    task.id,
                    receipt.message_id.as_deref().unwrap_or("-")
                );
                DispatchResult::sent(task, tier, None)
            }
            Ok(false) => {
                warn!(
                    "Task {} tier {} was already marked sent when this cycle finished sending",
                    task.id, tier.name
                );
                DispatchResult::sent(task, tier, Some("reminder flag was already set".to_string()))
            }
            Err(e) => {
                let err = ReminderError::Persistence(format!("{e:#}"));
                error!(
                    "Inconsistency: {} reminder for task {} was sent but {}",
                    tier.name, task.id, err
                );
                DispatchResult::sent(task, tier, Some(err.to_string()))
            }
        }
    }
}
