//! # Task Store and User Directory seams
//!
//! The dispatcher never owns tasks. It reads candidates from a [`TaskStore`]
//! and writes back only per-tier reminder state, always through conditional
//! (check-and-set) operations so overlapping cycles cannot both dispatch the
//! same (task, tier).
//!
//! - **Version**: 1.1.1
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.1.1: Out-of-range candidate horizon is an error
//! - 1.1.0: Claims taken before sending, released on failure
//! - 1.0.0: Initial traits and in-memory store

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A task as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub deadline: DateTime<Utc>,
    pub completed: bool,
    /// Profile id of the owner
    pub owner: String,
    /// Names of tiers already marked sent
    #[serde(default)]
    pub reminders_sent: BTreeSet<String>,
}

impl Task {
    pub fn new(id: &str, owner: &str, title: &str, deadline: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            deadline,
            completed: false,
            owner: owner.to_string(),
            reminders_sent: BTreeSet::new(),
        }
    }
}

/// Persisted state of one (task, tier) reminder row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReminderState {
    /// A cycle has reserved the tier and is sending
    Claimed,
    /// The reminder went out; terminal
    Sent,
}

impl std::fmt::Display for ReminderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReminderState::Claimed => write!(f, "claimed"),
            ReminderState::Sent => write!(f, "sent"),
        }
    }
}

impl std::str::FromStr for ReminderState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "claimed" => Ok(ReminderState::Claimed),
            "sent" => Ok(ReminderState::Sent),
            _ => Err(anyhow::anyhow!("Invalid reminder state: {}", s)),
        }
    }
}

/// A reservation on a (task, tier) pair held by one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderClaim {
    /// Unique per cycle
    pub id: String,
    pub claimed_at: DateTime<Utc>,
    /// After this long another cycle may take the claim over
    pub lease: Duration,
}

impl ReminderClaim {
    pub fn new(claimed_at: DateTime<Utc>, lease: Duration) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            claimed_at,
            lease,
        }
    }

    /// Claims taken before this instant are considered abandoned
    pub fn stale_before(&self) -> DateTime<Utc> {
        self.claimed_at - self.lease
    }
}

/// Source of candidate tasks and sink for reminder state
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Incomplete tasks with `now < deadline <= now + within`
    async fn fetch_candidates(&self, now: DateTime<Utc>, within: Duration) -> Result<Vec<Task>>;

    /// Reserve a tier for dispatch
    ///
    /// Succeeds only when the tier has no row yet, or its only row is a claim
    /// older than `claim.stale_before()`. Never succeeds once the tier is sent.
    async fn try_claim_reminder(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<bool>;

    /// Drop a claim held by `claim` so the tier stays eligible
    async fn release_reminder_claim(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<()>;

    /// Mark the tier sent. Returns `false` if it was already set.
    async fn try_set_reminder_flag(&self, task_id: &str, tier: &str, sent_at: DateTime<Utc>) -> Result<bool>;
}

/// Owner lookups. Both are best-effort from the dispatcher's point of view.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn display_name_for(&self, owner: &str) -> Result<Option<String>>;

    async fn email_for(&self, owner: &str) -> Result<Option<String>>;
}

/// Profile record held by [`MemoryTaskStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
enum ReminderRow {
    Claimed { claim_id: String, claimed_at: DateTime<Utc> },
    Sent { sent_at: DateTime<Utc> },
}

/// In-memory task store and user directory backed by DashMap
///
/// Every conditional update runs under the entry's shard lock, so concurrent
/// cycles sharing one store observe the same check-and-set guarantees as the
/// SQLite store.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<String, Task>,
    reminders: DashMap<(String, String), ReminderRow>,
    profiles: DashMap<String, Profile>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_task(&self, task: Task) {
        for tier in &task.reminders_sent {
            self.reminders.insert(
                (task.id.clone(), tier.clone()),
                ReminderRow::Sent { sent_at: Utc::now() },
            );
        }
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn insert_profile(&self, owner: &str, email: Option<&str>, display_name: Option<&str>) {
        self.profiles.insert(
            owner.to_string(),
            Profile {
                email: email.map(String::from),
                display_name: display_name.map(String::from),
            },
        );
    }

    /// Mark a task completed; returns `false` for unknown ids
    pub fn complete_task(&self, task_id: &str) -> bool {
        match self.tasks.get_mut(task_id) {
            Some(mut task) => {
                task.completed = true;
                true
            }
            None => false,
        }
    }

    pub fn reminder_state(&self, task_id: &str, tier: &str) -> Option<ReminderState> {
        self.reminders
            .get(&(task_id.to_string(), tier.to_string()))
            .map(|row| match row.value() {
                ReminderRow::Claimed { .. } => ReminderState::Claimed,
                ReminderRow::Sent { .. } => ReminderState::Sent,
            })
    }

    /// When the tier was marked sent, if it was
    pub fn sent_at(&self, task_id: &str, tier: &str) -> Option<DateTime<Utc>> {
        self.reminders
            .get(&(task_id.to_string(), tier.to_string()))
            .and_then(|row| match row.value() {
                ReminderRow::Sent { sent_at } => Some(*sent_at),
                ReminderRow::Claimed { .. } => None,
            })
    }

    fn sent_tiers(&self, task_id: &str) -> BTreeSet<String> {
        self.reminders
            .iter()
            .filter(|row| row.key().0 == task_id && matches!(row.value(), ReminderRow::Sent { .. }))
            .map(|row| row.key().1.clone())
            .collect()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn fetch_candidates(&self, now: DateTime<Utc>, within: Duration) -> Result<Vec<Task>> {
        let horizon = now
            .checked_add_signed(within)
            .ok_or_else(|| anyhow!("candidate horizon out of range: {now} + {within}"))?;
        let mut candidates: Vec<Task> = self
            .tasks
            .iter()
            .filter(|t| !t.completed && t.deadline > now && t.deadline <= horizon)
            .map(|t| t.clone())
            .collect();

        for task in &mut candidates {
            task.reminders_sent = self.sent_tiers(&task.id);
        }

        candidates.sort_by(|a, b| a.deadline.cmp(&b.deadline));
        Ok(candidates)
    }

    async fn try_claim_reminder(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<bool> {
        let key = (task_id.to_string(), tier.to_string());
        let fresh = ReminderRow::Claimed {
            claim_id: claim.id.clone(),
            claimed_at: claim.claimed_at,
        };

        match self.reminders.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(fresh);
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                let stale = matches!(
                    slot.get(),
                    ReminderRow::Claimed { claimed_at, .. } if *claimed_at < claim.stale_before()
                );
                if stale {
                    slot.insert(fresh);
                }
                Ok(stale)
            }
        }
    }

    async fn release_reminder_claim(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<()> {
        self.reminders.remove_if(&(task_id.to_string(), tier.to_string()), |_, row| {
            matches!(row, ReminderRow::Claimed { claim_id, .. } if *claim_id == claim.id)
        });
        Ok(())
    }

    async fn try_set_reminder_flag(&self, task_id: &str, tier: &str, sent_at: DateTime<Utc>) -> Result<bool> {
        let key = (task_id.to_string(), tier.to_string());
        match self.reminders.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(ReminderRow::Sent { sent_at });
                Ok(true)
            }
            Entry::Occupied(mut slot) => {
                if matches!(slot.get(), ReminderRow::Sent { .. }) {
                    return Ok(false);
                }
                slot.insert(ReminderRow::Sent { sent_at });
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl UserDirectory for MemoryTaskStore {
    async fn display_name_for(&self, owner: &str) -> Result<Option<String>> {
        Ok(self.profiles.get(owner).and_then(|p| p.display_name.clone()))
    }

    async fn email_for(&self, owner: &str) -> Result<Option<String>> {
        Ok(self.profiles.get(owner).and_then(|p| p.email.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_reminder_state_display_and_parse() {
        assert_eq!(ReminderState::Claimed.to_string(), "claimed");
        assert_eq!(ReminderState::Sent.to_string(), "sent");
        assert_eq!("SENT".parse::<ReminderState>().unwrap(), ReminderState::Sent);
        assert!("pending".parse::<ReminderState>().is_err());
    }

    #[tokio::test]
    async fn test_fetch_candidates_filters() {
        let store = MemoryTaskStore::new();
        let now = at(0);
        store.insert_task(Task::new("due", "u1", "Soon", now + Duration::hours(2)));
        store.insert_task(Task::new("far", "u1", "Later", now + Duration::days(10)));
        store.insert_task(Task::new("late", "u1", "Overdue", now - Duration::hours(1)));
        store.insert_task(Task::new("edge", "u1", "Edge", now + Duration::days(3)));
        let mut done = Task::new("done", "u1", "Done", now + Duration::hours(3));
        done.completed = true;
        store.insert_task(done);

        let ids: Vec<_> = store
            .fetch_candidates(now, Duration::days(3))
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["due", "edge"]);
    }

    #[tokio::test]
    async fn test_unrepresentable_horizon_is_an_error() {
        let store = MemoryTaskStore::new();
        store.insert_task(Task::new("due", "u1", "Soon", at(3600)));

        assert!(store
            .fetch_candidates(at(0), Duration::seconds(9_000_000_000_000))
            .await
            .is_err());
        assert_eq!(store.fetch_candidates(at(0), Duration::days(1)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flag_is_check_and_set() {
        let store = MemoryTaskStore::new();
        assert!(store.try_set_reminder_flag("t1", "3d", at(0)).await.unwrap());
        assert!(!store.try_set_reminder_flag("t1", "3d", at(1)).await.unwrap());
        assert_eq!(store.sent_at("t1", "3d"), Some(at(0)));
        assert!(store.try_set_reminder_flag("t1", "1d", at(2)).await.unwrap());
    }

    #[tokio::test]
    async fn test_claims_exclude_each_other_until_stale() {
        let store = MemoryTaskStore::new();
        let lease = Duration::minutes(10);
        let first = ReminderClaim::new(at(0), lease);
        let second = ReminderClaim::new(at(60), lease);

        assert!(store.try_claim_reminder("t1", "3d", &first).await.unwrap());
        assert!(!store.try_claim_reminder("t1", "3d", &second).await.unwrap());

        // Once the first claim is older than the lease it can be taken over
        let later = ReminderClaim::new(at(11 * 60), lease);
        assert!(store.try_claim_reminder("t1", "3d", &later).await.unwrap());
    }

    #[tokio::test]
    async fn test_release_only_drops_own_claim() {
        let store = MemoryTaskStore::new();
        let lease = Duration::minutes(10);
        let mine = ReminderClaim::new(at(0), lease);
        let theirs = ReminderClaim::new(at(0), lease);

        assert!(store.try_claim_reminder("t1", "3d", &mine).await.unwrap());
        store.release_reminder_claim("t1", "3d", &theirs).await.unwrap();
        assert_eq!(store.reminder_state("t1", "3d"), Some(ReminderState::Claimed));

        store.release_reminder_claim("t1", "3d", &mine).await.unwrap();
        assert_eq!(store.reminder_state("t1", "3d"), None);
    }

    #[tokio::test]
    async fn test_sent_tier_cannot_be_claimed_or_released() {
        let store = MemoryTaskStore::new();
        let claim = ReminderClaim::new(at(0), Duration::minutes(10));
        assert!(store.try_claim_reminder("t1", "1h", &claim).await.unwrap());
        assert!(store.try_set_reminder_flag("t1", "1h", at(5)).await.unwrap());

        store.release_reminder_claim("t1", "1h", &claim).await.unwrap();
        assert_eq!(store.reminder_state("t1", "1h"), Some(ReminderState::Sent));

        let much_later = ReminderClaim::new(at(86_400), Duration::minutes(10));
        assert!(!store.try_claim_reminder("t1", "1h", &much_later).await.unwrap());
    }

    #[tokio::test]
    async fn test_candidates_carry_sent_flags() {
        let store = MemoryTaskStore::new();
        let now = at(0);
        store.insert_task(Task::new("t1", "u1", "Report", now + Duration::days(2)));
        store.try_set_reminder_flag("t1", "3d", now).await.unwrap();

        let tasks = store.fetch_candidates(now, Duration::days(3)).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert!(tasks[0].reminders_sent.contains("3d"));
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let store = MemoryTaskStore::new();
        store.insert_profile("u1", Some("ana@example.com"), None);
        assert_eq!(store.email_for("u1").await.unwrap().as_deref(), Some("ana@example.com"));
        assert_eq!(store.display_name_for("u1").await.unwrap(), None);
        assert_eq!(store.email_for("nobody").await.unwrap(), None);
    }
}
