//! # Database
//!
//! SQLite-backed task store and user directory.
//!
//! Tasks and profiles are owned by the surrounding application; the
//! dispatcher only reads them and writes rows in `task_reminders`. Every
//! reminder write is a single conditional statement, so two cycles (or two
//! processes) sharing the file cannot both claim or mark the same tier.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//!
//! ## Changelog
//! - 1.2.0: Timestamps stored as INTEGER microseconds since the Unix epoch
//! - 1.1.0: Claim rows with lease, WAL journal
//! - 1.0.0: Initial schema

use crate::features::reminders::store::{ReminderClaim, ReminderState, Task, TaskStore, UserDirectory};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info};
use sqlite::{Connection, State};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;

const BUSY_TIMEOUT_MS: usize = 5_000;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS profiles (
        id TEXT PRIMARY KEY,
        email TEXT,
        display_name TEXT
    );

    CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        title TEXT NOT NULL,
        deadline INTEGER NOT NULL,
        completed INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_open_deadline ON tasks(completed, deadline);

    CREATE TABLE IF NOT EXISTS task_reminders (
        task_id TEXT NOT NULL,
        tier TEXT NOT NULL,
        state TEXT NOT NULL CHECK (state IN ('claimed', 'sent')),
        claim_id TEXT,
        claimed_at INTEGER,
        sent_at INTEGER,
        PRIMARY KEY (task_id, tier)
    );
";

/// Time columns hold UTC microseconds since the Unix epoch
fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(raw: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(raw).ok_or_else(|| anyhow!("timestamp out of range in database: {raw}"))
}

/// Shared SQLite handle; clones share one connection
#[derive(Clone)]
pub struct Database {
    connection: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn new(db_path: &str) -> Result<Self> {
        let mut connection =
            sqlite::open(db_path).with_context(|| format!("failed to open database at {db_path}"))?;
        connection.set_busy_timeout(BUSY_TIMEOUT_MS)?;
        connection.execute("PRAGMA journal_mode = WAL;")?;

        let database = Database {
            connection: Arc::new(Mutex::new(connection)),
        };
        database.init_tables().await?;
        info!("Database ready at {}", db_path);
        Ok(database)
    }

    async fn init_tables(&self) -> Result<()> {
        let conn = self.connection.lock().await;
        conn.execute(SCHEMA).context("failed to create schema")?;
        Ok(())
    }

    /// Insert or replace a profile
    pub async fn add_profile(&self, id: &str, email: Option<&str>, display_name: Option<&str>) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT OR REPLACE INTO profiles (id, email, display_name)
             VALUES (?, NULLIF(?, ''), NULLIF(?, ''))",
        )?;
        statement.bind((1, id))?;
        statement.bind((2, email.unwrap_or("")))?;
        statement.bind((3, display_name.unwrap_or("")))?;
        statement.next()?;
        Ok(())
    }

    /// Insert or replace a task. Any tiers already in `reminders_sent` are
    /// recorded as sent.
    pub async fn add_task(&self, task: &Task) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT OR REPLACE INTO tasks (id, user_id, title, deadline, completed)
             VALUES (?, ?, ?, ?, ?)",
        )?;
        statement.bind((1, task.id.as_str()))?;
        statement.bind((2, task.owner.as_str()))?;
        statement.bind((3, task.title.as_str()))?;
        statement.bind((4, to_micros(task.deadline)))?;
        statement.bind((5, task.completed as i64))?;
        statement.next()?;

        let sent_at = to_micros(Utc::now());
        for tier in &task.reminders_sent {
            let mut statement = conn.prepare(
                "INSERT OR REPLACE INTO task_reminders (task_id, tier, state, sent_at)
                 VALUES (?, ?, 'sent', ?)",
            )?;
            statement.bind((1, task.id.as_str()))?;
            statement.bind((2, tier.as_str()))?;
            statement.bind((3, sent_at))?;
            statement.next()?;
        }
        Ok(())
    }

    /// Mark a task completed; returns `false` for unknown ids
    pub async fn complete_task(&self, task_id: &str) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("UPDATE tasks SET completed = 1 WHERE id = ?")?;
        statement.bind((1, task_id))?;
        statement.next()?;
        Ok(conn.change_count() > 0)
    }

    pub async fn reminder_state(&self, task_id: &str, tier: &str) -> Result<Option<ReminderState>> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare("SELECT state FROM task_reminders WHERE task_id = ? AND tier = ?")?;
        statement.bind((1, task_id))?;
        statement.bind((2, tier))?;

        if let State::Row = statement.next()? {
            let state: String = statement.read(0)?;
            return Ok(Some(state.parse()?));
        }
        Ok(None)
    }

    /// Look up one nullable TEXT column of a profile; blank counts as absent
    async fn profile_field(&self, column: &str, owner: &str) -> Result<Option<String>> {
        let conn = self.connection.lock().await;
        let query = format!("SELECT COALESCE({column}, '') FROM profiles WHERE id = ?");
        let mut statement = conn.prepare(query)?;
        statement.bind((1, owner))?;

        if let State::Row = statement.next()? {
            let value: String = statement.read(0)?;
            let value = value.trim();
            if !value.is_empty() {
                return Ok(Some(value.to_string()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl TaskStore for Database {
    async fn fetch_candidates(&self, now: DateTime<Utc>, within: Duration) -> Result<Vec<Task>> {
        let horizon = now
            .checked_add_signed(within)
            .ok_or_else(|| anyhow!("candidate horizon out of range: {now} + {within}"))?;

        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "SELECT t.id, t.user_id, t.title, t.deadline, t.completed,
                    COALESCE((SELECT group_concat(r.tier, ',') FROM task_reminders r
                              WHERE r.task_id = t.id AND r.state = 'sent'), '')
             FROM tasks t
             WHERE t.completed = 0 AND t.deadline > ? AND t.deadline <= ?
             ORDER BY t.deadline",
        )?;
        statement.bind((1, to_micros(now)))?;
        statement.bind((2, to_micros(horizon)))?;

        let mut tasks = Vec::new();
        while let State::Row = statement.next()? {
            let deadline: i64 = statement.read(3)?;
            let sent: String = statement.read(5)?;
            tasks.push(Task {
                id: statement.read(0)?,
                owner: statement.read(1)?,
                title: statement.read(2)?,
                deadline: from_micros(deadline)?,
                completed: statement.read::<i64, _>(4)? != 0,
                reminders_sent: sent
                    .split(',')
                    .filter(|tier| !tier.is_empty())
                    .map(String::from)
                    .collect::<BTreeSet<_>>(),
            });
        }

        debug!("Fetched {} candidate tasks", tasks.len());
        Ok(tasks)
    }

    async fn try_claim_reminder(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO task_reminders (task_id, tier, state, claim_id, claimed_at)
             VALUES (?, ?, 'claimed', ?, ?)
             ON CONFLICT(task_id, tier) DO UPDATE
                SET claim_id = excluded.claim_id, claimed_at = excluded.claimed_at
                WHERE task_reminders.state = 'claimed' AND task_reminders.claimed_at < ?",
        )?;
        statement.bind((1, task_id))?;
        statement.bind((2, tier))?;
        statement.bind((3, claim.id.as_str()))?;
        statement.bind((4, to_micros(claim.claimed_at)))?;
        statement.bind((5, to_micros(claim.stale_before())))?;
        statement.next()?;
        Ok(conn.change_count() > 0)
    }

    async fn release_reminder_claim(&self, task_id: &str, tier: &str, claim: &ReminderClaim) -> Result<()> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "DELETE FROM task_reminders
             WHERE task_id = ? AND tier = ? AND state = 'claimed' AND claim_id = ?",
        )?;
        statement.bind((1, task_id))?;
        statement.bind((2, tier))?;
        statement.bind((3, claim.id.as_str()))?;
        statement.next()?;
        Ok(())
    }

    async fn try_set_reminder_flag(&self, task_id: &str, tier: &str, sent_at: DateTime<Utc>) -> Result<bool> {
        let conn = self.connection.lock().await;
        let mut statement = conn.prepare(
            "INSERT INTO task_reminders (task_id, tier, state, sent_at)
             VALUES (?, ?, 'sent', ?)
             ON CONFLICT(task_id, tier) DO UPDATE
                SET state = 'sent', sent_at = excluded.sent_at, claim_id = NULL, claimed_at = NULL
                WHERE task_reminders.state <> 'sent'",
        )?;
        statement.bind((1, task_id))?;
        statement.bind((2, tier))?;
        statement.bind((3, to_micros(sent_at)))?;
        statement.next()?;
        Ok(conn.change_count() > 0)
    }
}

#[async_trait]
impl UserDirectory for Database {
    async fn display_name_for(&self, owner: &str) -> Result<Option<String>> {
        self.profile_field("display_name", owner).await
    }

    async fn email_for(&self, owner: &str) -> Result<Option<String>> {
        self.profile_field("email", owner).await
    }
}
