//! Window matcher: decides which tier, if any, is newly due for one task.
//!
//! Pure and total. The caller supplies `now`; nothing here reads a clock.

use crate::features::reminders::store::Task;
use crate::features::reminders::tiers::{ReminderTier, TierTable};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

/// First tier (farthest to nearest) whose window holds `deadline - now` and
/// whose flag is unset.
///
/// Returns `None` for completed or overdue tasks. A tier whose window has
/// already passed is never returned; missed tiers stay missed.
pub fn due_tier<'a>(
    tiers: &'a TierTable,
    now: DateTime<Utc>,
    deadline: DateTime<Utc>,
    completed: bool,
    sent: &BTreeSet<String>,
) -> Option<&'a ReminderTier> {
    if completed || deadline <= now {
        return None;
    }

    let until_deadline = deadline - now;
    tiers
        .iter()
        .find(|tier| !sent.contains(&tier.name) && tier.window_contains(until_deadline))
}

/// [`due_tier`] applied to a task snapshot
pub fn due_tier_for<'a>(tiers: &'a TierTable, task: &Task, now: DateTime<Utc>) -> Option<&'a ReminderTier> {
    due_tier(tiers, now, task.deadline, task.completed, &task.reminders_sent)
}
