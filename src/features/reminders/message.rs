//! Reminder message rendering
//!
//! Produces the subject line, an HTML body and a plain-text alternative for
//! one (task, tier) reminder.

use crate::features::reminders::store::Task;
use crate::features::reminders::tiers::ReminderTier;
use chrono::FixedOffset;

/// Used when neither a display name nor an email address is known
pub const FALLBACK_GREETING: &str = "there";

/// Rendered notification, ready for a sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Settings that shape every rendered message
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    /// Base URL the task link points at
    pub app_url: String,
    /// Offset deadlines are shown in
    pub display_offset: FixedOffset,
}

impl MessageTemplate {
    pub fn new(app_url: &str, display_offset: FixedOffset) -> Self {
        Self {
            app_url: app_url.trim_end_matches('/').to_string(),
            display_offset,
        }
    }

    pub fn task_url(&self, task: &Task) -> String {
        format!("{}?taskId={}", self.app_url, urlencoding::encode(&task.id))
    }

    pub fn format_deadline(&self, task: &Task) -> String {
        task.deadline
            .with_timezone(&self.display_offset)
            .format("%A, %-d %B %Y %H:%M (UTC%:z)")
            .to_string()
    }

    pub fn render(&self, task: &Task, tier: &ReminderTier, owner_name: &str) -> ReminderMessage {
        let subject = format!("Reminder: \"{}\" is due in {}", task.title, tier.label);
        let deadline = self.format_deadline(task);
        let url = self.task_url(task);

        let text = format!(
            "Hi {owner_name},\n\n\
             This is a reminder that a task is due in {label}:\n\n\
             {title}\n\
             Deadline: {deadline}\n\n\
             Open the task: {url}\n\n\
             -- This reminder was sent automatically.",
            label = tier.label,
            title = task.title,
        );

        let html = format!(
            r#"<html>
  <body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
      <div style="background-color: #5c6bc0; color: white; padding: 20px; text-align: center;">
        <h1>Task Deadline Reminder</h1>
      </div>
      <div style="padding: 20px; background-color: #f9f9f9;">
        <p>Hi {name},</p>
        <p>This is a reminder that a task is due in {label}:</p>
        <h2>{title}</h2>
        <p><strong>Deadline:</strong> {deadline}</p>
        <p>Don't forget to finish it before the deadline!</p>
        <a href="{url}" style="display: inline-block; padding: 10px 20px; background-color: #5c6bc0; color: white; text-decoration: none; border-radius: 5px;">View task</a>
      </div>
      <div style="padding: 20px; text-align: center; font-size: 12px; color: #999;">
        <p>This reminder was sent automatically.</p>
      </div>
    </div>
  </body>
</html>"#,
            name = escape_html(owner_name),
            label = escape_html(&tier.label),
            title = escape_html(&task.title),
            deadline = escape_html(&deadline),
            url = escape_html(&url),
        );

        ReminderMessage { subject, html, text }
    }
}

/// Name to greet an owner by: display name, else email local part, else a
/// generic label
pub fn greeting_name(display_name: Option<&str>, email: Option<&str>) -> String {
    display_name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .or_else(|| {
            email
                .and_then(|e| e.split('@').next())
                .map(str::trim)
                .filter(|local| !local.is_empty())
        })
        .unwrap_or(FALLBACK_GREETING)
        .to_string()
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn task() -> Task {
        // 2025-01-06 10:30:00 UTC, a Monday
        let deadline = DateTime::from_timestamp(1_736_159_400, 0).unwrap();
        Task::new("task-42", "u1", "Finish <report>", deadline)
    }

    fn tier() -> ReminderTier {
        ReminderTier::new("1d", "1 day", Duration::days(1), Duration::minutes(5))
    }

    #[test]
    fn test_subject_mentions_title_and_label() {
        let template = MessageTemplate::new("https://tasks.example.com/", FixedOffset::east_opt(0).unwrap());
        let msg = template.render(&task(), &tier(), "Ana");
        assert_eq!(msg.subject, "Reminder: \"Finish <report>\" is due in 1 day");
    }

    #[test]
    fn test_body_escapes_and_links() {
        let template = MessageTemplate::new("https://tasks.example.com/", FixedOffset::east_opt(0).unwrap());
        let msg = template.render(&task(), &tier(), "Ana");
        assert!(msg.html.contains("Finish &lt;report&gt;"));
        assert!(!msg.html.contains("<report>"));
        assert!(msg.html.contains("https://tasks.example.com?taskId=task-42"));
        assert!(msg.text.contains("Hi Ana,"));
        assert!(msg.text.contains("Finish <report>"));
    }

    #[test]
    fn test_task_url_encodes_id() {
        let template = MessageTemplate::new("https://tasks.example.com", FixedOffset::east_opt(0).unwrap());
        let mut odd = task();
        odd.id = "a b&c=d#e/f".to_string();
        assert_eq!(
            template.task_url(&odd),
            "https://tasks.example.com?taskId=a%20b%26c%3Dd%23e%2Ff"
        );
        assert_eq!(template.task_url(&task()), "https://tasks.example.com?taskId=task-42");

        let msg = template.render(&odd, &tier(), "Ana");
        assert!(msg.text.contains("taskId=a%20b%26c%3Dd%23e%2Ff"));
    }

    #[test]
    fn test_deadline_uses_display_offset() {
        let jakarta = FixedOffset::east_opt(7 * 3600).unwrap();
        let template = MessageTemplate::new("http://localhost:8080", jakarta);
        assert_eq!(template.format_deadline(&task()), "Monday, 6 January 2025 17:30 (UTC+07:00)");

        let utc = MessageTemplate::new("http://localhost:8080", FixedOffset::east_opt(0).unwrap());
        assert_eq!(utc.format_deadline(&task()), "Monday, 6 January 2025 10:30 (UTC+00:00)");
    }

    #[test]
    fn test_greeting_name_fallbacks() {
        assert_eq!(greeting_name(Some("Ana"), Some("ana@example.com")), "Ana");
        assert_eq!(greeting_name(Some("  "), Some("budi@example.com")), "budi");
        assert_eq!(greeting_name(None, Some("citra@example.com")), "citra");
        assert_eq!(greeting_name(None, None), FALLBACK_GREETING);
        assert_eq!(greeting_name(None, Some("@example.com")), FALLBACK_GREETING);
    }
}
