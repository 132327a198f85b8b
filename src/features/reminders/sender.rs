//! # Notification Sender
//!
//! Delivery is external to the dispatcher. [`NotificationSender`] is the
//! seam; [`ResendSender`] delivers email through the Resend HTTP API.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0

use crate::features::reminders::message::ReminderMessage;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};

/// Proof of a successful hand-off to the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Provider-side message id, when the provider returns one
    pub message_id: Option<String>,
}

/// Anything that can deliver a rendered reminder (subject plus body) to an
/// address
///
/// An `Err` is a delivery failure; its message becomes the failure reason in
/// the cycle summary.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, to: &str, message: &ReminderMessage) -> Result<SendReceipt>;
}

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct ResendSuccess {
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResendFailure {
    message: Option<String>,
    name: Option<String>,
}

/// Email sender backed by the Resend API
#[derive(Clone)]
pub struct ResendSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl ResendSender {
    pub fn new(api_url: &str, api_key: &str, from: &str, timeout: std::time::Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSender for ResendSender {
    async fn send(&self, to: &str, message: &ReminderMessage) -> Result<SendReceipt> {
        let payload = ResendEmail {
            from: &self.from,
            to: [to],
            subject: &message.subject,
            html: &message.html,
            text: &message.text,
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| anyhow!("Email request failed: {}", e))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| anyhow!("Failed to read email API response: {}", e))?;

        if !status.is_success() {
            return Err(anyhow!("Email delivery failed: {}", describe_failure(status, &bytes)));
        }

        let message_id = serde_json::from_slice::<ResendSuccess>(&bytes)
            .ok()
            .and_then(|ok| ok.id);
        debug!("Email accepted by provider (id: {:?})", message_id);

        Ok(SendReceipt { message_id })
    }
}

/// Human-readable reason for a non-2xx provider response
fn describe_failure(status: reqwest::StatusCode, body: &[u8]) -> String {
    match serde_json::from_slice::<ResendFailure>(body) {
        Ok(ResendFailure {
            message: Some(message),
            name,
        }) => match name {
            Some(name) => format!("{message} ({name}, HTTP {})", status.as_u16()),
            None => format!("{message} (HTTP {})", status.as_u16()),
        },
        _ => {
            let text = String::from_utf8_lossy(body);
            let text = text.trim();
            if text.is_empty() {
                format!("HTTP {status}")
            } else {
                format!("HTTP {status}: {}", text.chars().take(200).collect::<String>())
            }
        }
    }
}
