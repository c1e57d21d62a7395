//! Push notifications to an ntfy-style endpoint (`POST {server}/{topic}`).
//!
//! Delivery is best-effort: [`send_soft`] logs failures and never returns
//! them, so a dead notification server cannot stop a pipeline.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::pipeline_config::NotifySection;

/// One short message.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// ntfy priority 1 (min) to 5 (max)
    pub priority: u8,
    pub tags: Vec<String>,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            priority: 3,
            tags: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 5);
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.tags.push(tag.to_string());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

/// Send and swallow any failure.
pub async fn send_soft(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.send(&notification).await {
        warn!(title = %notification.title, error = %e, "notification failed");
    }
}

/// Build the notifier described by the `[notify]` section.
pub fn from_config(settings: &NotifySection) -> Option<NtfyNotifier> {
    match settings.topic {
        Some(ref topic) if settings.enabled => Some(NtfyNotifier::new(&settings.server, topic)),
        _ => None,
    }
}

pub struct NtfyNotifier {
    client: reqwest::Client,
    url: String,
}

impl NtfyNotifier {
    pub fn new(server: &str, topic: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: format!("{}/{}", server.trim_end_matches('/'), topic),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for NtfyNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Title", &notification.title)
            .header("Priority", notification.priority.to_string())
            .body(notification.message.clone());
        if !notification.tags.is_empty() {
            request = request.header("Tags", notification.tags.join(","));
        }

        request
            .send()
            .await
            .with_context(|| format!("Failed to send notification to {}", self.url))?
            .error_for_status()
            .context("Notification server returned error status")?;

        debug!(url = %self.url, title = %notification.title, "notification sent");
        Ok(())
    }
}

/// Used when notifications are disabled.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn send(&self, _notification: &Notification) -> Result<()> {
        Ok(())
    }
}

/// Collects notifications in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<Notification>>,
    pub fail: bool,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            anyhow::bail!("notification server unavailable");
        }
        Ok(())
    }
}
