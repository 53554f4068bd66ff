//! Slack incoming-webhook adapter.
//!
//! Posts one chat message per lifecycle event. The webhook URL is a secret,
//! so configuration only names the environment variable that holds it.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::domain::{Event, EventKind};

use super::NotificationSink;

/// Slack webhook client
pub struct SlackWebhook {
    /// Channel name from the pipeline config (for logs)
    name: String,
    /// Incoming webhook URL
    webhook_url: String,
    /// HTTP client
    client: reqwest::Client,
}

/// Body accepted by Slack incoming webhooks
#[derive(Debug, Serialize)]
struct WebhookMessage<'a> {
    text: &'a str,
}

impl SlackWebhook {
    pub fn new(name: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from the environment variable named in config
    pub fn from_env(name: impl Into<String>, var: &str) -> Result<Self> {
        let webhook_url = std::env::var(var)
            .with_context(|| format!("Slack webhook URL not set: ${}", var))?;
        Ok(Self::new(name, webhook_url))
    }

    /// Send a text message
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&WebhookMessage { text })
            .send()
            .await
            .context("Failed to send Slack message")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Slack webhook error {}: {}", status, body.trim());
        }

        Ok(())
    }
}

#[async_trait]
impl NotificationSink for SlackWebhook {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, event: &Event) -> Result<()> {
        self.send_message(&format_message(event)).await
    }
}

/// Render an event as a single chat line
pub fn format_message(event: &Event) -> String {
    let icon = match event.kind {
        EventKind::PipelineSucceeded | EventKind::StageSucceeded => ":white_check_mark:",
        EventKind::StageAwaitingApproval => ":raised_hand:",
        kind if kind.is_failure() => ":x:",
        _ => ":information_source:",
    };

    let mut text = format!("{} [{}] {}", icon, event.pipeline, event.kind);
    if let Some(stage) = &event.stage {
        text.push_str(&format!(" ({})", stage));
    }
    if !event.detail.is_empty() {
        text.push_str(&format!(": {}", event.detail));
    }
    if let Some(error) = &event.error {
        text.push_str(&format!("\n> {}", error));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_format_approval_request() {
        let event = Event::new(
            Uuid::new_v4(),
            "sample-backend",
            Some("ProductionDB".to_string()),
            EventKind::StageAwaitingApproval,
            "waiting on ReleaseApproval",
        );

        assert_eq!(
            format_message(&event),
            ":raised_hand: [sample-backend] StageAwaitingApproval (ProductionDB): waiting on ReleaseApproval"
        );
    }

    #[test]
    fn test_format_failure_with_error() {
        let event = Event::new(
            Uuid::new_v4(),
            "sample-backend",
            None,
            EventKind::PipelineFailed,
            "",
        )
        .with_error("build phase 'test' failed");

        let text = format_message(&event);
        assert!(text.starts_with(":x: [sample-backend] PipelineFailed"));
        assert!(text.ends_with("> build phase 'test' failed"));
    }

    #[test]
    fn test_from_env_requires_variable() {
        assert!(SlackWebhook::from_env("chat", "PROMOTE_TEST_UNSET_WEBHOOK_VAR").is_err());
    }
}
