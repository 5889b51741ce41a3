//! Outbound event notifications.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{debug, instrument};
use uuid::Uuid;

use previsa_core::defaults::WEBHOOK_TIMEOUT_SECS;
use previsa_core::{Error, Notifier, Result};

/// Header carrying the event name on every delivery.
pub const EVENT_HEADER: &str = "X-Previsa-Event";

/// Posts each event once, unsigned, as JSON to a fixed URL.
///
/// Body: `{"event": ..., "tenant_id": ..., "payload": ...}`. Any non-2xx
/// response is a [`Error::Notification`].
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }

    /// Notifier configured from the environment, `None` when disabled.
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `WEBHOOK_URL` | unset | Destination; unset disables notifications |
    /// | `WEBHOOK_TIMEOUT_SECS` | `10` | Request timeout |
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("WEBHOOK_URL")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())?;
        let timeout = std::env::var("WEBHOOK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(WEBHOOK_TIMEOUT_SECS);
        Some(Self::with_timeout(url, Duration::from_secs(timeout)))
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    #[instrument(skip(self, payload), fields(subsystem = "jobs", component = "notifier", op = "notify"))]
    async fn notify(&self, tenant_id: Option<Uuid>, event: &str, payload: JsonValue) -> Result<()> {
        let body = json!({
            "event": event,
            "tenant_id": tenant_id,
            "payload": payload,
        });

        let response = self
            .client
            .post(&self.url)
            .header(EVENT_HEADER, event)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "webhook returned {}: {}",
                status, text
            )));
        }
        debug!(status = status.as_u16(), "Notification delivered");
        Ok(())
    }
}

/// Drops every event. Used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _tenant_id: Option<Uuid>, event: &str, _payload: JsonValue) -> Result<()> {
        debug!(event, "Notifications disabled, event dropped");
        Ok(())
    }
}
