//! Notification sinks
//!
//! Delivery reports success or failure and never touches loop or account
//! state.

use crate::error::SidekickError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

const PUSHOVER_URL: &str = "https://api.pushover.net/1/messages.json";

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Push notifications through Pushover
pub struct PushoverNotifier {
    client: Client,
    token: String,
    user: String,
    url: String,
}

impl PushoverNotifier {
    pub fn new(token: String, user: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            token,
            user,
            url: PUSHOVER_URL.to_string(),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

#[async_trait]
impl Notifier for PushoverNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({
                "token": self.token,
                "user": self.user,
                "message": message,
            }))
            .send()
            .await
            .map_err(|e| SidekickError::NotificationError(format!("delivery failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Pushover rejected notification");
            return Err(SidekickError::NotificationError(format!(
                "Pushover returned {}: {}",
                status, body
            )));
        }

        info!(chars = message.len(), "Notification delivered");
        Ok(())
    }
}

/// Fallback sink when no push credentials are configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        info!(message = %message, "Notification (log only)");
        Ok(())
    }
}
