//! Run outcome notifications.
//!
//! Delivery is best effort: failures are logged and never reach the caller.

use async_trait::async_trait;
use serde_json::json;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Writes notifications to the process log only.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!("notification: {}", message);
    }
}

/// Posts notifications to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    hook_url: String,
}

impl SlackNotifier {
    pub fn new(hook_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            hook_url: hook_url.into(),
        }
    }
}

/// Form-encoded `payload` field carrying `{"text": message}`.
fn payload(message: &str) -> [(&'static str, String); 1] {
    [("payload", json!({ "text": message }).to_string())]
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str) {
        tracing::info!("notification: {}", message);

        match self
            .http
            .post(&self.hook_url)
            .form(&payload(message))
            .send()
            .await
        {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!("notification rejected: {}", response.status());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("notification failed: {}", e),
        }
    }
}
