use async_trait::async_trait;
use common::error::{AppError, Res};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub user_id: Uuid,
    pub title: String,
    pub message: String,
    pub data: serde_json::Value,
    pub channels: Vec<String>,
    pub template_id: String,
}

/// Fire-and-forget delivery to the notification service.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Res<()>;
}

pub struct HttpNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, notification: Notification) -> Res<()> {
        let response = self
            .client
            .post(format!("{}/notify", self.base_url))
            .json(&notification)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::Internal(format!(
                "notification service answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Used when no notification service is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: Notification) -> Res<()> {
        log::debug!(
            "Notifications disabled, dropping '{}' for user {}",
            notification.title,
            notification.user_id
        );
        Ok(())
    }
}

/// Sends `notification` on a detached task; failures are only logged.
pub fn notify_detached(notifier: std::sync::Arc<dyn Notifier>, notification: Notification) {
    tokio::spawn(async move {
        let user_id = notification.user_id;
        if let Err(e) = notifier.notify(notification).await {
            log::warn!("Failed to notify user {}: {}", user_id, e);
        }
    });
}
