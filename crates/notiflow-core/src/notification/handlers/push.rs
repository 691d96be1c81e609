//! Push delivery via a thin HTTP adapter, shaped after FCM's HTTP v1 API.

use crate::notification::dispatcher::{ChannelHandler, HandlerOutcome};
use crate::notification::model::{Notification, NotificationChannel, User};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct PushProviderConfig {
    pub api_key: String,
    pub api_base_url: String,
}

pub struct PushHandler {
    client: Client,
    config: Option<PushProviderConfig>,
}

impl PushHandler {
    pub fn new(config: PushProviderConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            config: Some(config),
        }
    }

    pub fn logging_stub() -> Self {
        Self {
            client: Client::new(),
            config: None,
        }
    }
}

#[async_trait]
impl ChannelHandler for PushHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Push
    }

    fn can_handle(&self, _notification: &Notification, user: &User) -> bool {
        user.device_token.is_some()
    }

    async fn send(&self, notification: &Notification, user: &User) -> HandlerOutcome {
        let Some(token) = &user.device_token else {
            return HandlerOutcome::PermanentFailure("user has no device token".to_string());
        };

        let Some(config) = &self.config else {
            info!(notification_id = %notification.id, "push provider not configured, logging instead of sending");
            return HandlerOutcome::Success;
        };

        let payload = serde_json::json!({
            "to": token,
            "notification": {
                "title": notification.subject.clone().unwrap_or_default(),
                "body": notification.content,
            },
        });

        let response = self
            .client
            .post(&config.api_base_url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(notification_id = %notification.id, "push sent");
                HandlerOutcome::Success
            }
            Ok(resp) if resp.status().as_u16() == 404 || resp.status().as_u16() == 410 => {
                warn!(notification_id = %notification.id, status = %resp.status(), "device token unregistered");
                HandlerOutcome::PermanentFailure("device token unregistered".to_string())
            }
            Ok(resp) if resp.status().is_server_error() => {
                warn!(notification_id = %notification.id, status = %resp.status(), "transient push provider failure");
                HandlerOutcome::TransientFailure(format!("provider returned {}", resp.status()))
            }
            Ok(resp) => {
                warn!(notification_id = %notification.id, status = %resp.status(), "permanent push provider failure");
                HandlerOutcome::PermanentFailure(format!("provider returned {}", resp.status()))
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!(notification_id = %notification.id, error = %e, "transient push provider failure");
                HandlerOutcome::TransientFailure(e.to_string())
            }
            Err(e) => {
                warn!(notification_id = %notification.id, error = %e, "push provider request failed");
                HandlerOutcome::TransientFailure(e.to_string())
            }
        }
    }
}
