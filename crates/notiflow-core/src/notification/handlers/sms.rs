//! SMS delivery via a thin HTTP provider client, shaped after Twilio's REST
//! API. Defaults to a logging stub so the pipeline runs without provider
//! credentials configured.

use crate::notification::dispatcher::{ChannelHandler, HandlerOutcome};
use crate::notification::model::{Notification, NotificationChannel, User};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SmsProviderConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub api_base_url: String,
}

pub struct SmsHandler {
    client: Client,
    config: Option<SmsProviderConfig>,
}

impl SmsHandler {
    /// A configured handler that actually calls the provider.
    pub fn new(config: SmsProviderConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            config: Some(config),
        }
    }

    /// A logging stub, used when no provider credentials are configured.
    pub fn logging_stub() -> Self {
        Self {
            client: Client::new(),
            config: None,
        }
    }

    fn looks_like_e164(phone: &str) -> bool {
        phone.starts_with('+') && phone.len() >= 8 && phone[1..].chars().all(|c| c.is_ascii_digit())
    }
}

#[async_trait]
impl ChannelHandler for SmsHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Sms
    }

    fn can_handle(&self, _notification: &Notification, user: &User) -> bool {
        user.phone.is_some()
    }

    async fn send(&self, notification: &Notification, user: &User) -> HandlerOutcome {
        let Some(phone) = &user.phone else {
            return HandlerOutcome::PermanentFailure("user has no phone number".to_string());
        };

        if !Self::looks_like_e164(phone) {
            return HandlerOutcome::PermanentFailure(format!("invalid phone number format: {}", phone));
        }

        let Some(config) = &self.config else {
            info!(notification_id = %notification.id, to = %phone, "sms provider not configured, logging instead of sending");
            return HandlerOutcome::Success;
        };

        let url = format!(
            "{}/Accounts/{}/Messages.json",
            config.api_base_url, config.account_sid
        );

        let response = self
            .client
            .post(&url)
            .basic_auth(&config.account_sid, Some(&config.auth_token))
            .form(&[
                ("From", config.from_number.as_str()),
                ("To", phone.as_str()),
                ("Body", notification.content.as_str()),
            ])
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                info!(notification_id = %notification.id, "sms sent");
                HandlerOutcome::Success
            }
            Ok(resp) if resp.status().as_u16() == 429 || resp.status().is_server_error() => {
                warn!(notification_id = %notification.id, status = %resp.status(), "transient sms provider failure");
                HandlerOutcome::TransientFailure(format!("provider returned {}", resp.status()))
            }
            Ok(resp) => {
                warn!(notification_id = %notification.id, status = %resp.status(), "permanent sms provider failure");
                HandlerOutcome::PermanentFailure(format!("provider returned {}", resp.status()))
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!(notification_id = %notification.id, error = %e, "transient sms provider failure");
                HandlerOutcome::TransientFailure(e.to_string())
            }
            Err(e) => {
                warn!(notification_id = %notification.id, error = %e, "sms provider request failed");
                HandlerOutcome::TransientFailure(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_e164_validation() {
        assert!(SmsHandler::looks_like_e164("+14155551234"));
        assert!(!SmsHandler::looks_like_e164("4155551234"));
        assert!(!SmsHandler::looks_like_e164("+1-415-555-1234"));
    }
}
