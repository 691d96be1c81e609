//! SMTP email delivery via `lettre`.

use crate::notification::dispatcher::{ChannelHandler, HandlerOutcome};
use crate::notification::model::{Notification, NotificationChannel, User};
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EmailHandlerConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub use_tls: bool,
    pub from_name: String,
    pub from_email: String,
}

pub struct EmailHandler {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_mailbox: Mailbox,
}

impl EmailHandler {
    pub fn new(config: EmailHandlerConfig) -> crate::Result<Self> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
                .map_err(|e| crate::Error::Config(format!("invalid smtp host: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };

        if !config.smtp_username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.clone(),
            ));
        }

        let transport = builder.port(config.smtp_port).timeout(Some(Duration::from_secs(10))).build();

        let from_mailbox: Mailbox = format!("{} <{}>", config.from_name, config.from_email)
            .parse()
            .map_err(|e| crate::Error::Config(format!("invalid from address: {}", e)))?;

        Ok(Self {
            transport,
            from_mailbox,
        })
    }

    /// 4xx SMTP replies, timeouts, and connection failures are transient;
    /// 5xx replies (hard bounce, mailbox unknown, relay refused) are
    /// permanent and must not be retried.
    fn is_retryable(error: &lettre::transport::smtp::Error) -> bool {
        if error.is_permanent() {
            return false;
        }
        error.is_transient() || error.is_timeout() || !error.is_client_error()
    }
}

#[async_trait]
impl ChannelHandler for EmailHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    fn can_handle(&self, _notification: &Notification, user: &User) -> bool {
        user.email.is_some()
    }

    async fn send(&self, notification: &Notification, user: &User) -> HandlerOutcome {
        let Some(email) = &user.email else {
            return HandlerOutcome::PermanentFailure("user has no email address".to_string());
        };

        let to_mailbox: Mailbox = match email.parse() {
            Ok(m) => m,
            Err(e) => {
                return HandlerOutcome::PermanentFailure(format!("malformed recipient address: {}", e));
            }
        };

        let subject = notification.subject.clone().unwrap_or_default();

        let message = match Message::builder()
            .from(self.from_mailbox.clone())
            .to(to_mailbox)
            .subject(subject)
            .body(notification.content.clone())
        {
            Ok(m) => m,
            Err(e) => return HandlerOutcome::PermanentFailure(format!("failed to build message: {}", e)),
        };

        match self.transport.send(message).await {
            Ok(response) => {
                info!(notification_id = %notification.id, ?response, "email sent");
                HandlerOutcome::Success
            }
            Err(e) => {
                if Self::is_retryable(&e) {
                    warn!(notification_id = %notification.id, error = %e, "transient smtp failure");
                    HandlerOutcome::TransientFailure(e.to_string())
                } else {
                    warn!(notification_id = %notification.id, error = %e, "permanent smtp failure");
                    HandlerOutcome::PermanentFailure(e.to_string())
                }
            }
        }
    }
}
