//! In-app notifications. The row itself, once persisted, is the delivery —
//! there's no external system to call, so `send` always succeeds.

use crate::notification::dispatcher::{ChannelHandler, HandlerOutcome};
use crate::notification::model::{Notification, NotificationChannel, User};
use async_trait::async_trait;

pub struct InAppHandler;

#[async_trait]
impl ChannelHandler for InAppHandler {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::InApp
    }

    fn can_handle(&self, _notification: &Notification, _user: &User) -> bool {
        true
    }

    async fn send(&self, _notification: &Notification, _user: &User) -> HandlerOutcome {
        HandlerOutcome::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_always_succeeds() {
        let handler = InAppHandler;
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: None,
            phone: None,
            device_token: None,
            created_at: now,
            updated_at: now,
        };
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: user.id,
            channel: NotificationChannel::InApp,
            status: crate::notification::model::NotificationStatus::Processing,
            priority: crate::notification::model::Priority::Medium,
            subject: None,
            content: "hi".to_string(),
            template_name: None,
            template_variables: serde_json::json!({}),
            event_id: None,
            retry_count: 0,
            max_retries: 3,
            next_retry_at: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
        };

        assert!(handler.can_handle(&notification, &user));
        matches!(handler.send(&notification, &user).await, HandlerOutcome::Success);
    }
}
