//! Channel handler contract and the registry that resolves one per channel.

use super::model::{Notification, NotificationChannel, User};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Outcome of a single send attempt.
#[derive(Debug, Clone)]
pub enum HandlerOutcome {
    Success,
    TransientFailure(String),
    PermanentFailure(String),
}

#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel(&self) -> NotificationChannel;

    /// Whether this handler can even attempt delivery, given the user's
    /// contact points. `false` is a permanent, no-retry decline.
    fn can_handle(&self, notification: &Notification, user: &User) -> bool;

    async fn send(&self, notification: &Notification, user: &User) -> HandlerOutcome;
}

/// Maps each channel to its registered handler.
#[derive(Clone, Default)]
pub struct ChannelDispatcher {
    handlers: HashMap<NotificationChannel, Arc<dyn ChannelHandler>>,
}

impl ChannelDispatcher {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, handler: Arc<dyn ChannelHandler>) {
        self.handlers.insert(handler.channel(), handler);
    }

    pub fn handler_for(&self, channel: NotificationChannel) -> Option<Arc<dyn ChannelHandler>> {
        self.handlers.get(&channel).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    struct AlwaysSuccess;

    #[async_trait]
    impl ChannelHandler for AlwaysSuccess {
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

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: None,
            phone: None,
            device_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_dispatcher_resolves_registered_handler() {
        let mut dispatcher = ChannelDispatcher::new();
        dispatcher.register(Arc::new(AlwaysSuccess));

        let handler = dispatcher.handler_for(NotificationChannel::InApp);
        assert!(handler.is_some());

        let handler = dispatcher.handler_for(NotificationChannel::Sms);
        assert!(handler.is_none());
    }

    #[tokio::test]
    async fn test_registered_handler_sends() {
        let mut dispatcher = ChannelDispatcher::new();
        dispatcher.register(Arc::new(AlwaysSuccess));
        let handler = dispatcher.handler_for(NotificationChannel::InApp).unwrap();

        let user = sample_user();
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: user.id,
            channel: NotificationChannel::InApp,
            status: super::super::model::NotificationStatus::Processing,
            priority: super::super::model::Priority::Medium,
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
        match handler.send(&notification, &user).await {
            HandlerOutcome::Success => {}
            _ => panic!("expected success"),
        }
    }
}
