//! The ingestion façade: `submit`/`submit_bulk`. This is the one synchronous
//! path through the pipeline: validate, dedup, rate-limit, render, persist,
//! publish, in that order, with the order itself load-bearing (dedup before
//! rate-limit so a duplicate never burns quota).

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::config::NotificationsConfig;
use crate::notification::idempotency::IdempotencyGate;
use crate::notification::model::{
    Notification, NotificationChannel, NotificationStatus, Priority, TemplateVariables,
};
use crate::notification::queue::QueuePublisher;
use crate::notification::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::notification::template_renderer::TemplateRenderer;
use crate::repository::{NotificationStore, TemplateRepository, UserRepository};
use crate::{Error, Result};

/// A single submission. Exactly one of `template_name` or `content` must be
/// set; `template_variables` is only consulted when a template is used.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    pub priority: Priority,
    pub template_name: Option<String>,
    pub template_variables: TemplateVariables,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub event_id: Option<String>,
    pub max_retries: Option<i32>,
}

impl SubmitRequest {
    pub fn literal(
        user_id: Uuid,
        channel: NotificationChannel,
        subject: Option<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            channel,
            priority: Priority::default(),
            template_name: None,
            template_variables: TemplateVariables::new(),
            subject,
            content: Some(content.into()),
            event_id: None,
            max_retries: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Receipt {
    pub id: Uuid,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkFailure {
    pub user_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct BulkResult {
    pub total_requested: usize,
    pub success_count: usize,
    pub failed_count: usize,
    pub notification_ids: Vec<Uuid>,
    pub failures: Vec<BulkFailure>,
}

/// Composes the `IdempotencyGate`, `RateLimiter`, `TemplateRenderer`,
/// `NotificationStore`, and `QueuePublisher` into the public submit
/// operation. Holds no per-request state; safe to share behind an `Arc` and
/// call concurrently from many HTTP handler tasks.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserRepository>,
    templates: Arc<dyn TemplateRepository>,
    idempotency: Arc<IdempotencyGate>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<QueuePublisher>,
    config: NotificationsConfig,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserRepository>,
        templates: Arc<dyn TemplateRepository>,
        idempotency: Arc<IdempotencyGate>,
        rate_limiter: Arc<RateLimiter>,
        queue: Arc<QueuePublisher>,
        config: NotificationsConfig,
    ) -> Self {
        Self {
            store,
            users,
            templates,
            idempotency,
            rate_limiter,
            queue,
            config,
        }
    }

    /// Validate, dedup, rate-limit, render, persist, and publish in order.
    /// Returns a receipt on acceptance; every failure kind maps to a distinct
    /// `Error` variant so the HTTP layer can surface the right status code
    /// without re-deriving it.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Receipt> {
        self.users
            .find_by_id(request.user_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("user {} not found", request.user_id)))?;

        let has_template = request
            .template_name
            .as_deref()
            .is_some_and(|s| !s.is_empty());
        let has_literal = request.content.as_deref().is_some_and(|s| !s.is_empty());
        if has_template == has_literal {
            return Err(Error::validation(
                "exactly one of template_name or content must be provided",
            ));
        }

        if let Some(event_id) = request.event_id.as_deref().filter(|s| !s.is_empty()) {
            if !self.idempotency.check_and_set(event_id).await {
                return Err(Error::DuplicateEvent);
            }
        }

        match self
            .rate_limiter
            .admit(&request.user_id.to_string(), request.channel)
            .await
        {
            RateLimitDecision::Admit => {}
            RateLimitDecision::Reject { retry_after_secs } => {
                return Err(Error::RateLimited { retry_after_secs });
            }
        }

        let (subject, content) = if has_template {
            let name = request.template_name.as_deref().unwrap();
            let template = self
                .templates
                .find_by_name(name)
                .await?
                .ok_or_else(|| Error::not_found(format!("template '{}' not found or inactive", name)))?;

            if template.channel != request.channel {
                return Err(Error::validation(format!(
                    "template '{}' is scoped to channel {}, not {}",
                    name, template.channel, request.channel
                )));
            }

            let subject = template
                .subject
                .as_ref()
                .map(|s| TemplateRenderer::render(s, &request.template_variables));
            let content = TemplateRenderer::render(&template.content, &request.template_variables);
            (subject, content)
        } else {
            (request.subject.clone(), request.content.clone().unwrap_or_default())
        };

        if content.is_empty() {
            return Err(Error::validation("rendered notification content must be non-empty"));
        }

        let now = Utc::now();
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: request.user_id,
            channel: request.channel,
            status: NotificationStatus::Pending,
            priority: request.priority,
            subject,
            content,
            template_name: request.template_name.clone(),
            template_variables: template_variables_to_json(&request.template_variables),
            event_id: request.event_id.clone(),
            retry_count: 0,
            max_retries: request
                .max_retries
                .unwrap_or(self.config.retry.max_attempts_default),
            next_retry_at: None,
            error_message: None,
            version: 0,
            created_at: now,
            updated_at: now,
            sent_at: None,
            delivered_at: None,
            read_at: None,
        };

        let inserted = self.store.insert(&notification).await?;

        let partitions = self.config.partitions_for(inserted.channel);
        if let Err(e) = self.queue.publish(&inserted.id, inserted.channel, partitions).await {
            warn!(
                notification_id = %inserted.id,
                error = %e,
                "publish failed after commit; the retry sweeper will pick this row up via find_ready_for_retry"
            );
        }

        Ok(Receipt {
            id: inserted.id,
            status: inserted.status,
            created_at: inserted.created_at,
        })
    }

    /// Bulk variant: one `submit` per user id, failures isolated per user so
    /// one bad id never aborts the rest of the batch.
    pub async fn submit_bulk(&self, user_ids: &[Uuid], template: SubmitRequest) -> BulkResult {
        let mut result = BulkResult {
            total_requested: user_ids.len(),
            ..Default::default()
        };

        for &user_id in user_ids {
            let mut request = template.clone();
            request.user_id = user_id;
            // event_id dedup is caller-scoped; fanning the same event_id out
            // to N users would dedupe against each other, which is never the
            // intent of a bulk send.
            request.event_id = None;

            match self.submit(request).await {
                Ok(receipt) => {
                    result.success_count += 1;
                    result.notification_ids.push(receipt.id);
                }
                Err(e) => {
                    result.failed_count += 1;
                    result.failures.push(BulkFailure {
                        user_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        result
    }
}

fn template_variables_to_json(vars: &TemplateVariables) -> serde_json::Value {
    serde_json::to_value(vars).unwrap_or_else(|_| serde_json::json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::model::{Template, User};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct InMemoryStore {
        rows: Mutex<HashMap<Uuid, Notification>>,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl NotificationStore for InMemoryStore {
        async fn insert(&self, notification: &Notification) -> Result<Notification> {
            let mut rows = self.rows.lock().unwrap();
            rows.insert(notification.id, notification.clone());
            Ok(notification.clone())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
            Ok(self.rows.lock().unwrap().get(&id).cloned())
        }

        async fn update(&self, notification: &Notification) -> Result<Option<Notification>> {
            let mut rows = self.rows.lock().unwrap();
            let existing = rows.get(&notification.id).cloned();
            match existing {
                Some(current) if current.version == notification.version => {
                    let mut updated = notification.clone();
                    updated.version += 1;
                    rows.insert(updated.id, updated.clone());
                    Ok(Some(updated))
                }
                Some(_) => Ok(None),
                None => Ok(None),
            }
        }

        async fn list_for_user(
            &self,
            user_id: Uuid,
            _status: Option<NotificationStatus>,
            _offset: i64,
            _limit: i64,
        ) -> Result<Vec<Notification>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .filter(|n| n.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn find_ready_for_retry(&self, _now: DateTime<Utc>, _limit: i64) -> Result<Vec<Notification>> {
            Ok(vec![])
        }

        async fn find_stuck_processing(&self, _older_than: DateTime<Utc>, _limit: i64) -> Result<Vec<Notification>> {
            Ok(vec![])
        }
    }

    struct InMemoryUsers {
        users: HashMap<Uuid, User>,
    }

    #[async_trait]
    impl UserRepository for InMemoryUsers {
        async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
            Ok(self.users.get(&id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
            Ok(self.users.values().find(|u| u.email.as_deref() == Some(email)).cloned())
        }

        async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
            Ok(self.users.values().find(|u| u.phone.as_deref() == Some(phone)).cloned())
        }

        async fn create(&self, user: &User) -> Result<User> {
            Ok(user.clone())
        }

        async fn is_channel_enabled(&self, _user_id: Uuid, _channel: NotificationChannel) -> Result<bool> {
            Ok(true)
        }

        async fn set_preference(
            &self,
            _user_id: Uuid,
            _channel: NotificationChannel,
            _enabled: bool,
        ) -> Result<crate::notification::model::UserPreference> {
            unreachable!("not exercised by these tests")
        }

        async fn list_preferences(&self, _user_id: Uuid) -> Result<Vec<crate::notification::model::UserPreference>> {
            Ok(vec![])
        }
    }

    struct InMemoryTemplates {
        templates: HashMap<String, Template>,
    }

    #[async_trait]
    impl TemplateRepository for InMemoryTemplates {
        async fn find_by_name(&self, name: &str) -> Result<Option<Template>> {
            Ok(self.templates.get(name).cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Template>> {
            Ok(self.templates.values().find(|t| t.id == id).cloned())
        }

        async fn create(&self, template: &Template) -> Result<Template> {
            Ok(template.clone())
        }

        async fn list_active(&self, _channel: Option<NotificationChannel>) -> Result<Vec<Template>> {
            Ok(self.templates.values().cloned().collect())
        }

        async fn update(&self, _id: Uuid, _subject: Option<String>, _content: String) -> Result<Option<Template>> {
            unreachable!("not exercised by these tests")
        }

        async fn deactivate(&self, _id: Uuid) -> Result<Option<Template>> {
            unreachable!("not exercised by these tests")
        }
    }

    fn sample_user(id: Uuid) -> User {
        let now = Utc::now();
        User {
            id,
            email: Some("ada@example.com".to_string()),
            phone: None,
            device_token: None,
            created_at: now,
            updated_at: now,
        }
    }

    async fn redis_queue_and_limiter() -> Option<(Arc<RateLimiter>, Arc<IdempotencyGate>, Arc<QueuePublisher>)> {
        use crate::cache::RedisConfig;
        let pool = crate::cache::RedisPool::new(RedisConfig::development()).await.ok()?;
        let limiter = Arc::new(RateLimiter::new(pool.clone(), crate::config::RateLimitSettings::default()));
        let idem = Arc::new(IdempotencyGate::new(pool.clone(), 86400));
        let queue = Arc::new(QueuePublisher::new(pool));
        Some((limiter, idem, queue))
    }

    #[tokio::test]
    async fn test_submit_literal_content_happy_path() {
        let Some((limiter, idem, queue)) = redis_queue_and_limiter().await else {
            return;
        };

        let user_id = Uuid::new_v4();
        let mut users = HashMap::new();
        users.insert(user_id, sample_user(user_id));

        let service = NotificationService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryUsers { users }),
            Arc::new(InMemoryTemplates {
                templates: HashMap::new(),
            }),
            idem,
            limiter,
            queue,
            NotificationsConfig::default(),
        );

        let request = SubmitRequest::literal(user_id, NotificationChannel::Email, Some("Hi".into()), "Hello");
        let receipt = service.submit(request).await.unwrap();
        assert_eq!(receipt.status, NotificationStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_user() {
        let Some((limiter, idem, queue)) = redis_queue_and_limiter().await else {
            return;
        };

        let service = NotificationService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryUsers { users: HashMap::new() }),
            Arc::new(InMemoryTemplates {
                templates: HashMap::new(),
            }),
            idem,
            limiter,
            queue,
            NotificationsConfig::default(),
        );

        let request = SubmitRequest::literal(Uuid::new_v4(), NotificationChannel::Email, None, "Hello");
        let err = service.submit(request).await.unwrap_err();
        assert_eq!(err.status_code(), 404);
    }

    #[tokio::test]
    async fn test_submit_requires_exactly_one_content_source() {
        let Some((limiter, idem, queue)) = redis_queue_and_limiter().await else {
            return;
        };

        let user_id = Uuid::new_v4();
        let mut users = HashMap::new();
        users.insert(user_id, sample_user(user_id));

        let service = NotificationService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryUsers { users }),
            Arc::new(InMemoryTemplates {
                templates: HashMap::new(),
            }),
            idem,
            limiter,
            queue,
            NotificationsConfig::default(),
        );

        let mut request = SubmitRequest::literal(user_id, NotificationChannel::Email, None, "Hello");
        request.template_name = Some("welcome".to_string());
        let err = service.submit(request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_duplicate_event_id_rejected_without_creating_second_row() {
        let Some((limiter, idem, queue)) = redis_queue_and_limiter().await else {
            return;
        };

        let user_id = Uuid::new_v4();
        let mut users = HashMap::new();
        users.insert(user_id, sample_user(user_id));
        let store = Arc::new(InMemoryStore::new());

        let service = NotificationService::new(
            store.clone(),
            Arc::new(InMemoryUsers { users }),
            Arc::new(InMemoryTemplates {
                templates: HashMap::new(),
            }),
            idem,
            limiter,
            queue,
            NotificationsConfig::default(),
        );

        let event_id = format!("evt-{}", Uuid::new_v4());
        let mut request = SubmitRequest::literal(user_id, NotificationChannel::Email, None, "Hello");
        request.event_id = Some(event_id.clone());

        let first = service.submit(request.clone()).await.unwrap();
        let second = service.submit(request).await.unwrap_err();

        assert!(matches!(second, Error::DuplicateEvent));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert!(store.rows.lock().unwrap().contains_key(&first.id));
    }

    #[tokio::test]
    async fn test_bulk_submit_isolates_per_user_failures() {
        let Some((limiter, idem, queue)) = redis_queue_and_limiter().await else {
            return;
        };

        let good_user = Uuid::new_v4();
        let bad_user = Uuid::new_v4();
        let mut users = HashMap::new();
        users.insert(good_user, sample_user(good_user));

        let service = NotificationService::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(InMemoryUsers { users }),
            Arc::new(InMemoryTemplates {
                templates: HashMap::new(),
            }),
            idem,
            limiter,
            queue,
            NotificationsConfig::default(),
        );

        let template = SubmitRequest::literal(Uuid::nil(), NotificationChannel::InApp, None, "Hello");
        let result = service.submit_bulk(&[good_user, bad_user], template).await;

        assert_eq!(result.total_requested, 2);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failed_count, 1);
        assert_eq!(result.failures[0].user_id, bad_user);
    }
}
