//! Notification store: durable persistence with optimistic concurrency.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::notification::model::{Notification, NotificationStatus};
use crate::Result;

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> Result<Notification>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>>;

    /// Persist `notification` conditioned on its own `version` matching the
    /// stored row, then bump the version. Returns `Ok(None)` on version
    /// mismatch (another worker updated the row first) rather than erroring,
    /// so callers can re-read and decide how to proceed.
    async fn update(&self, notification: &Notification) -> Result<Option<Notification>>;

    async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<NotificationStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>>;

    /// Rows whose `next_retry_at` has elapsed: the sweeper's replay phase.
    async fn find_ready_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;

    /// Rows stuck in PROCESSING past the staleness threshold: a worker died
    /// mid-delivery. The sweeper's reclaim phase.
    async fn find_stuck_processing(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>>;
}

pub struct PostgresNotificationStore {
    pool: PgPool,
}

impl PostgresNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PostgresNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<Notification> {
        let row = sqlx::query_as::<_, Notification>(
            r#"
            INSERT INTO notifications (
                id, user_id, channel, status, priority, subject, content,
                template_name, template_variables, event_id, retry_count,
                max_retries, next_retry_at, error_message, version,
                created_at, updated_at, sent_at, delivered_at, read_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            RETURNING *
            "#,
        )
        .bind(notification.id)
        .bind(notification.user_id)
        .bind(notification.channel)
        .bind(notification.status)
        .bind(notification.priority)
        .bind(&notification.subject)
        .bind(&notification.content)
        .bind(&notification.template_name)
        .bind(&notification.template_variables)
        .bind(&notification.event_id)
        .bind(notification.retry_count)
        .bind(notification.max_retries)
        .bind(notification.next_retry_at)
        .bind(&notification.error_message)
        .bind(notification.version)
        .bind(notification.created_at)
        .bind(notification.updated_at)
        .bind(notification.sent_at)
        .bind(notification.delivered_at)
        .bind(notification.read_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>("SELECT * FROM notifications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn update(&self, notification: &Notification) -> Result<Option<Notification>> {
        let row = sqlx::query_as::<_, Notification>(
            r#"
            UPDATE notifications
            SET status = $1,
                subject = $2,
                content = $3,
                retry_count = $4,
                next_retry_at = $5,
                error_message = $6,
                version = version + 1,
                updated_at = $7,
                sent_at = $8,
                delivered_at = $9,
                read_at = $10
            WHERE id = $11 AND version = $12
            RETURNING *
            "#,
        )
        .bind(notification.status)
        .bind(&notification.subject)
        .bind(&notification.content)
        .bind(notification.retry_count)
        .bind(notification.next_retry_at)
        .bind(&notification.error_message)
        .bind(notification.updated_at)
        .bind(notification.sent_at)
        .bind(notification.delivered_at)
        .bind(notification.read_at)
        .bind(notification.id)
        .bind(notification.version)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        status: Option<NotificationStatus>,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<Notification>> {
        let rows = match status {
            Some(status) => {
                sqlx::query_as::<_, Notification>(
                    r#"
                    SELECT * FROM notifications
                    WHERE user_id = $1 AND status = $2
                    ORDER BY created_at DESC
                    OFFSET $3 LIMIT $4
                    "#,
                )
                .bind(user_id)
                .bind(status)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Notification>(
                    r#"
                    SELECT * FROM notifications
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(user_id)
                .bind(offset)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows)
    }

    async fn find_ready_for_retry(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE status = 'PENDING' AND (next_retry_at IS NULL OR next_retry_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn find_stuck_processing(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Notification>> {
        let rows = sqlx::query_as::<_, Notification>(
            r#"
            SELECT * FROM notifications
            WHERE status = 'PROCESSING' AND updated_at <= $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    async fn pool() -> Option<PgPool> {
        crate::db::create_pool(&DatabaseConfig::default()).await.ok()
    }

    #[tokio::test]
    async fn test_insert_and_find_roundtrip() {
        if let Some(pool) = pool().await {
            let store = PostgresNotificationStore::new(pool);
            let now = Utc::now();
            let notification = Notification {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                channel: crate::notification::model::NotificationChannel::InApp,
                status: NotificationStatus::Pending,
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

            let inserted = store.insert(&notification).await.unwrap();
            let found = store.find_by_id(inserted.id).await.unwrap();
            assert!(found.is_some());
        }
    }
}
