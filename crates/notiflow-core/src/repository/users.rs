//! User and per-user channel preference persistence.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::notification::model::{NotificationChannel, User, UserPreference};
use crate::Result;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>>;

    async fn create(&self, user: &User) -> Result<User>;

    /// Whether `channel` is enabled for `user_id`. Defaults to `true` when no
    /// preference row exists: opt-out, not opt-in.
    async fn is_channel_enabled(&self, user_id: Uuid, channel: NotificationChannel) -> Result<bool>;

    async fn set_preference(&self, user_id: Uuid, channel: NotificationChannel, enabled: bool) -> Result<UserPreference>;

    async fn list_preferences(&self, user_id: Uuid) -> Result<Vec<UserPreference>>;
}

pub struct PostgresUserRepository {
    pool: PgPool,
}

impl PostgresUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn create(&self, user: &User) -> Result<User> {
        let row = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, phone, device_token, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.device_token)
        .bind(user.created_at)
        .bind(user.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn is_channel_enabled(&self, user_id: Uuid, channel: NotificationChannel) -> Result<bool> {
        let row = sqlx::query_as::<_, UserPreference>(
            "SELECT * FROM user_preferences WHERE user_id = $1 AND channel = $2",
        )
        .bind(user_id)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|p| p.enabled).unwrap_or(true))
    }

    async fn set_preference(&self, user_id: Uuid, channel: NotificationChannel, enabled: bool) -> Result<UserPreference> {
        let row = sqlx::query_as::<_, UserPreference>(
            r#"
            INSERT INTO user_preferences (id, user_id, channel, enabled, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, channel)
            DO UPDATE SET enabled = EXCLUDED.enabled, updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(channel)
        .bind(enabled)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_preferences(&self, user_id: Uuid) -> Result<Vec<UserPreference>> {
        let rows = sqlx::query_as::<_, UserPreference>(
            "SELECT * FROM user_preferences WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
