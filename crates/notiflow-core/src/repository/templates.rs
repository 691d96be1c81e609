//! Named, channel-scoped notification templates.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::notification::model::{NotificationChannel, Template};
use crate::Result;

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<Template>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Template>>;

    async fn create(&self, template: &Template) -> Result<Template>;

    async fn list_active(&self, channel: Option<NotificationChannel>) -> Result<Vec<Template>>;

    /// Update subject/content in place. `Ok(None)` if no such template exists.
    async fn update(&self, id: Uuid, subject: Option<String>, content: String) -> Result<Option<Template>>;

    /// Soft-deactivate: flips `active` to false rather than deleting the row,
    /// so notifications already referencing this template by name keep their
    /// historical content readable.
    async fn deactivate(&self, id: Uuid) -> Result<Option<Template>>;
}

pub struct PostgresTemplateRepository {
    pool: PgPool,
}

impl PostgresTemplateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TemplateRepository for PostgresTemplateRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE name = $1 AND active = true")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row)
    }

    async fn create(&self, template: &Template) -> Result<Template> {
        let row = sqlx::query_as::<_, Template>(
            r#"
            INSERT INTO templates (id, name, channel, subject, content, active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(template.channel)
        .bind(&template.subject)
        .bind(&template.content)
        .bind(template.active)
        .bind(template.created_at)
        .bind(template.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn list_active(&self, channel: Option<NotificationChannel>) -> Result<Vec<Template>> {
        let rows = match channel {
            Some(channel) => {
                sqlx::query_as::<_, Template>(
                    "SELECT * FROM templates WHERE active = true AND channel = $1 ORDER BY name",
                )
                .bind(channel)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Template>("SELECT * FROM templates WHERE active = true ORDER BY name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows)
    }

    async fn update(&self, id: Uuid, subject: Option<String>, content: String) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>(
            r#"
            UPDATE templates
            SET subject = $1, content = $2, updated_at = NOW()
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(subject)
        .bind(content)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn deactivate(&self, id: Uuid) -> Result<Option<Template>> {
        let row = sqlx::query_as::<_, Template>(
            r#"
            UPDATE templates
            SET active = false, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }
}
