//! Database pool construction

pub mod migrate;

use crate::config::DatabaseConfig;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Build a Postgres connection pool from configuration.
pub async fn create_pool(config: &DatabaseConfig) -> crate::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .connect(&config.url())
        .await?;

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_unreachable_host_fails() {
        let mut config = DatabaseConfig::default();
        config.host = "invalid.notiflow.test".to_string();
        let result = create_pool(&config).await;
        assert!(result.is_err());
    }
}
