use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use notiflow_core::cache::RedisPool;
use notiflow_core::db::create_pool;
use notiflow_core::db::migrate::auto_migrate;
use notiflow_core::notification::handlers::{EmailHandler, EmailHandlerConfig, InAppHandler, PushHandler, PushProviderConfig, SmsHandler, SmsProviderConfig};
use notiflow_core::notification::{
    ChannelDispatcher, ConsumerPool, IdempotencyGate, NotificationChannel, NotificationService, QueuePublisher,
    RateLimiter, RetrySweeper,
};
use notiflow_core::repository::{
    NotificationStore, PostgresNotificationStore, PostgresTemplateRepository, PostgresUserRepository,
    TemplateRepository, UserRepository,
};
use notiflow_core::{Config, Error, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::routes::create_router;
use crate::state::AppState;

pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("invalid host: {}", e)))?,
        config.server.port,
    ));

    let shutdown = CancellationToken::new();
    let (app_state, workers) = create_app_state(&config, shutdown.clone()).await?;

    let app = create_router(app_state);

    info!("notiflow API listening on http://{}", addr);
    log_routes();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Infrastructure(format!("failed to bind {}: {}", addr, e)))?;

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await
        .map_err(|e| Error::Infrastructure(e.to_string()))?;

    shutdown.cancel();
    let timeout = Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
    if tokio::time::timeout(timeout, wait_for(workers)).await.is_err() {
        warn!("background workers did not shut down within the graceful shutdown window");
    }

    Ok(())
}

async fn wait_for(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let _ = handle.await;
    }
}

/// Build the full dependency graph: Postgres pool + migrations, repositories,
/// the optional Redis-backed cache primitives, the channel dispatcher, the
/// ingestion façade, and one `ConsumerPool` per channel plus the sweeper.
/// Returns the state the router needs plus the join handles of every
/// background task, so the caller can wait on them during shutdown.
async fn create_app_state(
    config: &Config,
    shutdown: CancellationToken,
) -> Result<(AppState, Vec<JoinHandle<()>>)> {
    info!("connecting to PostgreSQL...");
    let db = create_pool(&config.database).await?;
    auto_migrate(&db).await?;

    let store: Arc<dyn NotificationStore> = Arc::new(PostgresNotificationStore::new(db.clone()));
    let users: Arc<dyn UserRepository> = Arc::new(PostgresUserRepository::new(db.clone()));
    let templates: Arc<dyn TemplateRepository> = Arc::new(PostgresTemplateRepository::new(db.clone()));

    let redis = init_redis(config).await;
    let redis_pool = redis.clone().ok_or_else(|| {
        Error::Infrastructure("cache is required for idempotency, rate limiting, and queueing".to_string())
    })?;

    let idempotency = Arc::new(IdempotencyGate::new(redis_pool.clone(), config.notifications.dedup.ttl_seconds));
    let rate_limiter = Arc::new(RateLimiter::new(redis_pool.clone(), config.notifications.rate_limit.clone()));
    let queue = Arc::new(QueuePublisher::new(redis_pool));

    let dispatcher = Arc::new(build_dispatcher());

    let service = Arc::new(NotificationService::new(
        store.clone(),
        users.clone(),
        templates.clone(),
        idempotency,
        rate_limiter,
        queue.clone(),
        config.notifications.clone(),
    ));

    let mut workers = Vec::new();
    for channel in [
        NotificationChannel::Email,
        NotificationChannel::Sms,
        NotificationChannel::Push,
        NotificationChannel::InApp,
    ] {
        let pool = Arc::new(ConsumerPool::new(
            channel,
            store.clone(),
            users.clone(),
            dispatcher.clone(),
            queue.clone(),
            &config.notifications,
            shutdown.clone(),
        ));
        workers.extend(pool.spawn());
    }

    let notifications_config = config.notifications.clone();
    let partitions_for = Arc::new(move |channel: NotificationChannel| notifications_config.partitions_for(channel));
    let sweeper = Arc::new(RetrySweeper::new(
        store.clone(),
        queue,
        config.notifications.sweeper.clone(),
        partitions_for,
        shutdown.clone(),
    ));
    workers.push(sweeper.spawn());

    let state = AppState::new(service, store, users, templates, dispatcher, db, redis, shutdown);

    Ok((state, workers))
}

/// Register a handler for every channel. Sms and Push fall back to a
/// logging stub when no provider credentials are configured in the
/// environment; Email requires a reachable SMTP relay since it has no stub.
fn build_dispatcher() -> ChannelDispatcher {
    let mut dispatcher = ChannelDispatcher::new();

    match email_config_from_env() {
        Some(config) => match EmailHandler::new(config) {
            Ok(handler) => dispatcher.register(Arc::new(handler)),
            Err(e) => warn!("email handler not configured: {}", e),
        },
        None => warn!("SMTP_HOST not set; email channel has no registered handler"),
    }

    match sms_config_from_env() {
        Some(config) => dispatcher.register(Arc::new(SmsHandler::new(config))),
        None => dispatcher.register(Arc::new(SmsHandler::logging_stub())),
    }

    match push_config_from_env() {
        Some(config) => dispatcher.register(Arc::new(PushHandler::new(config))),
        None => dispatcher.register(Arc::new(PushHandler::logging_stub())),
    }

    dispatcher.register(Arc::new(InAppHandler));

    dispatcher
}

fn email_config_from_env() -> Option<EmailHandlerConfig> {
    let smtp_host = std::env::var("SMTP_HOST").ok()?;
    Some(EmailHandlerConfig {
        smtp_host,
        smtp_port: std::env::var("SMTP_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(587),
        smtp_username: std::env::var("SMTP_USERNAME").unwrap_or_default(),
        smtp_password: std::env::var("SMTP_PASSWORD").unwrap_or_default(),
        use_tls: std::env::var("SMTP_USE_TLS").map(|v| v != "false").unwrap_or(true),
        from_name: std::env::var("SMTP_FROM_NAME").unwrap_or_else(|_| "notiflow".to_string()),
        from_email: std::env::var("SMTP_FROM_EMAIL").unwrap_or_else(|_| "no-reply@notiflow.local".to_string()),
    })
}

fn sms_config_from_env() -> Option<SmsProviderConfig> {
    Some(SmsProviderConfig {
        account_sid: std::env::var("SMS_ACCOUNT_SID").ok()?,
        auth_token: std::env::var("SMS_AUTH_TOKEN").unwrap_or_default(),
        from_number: std::env::var("SMS_FROM_NUMBER").unwrap_or_default(),
        api_base_url: std::env::var("SMS_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.twilio.com".to_string()),
    })
}

fn push_config_from_env() -> Option<PushProviderConfig> {
    Some(PushProviderConfig {
        api_key: std::env::var("PUSH_API_KEY").ok()?,
        api_base_url: std::env::var("PUSH_API_BASE_URL")
            .unwrap_or_else(|_| "https://fcm.googleapis.com".to_string()),
    })
}

fn log_routes() {
    info!("available routes:");
    info!("  GET  /health                           - liveness");
    info!("  GET  /health/detailed                  - dependency health");
    info!("  POST /api/v1/notifications             - submit a notification");
    info!("  POST /api/v1/notifications/bulk        - submit to many users");
    info!("  GET  /api/v1/notifications/:id         - fetch by id");
    info!("  GET  /api/v1/notifications/user/:id    - list for a user");
    info!("  POST /api/v1/templates                 - create a template");
    info!("  GET  /api/v1/templates                 - list active templates");
    info!("  GET  /api/v1/templates/:id             - fetch by id");
    info!("  GET  /api/v1/templates/name/:name      - fetch by name");
    info!("  PUT  /api/v1/templates/:id             - update subject/content");
    info!("  DELETE /api/v1/templates/:id           - deactivate");
    info!("  GET  /api/v1/users/:id                 - fetch by id");
    info!("  GET  /api/v1/users?email=|phone=       - lookup by contact point");
}

async fn init_redis(config: &Config) -> Option<RedisPool> {
    let redis_config = config.cache.redis.clone();
    match RedisPool::new(redis_config).await {
        Ok(pool) => {
            info!("Redis connected successfully");
            Some(pool)
        }
        Err(e) => {
            warn!("failed to connect to Redis: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_empty_handles_returns_immediately() {
        wait_for(Vec::new()).await;
    }
}
