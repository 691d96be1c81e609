use std::sync::Arc;

use notiflow_core::cache::RedisPool;
use notiflow_core::notification::{ChannelDispatcher, NotificationService};
use notiflow_core::repository::{NotificationStore, TemplateRepository, UserRepository};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Shared application state: the ingestion façade plus direct repository
/// handles for the read-oriented routes (get/list), the dispatcher handle
/// kept alongside it, and the shutdown signal consumer pools/the sweeper
/// watch.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<NotificationService>,
    pub store: Arc<dyn NotificationStore>,
    pub users: Arc<dyn UserRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub dispatcher: Arc<ChannelDispatcher>,
    pub db: PgPool,
    pub redis: Option<RedisPool>,
    pub shutdown: CancellationToken,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        service: Arc<NotificationService>,
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserRepository>,
        templates: Arc<dyn TemplateRepository>,
        dispatcher: Arc<ChannelDispatcher>,
        db: PgPool,
        redis: Option<RedisPool>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            service,
            store,
            users,
            templates,
            dispatcher,
            db,
            redis,
            shutdown,
        }
    }
}
