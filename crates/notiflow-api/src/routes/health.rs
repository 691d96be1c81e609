//! Liveness and per-dependency health checks.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::routes::ApiResponse;
use crate::state::AppState;

pub async fn liveness() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub healthy: bool,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DetailedHealth {
    pub store: DependencyStatus,
    /// Same Redis instance that also backs the dedup/rate-limit keys and the
    /// partitioned message log.
    pub cache: DependencyStatus,
}

pub async fn detailed(State(state): State<AppState>) -> Json<ApiResponse<DetailedHealth>> {
    let store = match sqlx::query("SELECT 1").execute(&state.db).await {
        Ok(_) => DependencyStatus {
            healthy: true,
            detail: None,
        },
        Err(e) => DependencyStatus {
            healthy: false,
            detail: Some(e.to_string()),
        },
    };

    let cache = match &state.redis {
        Some(redis) => match redis.health_check().await {
            Ok(true) => DependencyStatus {
                healthy: true,
                detail: None,
            },
            Ok(false) => DependencyStatus {
                healthy: false,
                detail: Some("not connected".to_string()),
            },
            Err(e) => DependencyStatus {
                healthy: false,
                detail: Some(e.to_string()),
            },
        },
        None => DependencyStatus {
            healthy: false,
            detail: Some("cache not configured".to_string()),
        },
    };

    Json(ApiResponse::ok(DetailedHealth { store, cache }))
}
