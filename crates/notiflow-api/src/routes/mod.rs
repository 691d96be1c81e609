//! Route modules and the shared `{success, message, data, timestamp}`
//! response envelope, used consistently across every handler in this crate
//! rather than ad hoc per route.

pub mod health;
pub mod notifications;
pub mod templates;
pub mod users;

use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;

use notiflow_core::Error;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            timestamp: Utc::now(),
        }
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: None,
            timestamp: Utc::now(),
        }
    }
}

/// Maps a `notiflow_core::Error` to its HTTP status and envelope body. Plain
/// function rather than `impl IntoResponse for Error` since neither the trait
/// nor the type is local to this crate (orphan rule); every handler matches
/// on `Result` and calls this instead of duplicating the status mapping.
pub fn error_response(err: &Error) -> (StatusCode, Json<ApiResponse<()>>) {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ApiResponse::err(err.to_string())))
}

use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Assemble the full router: liveness/readiness at the root, everything else
/// nested under `/api/v1`.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::liveness))
        .route("/health/detailed", get(health::detailed))
        .nest("/api/v1", api_v1_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .merge(notifications::router())
        .merge(templates::router())
        .merge(users::router())
}
