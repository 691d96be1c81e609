//! `/users` routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use notiflow_core::notification::model::User;
use notiflow_core::Error;

use crate::routes::{error_response, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/:id", get(get_by_id))
        .route("/users", get(lookup))
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<User>>) {
    match state.users.find_by_id(id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(ApiResponse::ok(user))),
        Ok(None) => with_status(Error::not_found(format!("user {} not found", id))),
        Err(e) => with_status(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// Lookup by exactly one of `email` or `phone`; neither or both supplied is a
/// validation error rather than an arbitrary pick.
pub async fn lookup(
    State(state): State<AppState>,
    Query(query): Query<LookupQuery>,
) -> (StatusCode, Json<ApiResponse<User>>) {
    let result = match (query.email, query.phone) {
        (Some(email), None) => state.users.find_by_email(&email).await,
        (None, Some(phone)) => state.users.find_by_phone(&phone).await,
        _ => {
            return with_status(Error::validation(
                "provide exactly one of email or phone",
            ))
        }
    };

    match result {
        Ok(Some(user)) => (StatusCode::OK, Json(ApiResponse::ok(user))),
        Ok(None) => with_status(Error::not_found("no matching user")),
        Err(e) => with_status(e),
    }
}

fn with_status<T>(err: Error) -> (StatusCode, Json<ApiResponse<T>>) {
    let (status, body) = error_response(&err);
    (
        status,
        Json(ApiResponse {
            success: body.success,
            message: body.message,
            data: None,
            timestamp: body.timestamp,
        }),
    )
}
