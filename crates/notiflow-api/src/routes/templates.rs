//! `/templates` routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use notiflow_core::notification::model::{NotificationChannel, Template};
use notiflow_core::Error;

use crate::routes::{error_response, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/templates", post(create).get(list))
        .route("/templates/:id", get(get_by_id).put(update).delete(deactivate))
        .route("/templates/name/:name", get(get_by_name))
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateBody {
    pub name: String,
    pub channel: NotificationChannel,
    pub subject: Option<String>,
    pub content: String,
}

pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<CreateTemplateBody>,
) -> (StatusCode, Json<ApiResponse<Template>>) {
    let template = Template {
        id: Uuid::new_v4(),
        name: body.name,
        channel: body.channel,
        subject: body.subject,
        content: body.content,
        active: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };

    match state.templates.create(&template).await {
        Ok(created) => (StatusCode::CREATED, Json(ApiResponse::ok(created))),
        Err(e) => with_status(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub channel: Option<NotificationChannel>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<ApiResponse<Vec<Template>>>) {
    match state.templates.list_active(query.channel).await {
        Ok(templates) => (StatusCode::OK, Json(ApiResponse::ok(templates))),
        Err(e) => with_status(e),
    }
}

pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<Template>>) {
    match state.templates.find_by_id(id).await {
        Ok(Some(template)) => (StatusCode::OK, Json(ApiResponse::ok(template))),
        Ok(None) => with_status(Error::not_found(format!("template {} not found", id))),
        Err(e) => with_status(e),
    }
}

pub async fn get_by_name(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> (StatusCode, Json<ApiResponse<Template>>) {
    match state.templates.find_by_name(&name).await {
        Ok(Some(template)) => (StatusCode::OK, Json(ApiResponse::ok(template))),
        Ok(None) => with_status(Error::not_found(format!("template {} not found", name))),
        Err(e) => with_status(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTemplateBody {
    pub subject: Option<String>,
    pub content: String,
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTemplateBody>,
) -> (StatusCode, Json<ApiResponse<Template>>) {
    match state.templates.update(id, body.subject, body.content).await {
        Ok(Some(template)) => (StatusCode::OK, Json(ApiResponse::ok(template))),
        Ok(None) => with_status(Error::not_found(format!("template {} not found", id))),
        Err(e) => with_status(e),
    }
}

pub async fn deactivate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<Template>>) {
    match state.templates.deactivate(id).await {
        Ok(Some(template)) => (StatusCode::OK, Json(ApiResponse::ok(template))),
        Ok(None) => with_status(Error::not_found(format!("template {} not found", id))),
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
