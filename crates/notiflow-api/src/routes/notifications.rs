//! `/notifications` routes: the ingestion façade's HTTP surface.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use notiflow_core::notification::model::{NotificationStatus, Priority, TemplateVariables};
use notiflow_core::notification::{NotificationChannel, Receipt, SubmitRequest};
use notiflow_core::Error;

use crate::routes::{error_response, ApiResponse};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/notifications", post(submit))
        .route("/notifications/bulk", post(submit_bulk))
        .route("/notifications/:id", get(get_notification))
        .route("/notifications/user/:user_id", get(list_for_user))
}

#[derive(Debug, Deserialize)]
pub struct SubmitBody {
    pub user_id: Uuid,
    pub channel: NotificationChannel,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_variables: TemplateVariables,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub event_id: Option<String>,
    pub max_retries: Option<i32>,
}

impl From<SubmitBody> for SubmitRequest {
    fn from(body: SubmitBody) -> Self {
        SubmitRequest {
            user_id: body.user_id,
            channel: body.channel,
            priority: body.priority.unwrap_or_default(),
            template_name: body.template_name,
            template_variables: body.template_variables,
            subject: body.subject,
            content: body.content,
            event_id: body.event_id,
            max_retries: body.max_retries,
        }
    }
}

pub async fn submit(
    State(state): State<AppState>,
    Json(body): Json<SubmitBody>,
) -> (StatusCode, HeaderMap, Json<ApiResponse<Receipt>>) {
    match state.service.submit(body.into()).await {
        Ok(receipt) => (StatusCode::CREATED, HeaderMap::new(), Json(ApiResponse::ok(receipt))),
        Err(Error::DuplicateEvent) => (
            StatusCode::OK,
            HeaderMap::new(),
            Json(ApiResponse::err("DUPLICATE_EVENT")),
        ),
        Err(e @ Error::RateLimited { retry_after_secs }) => {
            let mut headers = HeaderMap::new();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                headers.insert("Retry-After", value);
            }
            let (status, body) = error_response(&e);
            (status, headers, body)
        }
        Err(e) => {
            let (status, body) = error_response(&e);
            (status, HeaderMap::new(), body)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitBulkBody {
    pub user_ids: Vec<Uuid>,
    pub channel: NotificationChannel,
    #[serde(default)]
    pub priority: Option<Priority>,
    pub template_name: Option<String>,
    #[serde(default)]
    pub template_variables: TemplateVariables,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub max_retries: Option<i32>,
}

pub async fn submit_bulk(
    State(state): State<AppState>,
    Json(body): Json<SubmitBulkBody>,
) -> Json<ApiResponse<notiflow_core::notification::BulkResult>> {
    let template = SubmitRequest {
        user_id: Uuid::nil(),
        channel: body.channel,
        priority: body.priority.unwrap_or_default(),
        template_name: body.template_name,
        template_variables: body.template_variables,
        subject: body.subject,
        content: body.content,
        event_id: None,
        max_retries: body.max_retries,
    };

    let result = state.service.submit_bulk(&body.user_ids, template).await;
    Json(ApiResponse::ok(result))
}

pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<notiflow_core::notification::model::Notification>>) {
    match state.store.find_by_id(id).await {
        Ok(Some(notification)) => (StatusCode::OK, Json(ApiResponse::ok(notification))),
        Ok(None) => {
            let (status, body) = error_response(&Error::not_found(format!("notification {} not found", id)));
            (status, Json(ApiResponse { success: body.success, message: body.message, data: None, timestamp: body.timestamp }))
        }
        Err(e) => {
            let (status, body) = error_response(&e);
            (status, Json(ApiResponse { success: body.success, message: body.message, data: None, timestamp: body.timestamp }))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_size")]
    pub size: i64,
    pub status: Option<String>,
}

fn default_page() -> i64 {
    1
}

fn default_size() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct NotificationPage {
    pub items: Vec<notiflow_core::notification::model::Notification>,
    pub page: i64,
    pub size: i64,
}

pub async fn list_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> (StatusCode, Json<ApiResponse<NotificationPage>>) {
    let status = match query.status.as_deref() {
        Some(s) => match s.parse::<NotificationStatus>() {
            Ok(status) => Some(status),
            Err(e) => {
                let (status_code, body) = error_response(&e);
                return (
                    status_code,
                    Json(ApiResponse { success: body.success, message: body.message, data: None, timestamp: body.timestamp }),
                );
            }
        },
        None => None,
    };

    let page = query.page.max(1);
    let size = query.size.clamp(1, 200);
    let offset = (page - 1) * size;

    match state.store.list_for_user(user_id, status, offset, size).await {
        Ok(items) => (
            StatusCode::OK,
            Json(ApiResponse::ok(NotificationPage { items, page, size })),
        ),
        Err(e) => {
            let (status_code, body) = error_response(&e);
            (
                status_code,
                Json(ApiResponse { success: body.success, message: body.message, data: None, timestamp: body.timestamp }),
            )
        }
    }
}
