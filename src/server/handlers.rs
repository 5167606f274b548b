//! HTTP request handlers

use super::types::{ErrorResponse, HealthResponse};
use super::ws::upgrade;
use super::AppState;
use crate::chat::ChatRequest;
use crate::errors::{ApiError, ErrorCode, ErrorKind};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;

/// Create the proxy router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(chat))
        .route("/ws", get(upgrade))
        .with_state(state)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let Json(req) = payload?;
    if req.messages.is_empty() {
        return Err(AppError::BadRequest("messages are required".to_string()));
    }
    let body = state.upstream.complete(&req.messages).await?;
    Ok(Json(body))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    Upstream(ApiError),
}

/// Malformed bodies get the same JSON error shape as every other failure
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<ApiError> for AppError {
    fn from(err: ApiError) -> Self {
        AppError::Upstream(err)
    }
}

/// Status the proxy answers with for an upstream failure
fn upstream_status(err: &ApiError) -> StatusCode {
    match (err.kind(), err.code()) {
        (ErrorKind::Timeout, _) => StatusCode::GATEWAY_TIMEOUT,
        (_, ErrorCode::NetworkError | ErrorCode::InvalidResponse) => StatusCode::BAD_GATEWAY,
        _ => err
            .status()
            .and_then(|status| StatusCode::from_u16(status).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(msg))).into_response()
            }
            AppError::Upstream(err) => {
                let status = upstream_status(&err);
                // Round up so clients never retry early
                let retry_after = err
                    .retry_after()
                    .map(|d| d.as_secs() + u64::from(d.subsec_nanos() > 0));
                let body = Json(ErrorResponse {
                    error: err.message().to_string(),
                    retry_after,
                });
                let mut response = (status, body).into_response();
                if let Some(seconds) = retry_after {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
                }
                response
            }
        }
    }
}
