//! Chat completion endpoint

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;

use super::{ApiError, ApiState};
use crate::turn::ChatMessage;

/// Build chat router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", post(complete)).with_state(state)
}

/// Complete a conversation
///
/// Body: `{ "messages": [{ "role", "content" }, ...] }`. Answers with the
/// reply as `text/plain`.
async fn complete(State(state): State<Arc<ApiState>>, body: Bytes) -> Result<Response, ApiError> {
    let request: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "chat request is not JSON");
        ApiError::Internal("Internal server error")
    })?;

    let messages = request
        .get("messages")
        .filter(|m| m.as_array().is_some_and(|a| !a.is_empty()))
        .ok_or(ApiError::BadRequest("Messages are required"))?;
    let messages: Vec<ChatMessage> = serde_json::from_value(messages.clone())
        .map_err(|_| ApiError::BadRequest("Messages are required"))?;

    let chat = state.chat.as_ref().ok_or_else(|| {
        tracing::error!("chat requested but no chat service is configured");
        ApiError::Internal("Internal server error")
    })?;

    tracing::debug!(messages = messages.len(), "chat request");
    let reply = chat.complete(&messages).await.map_err(|e| {
        tracing::error!(error = %e, "chat completion failed");
        ApiError::Internal("Internal server error")
    })?;

    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], reply).into_response())
}
