//! Text-to-speech endpoints

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use super::{ApiError, ApiState};
use crate::speech::{Availability, SpeechBackendState, VoiceDescriptor};

/// Build TTS router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/", post(synthesize))
        .route("/voices", get(voices))
        .route("/status", get(status))
        .with_state(state)
}

/// Synthesis request
#[derive(Debug, Deserialize)]
pub struct SynthesizeRequest {
    #[serde(default)]
    pub text: String,
    pub voice: Option<String>,
}

/// Synthesize text to speech
///
/// Returns audio in MP3 format
async fn synthesize(State(state): State<Arc<ApiState>>, body: Bytes) -> Result<Response, ApiError> {
    let request: SynthesizeRequest = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "tts request is not JSON");
        ApiError::Internal("Internal server error")
    })?;

    if request.text.trim().is_empty() {
        return Err(ApiError::BadRequest("Text is required"));
    }

    let tts = state
        .tts
        .as_ref()
        .ok_or(ApiError::NotConfigured("Text-to-speech is not configured"))?;

    tracing::debug!(
        voice = request.voice.as_deref().unwrap_or("default"),
        chars = request.text.len(),
        "tts request"
    );

    let clip = tts
        .synthesize(&request.text, request.voice.as_deref())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "speech synthesis failed");
            ApiError::Internal("Speech synthesis failed")
        })?
        .ok_or(ApiError::Internal("Speech synthesis failed"))?;

    Ok(([(header::CONTENT_TYPE, clip.content_type)], clip.data).into_response())
}

/// List voices of the configured TTS
async fn voices(State(state): State<Arc<ApiState>>) -> Result<Json<Vec<VoiceDescriptor>>, ApiError> {
    let tts = state
        .tts
        .as_ref()
        .ok_or(ApiError::NotConfigured("Text-to-speech is not configured"))?;

    let voices = tts.voices().await.map_err(|e| {
        tracing::error!(error = %e, "voice listing failed");
        ApiError::Internal("Failed to list voices")
    })?;

    Ok(Json(voices))
}

/// Neural voice status
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    /// `loading`, `available`, `degraded` (usable best-effort) or `unavailable`
    pub status: &'static str,
    #[serde(flatten)]
    pub state: SpeechBackendState,
    pub voices: Vec<VoiceDescriptor>,
}

/// Report whether the neural voice came up
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let status = match state.backend.availability().await {
        None => "loading",
        Some(Availability::Ready { .. }) => "available",
        Some(Availability::Degraded {
            backend_loaded: true,
            ..
        }) => "degraded",
        Some(Availability::Degraded {
            backend_loaded: false,
            ..
        }) => "unavailable",
    };

    Json(StatusResponse {
        status,
        state: state.backend.state().await,
        voices: state.backend.voices().await,
    })
}
