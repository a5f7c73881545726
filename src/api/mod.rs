//! HTTP gateway for browser clients
//!
//! Serves chat completion, neural TTS and a narrow fetch proxy so a web
//! front end never holds the API key itself.

pub mod chat;
pub mod health;
pub mod proxy;
pub mod tts;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::{ChatService, OpenAiChat};
use crate::config::Config;
use crate::speech::{DegradedPolicy, OpenAiSpeech, PrimarySpeech, SpeechBackend};
use crate::Result;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    /// Absent when no API key is configured; `/api/chat` then answers 500
    pub chat: Option<Arc<dyn ChatService>>,
    /// Absent when no API key is configured; `/api/tts` then answers 503
    pub tts: Option<Arc<dyn PrimarySpeech>>,
    /// Neural voice slot reported by `/api/tts/status`
    pub backend: Arc<SpeechBackend>,
    pub proxy_hosts: Vec<String>,
    pub http: reqwest::Client,
}

impl ApiState {
    #[must_use]
    pub fn new(
        chat: Option<Arc<dyn ChatService>>,
        tts: Option<Arc<dyn PrimarySpeech>>,
        proxy_hosts: Vec<String>,
    ) -> Self {
        Self {
            chat,
            tts,
            backend: Arc::new(SpeechBackend::new(DegradedPolicy::default())),
            proxy_hosts,
            http: reqwest::Client::new(),
        }
    }

    /// Report on `backend` instead of a slot that never initializes
    #[must_use]
    pub fn with_backend(mut self, backend: Arc<SpeechBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Wire chat and TTS from configuration
    ///
    /// Services needing a missing API key are left out rather than failing.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let api_key = config.chat.api_key.clone().unwrap_or_default();

        let chat: Option<Arc<dyn ChatService>> =
            match OpenAiChat::new(api_key.clone(), config.chat.model.clone()) {
                Ok(chat) => Some(Arc::new(
                    chat.with_api_url(&config.chat.api_url)
                        .with_system_prompt(config.chat.system_prompt.clone()),
                )),
                Err(e) => {
                    tracing::warn!(error = %e, "chat endpoint disabled");
                    None
                }
            };

        let tts: Option<Arc<dyn PrimarySpeech>> = match OpenAiSpeech::with_model(
            api_key,
            config.speech.voice.clone(),
            config.speech.speed,
            config.speech.tts_model.clone(),
        ) {
            Ok(tts) => Some(Arc::new(tts.with_base_url(&config.speech.tts_url))),
            Err(e) => {
                tracing::warn!(error = %e, "tts endpoint disabled");
                None
            }
        };

        Self::new(chat, tts, config.api_server.proxy_hosts.clone()).with_backend(Arc::new(
            SpeechBackend::new(config.speech.degraded_policy),
        ))
    }
}

/// Build the router with all routes
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/chat", chat::router(state.clone()))
        .nest("/api/tts", tts::router(state.clone()))
        .nest("/api/proxy", proxy::router(state))
        .merge(health::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(
            port = self.port,
            chat = self.state.chat.is_some(),
            tts = self.state.tts.is_some(),
            "API server listening"
        );

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// Handler errors, rendered as `{"error": "..."}`
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Forbidden(&'static str),
    NotConfigured(&'static str),
    Internal(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct ErrorResponse {
            error: &'static str,
        }

        let (status, error) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            Self::NotConfigured(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ErrorResponse { error })).into_response()
    }
}
