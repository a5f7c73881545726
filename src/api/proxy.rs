//! Fetch proxy for voice model assets
//!
//! Only hosts on the configured allowlist (and their subdomains) are fetched.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use url::Url;

use super::{ApiError, ApiState};

/// Build proxy router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new().route("/", get(fetch)).with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    pub url: Option<String>,
}

/// Whether `host` is an allowed domain or one of its subdomains
#[must_use]
pub fn host_allowed(host: &str, allowed: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    allowed.iter().any(|domain| {
        let domain = domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{domain}"))
    })
}

async fn fetch(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<ProxyQuery>,
) -> Result<Response, ApiError> {
    let raw = query
        .url
        .filter(|u| !u.is_empty())
        .ok_or(ApiError::BadRequest("Missing url parameter"))?;
    let target = Url::parse(&raw).map_err(|_| ApiError::BadRequest("Invalid url parameter"))?;

    let allowed = matches!(target.scheme(), "http" | "https")
        && target
            .host_str()
            .is_some_and(|host| host_allowed(host, &state.proxy_hosts));
    if !allowed {
        tracing::warn!(url = %target, "proxy target rejected");
        return Err(ApiError::Forbidden("Domain not allowed"));
    }

    tracing::debug!(url = %target, "proxying request");
    let upstream = state.http.get(target).send().await.map_err(|e| {
        tracing::error!(error = %e, "proxy fetch failed");
        ApiError::Internal("Failed to proxy request")
    })?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();
    let body = upstream.bytes().await.map_err(|e| {
        tracing::error!(error = %e, "proxy body read failed");
        ApiError::Internal("Failed to proxy request")
    })?;

    Ok((status, [(header::CONTENT_TYPE, content_type)], body).into_response())
}
