//! HTTP front-end.
//!
//! Translates client requests into cache operations and cache entries
//! into responses. Every proxied response carries `X-Cache-Status`
//! (`HIT` or `MISS`) and `X-Cache-Timestamp` (ISO-8601 wall-clock time
//! of the entry's fetch). The statistics endpoints are read-only views
//! over the core; `POST /cache/clear` is the only mutating endpoint.
//!
//! # Routes
//!
//! - `GET /cache/stats` — cache-side statistics
//! - `GET /queue/stats` — connection-manager statistics
//! - `POST /cache/clear` — empty the cache map (statistics survive)
//! - `GET /health` — composed status document
//! - anything else — proxied: GET through the cache, other methods
//!   forwarded upstream uncached

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::cache::CacheEntry;
use crate::upstream::ForwardRequest;
use crate::{Proxy, ProxyError};

/// Build the front-end router over a [`Proxy`].
pub fn router(proxy: Proxy) -> Router {
    Router::new()
        .route("/cache/stats", get(cache_stats))
        .route("/cache/clear", post(cache_clear))
        .route("/queue/stats", get(queue_stats))
        .route("/health", get(health))
        .fallback(proxy_request)
        .with_state(proxy)
}

async fn cache_stats(State(proxy): State<Proxy>) -> Response {
    Json(proxy.cache_stats()).into_response()
}

async fn queue_stats(State(proxy): State<Proxy>) -> Response {
    Json(proxy.queue_stats()).into_response()
}

async fn health(State(proxy): State<Proxy>) -> Response {
    Json(proxy.health()).into_response()
}

async fn cache_clear(State(proxy): State<Proxy>) -> Response {
    proxy.clear_cache();
    Json(serde_json::json!({ "success": true })).into_response()
}

/// The proxying fallback: GET through the cache, everything else
/// forwarded verbatim.
async fn proxy_request(State(proxy): State<Proxy>, request: Request) -> Response {
    let full_url = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    if request.method() == axum::http::Method::GET {
        return match proxy.get_or_fetch(&full_url).await {
            Ok((entry, from_cache)) => entry_response(&entry, from_cache),
            Err(e) => error_response(&e),
        };
    }

    forward_request(&proxy, full_url, request).await
}

async fn forward_request(proxy: &Proxy, full_url: String, request: Request) -> Response {
    let Ok(method) = reqwest::Method::from_bytes(request.method().as_str().as_bytes()) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let body = match axum::body::to_bytes(request.into_body(), MAX_FORWARD_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::PAYLOAD_TOO_LARGE.into_response(),
    };

    debug!(%full_url, %method, "forwarding non-GET request");
    let forward = ForwardRequest {
        method,
        url: full_url,
        body: if body.is_empty() { None } else { Some(body) },
        content_type,
    };
    match proxy.forward(forward).await {
        Ok(response) => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK));
            for (name, value) in &response.headers {
                builder = builder.header(name, value);
            }
            builder
                .body(Body::from(response.payload))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => error_response(&e),
    }
}

/// Upper bound on forwarded request bodies (10 MiB).
const MAX_FORWARD_BODY: usize = 10 * 1024 * 1024;

fn entry_response(entry: &CacheEntry, from_cache: bool) -> Response {
    let timestamp: DateTime<Utc> = entry.fetched_at_wall.into();
    let mut builder = Response::builder()
        .status(StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK))
        .header("x-cache-status", if from_cache { "HIT" } else { "MISS" })
        .header("x-cache-timestamp", timestamp.to_rfc3339());
    for (name, value) in &entry.headers {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from(entry.payload.clone()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Unavailable-class errors (backoff, refused connections, timeouts)
/// become 503; everything else is a 500. Either way the body names the
/// cause.
fn error_response(error: &ProxyError) -> Response {
    let status = if error.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (
        status,
        Json(serde_json::json!({ "error": error.to_string() })),
    )
        .into_response()
}
