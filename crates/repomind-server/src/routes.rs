// SPDX-License-Identifier: Apache-2.0

//! Route handlers.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use repomind_core::analytics::{classify_device, get_analytics_data, get_total_queries, track_event};
use repomind_core::{AppState, Assistant, EventMetadata, EventType, Subject, Visitor};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{Span, info, instrument, warn};
use uuid::Uuid;

use crate::card::{Badge, render_stats_card};
use crate::error::ApiError;

/// Shared handler state.
pub type SharedState = Arc<AppState>;

/// Header carrying a client-chosen visitor id.
pub const VISITOR_ID_HEADER: &str = "x-visitor-id";

/// Response header correlating a chat answer with server logs.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Country headers set by common edge proxies, in priority order.
const COUNTRY_HEADERS: &[&str] = &["x-vercel-ip-country", "cf-ipcountry"];

/// Builds the API router.
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/badge", get(badge))
        .route("/api/stats", get(stats))
        .route("/api/stats/card", get(stats_card))
        .route("/api/track", post(track))
        .route("/api/chat", post(chat))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Visitor identification
// ---------------------------------------------------------------------------

/// Visitor identity and attributes derived from request headers.
#[derive(Debug, Clone)]
pub struct RequestVisitor(pub Visitor);

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Client address: first `x-forwarded-for` hop, else the socket peer.
fn client_address(parts: &Parts) -> String {
    if let Some(forwarded) = header_str(&parts.headers, "x-forwarded-for")
        && let Some(first) = forwarded.split(',').next()
    {
        return first.trim().to_string();
    }
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

/// Stable anonymous id: SHA-256 of address and user agent, hex-encoded.
#[must_use]
pub fn anonymous_visitor_id(address: &str, user_agent: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(address.as_bytes());
    hasher.update(b"|");
    hasher.update(user_agent.as_bytes());
    hex::encode(hasher.finalize())
}

impl<S: Send + Sync> FromRequestParts<S> for RequestVisitor {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = header_str(&parts.headers, "user-agent").map(str::to_string);
        let id = header_str(&parts.headers, VISITOR_ID_HEADER).map_or_else(
            || anonymous_visitor_id(&client_address(parts), user_agent.as_deref().unwrap_or("")),
            str::to_string,
        );
        let country = COUNTRY_HEADERS
            .iter()
            .find_map(|name| header_str(&parts.headers, name))
            .map(str::to_uppercase);
        let device = user_agent.as_deref().map(|ua| classify_device(ua).to_string());

        Ok(Self(Visitor {
            id,
            metadata: EventMetadata {
                country,
                device,
                user_agent,
            },
        }))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CacheHealth {
    provider: Option<&'static str>,
    reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct AiHealth {
    provider: Option<String>,
    model: Option<String>,
    healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    cache: CacheHealth,
    ai: AiHealth,
}

async fn health(State(state): State<SharedState>) -> Response {
    let cache = match state.cache() {
        Ok(cache) => CacheHealth {
            provider: Some(cache.name()),
            reachable: cache.ping().await,
            error: None,
        },
        Err(e) => CacheHealth {
            provider: None,
            reachable: false,
            error: Some(e.to_string()),
        },
    };
    let ai = match state.ai() {
        Ok(ai) => AiHealth {
            provider: Some(ai.name().to_string()),
            model: Some(ai.model().to_string()),
            healthy: ai.health_check().await,
            error: None,
        },
        Err(e) => AiHealth {
            provider: None,
            model: None,
            healthy: false,
            error: Some(e.to_string()),
        },
    };

    let ok = cache.reachable && ai.healthy;
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if ok { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        cache,
        ai,
    };
    (code, Json(body)).into_response()
}

async fn badge(State(state): State<SharedState>) -> Response {
    let total = match state.cache() {
        Ok(cache) => get_total_queries(cache.as_ref()).await,
        Err(e) => {
            warn!(error = %e, "Cache unavailable for badge");
            0
        }
    };
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=300"))],
        Json(Badge::queries(total)),
    )
        .into_response()
}

async fn stats(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let cache = state.cache()?;
    let snapshot = get_analytics_data(cache.as_ref()).await;
    Ok(Json(snapshot).into_response())
}

async fn stats_card(State(state): State<SharedState>) -> Result<Response, ApiError> {
    let cache = state.cache()?;
    let snapshot = get_analytics_data(cache.as_ref()).await;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("image/svg+xml")),
            (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=600")),
        ],
        render_stats_card(&snapshot),
    )
        .into_response())
}

/// Query parameters for `/api/track`.
#[derive(Debug, Default, Deserialize)]
pub struct TrackParams {
    /// `visit` (default) or `query`.
    #[serde(default)]
    pub event: Option<String>,
}

#[instrument(skip_all)]
async fn track(
    State(state): State<SharedState>,
    Query(params): Query<TrackParams>,
    RequestVisitor(visitor): RequestVisitor,
) -> Response {
    let event = match params.event.as_deref() {
        None => EventType::Visit,
        Some(raw) => match raw.parse::<EventType>() {
            Ok(event) => event,
            Err(e) => return ApiError::bad_request(e).into_response(),
        },
    };

    match state.cache() {
        Ok(cache) => track_event(cache.as_ref(), &visitor.id, event, &visitor.metadata).await,
        Err(e) => warn!(error = %e, "Cache unavailable, event dropped"),
    }
    StatusCode::NO_CONTENT.into_response()
}

/// Body for `/api/chat`.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// `owner/repo` or a username.
    pub subject: String,
    /// The question.
    pub question: String,
}

#[instrument(skip_all, fields(subject = %request.subject, request_id = tracing::field::Empty))]
async fn chat(
    State(state): State<SharedState>,
    RequestVisitor(visitor): RequestVisitor,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();
    Span::current().record("request_id", tracing::field::display(request_id));

    let question = request.question.trim();
    if question.is_empty() {
        return Err(ApiError::bad_request("Question must not be empty"));
    }
    let subject = Subject::parse(&request.subject).map_err(|e| ApiError::bad_request(e.to_string()))?;

    let assistant = Assistant::from_state(&state)?;
    let stream = assistant
        .answer_stream(&subject, question, Some(&visitor))
        .await?;
    info!("Streaming answer");

    let body = stream.map(|chunk| {
        Ok::<_, Infallible>(match chunk {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Answer stream failed");
                format!("\n\n[RepoMind could not finish this answer: {e}]")
            }
        })
    });

    let mut response = (
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8")),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        Body::from_stream(body),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    Ok(response)
}
