//! HTTP route handlers for the Chorus server.
//!
//! This module provides the HTTP API endpoints:
//!
//! - `POST /token` - Issue an access token for a user identity
//! - `GET /ws` - Authenticated WebSocket admission into the broadcast hub
//! - `GET /health` - Health check endpoint
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - Configuration (origin policy, queue capacity, frame limit)
//! - The token service built from the configured secret
//! - A handle to the hub coordinator
//! - Server start time for uptime reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use chorus_server::routes::{create_router, AppState};
//! use chorus_server::config::Config;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("failed to load config");
//!     let state = AppState::new(config);
//!     let app = create_router(state);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{
        rejection::QueryRejection, ws::rejection::WebSocketUpgradeRejection, Query, State,
        WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, debug_span, error, info, warn, Span};

use crate::auth::{AuthError, TokenService};
use crate::config::{Config, OriginPolicy};
use crate::hub::{Client, Hub};
use crate::pump;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
///
/// Cloned for each request handler; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<Config>,

    /// Issues and validates access tokens.
    pub tokens: Arc<TokenService>,

    /// Handle to the hub coordinator.
    pub hub: Hub,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state and spawns a hub coordinator.
    ///
    /// The coordinator runs until the last clone of this state (and every
    /// pump holding a hub handle) is dropped. Must be called from within a
    /// tokio runtime.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (hub, _task) = Hub::spawn();
        Self::with_hub(config, hub)
    }

    /// Creates application state around an existing hub.
    ///
    /// Useful for tests that need to inspect the registry.
    #[must_use]
    pub fn with_hub(config: Config, hub: Hub) -> Self {
        let tokens = TokenService::new(config.secret_key.as_bytes());
        Self {
            config: Arc::new(config),
            tokens: Arc::new(tokens),
            hub,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("tokens", &self.tokens)
            .field("hub", &self.hub)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router with all routes configured.
///
/// # Returns
///
/// An axum `Router` with the following routes:
/// - `POST /token` - Token issuance endpoint
/// - `GET /ws` - WebSocket admission endpoint
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .route("/token", post(post_token).layer(cors))
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}

/// Request span recording the path only. The query string carries the
/// access token and must never reach the logs.
fn request_span(request: &Request<Body>) -> Span {
    debug_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

/// Builds the CORS policy for browser calls to `POST /token`.
fn cors_layer(policy: &OriginPolicy) -> CorsLayer {
    let allow_origin = if policy.allows_any() {
        AllowOrigin::any()
    } else {
        let policy = policy.clone();
        AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            origin.to_str().is_ok_and(|o| policy.is_allowed(o))
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

// ============================================================================
// Error Response Types
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

fn error_response(status: StatusCode, error: impl Into<String>, code: &str) -> Response {
    (status, Json(ErrorResponse::new(error).with_code(code))).into_response()
}

// ============================================================================
// POST /token - Token Issuance
// ============================================================================

/// Request body for token issuance.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Identity the token is issued for.
    pub user_id: String,
}

/// Response body for token issuance.
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The signed access token.
    pub token: String,
}

/// POST /token - Issue an access token.
///
/// # Request Body
///
/// `{ "user_id": "<string>" }`
///
/// # Responses
///
/// - `200 OK` - `{ "token": "<jwt>" }`
/// - `400 Bad Request` - Malformed body, empty `user_id`, or signing failure
async fn post_token(State(state): State<AppState>, body: Bytes) -> Response {
    let request: TokenRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "Failed to parse token request");
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {err}"),
                "invalid_body",
            );
        }
    };

    match state.tokens.issue(&request.user_id) {
        Ok(token) => {
            info!(user_id = %request.user_id, "Issued access token");
            (StatusCode::OK, Json(TokenResponse { token })).into_response()
        }
        Err(err) => {
            warn!(user_id = %request.user_id, error = %err, "Token issuance failed");
            error_response(StatusCode::BAD_REQUEST, err.to_string(), err.code())
        }
    }
}

// ============================================================================
// GET /ws - WebSocket Admission
// ============================================================================

/// Query parameters for WebSocket admission.
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    /// Access token issued by `POST /token`.
    pub token: Option<String>,
}

/// GET /ws - Authenticate and join the broadcast hub.
///
/// # Admission
///
/// 1. The `token` query parameter must validate (`401` otherwise)
/// 2. A browser `Origin` header must be on the allow-list (`403` otherwise)
/// 3. The connection is upgraded and registered under the token's subject
///
/// # WebSocket Protocol
///
/// Every text or binary message a client sends is delivered unchanged to all
/// connected clients, the sender included.
///
/// # Responses
///
/// - `101 Switching Protocols` - Admitted
/// - `401 Unauthorized` - Missing, malformed, expired, or forged token
/// - `403 Forbidden` - Origin not allowed
async fn get_ws(
    State(state): State<AppState>,
    query: Result<Query<WsQueryParams>, QueryRejection>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Query(params) = match query {
        Ok(query) => query,
        Err(rejection) => {
            debug!(error = %rejection, "Unparseable WebSocket query string");
            return error_response(
                StatusCode::UNAUTHORIZED,
                "malformed token query",
                AuthError::Malformed.code(),
            );
        }
    };

    let token = match params.token.as_deref() {
        Some(token) if !token.is_empty() => token,
        _ => {
            debug!("Missing or empty token in WebSocket request");
            return error_response(StatusCode::UNAUTHORIZED, "missing token", "missing_token");
        }
    };

    let identity = match state.tokens.validate(token) {
        Ok(identity) => identity,
        Err(err) => {
            debug!(error = %err, "Rejected WebSocket admission");
            return unauthorized(&err);
        }
    };

    if let Some(origin) = headers.get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .is_ok_and(|o| state.config.allowed_origins.is_allowed(o));
        if !allowed {
            warn!(user_id = %identity, origin = ?origin, "Origin not allowed");
            return error_response(
                StatusCode::FORBIDDEN,
                "origin not allowed",
                "origin_not_allowed",
            );
        }
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(user_id = %identity, error = %rejection, "WebSocket upgrade failed");
            return rejection.into_response();
        }
    };

    info!(user_id = %identity, "WebSocket client admitted");

    let hub = state.hub.clone();
    let queue_capacity = state.config.client_queue_capacity;
    ws.max_message_size(state.config.max_frame_bytes)
        .on_upgrade(move |socket| async move {
            let (client, outbound) = Client::new(identity, queue_capacity);
            let key = client.key().clone();
            if let Err(err) = hub.register(client).await {
                error!(client = %key, error = %err, "Failed to register client");
                return;
            }
            pump::run(socket, key, outbound, hub).await;
        })
}

/// Maps a validation failure to a `401` response.
fn unauthorized(err: &AuthError) -> Response {
    error_response(StatusCode::UNAUTHORIZED, err.to_string(), err.code())
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status ("ok" while the hub is running).
    pub status: String,

    /// Number of registered clients.
    pub connections: usize,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,
}

/// GET /health - Health check endpoint.
///
/// No authentication required. Returns `503` if the hub has stopped.
async fn get_health(State(state): State<AppState>) -> Response {
    let uptime = state.start_time.elapsed();

    match state.hub.client_count().await {
        Ok(connections) => Json(HealthResponse {
            status: "ok".to_string(),
            connections,
            uptime_seconds: uptime.as_secs(),
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "Health check found hub stopped");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unavailable".to_string(),
                    connections: 0,
                    uptime_seconds: uptime.as_secs(),
                }),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
