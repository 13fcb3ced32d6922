//! Privacy tests for credentials in logs.
//!
//! Neither access tokens nor the signing secret may appear in log output,
//! even at TRACE level. Tokens travel in the `/ws` query string, so request
//! spans are captured along with events.
//!
//! # Test Approach
//!
//! 1. Use a custom tracing subscriber Layer to capture events and span fields
//! 2. Exercise token issuance and admission through the router
//! 3. Verify that the token and secret do NOT appear in captured logs

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use tower::ServiceExt;
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use chorus_server::auth::TokenService;
use chorus_server::config::{Config, OriginPolicy};
use chorus_server::routes::{create_router, AppState};

const SECRET: &str = "privacy-test-secret-value";

// ============================================================================
// Log Capture Infrastructure
// ============================================================================

/// A buffer for capturing log output during tests.
#[derive(Clone, Default)]
struct LogCapture {
    logs: Arc<Mutex<Vec<String>>>,
}

impl LogCapture {
    fn get_logs(&self) -> String {
        self.logs.lock().unwrap().join("\n")
    }

    fn push(&self, line: String) {
        self.logs.lock().unwrap().push(line);
    }
}

/// A tracing Layer that records every event and every new span's fields.
struct CaptureLayer {
    capture: LogCapture,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        attrs.record(&mut visitor);
        self.capture.push(format!(
            "span {}: {}",
            attrs.metadata().name(),
            visitor.into_string()
        ));
    }

    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = StringVisitor::default();
        event.record(&mut visitor);
        self.capture.push(format!(
            "[{}] {}: {}",
            event.metadata().level(),
            event.metadata().target(),
            visitor.into_string()
        ));
    }
}

/// A visitor that collects all fields into a string.
#[derive(Default)]
struct StringVisitor {
    parts: Vec<String>,
}

impl StringVisitor {
    fn into_string(self) -> String {
        self.parts.join(" ")
    }
}

impl tracing::field::Visit for StringVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.parts.push(format!("{}={:?}", field.name(), value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.parts.push(format!("{}={}", field.name(), value));
    }
}

/// Runs an async test body with a TRACE-level capturing subscriber.
///
/// Relies on the current-thread runtime of `#[tokio::test]` so that spawned
/// tasks log through the same thread-local subscriber.
async fn with_log_capture_async<F, Fut>(test_fn: F) -> String
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let capture = LogCapture::default();
    let layer = CaptureLayer {
        capture: capture.clone(),
    };

    let subscriber = tracing_subscriber::registry()
        .with(layer.with_filter(tracing_subscriber::filter::LevelFilter::TRACE));

    let _guard = tracing::subscriber::set_default(subscriber);
    test_fn().await;

    capture.get_logs()
}

// ============================================================================
// Privacy Assertion Helpers
// ============================================================================

fn assert_not_in_logs(logs: &str, value: &str, value_name: &str, context: &str) {
    assert!(
        !logs.contains(value),
        "{value_name} found in logs during {context}!\nValue: {value}\nLogs:\n{logs}"
    );
}

/// JWTs always start with "eyJ" because the header starts with `{"`.
fn assert_no_jwt_in_logs(logs: &str, context: &str) {
    assert!(
        !logs.contains("eyJ"),
        "JWT prefix 'eyJ' found in logs during {context}!\nLogs:\n{logs}"
    );
}

fn test_config() -> Config {
    let mut config = Config::with_secret(SECRET);
    config.allowed_origins = OriginPolicy::allow_list(["https://chat.example.com"]);
    config
}

async fn send(app: &axum::Router, request: Request<Body>) -> StatusCode {
    app.clone().oneshot(request).await.unwrap().status()
}

fn ws_request(token: &str, origin: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(format!("/ws?token={token}"));
    if let Some(origin) = origin {
        builder = builder.header("Origin", origin);
    }
    builder.body(Body::empty()).unwrap()
}

// ============================================================================
// Test Cases
// ============================================================================

#[tokio::test]
async fn issued_token_is_not_logged() {
    let slot = Arc::new(Mutex::new(String::new()));
    let issued_slot = slot.clone();

    let logs = with_log_capture_async(move || async move {
        let state = AppState::new(test_config());
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/token")
                    .header("Content-Type", "application/json")
                    .body(Body::from(r#"{"user_id":"alice"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        *issued_slot.lock().unwrap() = json["token"].as_str().unwrap().to_string();
    })
    .await;
    let issued = slot.lock().unwrap().clone();

    assert!(!issued.is_empty());
    assert!(logs.contains("alice"), "issuance should be logged:\n{logs}");
    assert_not_in_logs(&logs, &issued, "Access token", "issuance");
    assert_not_in_logs(&logs, SECRET, "Signing secret", "issuance");
    assert_no_jwt_in_logs(&logs, "issuance");
}

#[tokio::test]
async fn rejected_tokens_are_not_logged() {
    let forged = TokenService::new("attacker-secret").issue("mallory").unwrap();
    let expired = TokenService::new(SECRET)
        .issue_at("carol", Utc::now() - Duration::days(2))
        .unwrap();
    let garbage = "eyJnot.a.realtoken";
    let presented = vec![forged.clone(), expired.clone(), garbage.to_string()];

    let logs = with_log_capture_async(move || async move {
        let app = create_router(AppState::new(test_config()));

        for token in &presented {
            assert_eq!(
                send(&app, ws_request(token, None)).await,
                StatusCode::UNAUTHORIZED
            );
        }
    })
    .await;

    assert!(!logs.is_empty(), "rejections should be logged");
    assert_not_in_logs(&logs, &forged, "Forged token", "rejection");
    assert_not_in_logs(&logs, &expired, "Expired token", "rejection");
    assert_not_in_logs(&logs, SECRET, "Signing secret", "rejection");
    assert_no_jwt_in_logs(&logs, "rejection");
}

#[tokio::test]
async fn valid_token_is_not_logged_on_admission_paths() {
    let token = TokenService::new(SECRET).issue("alice").unwrap();
    let presented = token.clone();

    let logs = with_log_capture_async(move || async move {
        let app = create_router(AppState::new(test_config()));

        // Origin rejection after a successful token check.
        assert_eq!(
            send(&app, ws_request(&presented, Some("https://evil.example.com"))).await,
            StatusCode::FORBIDDEN
        );
        // Upgrade rejection after both checks pass.
        assert!(send(&app, ws_request(&presented, Some("https://chat.example.com")))
            .await
            .is_client_error());
    })
    .await;

    assert!(logs.contains("/ws"), "request spans should be captured:\n{logs}");
    assert_not_in_logs(&logs, &token, "Access token", "admission");
    assert_no_jwt_in_logs(&logs, "admission");
}

#[tokio::test]
async fn debug_output_does_not_leak_secret() {
    let logs = with_log_capture_async(|| async {
        let state = AppState::new(test_config());
        tracing::info!(state = ?state, "state snapshot");
        tracing::info!(config = ?state.config, "config snapshot");
    })
    .await;

    assert!(logs.contains("AppState"));
    assert_not_in_logs(&logs, SECRET, "Signing secret", "debug formatting");
}
