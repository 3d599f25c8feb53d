//! Request-id, bearer authentication, and per-address rate limiting.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

// ---------------------------------------------------------------------------
// Bearer authentication
// ---------------------------------------------------------------------------

/// Holds the expected API key. `disabled()` turns the check off for tests.
#[derive(Clone)]
pub struct AuthState {
    api_key: Option<Arc<String>>,
}

impl AuthState {
    #[must_use]
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: Some(Arc::new(api_key.to_owned())),
        }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self { api_key: None }
    }

    /// Constant-time comparison of a presented token against the key.
    fn token_matches(&self, presented: &str) -> bool {
        let Some(expected) = &self.api_key else {
            return true;
        };
        let expected = expected.as_bytes();
        let presented = presented.as_bytes();
        expected.len() == presented.len() && bool::from(expected.ct_eq(presented))
    }
}

/// Axum middleware enforcing `Authorization: Bearer <SCRAPER_API_KEY>`.
pub async fn require_bearer_auth(
    State(auth): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(token) if auth.token_matches(token) => next.run(req).await,
        _ if auth.api_key.is_none() => next.run(req).await,
        _ => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": { "code": "unauthorized", "message": "missing or invalid bearer token" }
            })),
        )
            .into_response(),
    }
}

// ---------------------------------------------------------------------------
// Per-address rate limiting
// ---------------------------------------------------------------------------

/// Fixed-window request counter keyed by source address.
#[derive(Clone)]
pub struct RateLimitState {
    inner: Arc<Mutex<HashMap<String, (Instant, u32)>>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimitState {
    #[must_use]
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_requests,
            window,
        }
    }

    /// Record one request for `key`; `false` means over the limit.
    fn check(&self, key: &str) -> bool {
        let mut windows = self.inner.lock().expect("rate limit lock poisoned");
        let now = Instant::now();
        let entry = windows.entry(key.to_owned()).or_insert((now, 0));

        if now.duration_since(entry.0) >= self.window {
            *entry = (now, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_requests
    }
}

/// Prefer the proxy-reported address, fall back to the socket peer.
fn client_key(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return forwarded.trim().to_owned();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "local".to_owned(), |info| info.0.ip().to_string())
}

/// Axum middleware rejecting clients over the per-address budget with 429.
pub async fn enforce_rate_limit(
    State(limiter): State<RateLimitState>,
    req: Request,
    next: Next,
) -> Response {
    let key = client_key(&req);
    if limiter.check(&key) {
        next.run(req).await
    } else {
        tracing::warn!(client = %key, "rate limit exceeded");
        (
            StatusCode::TOO_MANY_REQUESTS,
            axum::Json(serde_json::json!({
                "error": { "code": "rate_limited", "message": "too many requests" }
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_comparison_is_exact() {
        let auth = AuthState::new("secret-key");

        assert!(auth.token_matches("secret-key"));
        assert!(!auth.token_matches("secret-kez"));
        assert!(!auth.token_matches("secret-key-longer"));
        assert!(!auth.token_matches(""));
    }

    #[test]
    fn disabled_auth_accepts_anything() {
        let auth = AuthState::disabled();
        assert!(auth.token_matches("whatever"));
    }

    #[test]
    fn rate_limit_window_resets() {
        let limiter = RateLimitState::new(2, Duration::from_millis(10));

        assert!(limiter.check("1.2.3.4"));
        assert!(limiter.check("1.2.3.4"));
        assert!(!limiter.check("1.2.3.4"), "third request in window is over");
        assert!(limiter.check("5.6.7.8"), "other clients are unaffected");

        std::thread::sleep(Duration::from_millis(15));
        assert!(limiter.check("1.2.3.4"), "fresh window admits again");
    }
}
