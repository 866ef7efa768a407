//! Rate limiting middleware.
//!
//! The pipeline step bound to each throttled route group. Per request it
//! derives the counter key, asks the limiter for admission, and always sets
//! the `X-RateLimit-*` headers on the response. Admitted requests continue
//! down the chain; rejected ones are answered in place with a 429 and a
//! structured JSON body.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

use crate::ratelimit::{PolicyConfig, RateLimitDecision, RateLimiter, RequestInfo};

/// Identity attached to the request by upstream auth middleware. The
/// limiter never establishes identity itself; it only reads what an earlier
/// pipeline step stored in the request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated user id
    pub user_id: i64,
    /// Authenticated username
    pub username: String,
}

const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Axum middleware enforcing one limiter's policy.
///
/// Attach with `middleware::from_fn_with_state(limiter, rate_limit)`; each
/// route group carries its own limiter instance as the layer state.
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let info = request_info(&request);
    let decision = limiter.check(&info);

    if !decision.admitted {
        warn!(
            path = %info.path,
            limit = decision.limit,
            "Rate limit exceeded"
        );
        return rejected_response(&decision, limiter.config());
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

/// Reduce an incoming request to the descriptor the limiter consumes.
fn request_info(request: &Request) -> RequestInfo {
    let client_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());
    let auth = request.extensions().get::<AuthContext>();

    RequestInfo {
        client_addr,
        path: request.uri().path().to_string(),
        user_id: auth.map(|a| a.user_id),
        username: auth.map(|a| a.username.clone()),
    }
}

/// Set the rate limit headers carried on every response, admitted or not.
fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(HEADER_LIMIT, decision.limit.into());
    headers.insert(HEADER_REMAINING, decision.remaining.into());
    headers.insert(HEADER_RESET, decision.reset_at.into());
}

/// Build the 429 response that short-circuits the pipeline.
fn rejected_response(decision: &RateLimitDecision, config: &PolicyConfig) -> Response {
    let retry_after = decision.retry_after.unwrap_or(0.0);
    let body = json!({
        "error": "too many requests, please try again later",
        "code": "RATE_LIMIT_EXCEEDED",
        "retry_after": retry_after,
        "limit": decision.limit,
        "window": format_window(config.window),
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_headers(response.headers_mut(), decision);
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, (retry_after.round() as i64).into());
    response
}

/// Render a window duration for the rejection body, e.g. `15m` or `1h`.
fn format_window(window: Duration) -> String {
    let secs = window.as_secs();
    if secs >= 3600 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs >= 60 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_router(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit))
    }

    fn request() -> Request {
        axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap()
    }

    fn request_as(user_id: i64, username: &str) -> Request {
        let mut req = request();
        req.extensions_mut().insert(AuthContext {
            user_id,
            username: username.to_string(),
        });
        req
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_admitted_response_carries_headers() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_client_addr(
            5,
            Duration::from_secs(60),
        )));
        let app = test_router(limiter);

        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.headers()["x-ratelimit-remaining"], "3");
    }

    #[tokio::test]
    async fn test_rejection_short_circuits_with_429() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_client_addr(
            1,
            Duration::from_secs(60),
        )));
        let app = test_router(limiter);

        let admitted = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(admitted.status(), StatusCode::OK);

        let rejected = app.oneshot(request()).await.unwrap();
        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(rejected.headers()["x-ratelimit-limit"], "1");
        assert_eq!(rejected.headers()["x-ratelimit-remaining"], "0");
        assert_eq!(rejected.headers()["retry-after"], "60");

        let body = body_json(rejected).await;
        assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["limit"], 1);
        assert_eq!(body["window"], "1m");
        assert!(body["retry_after"].as_f64().unwrap() > 0.0);
        assert!(body["error"].as_str().unwrap().contains("too many requests"));
    }

    #[tokio::test]
    async fn test_requests_without_address_share_the_sentinel_key() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_client_addr(
            2,
            Duration::from_secs(60),
        )));
        let app = test_router(limiter.clone());

        // No ConnectInfo in oneshot requests, so all of them key onto the
        // fallback sentinel and share one budget.
        app.clone().oneshot(request()).await.unwrap();
        app.clone().oneshot(request()).await.unwrap();
        let rejected = app.oneshot(request()).await.unwrap();

        assert_eq!(rejected.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(limiter.contains_key(crate::ratelimit::FALLBACK_KEY));
    }

    #[tokio::test]
    async fn test_authenticated_users_have_independent_budgets() {
        let limiter = Arc::new(RateLimiter::new(PolicyConfig::by_user_id(
            1,
            Duration::from_secs(60),
        )));
        let app = test_router(limiter);

        let first = app.clone().oneshot(request_as(1, "alice")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let exhausted = app.clone().oneshot(request_as(1, "alice")).await.unwrap();
        assert_eq!(exhausted.status(), StatusCode::TOO_MANY_REQUESTS);

        let other_user = app.oneshot(request_as(2, "bob")).await.unwrap();
        assert_eq!(other_user.status(), StatusCode::OK);
    }

    #[test]
    fn test_format_window() {
        assert_eq!(format_window(Duration::from_secs(60)), "1m");
        assert_eq!(format_window(Duration::from_secs(900)), "15m");
        assert_eq!(format_window(Duration::from_secs(3600)), "1h");
        assert_eq!(format_window(Duration::from_secs(45)), "45s");
        assert_eq!(format_window(Duration::from_secs(90)), "90s");
    }
}
