//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{middleware::from_fn_with_state, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::config::RouteLimits;
use crate::error::{FloodgateError, Result};
use crate::ratelimit::{Presets, RateLimiter, SweeperHandle};

use super::middleware::rate_limit;

/// The limiter instances bound to each route group at startup.
///
/// Each group owns a separate limiter (and therefore a separate counter
/// store), so windows of different lengths never share state.
pub struct AppLimiters {
    /// General traffic
    pub general: Arc<RateLimiter>,
    /// Public API routes
    pub api: Arc<RateLimiter>,
    /// Authentication routes
    pub auth: Arc<RateLimiter>,
}

impl AppLimiters {
    /// Resolve the configured preset names into limiter instances.
    pub fn from_config(presets: &Presets, routes: &RouteLimits) -> Result<Self> {
        let build = |name: &str| -> Result<Arc<RateLimiter>> {
            presets
                .get(name)
                .map(|policy| Arc::new(RateLimiter::new(policy)))
                .ok_or_else(|| {
                    FloodgateError::Config(format!("Unknown rate limit preset: {}", name))
                })
        };

        Ok(Self {
            general: build(&routes.general)?,
            api: build(&routes.api)?,
            auth: build(&routes.auth)?,
        })
    }

    /// Start one background sweeper per limiter.
    ///
    /// The returned handles must stay alive for as long as the sweepers
    /// should run; the service keeps them until shutdown.
    pub fn start_sweepers(&self, interval: Duration) -> Vec<SweeperHandle> {
        vec![
            self.general.clone().start_sweeper(interval),
            self.api.clone().start_sweeper(interval),
            self.auth.clone().start_sweeper(interval),
        ]
    }
}

/// HTTP server for the throttled application surface.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// Limiters bound to the route groups
    limiters: AppLimiters,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, limiters: AppLimiters) -> Self {
        Self { addr, limiters }
    }

    /// Build the router, wiring each route group to its limiter.
    ///
    /// The handlers here stand in for the application the middleware
    /// protects; the throttling layers are the product. `/health` is left
    /// unthrottled so orchestration probes never get a 429.
    pub fn router(&self) -> Router {
        let general = Router::new()
            .route("/", get(index))
            .layer(from_fn_with_state(self.limiters.general.clone(), rate_limit));

        let api = Router::new()
            .route("/api/v1/status", get(api_status))
            .layer(from_fn_with_state(self.limiters.api.clone(), rate_limit));

        let auth = Router::new()
            .route("/auth/check", get(auth_check))
            .layer(from_fn_with_state(self.limiters.auth.clone(), rate_limit));

        Router::new()
            .route("/health", get(health))
            .merge(general)
            .merge(api)
            .merge(auth)
    }

    /// Start the HTTP server.
    ///
    /// This method will block until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = self.router();
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(addr = %self.addr, "Starting HTTP server");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            FloodgateError::Io(e)
        })
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn index() -> Json<Value> {
    Json(json!({ "service": "floodgate", "group": "general" }))
}

async fn api_status() -> Json<Value> {
    Json(json!({ "group": "api", "status": "ok" }))
}

async fn auth_check() -> Json<Value> {
    Json(json!({ "group": "auth", "status": "ok" }))
}
