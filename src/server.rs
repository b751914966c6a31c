//! HTTP surface: `/rss`, `/health`, `/metrics`.
//!
//! Handlers only read cache snapshots; upstream fetch failures never turn
//! into HTTP error codes here. `/rss` serves whatever is cached, including
//! an empty feed on a freshly started process.

use crate::cache::ReleaseCache;
use crate::feed::{self, FeedOptions};
use crate::metrics::AppMetrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ReleaseCache>,
    pub metrics: Arc<AppMetrics>,
    pub feed: Arc<FeedOptions>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/rss", get(rss_feed))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until the shutdown future resolves, then drain in-flight requests.
pub async fn run_server(
    listener: TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn rss_feed(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.cache.snapshot();
    let channel = feed::render(&snapshot, &state.feed, Utc::now());
    tracing::debug!(items = channel.items().len(), "Rendered RSS feed");
    // Channel::to_string omits the XML document declaration.
    let body = format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{}", channel);
    (
        [(header::CONTENT_TYPE, "application/rss+xml; charset=utf-8")],
        body,
    )
}

/// Liveness/readiness: the process accepts requests. Independent of fetch
/// freshness by design.
async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.render(&state.cache.snapshot(), Utc::now()) {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(error) => {
            // Encoding the owned registry should not fail; treat as a bug.
            tracing::error!(error = %error, "Failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
