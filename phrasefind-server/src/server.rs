//! HTTP server assembly

use crate::api;
use crate::quota::SubscriptionChecker;
use crate::streams::{AnalysisProvider, StreamRegistry};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use phrasefind_common::config::ServiceConfig;
use sqlx::SqlitePool;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers.
pub struct AppState {
    pub db: SqlitePool,
    pub config: ServiceConfig,
    pub registry: Arc<StreamRegistry>,
    pub subscriptions: SubscriptionChecker,
    pub provider: Arc<dyn AnalysisProvider>,
}

/// Build the router over shared state.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/search", post(api::search::search))
        .route("/search/:job_id", get(api::search::poll_job))
        .route("/analyze", post(api::analyze::analyze))
        .route("/analyze/stream", post(api::analyze::analyze_stream))
        .route("/examples/:word", get(api::words::examples))
        .route("/word/:word", get(api::words::word_detail))
        .route("/words", get(api::words::list_words))
        .route("/stats", get(api::words::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server; resolves when `shutdown` fires and connections
/// drain.
pub async fn start(
    bind_addr: &str,
    state: Arc<AppState>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("HTTP server listening on {}", bind_addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> StatusCode {
    StatusCode::OK
}
