//! HTTP read surface — Axum server for the dashboard and API consumers.
//!
//! Exposes current and historical opportunities, the latest odds
//! snapshot, service status, the sports catalogue and a manual-refresh
//! trigger. CORS enabled for local dashboard development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub use routes::{ApiState, AppState, ConfiguredSummary};

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().expect("static origin"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/arbitrage", get(routes::get_arbitrage))
        .route("/api/arbitrage/history", get(routes::get_arbitrage_history))
        .route("/api/odds", get(routes::get_odds))
        .route("/api/refresh", post(routes::post_refresh))
        .route("/api/status", get(routes::get_status))
        .route("/api/sports", get(routes::get_sports))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

/// Bind the listener and spawn the server task. Binding happens here so a
/// bad port is a fatal startup error rather than a background panic; the
/// server itself drains on cancellation.
pub async fn spawn_server(
    state: AppState,
    port: u16,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;

    info!(port, "API server listening on http://localhost:{port}");

    let join = tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "API server error");
        }
    });

    Ok(join)
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
