//! HTTP presentation layer
//!
//! One server-rendered page per browser session (identified by a cookie)
//! plus a small JSON API for programmatic clients.

mod api;
mod errors;
mod handlers;
mod page;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::app::App;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
}

/// Build the application router
pub fn router(app: Arc<App>) -> Router {
    let state = AppState { app };

    Router::new()
        .route("/", get(handlers::index))
        .route("/send", post(handlers::send))
        .route("/starter", post(handlers::starter))
        .route("/clear", post(handlers::clear))
        .route("/health", get(api::health))
        .route("/api/starters", get(api::list_starters))
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/:id", axum::routing::delete(api::delete_session))
        .route("/api/sessions/:id/history", get(api::history))
        .route("/api/sessions/:id/messages", post(api::send_message))
        .route("/api/sessions/:id/clear", post(api::clear))
        .route("/api/sessions/:id/stats", get(api::stats))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl+C
pub async fn serve(app: Arc<App>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Chat server listening on http://{}", listener.local_addr()?);

    let pruner = app.spawn_pruner();
    let result = axum::serve(listener, router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");
    pruner.abort();
    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down gracefully");
}
