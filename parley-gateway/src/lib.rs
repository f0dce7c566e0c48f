//! Parley Gateway - The JSON API over the conversation manager.
//!
//! This crate provides the HTTP service for the Parley system:
//! - User listing, creation, lookup, and rename
//! - Message listing (with origin and time filters), posting, and lookup
//! - Health checks
//!
//! ## Architecture
//!
//! The gateway validates request shapes, then bridges onto the blocking
//! conversation core:
//! ```text
//! Client → Gateway (validate → spawn_blocking) → ConversationManager → Engine
//! ```
//!
//! Every response body is a JSON envelope with a `type` field; errors are
//! `{"type": "error", "value": "<description>"}` with a matching status code.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod routes;

pub use routes::{build_routes, AppState};

use axum::Router;
use parley_common::Config;
use parley_core::ConversationManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Build the gateway router with all routes and middleware.
pub fn build_router(manager: Arc<ConversationManager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::build_routes(AppState { manager }).layer(cors)
}

/// Start the gateway server.
///
/// Serves until interrupted, then closes the manager so every live session
/// is migrated to durable storage before the process exits.
pub async fn start_server(
    config: &Config,
    manager: Arc<ConversationManager>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from((
        config.server.bind.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    let router = build_router(Arc::clone(&manager));

    tracing::info!("Starting Parley Gateway on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let closer = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || closer.close()).await??;

    tracing::info!("Parley Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}
