// SPDX-License-Identifier: Apache-2.0

//! HTTP server for RepoMind.
//!
//! Exposes the assistant as a streaming chat endpoint alongside health,
//! analytics, badge and stats card endpoints. All handlers share one
//! [`AppState`](repomind_core::AppState) whose providers are created lazily.

pub mod card;
mod error;
pub mod logging;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use repomind_core::AppState;
use tokio::net::TcpListener;

pub use error::{ApiError, status_for};
pub use routes::{
    ChatRequest, REQUEST_ID_HEADER, RequestVisitor, TrackParams, VISITOR_ID_HEADER,
    anonymous_visitor_id, router,
};

/// Parses a bind address, bracketing bare IPv6 hosts.
pub fn bind_address(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let addr = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    Ok(addr.parse()?)
}

/// Serve the API over HTTP until Ctrl+C.
pub async fn run_http(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = bind_address(host, port)?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        cache = %state.config().cache.provider.as_deref().unwrap_or("auto"),
        "RepoMind server listening on {}",
        addr
    );

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, shutting down gracefully");
    })
    .await?;

    Ok(())
}
