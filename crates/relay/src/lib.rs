// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tfclaw-relay: multi-tenant WebSocket hub binding agents and clients into
//! token-keyed sessions.

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod quota;
pub mod routing;
pub mod state;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::state::RelayState;
use crate::transport::build_router;

/// Run the relay until shutdown.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    config.validate()?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    let state = Arc::new(RelayState::new(config, shutdown.clone()));

    heartbeat::spawn_heartbeat(Arc::clone(&state));
    spawn_signal_handler(shutdown.clone());

    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("tfclaw-relay listening on {addr}");

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            shutdown.cancel();
        }
    });
}
