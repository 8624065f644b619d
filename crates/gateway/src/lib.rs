// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tfclaw-gateway: chat command router and progress coalescer over a tfclaw
//! relay session.

pub mod bridge;
pub mod chat;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod progress;
pub mod router;
pub mod stdio;
pub mod test_support;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tfclaw_proto::wire::ClientType;

use crate::bridge::RelayBridge;
use crate::chat::{ChatEvent, ChatPlatform};
use crate::config::GatewayConfig;
use crate::router::Router;

/// Run the gateway with a chat platform and its inbound event stream.
pub async fn run_with_platform(
    config: GatewayConfig,
    platform: Arc<dyn ChatPlatform>,
    mut events: mpsc::UnboundedReceiver<ChatEvent>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    config.validate()?;

    let (bridge, outbound_rx) = RelayBridge::new();
    bridge::spawn_connection(
        Arc::clone(&bridge),
        config.connect_url(),
        ClientType::Chat,
        outbound_rx,
        shutdown.clone(),
    );

    let router = Router::new(platform, bridge, config);
    info!("gateway ready");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                match event {
                    Some(event) => router.dispatch(event),
                    None => break,
                }
            }
        }
    }

    Ok(())
}

/// Run the gateway on the stdio platform (local testing).
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let platform = Arc::new(stdio::StdioPlatform::new());
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    stdio::spawn_stdin_events(event_tx, shutdown.clone());

    run_with_platform(config, platform, event_rx, shutdown).await
}
