// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! tfclaw-agent: exposes local tmux-backed terminals through a tfclaw relay.

pub mod capture;
pub mod commands;
pub mod config;
pub mod delta;
pub mod error;
pub mod input;
pub mod relay_client;
pub mod terminals;
pub mod tmux;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::capture::{CaptureBackend, NullCaptureBackend};
use crate::commands::CommandRouter;
use crate::config::AgentConfig;
use crate::relay_client::AgentRuntime;
use crate::terminals::{TerminalLimits, TerminalManager};
use crate::tmux::Tmux;

/// Run the agent until shutdown.
pub async fn run(config: AgentConfig) -> anyhow::Result<()> {
    config.validate()?;

    let tmux = Arc::new(Tmux::new(config.tmux_config()));
    if !tmux.probe().await {
        anyhow::bail!("multiplexer '{}' is not installed or not reachable", config.tmux_command);
    }

    if config.reset_on_boot {
        tmux.kill_session().await.map_err(|e| anyhow::anyhow!("session reset failed: {e}"))?;
    }
    if !tmux.has_session().await {
        tmux.create_session(&config.effective_cwd())
            .await
            .map_err(|e| anyhow::anyhow!("session bootstrap failed: {e}"))?;
        info!(session = %tmux.session(), "tmux session created");
    }

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let limits = TerminalLimits {
        capture_lines: config.capture_lines,
        max_delta_chars: config.max_delta_chars,
        max_local_buffer: config.max_local_buffer,
    };
    let manager =
        Arc::new(TerminalManager::new(Arc::clone(&tmux), limits, outbound_tx.clone()));
    let router = Arc::new(CommandRouter::new(Arc::clone(&manager), outbound_tx.clone()));
    let capture: Arc<dyn CaptureBackend> = Arc::new(NullCaptureBackend);

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());
    spawn_poll_loop(Arc::clone(&manager), config.poll_ms, shutdown.clone());

    let runtime = Arc::new(AgentRuntime {
        config: config.clone(),
        manager: Arc::clone(&manager),
        router,
        capture,
        outbound: outbound_tx,
    });
    relay_client::run(runtime, outbound_rx, shutdown).await?;

    if config.persist_session_on_shutdown {
        info!(session = %tmux.session(), "leaving tmux session running");
    } else if let Err(e) = tmux.kill_session().await {
        tracing::warn!(err = %e, "failed to kill tmux session on shutdown");
    }

    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });
}

/// Drive the capture sweep on the configured interval. The manager skips
/// ticks that land during a running sweep.
fn spawn_poll_loop(manager: Arc<TerminalManager>, poll_ms: u64, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(poll_ms));
        ticker.tick().await; // Consume the immediate first tick.
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            manager.poll_once().await;
        }
    });
}
