// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Liveness sweeper: one timer pings every socket and reaps the dead.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tfclaw_proto::epoch_ms;

use crate::error::CLOSE_GOING_AWAY;
use crate::state::RelayState;

/// Spawn the heartbeat task. Each tick clears every socket's `alive` flag
/// and pings it; a socket still cleared at the next tick, or idle past the
/// configured timeout, is terminated.
pub fn spawn_heartbeat(state: Arc<RelayState>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.heartbeat_interval());
        ticker.tick().await; // Consume the immediate first tick.
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            sweep(&state).await;
        }
    });
}

async fn sweep(state: &RelayState) {
    let now = epoch_ms();
    let idle_ms = state.config.idle_timeout_ms;
    let sockets: Vec<_> = state.sockets.read().await.values().cloned().collect();

    for socket in sockets {
        let idle = now.saturating_sub(socket.last_seen_ms.load(Ordering::Relaxed)) > idle_ms;
        let was_alive = socket.alive.swap(false, Ordering::Relaxed);
        if !was_alive {
            tracing::debug!(socket = socket.id, "heartbeat missed, terminating");
            socket.close(CLOSE_GOING_AWAY, "heartbeat timeout");
        } else if idle {
            tracing::debug!(socket = socket.id, "idle timeout, terminating");
            socket.close(CLOSE_GOING_AWAY, "idle timeout");
        } else {
            socket.ping();
        }
    }
}
