// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plain HTTP handlers. The relay's only non-WS surface is `/health`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;

use tfclaw_proto::epoch_ms;

use crate::state::RelayState;

/// `GET /health`
pub async fn health(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    let sessions = state.sessions.read().await.len();
    let sockets = state.socket_count.load(Ordering::Relaxed);
    let body = serde_json::json!({
        "ok": true,
        "service": "tfclaw-relay",
        "time": epoch_ms(),
        "sessions": sessions,
        "sockets": sockets,
    });
    (
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Json(body),
    )
}
