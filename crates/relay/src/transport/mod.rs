// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the relay.

pub mod admit;
pub mod http;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::RelayState;

/// Build the axum `Router`: health, the configured WS path, 404 elsewhere.
pub fn build_router(state: Arc<RelayState>) -> Router {
    let ws_path = state.config.ws_path.clone();
    Router::new()
        .route("/health", get(http::health))
        .route(&ws_path, get(admit::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
