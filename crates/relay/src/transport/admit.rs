// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The admission ladder at the HTTP upgrade boundary.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::AdmissionError;
use crate::state::{RelayState, Role};
use crate::transport::ws;

/// Query parameters on the upgrade request.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmitQuery {
    pub role: Option<String>,
    pub token: Option<String>,
}

/// WebSocket upgrade handler at the configured relay path.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<AdmitQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Response {
    let ip = addr.ip();
    match admit(&state, ip, &query, &headers).await {
        Ok((role, token)) => upgrade
            .on_upgrade(move |socket| ws::handle_socket(state, socket, role, token, ip))
            .into_response(),
        Err(err) => {
            tracing::warn!(ip = %ip, code = err.as_str(), "upgrade rejected");
            StatusCode::from_u16(err.http_status())
                .unwrap_or(StatusCode::BAD_REQUEST)
                .into_response()
        }
    }
}

/// Run the admission checks in order. No body beyond the status on failure.
async fn admit(
    state: &RelayState,
    ip: IpAddr,
    query: &AdmitQuery,
    headers: &HeaderMap,
) -> Result<(Role, String), AdmissionError> {
    // 1. Per-IP upgrade rate.
    if !state.quotas.allow_upgrade(ip) {
        return Err(AdmissionError::RateLimited);
    }

    // 2. Global and per-IP socket capacity.
    if state.socket_count.load(Ordering::Relaxed) >= state.config.max_connections {
        return Err(AdmissionError::OverCapacity);
    }
    if state.quotas.active_count(ip) >= state.config.max_connections_per_ip {
        return Err(AdmissionError::OverCapacity);
    }

    // 3. Path equality is enforced by routing; anything else 404s.

    // 4. Origin allowlist, when configured. Absent Origin headers pass: the
    // agent and CLI clients are not browsers.
    let allowlist = state.config.origin_allowlist();
    if !allowlist.is_empty() {
        if let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
            if !allowlist.iter().any(|o| o == origin) {
                return Err(AdmissionError::ForbiddenOrigin);
            }
        }
    }

    // 5. Role and token.
    let role = query
        .role
        .as_deref()
        .and_then(Role::parse)
        .ok_or(AdmissionError::Unauthorized)?;
    let token = query
        .token
        .clone()
        .or_else(|| {
            headers.get("x-auth-token").and_then(|v| v.to_str().ok()).map(str::to_owned)
        })
        .ok_or(AdmissionError::Unauthorized)?;
    state.config.token_policy().validate(&token).map_err(|_| AdmissionError::Unauthorized)?;

    // 6. Session cap applies only to tokens that would create a new session.
    let sessions = state.sessions.read().await;
    if !sessions.contains_key(&token) && sessions.len() >= state.config.max_sessions {
        return Err(AdmissionError::OverCapacity);
    }

    Ok((role, token))
}

#[cfg(test)]
#[path = "admit_tests.rs"]
mod tests;
