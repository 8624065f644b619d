// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-socket event loop: session join, frame pump, teardown.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};

use tfclaw_proto::token::fingerprint;
use tfclaw_proto::wire::Frame;

use crate::error::{CLOSE_GOING_AWAY, CLOSE_POLICY, CLOSE_REPLACED, CLOSE_TOO_BIG, REPLACED_REASON};
use crate::quota::RateWindow;
use crate::routing;
use crate::state::{Outbound, RelayState, Role, Session, SocketHandle};

/// Drive one admitted socket until either side closes it.
pub async fn handle_socket(
    state: Arc<RelayState>,
    socket: WebSocket,
    role: Role,
    token: String,
    ip: IpAddr,
) {
    let (handle, rx) = state.register_socket(role, token.clone(), ip).await;
    let session = state.get_or_create_session(&token).await;
    tracing::info!(
        role = role.as_str(),
        ip = %ip,
        token = %fingerprint(&token),
        socket = handle.id,
        "socket joined",
    );

    join_session(&state, &session, &handle).await;
    run_loop(&state, &session, &handle, socket, rx).await;
    detach(&state, &session, &handle).await;

    tracing::info!(role = role.as_str(), socket = handle.id, "socket left");
}

/// Place the socket in its session under the per-session lock.
///
/// The client's initial `relay.state` is queued inside the lock so no
/// terminal delta routed afterwards can overtake it.
async fn join_session(state: &RelayState, session: &Session, handle: &Arc<SocketHandle>) {
    let mut inner = session.inner.lock().await;
    match handle.role {
        Role::Agent => {
            if let Some(old) = inner.agent.take() {
                tracing::info!(old = old.id, new = handle.id, "agent replaced");
                old.close(CLOSE_REPLACED, REPLACED_REASON);
            }
            state.quotas.reset_active(handle.ip);
            state.quotas.inc_active(handle.ip);
            inner.agent = Some(Arc::clone(handle));
        }
        Role::Client => {
            if inner.clients.len() >= state.config.max_clients_per_session {
                handle.close(CLOSE_POLICY, "session client limit reached");
                return;
            }
            inner.clients.insert(handle.id, Arc::clone(handle));
            handle.send_frame(&Frame::RelayState(inner.compose_state()));
        }
    }
}

async fn run_loop(
    state: &RelayState,
    session: &Session,
    handle: &Arc<SocketHandle>,
    socket: WebSocket,
    mut rx: tokio::sync::mpsc::UnboundedReceiver<Outbound>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut rate = RateWindow::new(
        state.config.message_rate_window(),
        state.config.max_messages_per_window,
    );

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = ws_tx
                    .send(close_msg(CLOSE_GOING_AWAY, "relay shutting down"))
                    .await;
                break;
            }

            out = rx.recv() => {
                match out {
                    Some(Outbound::Text(text)) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Ping) => {
                        if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                            break;
                        }
                    }
                    Some(Outbound::Close { code, reason }) => {
                        let _ = ws_tx.send(close_msg(code, reason)).await;
                        break;
                    }
                    None => break,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle.touch();
                        if text.len() > state.config.max_message_bytes {
                            let _ = ws_tx.send(close_msg(CLOSE_TOO_BIG, "message too large")).await;
                            break;
                        }
                        if !rate.try_hit(Instant::now()) {
                            let ack = Frame::ack_err(None, "rate limit exceeded");
                            let _ = ws_tx.send(Message::Text(ack.to_text().into())).await;
                            let _ = ws_tx.send(close_msg(CLOSE_POLICY, "rate limit exceeded")).await;
                            break;
                        }
                        routing::route_text(state, session, handle, &text).await;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        handle.touch();
                        let ack = Frame::ack_err(None, "invalid message");
                        if ws_tx.send(Message::Text(ack.to_text().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                        handle.touch();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                }
            }
        }
    }
}

/// Remove the socket from its session; broadcast a fresh state to anyone
/// left behind, and delete the session once it is fully empty.
async fn detach(state: &RelayState, session: &Session, handle: &Arc<SocketHandle>) {
    state.unregister_socket(handle).await;

    {
        let mut inner = session.inner.lock().await;
        let was_member = match handle.role {
            Role::Agent => {
                if inner.agent.as_ref().map(|a| a.id) == Some(handle.id) {
                    inner.agent = None;
                    inner.descriptor = None;
                    true
                } else {
                    false
                }
            }
            Role::Client => inner.clients.remove(&handle.id).is_some(),
        };
        if was_member && !inner.is_empty() {
            inner.broadcast_state();
        }
    }

    state.drop_session_if_empty(&session.token).await;
}

fn close_msg(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame { code, reason: reason.into() }))
}
