// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Role-based frame routing inside a session.
//!
//! Agent-origin frames are forwarded to clients verbatim (the original text,
//! never a re-serialization) so the relay cannot reorder or reshape them.

use tfclaw_proto::wire::{parse_frame, CommandPayload, Frame};

use crate::state::{RelayState, Role, Session, SocketHandle};

/// Negative-ack message for commands arriving while no agent is attached.
pub const NO_AGENT_MSG: &str = "No active terminal agent connected for this token.";

/// Route one inbound text frame according to the socket's role.
pub async fn route_text(
    state: &RelayState,
    session: &Session,
    socket: &SocketHandle,
    text: &str,
) {
    let frame = match parse_frame(text) {
        Ok(frame) => frame,
        Err(err) => {
            socket.send_frame(&Frame::ack_err(None, err.to_string()));
            return;
        }
    };

    match socket.role {
        Role::Agent => route_agent(state, session, socket, frame, text).await,
        Role::Client => route_client(session, socket, frame, text).await,
    }
}

async fn route_agent(
    state: &RelayState,
    session: &Session,
    socket: &SocketHandle,
    frame: Frame,
    raw: &str,
) {
    match frame {
        Frame::AgentRegister(descriptor) => {
            let mut inner = session.inner.lock().await;
            tracing::info!(agent = %descriptor.agent_id, "agent registered");
            inner.descriptor = Some(descriptor);
            inner.broadcast_state();
        }
        Frame::AgentTerminalList { terminals } => {
            let mut inner = session.inner.lock().await;
            inner.replace_terminals(terminals);
            inner.broadcast_state();
        }
        Frame::AgentTerminalOutput { terminal_id, chunk, at } => {
            let mut inner = session.inner.lock().await;
            inner.append_snapshot(&terminal_id, &chunk, at, state.config.max_snapshot_chars);
            inner.broadcast_text(raw);
        }
        Frame::AgentCaptureSources { .. }
        | Frame::AgentScreenCapture(_)
        | Frame::AgentCommandResult { .. }
        | Frame::AgentError { .. } => {
            let inner = session.inner.lock().await;
            inner.broadcast_text(raw);
        }
        other => {
            socket.send_frame(&Frame::ack_err(
                None,
                format!("unsupported message type: {}", other.type_name()),
            ));
        }
    }
}

async fn route_client(session: &Session, socket: &SocketHandle, frame: Frame, raw: &str) {
    match frame {
        Frame::ClientHello { client_type } => {
            socket.send_frame(&Frame::ack_ok(None, format!("hello {client_type}")));
            let inner = session.inner.lock().await;
            socket.send_frame(&Frame::RelayState(inner.compose_state()));
        }
        Frame::ClientCommand { request_id, payload } => {
            route_client_command(session, socket, request_id, payload, raw).await;
        }
        other => {
            socket.send_frame(&Frame::ack_err(
                None,
                format!("unsupported message type: {}", other.type_name()),
            ));
        }
    }
}

async fn route_client_command(
    session: &Session,
    socket: &SocketHandle,
    request_id: Option<String>,
    payload: CommandPayload,
    raw: &str,
) {
    // Snapshot requests are answered straight from the cache; the frame still
    // reaches the agent so it can refresh the terminal promptly.
    if let CommandPayload::TerminalSnapshot { ref terminal_id } = payload {
        let inner = session.inner.lock().await;
        socket.send_frame(&Frame::RelayState(inner.compose_terminal_state(terminal_id)));
        if let Some(ref agent) = inner.agent {
            agent.send_text(raw.to_owned());
        }
        return;
    }

    let is_input = matches!(payload, CommandPayload::TerminalInput { .. });
    let inner = session.inner.lock().await;
    match inner.agent {
        None => {
            // terminal.input gets the bare negative ack without its requestId.
            let echo = if is_input { None } else { request_id };
            socket.send_frame(&Frame::ack_err(echo, NO_AGENT_MSG));
        }
        Some(ref agent) => {
            agent.send_text(raw.to_owned());
            if !is_input {
                socket.send_frame(&Frame::ack_ok(request_id, payload.name()));
            }
        }
    }
}

#[cfg(test)]
#[path = "routing_tests.rs"]
mod tests;
