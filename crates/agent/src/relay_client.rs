// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Uplink to the relay: connect, register, dispatch forwarded commands, and
//! reconnect with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tfclaw_proto::epoch_ms;
use tfclaw_proto::wire::{
    parse_frame, AgentDescriptor, CommandPayload, Frame, Platform, ScreenCapture,
};

use crate::capture::CaptureBackend;
use crate::commands::CommandRouter;
use crate::config::AgentConfig;
use crate::error::AgentErrorCode;
use crate::terminals::TerminalManager;

/// Reconnect backoff step and cap (500 ms × attempt, max 10 s).
const BACKOFF_STEP_MS: u64 = 500;
const BACKOFF_MAX_MS: u64 = 10_000;

/// Everything command dispatch needs, shared across connection attempts.
pub struct AgentRuntime {
    pub config: AgentConfig,
    pub manager: Arc<TerminalManager>,
    pub router: Arc<CommandRouter>,
    pub capture: Arc<dyn CaptureBackend>,
    pub outbound: mpsc::UnboundedSender<Frame>,
}

impl AgentRuntime {
    fn descriptor(&self) -> AgentDescriptor {
        AgentDescriptor {
            agent_id: self.config.effective_agent_id(),
            platform: Platform::current(),
            hostname: crate::config::hostname().unwrap_or_else(|| "unknown".to_owned()),
            connected_at: epoch_ms(),
        }
    }
}

/// Delay before reconnect attempt `attempt` (1-based).
pub fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis((BACKOFF_STEP_MS * u64::from(attempt)).min(BACKOFF_MAX_MS))
}

/// Run the uplink until shutdown. Reconnects forever; each successful
/// connection re-registers and resynchronizes terminal state.
pub async fn run(
    runtime: Arc<AgentRuntime>,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let url = runtime.config.connect_url();
    let mut attempt: u32 = 0;
    let mut first_connect = true;

    while !shutdown.is_cancelled() {
        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _response)) => {
                attempt = 0;
                info!(
                    relay = %runtime.config.relay_url,
                    token = %tfclaw_proto::token::fingerprint(&runtime.config.token),
                    "connected to relay",
                );

                // Stale frames queued while disconnected would confuse the
                // fresh session; the resync below replaces them.
                while outbound_rx.try_recv().is_ok() {}

                on_connect(&runtime, first_connect).await;
                first_connect = false;

                serve(&runtime, ws, &mut outbound_rx, &shutdown).await;
                if shutdown.is_cancelled() {
                    break;
                }
                warn!("relay connection lost");
            }
            Err(e) => {
                debug!(err = %e, "relay connect failed");
            }
        }

        attempt += 1;
        let delay = backoff_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }

    Ok(())
}

/// Register, seed initial terminals (first connect only), publish the list,
/// and warm every capture without emitting deltas.
async fn on_connect(runtime: &AgentRuntime, first_connect: bool) {
    let _ = runtime.outbound.send(Frame::AgentRegister(runtime.descriptor()));

    if first_connect {
        for _ in 0..runtime.config.start_terminals {
            let cwd = runtime.config.effective_cwd();
            if let Err(e) = runtime.manager.create_terminal(None, Some(&cwd)).await {
                warn!(err = %e, "initial terminal creation failed");
                runtime.manager.emit_error(e.code, e.message, None);
            }
        }
    }

    runtime.manager.refresh_foreground_commands().await;
    runtime.manager.publish_terminal_list().await;
    runtime.manager.refresh_silent().await;
}

/// Pump frames both ways until the socket drops.
async fn serve(
    runtime: &Arc<AgentRuntime>,
    ws: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    outbound_rx: &mut mpsc::UnboundedReceiver<Frame>,
    shutdown: &CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return;
            }

            frame = outbound_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.to_text().into())).await.is_err() {
                            return;
                        }
                    }
                    None => return,
                }
            }

            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_inbound(runtime, &text),
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Handle one frame from the relay. Unknown types are errors here: logged
/// and dropped, never forwarded.
fn handle_inbound(runtime: &Arc<AgentRuntime>, text: &str) {
    match parse_frame(text) {
        Ok(Frame::ClientCommand { request_id, payload }) => {
            dispatch(runtime, request_id, payload);
        }
        Ok(Frame::RelayAck { ok, message, .. }) => {
            if !ok {
                debug!(message = message.as_deref().unwrap_or(""), "relay ack (negative)");
            }
        }
        Ok(Frame::RelayState(_)) => {}
        Ok(other) => {
            warn!(frame = other.type_name(), "unexpected frame from relay, dropped");
        }
        Err(e) => {
            warn!(err = %e, "undecodable frame from relay, dropped");
        }
    }
}

/// Run one client command in its own task so slow commands (streamed sends,
/// capture grabs) never stall the socket pump.
fn dispatch(runtime: &Arc<AgentRuntime>, request_id: Option<String>, payload: CommandPayload) {
    let runtime = Arc::clone(runtime);
    tokio::spawn(async move {
        match payload {
            CommandPayload::TerminalCreate { title, cwd } => {
                let cwd = cwd.unwrap_or_else(|| runtime.config.effective_cwd());
                if let Err(e) =
                    runtime.manager.create_terminal(title.as_deref(), Some(&cwd)).await
                {
                    runtime.manager.emit_error(e.code, e.message, request_id);
                }
            }
            CommandPayload::TerminalClose { terminal_id } => {
                if let Err(e) = runtime.manager.close_terminal(&terminal_id).await {
                    runtime.manager.emit_error(e.code, e.message, request_id);
                }
            }
            CommandPayload::TerminalInput { terminal_id, data } => {
                if let Err(e) = runtime.manager.write_input(&terminal_id, &data).await {
                    runtime.manager.emit_error(e.code, e.message, request_id);
                }
            }
            CommandPayload::TerminalSnapshot { terminal_id } => {
                // The relay already served its cache; refresh promptly so a
                // fresh delta follows.
                runtime.manager.poll_terminal(&terminal_id).await;
            }
            CommandPayload::CaptureList {} => match runtime.capture.list_sources().await {
                Ok(sources) => {
                    let _ = runtime
                        .outbound
                        .send(Frame::AgentCaptureSources { request_id, sources });
                }
                Err(e) => {
                    runtime.manager.emit_error(
                        AgentErrorCode::CaptureListFailed,
                        e.to_string(),
                        request_id,
                    );
                }
            },
            CommandPayload::ScreenCapture { source, source_id, terminal_id } => {
                match runtime.capture.grab(source, source_id.as_deref()).await {
                    Ok(grab) => {
                        let _ = runtime.outbound.send(Frame::AgentScreenCapture(ScreenCapture {
                            source,
                            source_id,
                            terminal_id,
                            mime_type: grab.mime_type,
                            image_base64: grab.image_base64,
                            captured_at: epoch_ms(),
                            request_id,
                        }));
                    }
                    Err(e) => {
                        runtime.manager.emit_error(
                            AgentErrorCode::CaptureFailed,
                            e.to_string(),
                            request_id,
                        );
                    }
                }
            }
            CommandPayload::TfclawCommand { text, session_key } => {
                let request_id = request_id.unwrap_or_else(tfclaw_proto::new_id);
                runtime.router.handle(&request_id, &session_key, &text).await;
            }
        }
    });
}

#[cfg(test)]
#[path = "relay_client_tests.rs"]
mod tests;
