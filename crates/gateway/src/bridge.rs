// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side bridge to the relay: one WebSocket, a waiter registry keyed
//! by requestId, and a buffer for outcomes that race ahead of their waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tfclaw_proto::wire::{
    parse_frame, CaptureSource, ClientType, CommandPayload, Frame, ScreenCapture, SessionState,
};

/// Early outcomes/progress are held this long for a late waiter.
const EARLY_BUFFER_TTL: Duration = Duration::from_secs(60);
/// Bound on buffered requestIds.
const EARLY_BUFFER_MAX: usize = 256;

/// What a waiter is waiting for; decides which frames resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitKind {
    /// A relay-level acknowledgement (typed terminal commands).
    Ack,
    /// A final `agent.command_result`.
    Command,
    /// An `agent.capture_sources` list.
    CaptureList,
    /// An `agent.screen_capture` grab.
    CaptureGrab,
}

/// Terminal outcome of a request.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Positive relay ack (typed commands with no agent result).
    Ack { message: Option<String> },
    /// Negative relay ack (no agent attached, protocol refusals).
    Refused { message: String },
    /// Final command result from the agent.
    Result { output: String },
    CaptureSources(Vec<CaptureSource>),
    Capture(Box<ScreenCapture>),
    /// `agent.error` carrying this requestId.
    AgentFailure { code: String, message: String },
    /// The relay connection dropped while waiting.
    Disconnected,
}

struct Waiter {
    kind: WaitKind,
    outcome_tx: oneshot::Sender<Outcome>,
    progress_tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct EarlyEntry {
    progress: Vec<String>,
    outcome: Option<Outcome>,
    at: Option<Instant>,
}

/// Shared bridge state. Constructed detached from any socket so tests can
/// feed frames directly; `spawn_connection` attaches the real WebSocket.
pub struct RelayBridge {
    outbound: mpsc::UnboundedSender<Frame>,
    waiters: Mutex<HashMap<String, Waiter>>,
    early: Mutex<HashMap<String, EarlyEntry>>,
    /// Latest composed session view from `relay.state`.
    state: Mutex<SessionState>,
}

impl RelayBridge {
    /// Build a bridge plus the outbound frame stream the socket task drains.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            outbound: tx,
            waiters: Mutex::new(HashMap::new()),
            early: Mutex::new(HashMap::new()),
            state: Mutex::new(SessionState::default()),
        });
        (bridge, rx)
    }

    /// Latest session view.
    pub async fn session_state(&self) -> SessionState {
        self.state.lock().await.clone()
    }

    /// Queue a `client.command`, returning its generated requestId.
    pub fn send_command(&self, payload: CommandPayload) -> anyhow::Result<String> {
        let request_id = tfclaw_proto::new_id();
        self.outbound
            .send(Frame::ClientCommand { request_id: Some(request_id.clone()), payload })
            .map_err(|_| anyhow::anyhow!("relay connection closed"))?;
        Ok(request_id)
    }

    /// Register interest in a requestId. Buffered progress is replayed in
    /// order; a buffered outcome resolves the wait immediately.
    pub async fn register_waiter(
        &self,
        request_id: &str,
        kind: WaitKind,
    ) -> (oneshot::Receiver<Outcome>, mpsc::UnboundedReceiver<String>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();

        let buffered = self.early.lock().await.remove(request_id);
        match buffered {
            Some(entry) => {
                for body in entry.progress {
                    let _ = progress_tx.send(body);
                }
                match entry.outcome {
                    Some(outcome) => {
                        let _ = outcome_tx.send(outcome);
                    }
                    None => {
                        self.waiters.lock().await.insert(
                            request_id.to_owned(),
                            Waiter { kind, outcome_tx, progress_tx },
                        );
                    }
                }
            }
            None => {
                self.waiters
                    .lock()
                    .await
                    .insert(request_id.to_owned(), Waiter { kind, outcome_tx, progress_tx });
            }
        }

        (outcome_rx, progress_rx)
    }

    /// Drop a waiter (timeout or caller abandoned the wait).
    pub async fn remove_waiter(&self, request_id: &str) {
        self.waiters.lock().await.remove(request_id);
    }

    /// Await the outcome with a deadline; the waiter is removed either way.
    pub async fn await_outcome(
        &self,
        request_id: &str,
        outcome_rx: oneshot::Receiver<Outcome>,
        timeout: Duration,
    ) -> Result<Outcome, &'static str> {
        let result = tokio::time::timeout(timeout, outcome_rx).await;
        self.remove_waiter(request_id).await;
        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err("relay disconnected"),
            Err(_) => Err("command timeout"),
        }
    }

    /// Process one frame from the relay.
    pub async fn handle_frame(&self, frame: Frame) {
        match frame {
            Frame::RelayState(state) => {
                *self.state.lock().await = state;
            }
            Frame::AgentTerminalOutput { .. } => {
                // Raw deltas stream to viewers; the gateway reads composed
                // state instead.
            }
            Frame::AgentTerminalList { .. } | Frame::AgentRegister(_) => {}
            Frame::AgentCommandResult { request_id, output, progress, .. } => {
                if progress == Some(true) {
                    self.deliver_progress(&request_id, output).await;
                } else {
                    self.deliver_outcome(&request_id, Outcome::Result { output }, |_| true).await;
                }
            }
            Frame::AgentError { code, message, request_id } => match request_id {
                Some(id) => {
                    self.deliver_outcome(&id, Outcome::AgentFailure { code, message }, |_| true)
                        .await;
                }
                None => warn!(code = %code, message = %message, "agent error"),
            },
            Frame::AgentCaptureSources { request_id, sources } => {
                if let Some(id) = request_id {
                    self.deliver_outcome(&id, Outcome::CaptureSources(sources), |kind| {
                        kind == WaitKind::CaptureList
                    })
                    .await;
                }
            }
            Frame::AgentScreenCapture(capture) => {
                if let Some(id) = capture.request_id.clone() {
                    self.deliver_outcome(&id, Outcome::Capture(Box::new(capture)), |kind| {
                        kind == WaitKind::CaptureGrab
                    })
                    .await;
                }
            }
            Frame::RelayAck { request_id, ok, message } => {
                let Some(id) = request_id else {
                    debug!(ok, message = message.as_deref().unwrap_or(""), "relay ack");
                    return;
                };
                if ok {
                    // Only ack-waiters end on a positive ack; command waiters
                    // keep waiting for the agent's result.
                    self.deliver_outcome(&id, Outcome::Ack { message }, |kind| {
                        kind == WaitKind::Ack
                    })
                    .await;
                } else {
                    let message = message.unwrap_or_else(|| "request refused".to_owned());
                    self.deliver_outcome(&id, Outcome::Refused { message }, |_| true).await;
                }
            }
            other => {
                warn!(frame = other.type_name(), "unexpected frame from relay, dropped");
            }
        }
    }

    /// Reject every waiter; called when the socket drops.
    pub async fn on_disconnect(&self) {
        let mut waiters = self.waiters.lock().await;
        for (_, waiter) in waiters.drain() {
            let _ = waiter.outcome_tx.send(Outcome::Disconnected);
        }
        *self.state.lock().await = SessionState::default();
    }

    async fn deliver_progress(&self, request_id: &str, body: String) {
        {
            let waiters = self.waiters.lock().await;
            if let Some(waiter) = waiters.get(request_id) {
                let _ = waiter.progress_tx.send(body);
                return;
            }
        }
        self.buffer_early(request_id, |entry| entry.progress.push(body)).await;
    }

    /// Resolve a waiter if `accepts` matches its kind, else buffer.
    async fn deliver_outcome<F>(&self, request_id: &str, outcome: Outcome, accepts: F)
    where
        F: Fn(WaitKind) -> bool,
    {
        let waiter = {
            let mut waiters = self.waiters.lock().await;
            let kind = waiters.get(request_id).map(|w| w.kind);
            match kind {
                Some(kind) if accepts(kind) => waiters.remove(request_id),
                Some(_) => return, // not for this waiter kind; drop
                None => None,
            }
        };
        match waiter {
            Some(waiter) => {
                let _ = waiter.outcome_tx.send(outcome);
            }
            None => {
                self.buffer_early(request_id, |entry| entry.outcome = Some(outcome)).await;
            }
        }
    }

    async fn buffer_early<F: FnOnce(&mut EarlyEntry)>(&self, request_id: &str, apply: F) {
        let now = Instant::now();
        let mut early = self.early.lock().await;
        early.retain(|_, e| {
            e.at.map(|at| now.duration_since(at) < EARLY_BUFFER_TTL).unwrap_or(true)
        });
        if early.len() >= EARLY_BUFFER_MAX && !early.contains_key(request_id) {
            return;
        }
        let entry = early.entry(request_id.to_owned()).or_default();
        if entry.at.is_none() {
            entry.at = Some(now);
        }
        apply(entry);
    }
}

/// Attach the bridge to a relay URL: connect, say hello, pump frames, and
/// reconnect with capped backoff until shutdown.
pub fn spawn_connection(
    bridge: Arc<RelayBridge>,
    url: String,
    client_type: ClientType,
    mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        while !shutdown.is_cancelled() {
            match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok((ws, _)) => {
                    attempt = 0;
                    info!("connected to relay");
                    let (mut ws_tx, mut ws_rx) = ws.split();
                    let hello = Frame::ClientHello { client_type };
                    if ws_tx.send(Message::Text(hello.to_text().into())).await.is_err() {
                        continue;
                    }

                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                return;
                            }
                            frame = outbound_rx.recv() => {
                                match frame {
                                    Some(frame) => {
                                        if ws_tx
                                            .send(Message::Text(frame.to_text().into()))
                                            .await
                                            .is_err()
                                        {
                                            break;
                                        }
                                    }
                                    None => return,
                                }
                            }
                            msg = ws_rx.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        match parse_frame(&text) {
                                            Ok(frame) => bridge.handle_frame(frame).await,
                                            Err(e) => {
                                                warn!(err = %e, "undecodable frame, dropped");
                                            }
                                        }
                                    }
                                    Some(Ok(Message::Close(_))) | None => break,
                                    Some(Err(_)) => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                        }
                    }

                    bridge.on_disconnect().await;
                    warn!("relay connection lost");
                }
                Err(e) => {
                    debug!(err = %e, "relay connect failed");
                }
            }

            attempt += 1;
            let delay = Duration::from_millis((500 * u64::from(attempt)).min(10_000));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => break,
            }
        }
    });
}

#[cfg(test)]
#[path = "bridge_tests.rs"]
mod tests;
