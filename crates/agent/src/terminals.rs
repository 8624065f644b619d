// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Logical terminals: the UUID-keyed map of tmux windows, the capture poll
//! sweep, and the streaming delta pipeline.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex, RwLock};

use tfclaw_proto::epoch_ms;
use tfclaw_proto::tailcap::{append_capped, tail_cap};
use tfclaw_proto::wire::{Frame, TerminalSummary};

use crate::delta::compute_delta;
use crate::error::{AgentError, AgentErrorCode};
use crate::input::{parse_input_actions, InputAction};
use crate::tmux::{sanitize_window_name, Tmux, TmuxError};

/// Transient capture failures are reported at most once per terminal per
/// this many milliseconds.
const CAPTURE_ERROR_THROTTLE_MS: u64 = 5_000;

/// Buffer and capture knobs, derived from the agent config.
#[derive(Debug, Clone)]
pub struct TerminalLimits {
    pub capture_lines: u32,
    pub max_delta_chars: usize,
    pub max_local_buffer: usize,
}

/// Mutable per-terminal state, guarded by the entry's lock.
#[derive(Debug, Default)]
pub struct TerminalState {
    pub output_buffer: String,
    pub last_capture: String,
    pub updated_at: u64,
    pub is_active: bool,
    pub foreground_command: Option<String>,
    last_capture_error_ms: u64,
}

/// One logical terminal bound to a tmux window/pane pair.
pub struct TerminalEntry {
    pub id: String,
    pub title: String,
    pub cwd: Option<String>,
    pub window_id: String,
    pub pane_id: String,
    pub state: Mutex<TerminalState>,
    /// Serializes multiplexer sends within this pane.
    send_lock: Mutex<()>,
}

impl TerminalEntry {
    async fn summary(&self) -> TerminalSummary {
        let state = self.state.lock().await;
        TerminalSummary {
            terminal_id: self.id.clone(),
            title: self.title.clone(),
            cwd: self.cwd.clone(),
            is_active: state.is_active,
            updated_at: state.updated_at,
            foreground_command: state.foreground_command.clone(),
        }
    }
}

/// Owner of the terminal map and the non-reentrant poll sweep.
pub struct TerminalManager {
    tmux: Arc<Tmux>,
    limits: TerminalLimits,
    terminals: RwLock<IndexMap<String, Arc<TerminalEntry>>>,
    outbound: mpsc::UnboundedSender<Frame>,
    sweeping: AtomicBool,
    created: AtomicU64,
}

impl TerminalManager {
    pub fn new(
        tmux: Arc<Tmux>,
        limits: TerminalLimits,
        outbound: mpsc::UnboundedSender<Frame>,
    ) -> Self {
        Self {
            tmux,
            limits,
            terminals: RwLock::new(IndexMap::new()),
            outbound,
            sweeping: AtomicBool::new(false),
            created: AtomicU64::new(0),
        }
    }

    fn send(&self, frame: Frame) {
        let _ = self.outbound.send(frame);
    }

    fn emit_output(&self, terminal_id: &str, chunk: String) {
        self.send(Frame::AgentTerminalOutput {
            terminal_id: terminal_id.to_owned(),
            chunk,
            at: epoch_ms(),
        });
    }

    pub fn emit_error(&self, code: AgentErrorCode, message: String, request_id: Option<String>) {
        self.send(Frame::AgentError { code: code.as_str().to_owned(), message, request_id });
    }

    /// Compose and publish the current summary list.
    pub async fn publish_terminal_list(&self) {
        let terminals = self.summaries().await;
        self.send(Frame::AgentTerminalList { terminals });
    }

    pub async fn summaries(&self) -> Vec<TerminalSummary> {
        let entries: Vec<Arc<TerminalEntry>> =
            self.terminals.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            summaries.push(entry.summary().await);
        }
        summaries
    }

    pub async fn get(&self, terminal_id: &str) -> Option<Arc<TerminalEntry>> {
        self.terminals.read().await.get(terminal_id).cloned()
    }

    /// Spawn a window and register it as a terminal. Publishes the updated
    /// summary list and streams a synthetic creation notice.
    pub async fn create_terminal(
        &self,
        title: Option<&str>,
        cwd: Option<&str>,
    ) -> Result<Arc<TerminalEntry>, AgentError> {
        let seq = self.created.fetch_add(1, Ordering::Relaxed) + 1;
        let title = match title.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => t.to_owned(),
            None => format!("terminal {seq}"),
        };
        let window_name = sanitize_window_name(&title);

        let (window_id, pane_id) = self
            .tmux
            .new_window(&window_name, cwd)
            .await
            .map_err(|e| AgentError::new(AgentErrorCode::TmuxCreateFailed, e.to_string()))?;

        let entry = Arc::new(TerminalEntry {
            id: tfclaw_proto::new_id(),
            title: title.clone(),
            cwd: cwd.map(str::to_owned),
            window_id,
            pane_id,
            state: Mutex::new(TerminalState {
                is_active: true,
                updated_at: epoch_ms(),
                ..TerminalState::default()
            }),
            send_lock: Mutex::new(()),
        });

        self.terminals.write().await.insert(entry.id.clone(), Arc::clone(&entry));
        tracing::info!(terminal = %entry.id, title = %title, "terminal created");

        self.emit_output(&entry.id, format!("[created {title}]\n"));
        self.publish_terminal_list().await;
        Ok(entry)
    }

    /// Kill the backing window and remove the terminal. Missing windows are
    /// not failures.
    pub async fn close_terminal(&self, terminal_id: &str) -> Result<(), AgentError> {
        let entry = self
            .get(terminal_id)
            .await
            .ok_or_else(|| not_found(terminal_id))?;

        self.tmux
            .kill_window(&entry.window_id)
            .await
            .map_err(|e| AgentError::new(AgentErrorCode::TmuxCommandFailed, e.to_string()))?;

        self.terminals.write().await.shift_remove(terminal_id);
        tracing::info!(terminal = %terminal_id, "terminal closed");
        self.publish_terminal_list().await;
        Ok(())
    }

    /// Translate and submit an input string to the terminal's pane.
    pub async fn write_input(&self, terminal_id: &str, data: &str) -> Result<(), AgentError> {
        let entry = self
            .get(terminal_id)
            .await
            .ok_or_else(|| not_found(terminal_id))?;

        let actions = parse_input_actions(data);
        let _guard = entry.send_lock.lock().await;
        for action in &actions {
            let result = match action {
                InputAction::Literal(text) => self.tmux.send_literal(&entry.pane_id, text).await,
                InputAction::Key(key) => self.tmux.send_key(&entry.pane_id, key.tmux_name()).await,
            };
            result.map_err(|e| AgentError::new(AgentErrorCode::TmuxCommandFailed, e.to_string()))?;
        }
        entry.state.lock().await.updated_at = epoch_ms();
        Ok(())
    }

    /// One capture sweep across all active terminals. Strictly non-reentrant:
    /// a tick that lands during a running sweep is skipped.
    pub async fn poll_once(&self) {
        if self.sweeping.swap(true, Ordering::SeqCst) {
            return;
        }
        let entries: Vec<Arc<TerminalEntry>> =
            self.terminals.read().await.values().cloned().collect();
        for entry in entries {
            if entry.state.lock().await.is_active {
                self.poll_entry(&entry, true).await;
            }
        }
        self.sweeping.store(false, Ordering::SeqCst);
    }

    /// Immediately poll a single terminal (outside the sweep guard).
    pub async fn poll_terminal(&self, terminal_id: &str) {
        if let Some(entry) = self.get(terminal_id).await {
            self.poll_entry(&entry, true).await;
        }
    }

    /// Refresh `last_capture` for every active terminal without emitting
    /// deltas. Used at startup and after reconnects so the next real output
    /// produces a clean suffix delta.
    pub async fn refresh_silent(&self) {
        let entries: Vec<Arc<TerminalEntry>> =
            self.terminals.read().await.values().cloned().collect();
        for entry in entries {
            if entry.state.lock().await.is_active {
                self.poll_entry(&entry, false).await;
            }
        }
    }

    async fn poll_entry(&self, entry: &Arc<TerminalEntry>, emit: bool) {
        let capture = self.tmux.capture_pane(&entry.pane_id, self.limits.capture_lines).await;
        match capture {
            Ok(next) => {
                let chunk = {
                    let mut state = entry.state.lock().await;
                    let chunk =
                        compute_delta(&state.last_capture, &next, self.limits.max_delta_chars);
                    state.last_capture =
                        tail_cap(&next, self.limits.max_local_buffer).to_owned();
                    if let Some(ref chunk) = chunk {
                        append_capped(&mut state.output_buffer, chunk, self.limits.max_local_buffer);
                        state.updated_at = epoch_ms();
                    }
                    chunk
                };
                if emit {
                    if let Some(chunk) = chunk {
                        self.emit_output(&entry.id, chunk);
                    }
                }
            }
            Err(ref err) if err.is_pane_missing() => {
                self.mark_pane_closed(entry, "pane not found").await;
            }
            Err(err) => {
                self.report_capture_error(entry, &err).await;
            }
        }
    }

    /// Flip the terminal inactive, stream the closure notice, republish.
    async fn mark_pane_closed(&self, entry: &Arc<TerminalEntry>, reason: &str) {
        {
            let mut state = entry.state.lock().await;
            if !state.is_active {
                return;
            }
            state.is_active = false;
            state.updated_at = epoch_ms();
            let notice = format!("\n[tmux pane closed: {reason}]\n");
            append_capped(&mut state.output_buffer, &notice, self.limits.max_local_buffer);
        }
        tracing::warn!(terminal = %entry.id, reason, "pane closed");
        self.emit_output(&entry.id, format!("\n[tmux pane closed: {reason}]\n"));
        self.publish_terminal_list().await;
    }

    /// Throttled `agent.error` for transient capture failures.
    async fn report_capture_error(&self, entry: &Arc<TerminalEntry>, err: &TmuxError) {
        let now = epoch_ms();
        {
            let mut state = entry.state.lock().await;
            if now.saturating_sub(state.last_capture_error_ms) < CAPTURE_ERROR_THROTTLE_MS {
                return;
            }
            state.last_capture_error_ms = now;
        }
        tracing::warn!(terminal = %entry.id, err = %err, "capture failed");
        self.emit_error(
            AgentErrorCode::TmuxCaptureFailed,
            format!("capture failed for {}: {err}", entry.id),
            None,
        );
    }

    /// Refresh each active terminal's foreground command before publishing.
    pub async fn refresh_foreground_commands(&self) {
        let entries: Vec<Arc<TerminalEntry>> =
            self.terminals.read().await.values().cloned().collect();
        for entry in entries {
            let cmd = self.tmux.pane_command(&entry.pane_id).await;
            let mut state = entry.state.lock().await;
            if state.is_active {
                state.foreground_command = cmd;
            }
        }
    }
}

fn not_found(terminal_id: &str) -> AgentError {
    AgentError::new(AgentErrorCode::TerminalNotFound, format!("terminal not found: {terminal_id}"))
}

#[cfg(test)]
#[path = "terminals_tests.rs"]
mod tests;
