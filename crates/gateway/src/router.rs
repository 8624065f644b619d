// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-chat command router.
//!
//! Each `channel:chatId` gets a serialized worker owning its interaction
//! state: control vs passthrough mode, the selected terminal, the pending
//! capture menu, and the in-flight request. Plain text is either a gateway
//! command (control) or terminal input (passthrough); slash commands go to
//! the agent as `tfclaw.command` text verbatim.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use tfclaw_proto::wire::{CaptureSource, CommandPayload, SessionState, TerminalSummary};

use crate::bridge::{Outcome, RelayBridge, WaitKind};
use crate::chat::{ChatEvent, ChatPlatform};
use crate::config::GatewayConfig;
use crate::dedup::InboundDedup;
use crate::discovery::discover;
use crate::progress::{ProgressSession, StreamMode};

/// Reaction added to accepted commands.
const ACK_REACTION: &str = "👀";
/// Pending capture menus expire after this long.
const CAPTURE_MENU_TTL: std::time::Duration = std::time::Duration::from_secs(120);
/// Ack wait for typed terminal commands (create/close/input).
const ACK_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Interaction mode of a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Control,
    Passthrough,
}

impl Mode {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Passthrough => "passthrough",
        }
    }
}

/// Numbered capture menu offered to the chat.
#[derive(Debug, Clone)]
pub struct CaptureMenu {
    pub sources: Vec<CaptureSource>,
    pub expires: Instant,
}

/// Per-chat interpreter state.
pub struct ChatState {
    pub mode: Mode,
    pub pane_target: Option<String>,
    pub stream_mode: StreamMode,
    pub selected_terminal: Option<String>,
    pub capture_menu: Option<CaptureMenu>,
    pub active: Option<ProgressSession>,
}

impl Default for ChatState {
    fn default() -> Self {
        Self {
            mode: Mode::Control,
            pane_target: None,
            stream_mode: StreamMode::Auto,
            selected_terminal: None,
            capture_menu: None,
            active: None,
        }
    }
}

/// One chat's handle: its state plus the serialized event queue.
pub struct ChatHandle {
    pub channel: String,
    pub chat_id: String,
    pub key: String,
    pub state: Mutex<ChatState>,
    queue: mpsc::UnboundedSender<ChatEvent>,
}

/// The gateway router shared across chats.
pub struct Router {
    platform: Arc<dyn ChatPlatform>,
    bridge: Arc<RelayBridge>,
    config: GatewayConfig,
    dedup: InboundDedup,
    chats: parking_lot::Mutex<HashMap<String, Arc<ChatHandle>>>,
}

impl Router {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        bridge: Arc<RelayBridge>,
        config: GatewayConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            platform,
            bridge,
            config,
            dedup: InboundDedup::default(),
            chats: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    /// Entry point for inbound chat events: dedup, allowlist, then enqueue
    /// onto the chat's serialized worker.
    pub fn dispatch(self: &Arc<Self>, event: ChatEvent) {
        if !self.dedup.insert(&event.message_id) {
            debug!(id = %event.message_id, "duplicate inbound event dropped");
            return;
        }
        let allowlist = self.config.user_allowlist();
        if !allowlist.is_empty() && !allowlist.iter().any(|u| u == &event.user_id) {
            warn!(user = %event.user_id, "user not in allowlist, ignoring");
            return;
        }

        let chat = self.chat_handle(&event);
        let _ = chat.queue.send(event);
    }

    fn chat_handle(self: &Arc<Self>, event: &ChatEvent) -> Arc<ChatHandle> {
        let key = event.session_key();
        let mut chats = self.chats.lock();
        if let Some(chat) = chats.get(&key) {
            return Arc::clone(chat);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<ChatEvent>();
        let chat = Arc::new(ChatHandle {
            channel: event.channel.clone(),
            chat_id: event.chat_id.clone(),
            key: key.clone(),
            state: Mutex::new(ChatState::default()),
            queue: tx,
        });
        chats.insert(key, Arc::clone(&chat));

        let router = Arc::clone(self);
        let worker_chat = Arc::clone(&chat);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                router.handle_event(&worker_chat, event).await;
            }
        });
        chat
    }

    /// Handle one event for a chat, in order.
    pub async fn handle_event(self: &Arc<Self>, chat: &Arc<ChatHandle>, event: ChatEvent) {
        let text = event.text.trim().to_owned();
        if text.is_empty() {
            return;
        }

        if self.config.react_on_command {
            let _ = self
                .platform
                .add_reaction(&event.channel, &event.chat_id, &event.message_id, ACK_REACTION)
                .await;
        }

        // A bare number answers a pending capture menu regardless of mode.
        if let Ok(selection) = text.parse::<usize>() {
            if self.try_capture_selection(chat, selection).await {
                return;
            }
        }

        let mode = chat.state.lock().await.mode;
        match mode {
            Mode::Passthrough => self.handle_passthrough(chat, &text).await,
            Mode::Control => self.handle_control(chat, &text).await,
        }
    }

    async fn handle_passthrough(self: &Arc<Self>, chat: &Arc<ChatHandle>, text: &str) {
        if text == ".exit" {
            chat.state.lock().await.mode = Mode::Control;
            self.reply(chat, "passthrough disabled.").await;
            return;
        }
        if let Some(stripped) = text.strip_prefix("//") {
            // Literal-slash passthrough.
            self.run_tfclaw(chat, format!("/tmux send /{stripped}")).await;
            return;
        }
        if text.starts_with('/') || text.starts_with('.') {
            self.handle_control(chat, text).await;
            return;
        }
        self.run_tfclaw(chat, format!("/tmux send {text}")).await;
    }

    async fn handle_control(self: &Arc<Self>, chat: &Arc<ChatHandle>, text: &str) {
        let (cmd, rest) = match text.split_once(char::is_whitespace) {
            Some((c, r)) => (c, r.trim()),
            None => (text, ""),
        };

        match cmd {
            "help" => self.reply(chat, &help_text()).await,
            "state" => {
                let body = self.state_text(chat).await;
                self.reply(chat, &body).await;
            }
            "list" => {
                let body = self.list_text().await;
                self.reply(chat, &body).await;
            }
            "new" => {
                self.run_typed(
                    chat,
                    CommandPayload::TerminalCreate { title: none_if_empty(rest), cwd: None },
                    "terminal requested",
                )
                .await;
            }
            "use" => {
                if rest.is_empty() {
                    self.reply(chat, "usage: use <terminal>").await;
                    return;
                }
                self.select_and_target(chat, rest).await;
            }
            "attach" => {
                if !rest.is_empty() && !self.select_and_target(chat, rest).await {
                    return;
                }
                self.run_tfclaw(chat, "/passthrough on".to_owned()).await;
            }
            "close" => {
                let reference = if rest.is_empty() {
                    chat.state.lock().await.selected_terminal.clone()
                } else {
                    Some(rest.to_owned())
                };
                let Some(reference) = reference else {
                    self.reply(chat, "usage: close <terminal>").await;
                    return;
                };
                let Some(summary) = self.resolve_ref(&reference).await else {
                    self.reply(chat, &format!("terminal not found: {reference}")).await;
                    return;
                };
                self.run_typed(
                    chat,
                    CommandPayload::TerminalClose { terminal_id: summary.terminal_id },
                    "terminal closed",
                )
                .await;
            }
            "key" => {
                if rest.is_empty() {
                    self.reply(chat, "usage: key <keyspec>").await;
                    return;
                }
                self.run_tfclaw(chat, format!("/tmux key {rest}")).await;
            }
            "ctrlc" => self.run_tfclaw(chat, "/tmux key ctrlc".to_owned()).await,
            "ctrld" => self.run_tfclaw(chat, "/tmux key ctrld".to_owned()).await,
            "capture" | "/capture" => self.run_capture_list(chat).await,
            _ if is_tfclaw_alias(text) => self.run_tfclaw(chat, text.to_owned()).await,
            _ => {
                // `<terminalRef>: <line>` directs one line at a terminal.
                if let Some((reference, line)) = text.split_once(':') {
                    let reference = reference.trim();
                    let line = line.trim_start();
                    if !reference.is_empty() && !line.is_empty() {
                        self.direct_line(chat, reference, line).await;
                        return;
                    }
                }
                self.reply(chat, &format!("unknown command: {cmd} (try help)")).await;
            }
        }
    }

    /// Resolve a ref locally and set both the gateway selection and, via the
    /// agent, the tmux target. Returns false when the ref does not resolve.
    async fn select_and_target(self: &Arc<Self>, chat: &Arc<ChatHandle>, reference: &str) -> bool {
        let Some(summary) = self.resolve_ref(reference).await else {
            self.reply(chat, &format!("terminal not found: {reference}")).await;
            return false;
        };
        chat.state.lock().await.selected_terminal = Some(summary.terminal_id.clone());
        self.run_tfclaw(chat, format!("/tmux use {}", summary.title)).await;
        true
    }

    /// `<ref>: <line>`: a single input line for one terminal.
    async fn direct_line(self: &Arc<Self>, chat: &Arc<ChatHandle>, reference: &str, line: &str) {
        let Some(summary) = self.resolve_ref(reference).await else {
            self.reply(chat, &format!("terminal not found: {reference}")).await;
            return;
        };
        let payload = CommandPayload::TerminalInput {
            terminal_id: summary.terminal_id,
            data: format!("{line}\n"),
        };
        match self.bridge.send_command(payload) {
            Ok(_) => self.reply(chat, &format!("→ {}", summary.title)).await,
            Err(e) => self.reply(chat, &format!("command failed: {e}")).await,
        }
    }

    /// Resolve a terminal ref against the cached relay state:
    /// exact id, exact title, then 1-based index.
    async fn resolve_ref(&self, reference: &str) -> Option<TerminalSummary> {
        let state = self.bridge.session_state().await;
        resolve_terminal_ref(&state, reference)
    }

    /// Send a typed command and report the relay's ack.
    async fn run_typed(
        self: &Arc<Self>,
        chat: &Arc<ChatHandle>,
        payload: CommandPayload,
        done_message: &str,
    ) {
        let request_id = match self.bridge.send_command(payload) {
            Ok(id) => id,
            Err(e) => {
                self.reply(chat, &format!("command failed: {e}")).await;
                return;
            }
        };
        let (outcome_rx, _progress_rx) =
            self.bridge.register_waiter(&request_id, WaitKind::Ack).await;
        match self.bridge.await_outcome(&request_id, outcome_rx, ACK_TIMEOUT).await {
            Ok(Outcome::Ack { .. }) => self.reply(chat, done_message).await,
            Ok(Outcome::Refused { message }) | Ok(Outcome::AgentFailure { message, .. }) => {
                self.reply(chat, &format!("command failed: {message}")).await;
            }
            Ok(Outcome::Disconnected) => {
                self.reply(chat, "command failed: relay disconnected").await;
            }
            Ok(_) => self.reply(chat, done_message).await,
            Err(e) => self.reply(chat, &format!("command failed: {e}")).await,
        }
    }

    /// Forward `tfclaw.command` text and coalesce its streamed progress.
    async fn run_tfclaw(self: &Arc<Self>, chat: &Arc<ChatHandle>, text: String) {
        let request_id = match self.bridge.send_command(CommandPayload::TfclawCommand {
            text,
            session_key: chat.key.clone(),
        }) {
            Ok(id) => id,
            Err(e) => {
                self.reply(chat, &format!("command failed: {e}")).await;
                return;
            }
        };

        let (outcome_rx, mut progress_rx) =
            self.bridge.register_waiter(&request_id, WaitKind::Command).await;

        let (mode_tag, session) = {
            let mut state = chat.state.lock().await;
            // One in-flight request per chat: a newer command stops the
            // previous progress session.
            if let Some(old) = state.active.take() {
                old.stop();
            }
            let session = ProgressSession::open(
                Arc::clone(&self.platform),
                chat.channel.clone(),
                chat.chat_id.clone(),
                request_id.clone(),
                state.stream_mode,
                self.config.recall_delay(),
            );
            state.active = Some(session.clone());
            (state.mode.tag(), session)
        };

        // Await the result off the worker so new chat events (and
        // replacement commands) keep flowing. Progress and the outcome are
        // consumed by one task with progress polled first, so the final
        // reply always lands after every streamed update.
        let router = Arc::clone(self);
        let chat = Arc::clone(chat);
        let timeout = self.config.command_timeout();
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout);
            tokio::pin!(deadline);
            let mut outcome_rx = outcome_rx;
            let mut progress_open = true;

            let outcome = loop {
                tokio::select! {
                    biased;
                    body = progress_rx.recv(), if progress_open => {
                        match body {
                            Some(body) => session.update(format!("[mode] {mode_tag}\n{body}")),
                            None => progress_open = false,
                        }
                    }
                    result = &mut outcome_rx => {
                        break result.map_err(|_| "relay disconnected");
                    }
                    _ = &mut deadline => break Err("command timeout"),
                }
            };
            router.bridge.remove_waiter(&request_id).await;

            let reply = {
                let mut state = chat.state.lock().await;
                let reply = match outcome {
                    Ok(Outcome::Result { output }) => {
                        apply_discovery(&mut state, &output);
                        format!("[mode] {}\n{output}", state.mode.tag())
                    }
                    Ok(Outcome::Refused { message })
                    | Ok(Outcome::AgentFailure { message, .. }) => {
                        format!("[mode] {}\ncommand failed: {message}", state.mode.tag())
                    }
                    Ok(Outcome::Disconnected) => {
                        format!("[mode] {}\ncommand failed: relay disconnected", state.mode.tag())
                    }
                    Ok(other) => {
                        format!("[mode] {}\ncommand finished: {other:?}", state.mode.tag())
                    }
                    Err(e) => format!("[mode] {}\ncommand failed: {e}", state.mode.tag()),
                };
                if state.active.as_ref().map(|s| s.request_id == request_id).unwrap_or(false) {
                    state.active = None;
                }
                reply
            };
            session.finish(reply);
        });
    }

    /// `/capture`: fetch sources and offer a numbered menu.
    async fn run_capture_list(self: &Arc<Self>, chat: &Arc<ChatHandle>) {
        let request_id = match self.bridge.send_command(CommandPayload::CaptureList {}) {
            Ok(id) => id,
            Err(e) => {
                self.reply(chat, &format!("command failed: {e}")).await;
                return;
            }
        };
        let (outcome_rx, _progress_rx) =
            self.bridge.register_waiter(&request_id, WaitKind::CaptureList).await;
        let outcome = self
            .bridge
            .await_outcome(&request_id, outcome_rx, self.config.capture_list_timeout())
            .await;

        match outcome {
            Ok(Outcome::CaptureSources(sources)) if !sources.is_empty() => {
                let menu: Vec<String> = sources
                    .iter()
                    .enumerate()
                    .map(|(i, s)| format!("{}. {} ({:?})", i + 1, s.label, s.source))
                    .collect();
                let body =
                    format!("capture sources:\n{}\nreply with a number to capture", menu.join("\n"));
                chat.state.lock().await.capture_menu =
                    Some(CaptureMenu { sources, expires: Instant::now() + CAPTURE_MENU_TTL });
                self.reply(chat, &body).await;
            }
            Ok(Outcome::CaptureSources(_)) => {
                self.reply(chat, "no capture sources available").await;
            }
            Ok(Outcome::Refused { message }) | Ok(Outcome::AgentFailure { message, .. }) => {
                self.reply(chat, &format!("command failed: {message}")).await;
            }
            Err("command timeout") => self.reply(chat, "capture source list timeout").await,
            Ok(other) => {
                self.reply(chat, &format!("command failed: unexpected reply {other:?}")).await;
            }
            Err(e) => self.reply(chat, &format!("command failed: {e}")).await,
        }
    }

    /// Bare-number reply against a pending capture menu. Returns true when
    /// the number was consumed by the menu flow.
    async fn try_capture_selection(
        self: &Arc<Self>,
        chat: &Arc<ChatHandle>,
        selection: usize,
    ) -> bool {
        let (source, terminal_id) = {
            let mut state = chat.state.lock().await;
            let Some(menu) = state.capture_menu.as_ref() else {
                return false;
            };
            if Instant::now() > menu.expires {
                state.capture_menu = None;
                drop(state);
                self.reply(chat, "capture menu expired").await;
                return true;
            }
            if selection == 0 || selection > menu.sources.len() {
                let max = menu.sources.len();
                drop(state);
                self.reply(chat, &format!("invalid selection: {selection} (1-{max})")).await;
                return true;
            }
            let source = menu.sources[selection - 1].clone();
            state.capture_menu = None;
            (source, state.selected_terminal.clone())
        };

        let payload = CommandPayload::ScreenCapture {
            source: source.source,
            source_id: Some(source.source_id.clone()),
            terminal_id,
        };
        let request_id = match self.bridge.send_command(payload) {
            Ok(id) => id,
            Err(e) => {
                self.reply(chat, &format!("command failed: {e}")).await;
                return true;
            }
        };
        let (outcome_rx, _progress_rx) =
            self.bridge.register_waiter(&request_id, WaitKind::CaptureGrab).await;
        let outcome = self
            .bridge
            .await_outcome(&request_id, outcome_rx, self.config.capture_timeout())
            .await;

        match outcome {
            Ok(Outcome::Capture(capture)) => {
                let caption = format!("capture: {}", source.label);
                if let Err(e) = self
                    .platform
                    .send_image(
                        &chat.channel,
                        &chat.chat_id,
                        &capture.mime_type,
                        &capture.image_base64,
                        &caption,
                    )
                    .await
                {
                    self.reply(chat, &format!("image upload failed: {e}")).await;
                }
            }
            Ok(Outcome::Refused { message }) | Ok(Outcome::AgentFailure { message, .. }) => {
                self.reply(chat, &format!("command failed: {message}")).await;
            }
            Err("command timeout") => self.reply(chat, "capture timeout").await,
            Ok(other) => {
                self.reply(chat, &format!("command failed: unexpected reply {other:?}")).await;
            }
            Err(e) => self.reply(chat, &format!("command failed: {e}")).await,
        }
        true
    }

    /// Post a reply with the `[mode] <tag>` header.
    async fn reply(&self, chat: &Arc<ChatHandle>, body: &str) {
        let tag = chat.state.lock().await.mode.tag();
        let text = format!("[mode] {tag}\n{body}");
        if let Err(e) = self.platform.send_message(&chat.channel, &chat.chat_id, &text).await {
            warn!(err = %e, "chat send failed");
        }
    }

    async fn state_text(&self, chat: &Arc<ChatHandle>) -> String {
        let relay = self.bridge.session_state().await;
        let state = chat.state.lock().await;
        let selected = match state.selected_terminal {
            Some(ref id) => relay
                .terminals
                .iter()
                .find(|t| &t.terminal_id == id)
                .map(|t| t.title.clone())
                .unwrap_or_else(|| id.clone()),
            None => "none".to_owned(),
        };
        format!(
            "mode: {}\ntarget: {}\nstream_mode: {}\nselected: {selected}\nagent: {}\nterminals: {}",
            state.mode.tag(),
            state.pane_target.as_deref().unwrap_or("none"),
            state.stream_mode.as_str(),
            if relay.agent.is_some() { "connected" } else { "absent" },
            relay.terminals.len(),
        )
    }

    async fn list_text(&self) -> String {
        let state = self.bridge.session_state().await;
        if state.terminals.is_empty() {
            return "no terminals".to_owned();
        }
        state
            .terminals
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let marker = if t.is_active { "" } else { " (inactive)" };
                format!("{}. {}{marker}", i + 1, t.title)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Apply discovered state changes to a chat.
pub fn apply_discovery(state: &mut ChatState, output: &str) {
    let found = discover(output);
    if let Some(on) = found.passthrough {
        state.mode = if on { Mode::Passthrough } else { Mode::Control };
    }
    if let Some(target) = found.target {
        state.pane_target = Some(target);
    }
    if let Some(mode) = found.stream_mode {
        state.stream_mode = mode;
    }
}

/// Resolve a terminal ref: exact id, exact title, then 1-based index.
pub fn resolve_terminal_ref(state: &SessionState, reference: &str) -> Option<TerminalSummary> {
    if let Some(t) = state.terminals.iter().find(|t| t.terminal_id == reference) {
        return Some(t.clone());
    }
    if let Some(t) = state.terminals.iter().find(|t| t.title == reference) {
        return Some(t.clone());
    }
    if let Ok(index) = reference.parse::<usize>() {
        if index >= 1 {
            return state.terminals.get(index - 1).cloned();
        }
    }
    None
}

/// Slash text the agent's interpreter understands, forwarded verbatim:
/// `/tmux …`, `/passthrough …`, `/pt …`, and the `/t<sub>` shorthands.
fn is_tfclaw_alias(text: &str) -> bool {
    text.starts_with("/tmux") || text.starts_with("/passthrough") || text.starts_with("/t")
        || text == "/pt"
        || text.starts_with("/pt ")
}

fn none_if_empty(s: &str) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s.to_owned())
    }
}

fn help_text() -> String {
    [
        "tfclaw gateway commands:",
        "  help                 this message",
        "  state                chat + agent state",
        "  list                 list terminals",
        "  new [title]          create a terminal",
        "  use <terminal>       select a terminal (id, title, or number)",
        "  attach [terminal]    select and enter passthrough mode",
        "  close [terminal]     close a terminal",
        "  key <keyspec>        send a key (ctrlc, ctrld, ctrlz, enter)",
        "  ctrlc / ctrld        shorthand for key",
        "  capture              list capture sources, reply with a number",
        "  <terminal>: <text>   one input line for a specific terminal",
        "  /tmux …              forwarded to the agent verbatim",
        "  .exit                leave passthrough mode",
    ]
    .join("\n")
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
