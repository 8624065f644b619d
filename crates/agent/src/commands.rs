// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interpreter for `tfclaw.command` text, keyed by chat session.
//!
//! Chat gateways forward slash-command text verbatim; each session key gets
//! its own target terminal, passthrough flag, and stream settings. Replies
//! use fixed phrasings ("passthrough enabled.", "Target set to `…`",
//! "stream_mode …") that clients pattern-match to track state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use tfclaw_proto::wire::Frame;

use crate::error::{AgentError, AgentErrorCode};
use crate::terminals::TerminalManager;

/// How streamed command output is delivered to the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Auto,
    On,
    Off,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

/// Per-chat interpreter state.
#[derive(Debug, Clone)]
struct CommandSession {
    target: Option<String>,
    passthrough: bool,
    stream_mode: StreamMode,
    capture_lines: usize,
    wait_ms: u64,
}

impl Default for CommandSession {
    fn default() -> Self {
        Self {
            target: None,
            passthrough: false,
            stream_mode: StreamMode::Auto,
            capture_lines: 40,
            wait_ms: 5_000,
        }
    }
}

/// Stateful `tfclaw.command` router shared by all chat sessions.
pub struct CommandRouter {
    manager: Arc<TerminalManager>,
    outbound: mpsc::UnboundedSender<Frame>,
    sessions: Mutex<HashMap<String, CommandSession>>,
    progress_poll: Duration,
}

impl CommandRouter {
    pub fn new(manager: Arc<TerminalManager>, outbound: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            manager,
            outbound,
            sessions: Mutex::new(HashMap::new()),
            progress_poll: Duration::from_millis(1_000),
        }
    }

    fn emit_result(&self, request_id: &str, output: String, progress: bool) {
        let _ = self.outbound.send(Frame::AgentCommandResult {
            request_id: request_id.to_owned(),
            output,
            progress: progress.then_some(true),
            progress_source: progress.then(|| "tmux".to_owned()),
        });
    }

    fn emit_error(&self, request_id: &str, err: &AgentError) {
        let _ = self.outbound.send(Frame::AgentError {
            code: err.code.as_str().to_owned(),
            message: err.message.clone(),
            request_id: Some(request_id.to_owned()),
        });
    }

    /// Interpret one command; emits progress and the final result.
    pub async fn handle(&self, request_id: &str, session_key: &str, text: &str) {
        match self.run(request_id, session_key, text).await {
            Ok(output) => self.emit_result(request_id, output, false),
            Err(err) => self.emit_error(request_id, &err),
        }
    }

    async fn run(
        &self,
        request_id: &str,
        session_key: &str,
        text: &str,
    ) -> Result<String, AgentError> {
        let (cmd, args) = normalize(text)
            .ok_or_else(|| bad_command(format!("unrecognized command: {text}")))?;

        match cmd {
            Cmd::Help => Ok(help_text()),
            Cmd::State => self.state_text(session_key).await,
            Cmd::List => self.list_text().await,
            Cmd::Use => self.set_target(session_key, args).await,
            Cmd::Send => self.run_send(request_id, session_key, args).await,
            Cmd::Key => self.run_key(session_key, args).await,
            Cmd::CaptureLines => self.set_capture_lines(session_key, args).await,
            Cmd::Wait => self.set_wait(session_key, args).await,
            Cmd::StreamMode => self.set_stream_mode(session_key, args).await,
            Cmd::Passthrough => self.set_passthrough(session_key, args).await,
        }
    }

    async fn session(&self, key: &str) -> CommandSession {
        self.sessions.lock().await.entry(key.to_owned()).or_default().clone()
    }

    async fn update_session<F: FnOnce(&mut CommandSession)>(&self, key: &str, f: F) {
        let mut sessions = self.sessions.lock().await;
        f(sessions.entry(key.to_owned()).or_default());
    }

    async fn state_text(&self, key: &str) -> Result<String, AgentError> {
        let session = self.session(key).await;
        let target = match session.target {
            Some(ref id) => self
                .manager
                .get(id)
                .await
                .map(|e| e.title.clone())
                .unwrap_or_else(|| id.clone()),
            None => "none".to_owned(),
        };
        Ok(format!(
            "[tmux {target}]\npassthrough {}\nstream_mode {}\ncapture_lines {}\nwait {}ms",
            if session.passthrough { "enabled." } else { "disabled." },
            session.stream_mode.as_str(),
            session.capture_lines,
            session.wait_ms,
        ))
    }

    async fn list_text(&self) -> Result<String, AgentError> {
        let summaries = self.manager.summaries().await;
        if summaries.is_empty() {
            return Ok("no terminals".to_owned());
        }
        let lines: Vec<String> = summaries
            .iter()
            .enumerate()
            .map(|(i, s)| {
                let marker = if s.is_active { "" } else { " (inactive)" };
                format!("{}. {}{marker}", i + 1, s.title)
            })
            .collect();
        Ok(lines.join("\n"))
    }

    /// Resolve a terminal ref: exact id, exact title, then 1-based index.
    async fn resolve_ref(&self, reference: &str) -> Option<String> {
        let summaries = self.manager.summaries().await;
        if let Some(s) = summaries.iter().find(|s| s.terminal_id == reference) {
            return Some(s.terminal_id.clone());
        }
        if let Some(s) = summaries.iter().find(|s| s.title == reference) {
            return Some(s.terminal_id.clone());
        }
        if let Ok(index) = reference.parse::<usize>() {
            if index >= 1 {
                return summaries.get(index - 1).map(|s| s.terminal_id.clone());
            }
        }
        None
    }

    async fn set_target(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let reference = args.trim();
        if reference.is_empty() {
            return Err(bad_command("usage: /tmux use <terminal>"));
        }
        let id = self
            .resolve_ref(reference)
            .await
            .ok_or_else(|| bad_command(format!("terminal not found: {reference}")))?;
        let title = self
            .manager
            .get(&id)
            .await
            .map(|e| e.title.clone())
            .unwrap_or_else(|| id.clone());
        self.update_session(key, |s| s.target = Some(id)).await;
        Ok(format!("Target set to `{title}`"))
    }

    async fn target_entry(
        &self,
        key: &str,
    ) -> Result<Arc<crate::terminals::TerminalEntry>, AgentError> {
        let session = self.session(key).await;
        let id = session
            .target
            .ok_or_else(|| bad_command("no target terminal; use `/tmux use <terminal>` first"))?;
        self.manager.get(&id).await.ok_or_else(|| {
            AgentError::new(AgentErrorCode::TerminalNotFound, format!("terminal not found: {id}"))
        })
    }

    /// Type text into the target pane and stream the settling output.
    async fn run_send(
        &self,
        request_id: &str,
        key: &str,
        args: &str,
    ) -> Result<String, AgentError> {
        let entry = self.target_entry(key).await?;
        let session = self.session(key).await;
        let text = args.trim_end();
        if text.is_empty() {
            return Err(bad_command("usage: /tmux send <text>"));
        }

        self.manager.write_input(&entry.id, &format!("{text}\n")).await?;

        let deadline = tokio::time::Instant::now() + Duration::from_millis(session.wait_ms);
        let mut last_body = String::new();
        let mut stable = 0u32;
        loop {
            tokio::time::sleep(self.progress_poll).await;
            self.manager.poll_terminal(&entry.id).await;
            let body = self.render_capture(&entry, session.capture_lines).await;
            if body != last_body {
                stable = 0;
                last_body = body.clone();
                if tokio::time::Instant::now() < deadline {
                    self.emit_result(request_id, body, true);
                }
            } else if !last_body.is_empty() {
                stable += 1;
            }
            if tokio::time::Instant::now() >= deadline || stable >= 2 {
                break;
            }
        }
        Ok(self.render_capture(&entry, session.capture_lines).await)
    }

    async fn run_key(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let entry = self.target_entry(key).await?;
        let session = self.session(key).await;
        let keyspec = args.trim();
        if keyspec.is_empty() {
            return Err(bad_command("usage: /tmux key <keyspec>"));
        }
        // Unrecognized specs go through as literal text.
        let data = match keyspec {
            "ctrlc" | "C-c" => "__CTRL_C__",
            "ctrld" | "C-d" => "__CTRL_D__",
            "ctrlz" | "C-z" => "__CTRL_Z__",
            "enter" | "Enter" => "__ENTER__",
            other => other,
        };
        self.manager.write_input(&entry.id, data).await?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.manager.poll_terminal(&entry.id).await;
        Ok(self.render_capture(&entry, session.capture_lines).await)
    }

    async fn render_capture(
        &self,
        entry: &Arc<crate::terminals::TerminalEntry>,
        lines: usize,
    ) -> String {
        let state = entry.state.lock().await;
        let tail = tail_lines(&state.last_capture, lines);
        format!("[tmux {}]\n{tail}", entry.title)
    }

    async fn set_capture_lines(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let n: usize = args
            .trim()
            .parse()
            .map_err(|_| bad_command("usage: /tmux capture_lines <n>"))?;
        let n = n.clamp(1, 500);
        self.update_session(key, |s| s.capture_lines = n).await;
        Ok(format!("capture_lines {n}"))
    }

    async fn set_wait(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let ms: u64 = args.trim().parse().map_err(|_| bad_command("usage: /tmux wait <ms>"))?;
        let ms = ms.clamp(250, 600_000);
        self.update_session(key, |s| s.wait_ms = ms).await;
        Ok(format!("wait {ms}ms"))
    }

    async fn set_stream_mode(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let mode = StreamMode::parse(args.trim())
            .ok_or_else(|| bad_command("usage: /tmux stream_mode auto|on|off"))?;
        self.update_session(key, |s| s.stream_mode = mode).await;
        Ok(format!("stream_mode {}", mode.as_str()))
    }

    async fn set_passthrough(&self, key: &str, args: &str) -> Result<String, AgentError> {
        let on = match args.trim() {
            "on" | "" => true,
            "off" => false,
            other => return Err(bad_command(format!("usage: /passthrough on|off (got {other})"))),
        };
        self.update_session(key, |s| s.passthrough = on).await;
        Ok(if on { "passthrough enabled.".to_owned() } else { "passthrough disabled.".to_owned() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmd {
    Help,
    State,
    List,
    Use,
    Send,
    Key,
    CaptureLines,
    Wait,
    StreamMode,
    Passthrough,
}

/// Normalize the raw command text into `(command, args)`.
///
/// Accepted spellings: `/tmux <sub> [args]`, `/t<sub> [args]`,
/// `/passthrough [on|off]`, `/pt [on|off]`.
fn normalize(text: &str) -> Option<(Cmd, &str)> {
    let text = text.trim();
    let (head, args) = match text.split_once(' ') {
        Some((h, a)) => (h, a.trim_start()),
        None => (text, ""),
    };

    match head {
        "/passthrough" | "/pt" => return Some((Cmd::Passthrough, args)),
        "/tmux" => {
            let (sub, rest) = match args.split_once(' ') {
                Some((s, r)) => (s, r.trim_start()),
                None => (args, ""),
            };
            return sub_command(sub).map(|cmd| (cmd, rest));
        }
        _ => {}
    }

    // `/t<sub>` aliases: /tlist, /tuse x, /tsend text, ...
    if let Some(sub) = head.strip_prefix("/t") {
        if let Some(cmd) = sub_command(sub) {
            return Some((cmd, args));
        }
    }
    None
}

fn sub_command(sub: &str) -> Option<Cmd> {
    match sub {
        "help" | "" => Some(Cmd::Help),
        "state" => Some(Cmd::State),
        "list" => Some(Cmd::List),
        "use" => Some(Cmd::Use),
        "send" => Some(Cmd::Send),
        "key" => Some(Cmd::Key),
        "capture_lines" | "lines" => Some(Cmd::CaptureLines),
        "wait" => Some(Cmd::Wait),
        "stream_mode" => Some(Cmd::StreamMode),
        "passthrough" => Some(Cmd::Passthrough),
        _ => None,
    }
}

fn help_text() -> String {
    [
        "tfclaw tmux commands:",
        "  /tmux list                 list terminals",
        "  /tmux use <terminal>       pick the target terminal",
        "  /tmux send <text>          type text + Enter into the target",
        "  /tmux key <keyspec>        send a key (ctrlc, ctrld, ctrlz, enter)",
        "  /tmux state                show interpreter state",
        "  /tmux capture_lines <n>    lines shown per reply",
        "  /tmux wait <ms>            how long send waits for output",
        "  /tmux stream_mode <mode>   auto|on|off",
        "  /passthrough on|off        treat plain text as terminal input",
    ]
    .join("\n")
}

fn bad_command(message: impl Into<String>) -> AgentError {
    AgentError::new(AgentErrorCode::AgentCommandFailed, message)
}

/// Last `n` lines of a capture.
fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
