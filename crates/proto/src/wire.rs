// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire frame schema shared by all three processes.
//!
//! Every frame is a JSON object `{"type": "...", "payload": {...}}`. The
//! `type` tag discriminates; unknown tags are rejected by [`parse_frame`]
//! so each role can decide whether that is an error or merely unsupported.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host platform reported by the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
    Unknown,
}

impl Platform {
    /// Detect the platform of the running process.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Macos
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else {
            Self::Unknown
        }
    }
}

/// Identity an agent reports when it joins a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub platform: Platform,
    pub hostname: String,
    pub connected_at: u64,
}

/// One logical terminal as listed by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSummary {
    pub terminal_id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    pub is_active: bool,
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreground_command: Option<String>,
}

/// Tail-capped rendered text of a terminal as last observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalSnapshot {
    pub terminal_id: String,
    pub output: String,
    pub updated_at: u64,
}

/// Kind of capture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSourceKind {
    Screen,
    Window,
}

/// One capturable display or window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSource {
    pub source: CaptureSourceKind,
    pub source_id: String,
    pub label: String,
}

/// A completed screen grab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenCapture {
    pub source: CaptureSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
    pub mime_type: String,
    pub image_base64: String,
    pub captured_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Self-declared client flavor sent in `client.hello`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientType {
    Mobile,
    Chat,
    Web,
    #[serde(rename = "viewer-launcher")]
    ViewerLauncher,
    Viewer,
}

impl fmt::Display for ClientType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Mobile => "mobile",
            Self::Chat => "chat",
            Self::Web => "web",
            Self::ViewerLauncher => "viewer-launcher",
            Self::Viewer => "viewer",
        };
        f.write_str(s)
    }
}

/// The `payload` of a `client.command` frame, discriminated by `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum CommandPayload {
    #[serde(rename = "terminal.create")]
    TerminalCreate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    #[serde(rename = "terminal.close", rename_all = "camelCase")]
    TerminalClose { terminal_id: String },
    #[serde(rename = "terminal.input", rename_all = "camelCase")]
    TerminalInput { terminal_id: String, data: String },
    #[serde(rename = "terminal.snapshot", rename_all = "camelCase")]
    TerminalSnapshot { terminal_id: String },
    #[serde(rename = "capture.list")]
    CaptureList {},
    #[serde(rename = "screen.capture", rename_all = "camelCase")]
    ScreenCapture {
        source: CaptureSourceKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        terminal_id: Option<String>,
    },
    #[serde(rename = "tfclaw.command", rename_all = "camelCase")]
    TfclawCommand { text: String, session_key: String },
}

impl CommandPayload {
    /// Wire name of the command, for acks and log lines.
    pub fn name(&self) -> &'static str {
        match self {
            Self::TerminalCreate { .. } => "terminal.create",
            Self::TerminalClose { .. } => "terminal.close",
            Self::TerminalInput { .. } => "terminal.input",
            Self::TerminalSnapshot { .. } => "terminal.snapshot",
            Self::CaptureList {} => "capture.list",
            Self::ScreenCapture { .. } => "screen.capture",
            Self::TfclawCommand { .. } => "tfclaw.command",
        }
    }
}

/// Composed session view sent to clients on join and on agent updates.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionState {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentDescriptor>,
    pub terminals: Vec<TerminalSummary>,
    pub snapshots: Vec<TerminalSnapshot>,
}

/// Every frame that crosses the relay, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Frame {
    #[serde(rename = "agent.register")]
    AgentRegister(AgentDescriptor),
    #[serde(rename = "agent.terminal_list")]
    AgentTerminalList { terminals: Vec<TerminalSummary> },
    #[serde(rename = "agent.terminal_output", rename_all = "camelCase")]
    AgentTerminalOutput { terminal_id: String, chunk: String, at: u64 },
    #[serde(rename = "agent.capture_sources", rename_all = "camelCase")]
    AgentCaptureSources {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        sources: Vec<CaptureSource>,
    },
    #[serde(rename = "agent.screen_capture")]
    AgentScreenCapture(ScreenCapture),
    #[serde(rename = "agent.command_result", rename_all = "camelCase")]
    AgentCommandResult {
        request_id: String,
        output: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress_source: Option<String>,
    },
    #[serde(rename = "agent.error", rename_all = "camelCase")]
    AgentError {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    #[serde(rename = "client.hello", rename_all = "camelCase")]
    ClientHello { client_type: ClientType },
    #[serde(rename = "client.command", rename_all = "camelCase")]
    ClientCommand {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        payload: CommandPayload,
    },
    #[serde(rename = "relay.state")]
    RelayState(SessionState),
    #[serde(rename = "relay.ack", rename_all = "camelCase")]
    RelayAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Frame {
    /// Serialize to the single-frame JSON text put on the wire.
    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Wire tag of this frame.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::AgentRegister(_) => "agent.register",
            Self::AgentTerminalList { .. } => "agent.terminal_list",
            Self::AgentTerminalOutput { .. } => "agent.terminal_output",
            Self::AgentCaptureSources { .. } => "agent.capture_sources",
            Self::AgentScreenCapture(_) => "agent.screen_capture",
            Self::AgentCommandResult { .. } => "agent.command_result",
            Self::AgentError { .. } => "agent.error",
            Self::ClientHello { .. } => "client.hello",
            Self::ClientCommand { .. } => "client.command",
            Self::RelayState(_) => "relay.state",
            Self::RelayAck { .. } => "relay.ack",
        }
    }

    /// Build a positive ack.
    pub fn ack_ok(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self::RelayAck { request_id, ok: true, message: Some(message.into()) }
    }

    /// Build a negative ack.
    pub fn ack_err(request_id: Option<String>, message: impl Into<String>) -> Self {
        Self::RelayAck { request_id, ok: false, message: Some(message.into()) }
    }
}

/// Why an inbound text frame was not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not a JSON object carrying a string `type`.
    Malformed,
    /// Valid envelope whose type tag or payload this protocol does not know.
    Unsupported(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("invalid message"),
            Self::Unsupported(tag) => write!(f, "unsupported message type: {tag}"),
        }
    }
}

/// Parse one wire frame, rejecting non-objects and missing `type` tags.
pub fn parse_frame(text: &str) -> Result<Frame, FrameError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| FrameError::Malformed)?;
    let obj = value.as_object().ok_or(FrameError::Malformed)?;
    let tag = match obj.get("type").and_then(|t| t.as_str()) {
        Some(t) => t.to_owned(),
        None => return Err(FrameError::Malformed),
    };
    serde_json::from_value(value).map_err(|_| FrameError::Unsupported(tag))
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
