// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use crate::tmux::TmuxConfig;

/// Terminal-hosting node: exposes local tmux windows through a tfclaw relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "tfclaw-agent", version, about)]
pub struct AgentConfig {
    /// Bearer token shared with the relay session.
    #[arg(long, env = "TFCLAW_TOKEN")]
    pub token: String,

    /// Relay WebSocket URL, including the upgrade path.
    #[arg(long, default_value = "ws://127.0.0.1:8787/ws", env = "TFCLAW_RELAY_URL")]
    pub relay_url: String,

    /// Stable agent identifier; defaults to the hostname.
    #[arg(long, env = "TFCLAW_AGENT_ID")]
    pub agent_id: Option<String>,

    /// Terminals created on first relay connect.
    #[arg(long, default_value_t = 1, env = "TFCLAW_START_TERMINALS")]
    pub start_terminals: u32,

    /// Working directory for new terminals when the client names none.
    #[arg(long, env = "TFCLAW_DEFAULT_CWD")]
    pub default_cwd: Option<String>,

    /// Per-terminal local output buffer cap, in characters.
    #[arg(long, default_value_t = 12_000, env = "TFCLAW_MAX_LOCAL_BUFFER")]
    pub max_local_buffer: usize,

    /// Multiplexer binary to drive.
    #[arg(long, default_value = "tmux", env = "TFCLAW_TMUX_COMMAND")]
    pub tmux_command: String,

    /// Extra arguments prepended to every multiplexer invocation
    /// (space-separated; e.g. "-L tfclaw" for an isolated server).
    #[arg(long, env = "TFCLAW_TMUX_BASE_ARGS")]
    pub tmux_base_args: Option<String>,

    /// Multiplexer session owned by this agent.
    #[arg(long, default_value = "tfclaw", env = "TFCLAW_TMUX_SESSION")]
    pub tmux_session: String,

    /// Rendered lines fetched per capture.
    #[arg(long, default_value_t = 300, env = "TFCLAW_TMUX_CAPTURE_LINES")]
    pub capture_lines: u32,

    /// Capture poll interval in milliseconds.
    #[arg(long, default_value_t = 250, env = "TFCLAW_TMUX_POLL_MS")]
    pub poll_ms: u64,

    /// Largest emitted output delta, in characters.
    #[arg(long, default_value_t = 4_000, env = "TFCLAW_TMUX_MAX_DELTA_CHARS")]
    pub max_delta_chars: usize,

    /// Hidden window that keeps the session alive.
    #[arg(long, default_value = "tfclaw-boot", env = "TFCLAW_TMUX_BOOTSTRAP_WINDOW")]
    pub bootstrap_window: String,

    /// Kill any prior session of the same name on startup.
    #[arg(
        long,
        default_value_t = true,
        env = "TFCLAW_TMUX_RESET_ON_BOOT",
        action = clap::ArgAction::Set
    )]
    pub reset_on_boot: bool,

    /// Leave the multiplexer session running on shutdown.
    #[arg(
        long,
        default_value_t = false,
        env = "TFCLAW_TMUX_PERSIST_SESSION_ON_SHUTDOWN",
        action = clap::ArgAction::Set
    )]
    pub persist_session_on_shutdown: bool,
}

impl AgentConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.chars().count() < 8 {
            anyhow::bail!("TFCLAW_TOKEN must be at least 8 characters");
        }
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            anyhow::bail!("TFCLAW_RELAY_URL must be a ws:// or wss:// URL");
        }
        if self.poll_ms == 0 {
            anyhow::bail!("TFCLAW_TMUX_POLL_MS must be positive");
        }
        Ok(())
    }

    /// Resolved agent id: the configured one, else the hostname.
    pub fn effective_agent_id(&self) -> String {
        if let Some(ref id) = self.agent_id {
            return id.clone();
        }
        hostname().unwrap_or_else(|| format!("tfclaw-{}", std::process::id()))
    }

    /// Working directory for terminals: configured, else the process cwd.
    pub fn effective_cwd(&self) -> String {
        self.default_cwd.clone().unwrap_or_else(|| {
            std::env::current_dir()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|_| ".".to_owned())
        })
    }

    /// Relay URL with the role/token query appended.
    pub fn connect_url(&self) -> String {
        let sep = if self.relay_url.contains('?') { '&' } else { '?' };
        format!("{}{}role=agent&token={}", self.relay_url, sep, self.token)
    }

    /// Multiplexer sub-config handed to the driver.
    pub fn tmux_config(&self) -> TmuxConfig {
        TmuxConfig {
            command: self.tmux_command.clone(),
            base_args: self
                .tmux_base_args
                .as_deref()
                .map(|s| s.split_whitespace().map(str::to_owned).collect())
                .unwrap_or_default(),
            session: self.tmux_session.clone(),
            bootstrap_window: self.bootstrap_window.clone(),
        }
    }
}

pub(crate) fn hostname() -> Option<String> {
    std::process::Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_owned())
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
