// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

/// Chat gateway: routes chat commands to a tfclaw agent through the relay.
#[derive(Debug, Clone, Parser)]
#[command(name = "tfclaw-gateway", version, about)]
pub struct GatewayConfig {
    /// Bearer token shared with the relay session.
    #[arg(long, env = "TFCLAW_TOKEN")]
    pub token: String,

    /// Relay WebSocket URL, including the upgrade path.
    #[arg(long, default_value = "ws://127.0.0.1:8787/ws", env = "TFCLAW_RELAY_URL")]
    pub relay_url: String,

    /// How long a forwarded command may run before the wait times out.
    #[arg(long, default_value_t = 86_400_000, env = "TFCLAW_COMMAND_RESULT_TIMEOUT_MS")]
    pub command_result_timeout_ms: u64,

    /// Delay before a superseded progress message is deleted.
    #[arg(long, default_value_t = 350, env = "TFCLAW_PROGRESS_RECALL_DELAY_MS")]
    pub progress_recall_delay_ms: u64,

    /// Timeout for a screen grab.
    #[arg(long, default_value_t = 20_000, env = "TFCLAW_CAPTURE_TIMEOUT_MS")]
    pub capture_timeout_ms: u64,

    /// Timeout for a capture-source listing.
    #[arg(long, default_value_t = 15_000, env = "TFCLAW_CAPTURE_LIST_TIMEOUT_MS")]
    pub capture_list_timeout_ms: u64,

    /// Comma-separated user-id allowlist. Unset admits everyone.
    #[arg(long, env = "TFCLAW_ALLOWED_USERS")]
    pub allowed_users: Option<String>,

    /// React to accepted commands with an acknowledging emoji.
    #[arg(
        long,
        default_value_t = true,
        env = "TFCLAW_REACT_ON_COMMAND",
        action = clap::ArgAction::Set
    )]
    pub react_on_command: bool,
}

impl GatewayConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token.chars().count() < 8 {
            anyhow::bail!("TFCLAW_TOKEN must be at least 8 characters");
        }
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            anyhow::bail!("TFCLAW_RELAY_URL must be a ws:// or wss:// URL");
        }
        Ok(())
    }

    /// Relay URL with the role/token query appended.
    pub fn connect_url(&self) -> String {
        let sep = if self.relay_url.contains('?') { '&' } else { '?' };
        format!("{}{}role=client&token={}", self.relay_url, sep, self.token)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_result_timeout_ms)
    }

    pub fn recall_delay(&self) -> Duration {
        Duration::from_millis(self.progress_recall_delay_ms)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_timeout_ms)
    }

    pub fn capture_list_timeout(&self) -> Duration {
        Duration::from_millis(self.capture_list_timeout_ms)
    }

    /// Parsed user allowlist; empty admits everyone.
    pub fn user_allowlist(&self) -> Vec<String> {
        self.allowed_users
            .as_deref()
            .map(|s| {
                s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_owned).collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
