// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;
use tfclaw_proto::token::TokenPolicy;

/// Heartbeat intervals below this are clamped up.
const MIN_HEARTBEAT_MS: u64 = 5_000;

/// Session relay for tfclaw agents and clients.
#[derive(Debug, Clone, Parser)]
#[command(name = "tfclaw-relay", version, about)]
pub struct RelayConfig {
    /// Host address to bind to.
    #[arg(long, default_value = "0.0.0.0", env = "RELAY_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8787, env = "RELAY_PORT")]
    pub port: u16,

    /// Path accepting WebSocket upgrades. Anything else is 404.
    #[arg(long, default_value = "/ws", env = "RELAY_WS_PATH")]
    pub ws_path: String,

    /// Per-terminal snapshot cache cap, in characters.
    #[arg(long, default_value_t = 100_000, env = "MAX_SNAPSHOT_CHARS")]
    pub max_snapshot_chars: usize,

    /// Largest accepted WebSocket frame, in bytes.
    #[arg(long, default_value_t = 262_144, env = "RELAY_MAX_MESSAGE_BYTES")]
    pub max_message_bytes: usize,

    /// Total open sockets across all sessions.
    #[arg(long, default_value_t = 512, env = "RELAY_MAX_CONNECTIONS")]
    pub max_connections: usize,

    /// Open sockets per client IP.
    #[arg(long, default_value_t = 32, env = "RELAY_MAX_CONNECTIONS_PER_IP")]
    pub max_connections_per_ip: u32,

    /// Distinct token sessions held at once.
    #[arg(long, default_value_t = 128, env = "RELAY_MAX_SESSIONS")]
    pub max_sessions: usize,

    /// Client sockets per session.
    #[arg(long, default_value_t = 16, env = "RELAY_MAX_CLIENTS_PER_SESSION")]
    pub max_clients_per_session: usize,

    /// Rolling window for per-socket message rate limiting.
    #[arg(long, default_value_t = 10_000, env = "RELAY_MESSAGE_RATE_WINDOW_MS")]
    pub message_rate_window_ms: u64,

    /// Messages allowed per socket inside the rate window.
    #[arg(long, default_value_t = 600, env = "RELAY_MAX_MESSAGES_PER_WINDOW")]
    pub max_messages_per_window: u32,

    /// Rolling window for per-IP upgrade rate limiting.
    #[arg(long, default_value_t = 60_000, env = "RELAY_UPGRADE_RATE_WINDOW_MS")]
    pub upgrade_rate_window_ms: u64,

    /// Upgrades allowed per IP inside the upgrade window.
    #[arg(long, default_value_t = 120, env = "RELAY_MAX_UPGRADES_PER_WINDOW_PER_IP")]
    pub max_upgrades_per_window_per_ip: u32,

    /// Heartbeat sweep interval (lower bound 5s).
    #[arg(long, default_value_t = 20_000, env = "RELAY_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: u64,

    /// Sockets idle longer than this are terminated.
    #[arg(long, default_value_t = 120_000, env = "RELAY_IDLE_TIMEOUT_MS")]
    pub idle_timeout_ms: u64,

    /// Minimum token length.
    #[arg(long, default_value_t = 8, env = "RELAY_TOKEN_MIN_LENGTH")]
    pub token_min_length: usize,

    /// Maximum token length.
    #[arg(long, default_value_t = 128, env = "RELAY_TOKEN_MAX_LENGTH")]
    pub token_max_length: usize,

    /// Require tokens to match the strong pattern `[A-Za-z0-9._~-]{16,128}`.
    #[arg(long, default_value_t = false, env = "RELAY_ENFORCE_STRONG_TOKEN")]
    pub enforce_strong_token: bool,

    /// Comma-separated Origin allowlist. Unset disables the origin check.
    #[arg(long, env = "RELAY_ALLOWED_ORIGINS")]
    pub allowed_origins: Option<String>,

    /// Comma-separated token allowlist. Unset admits any valid token.
    #[arg(long, env = "RELAY_ALLOWED_TOKENS")]
    pub allowed_tokens: Option<String>,
}

impl RelayConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ws_path.starts_with('/') {
            anyhow::bail!("RELAY_WS_PATH must start with '/'");
        }
        if self.token_min_length == 0 || self.token_min_length > self.token_max_length {
            anyhow::bail!("invalid token length bounds");
        }
        if self.max_message_bytes == 0 {
            anyhow::bail!("RELAY_MAX_MESSAGE_BYTES must be positive");
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(MIN_HEARTBEAT_MS))
    }

    pub fn message_rate_window(&self) -> Duration {
        Duration::from_millis(self.message_rate_window_ms)
    }

    pub fn upgrade_rate_window(&self) -> Duration {
        Duration::from_millis(self.upgrade_rate_window_ms)
    }

    /// Token policy assembled from the length/pattern/allowlist knobs.
    pub fn token_policy(&self) -> TokenPolicy {
        TokenPolicy {
            min_length: self.token_min_length,
            max_length: self.token_max_length,
            enforce_strong: self.enforce_strong_token,
            allowlist: split_csv(self.allowed_tokens.as_deref()),
        }
    }

    /// Parsed Origin allowlist; empty means the check is disabled.
    pub fn origin_allowlist(&self) -> Vec<String> {
        split_csv(self.allowed_origins.as_deref())
    }
}

fn split_csv(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',').map(str::trim).filter(|p| !p.is_empty()).map(str::to_owned).collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
