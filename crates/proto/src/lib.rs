// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared wire protocol for the tfclaw relay, agent, and clients.

pub mod tailcap;
pub mod token;
pub mod wire;

/// Default ceiling for a single WebSocket frame, in bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 256 * 1024;

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Generate a fresh request/terminal identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
