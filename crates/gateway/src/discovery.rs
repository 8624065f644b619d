// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Mode discovery from reply text.
//!
//! The agent's interpreter answers with fixed phrasings; the router inspects
//! each final output to keep its cached mode, target, and stream mode in
//! step without a dedicated state-sync message.

use std::sync::OnceLock;

use regex::Regex;

use crate::progress::StreamMode;

/// State changes discovered in one reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub passthrough: Option<bool>,
    pub target: Option<String>,
    pub stream_mode: Option<StreamMode>,
}

// Static patterns; construction cannot fail at runtime.
#[allow(clippy::unwrap_used)]
fn target_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[tmux ([^\]]+)\]").unwrap())
}

#[allow(clippy::unwrap_used)]
fn target_set_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Target set to `([^`]+)`").unwrap())
}

#[allow(clippy::unwrap_used)]
fn stream_mode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"stream_mode (auto|on|off)").unwrap())
}

/// Inspect a final reply for state the router should cache.
pub fn discover(output: &str) -> Discovery {
    let mut found = Discovery::default();

    if output.contains("passthrough enabled.") {
        found.passthrough = Some(true);
    } else if output.contains("passthrough disabled.") {
        found.passthrough = Some(false);
    }

    if let Some(captures) = target_set_re().captures(output) {
        found.target = captures.get(1).map(|m| m.as_str().to_owned());
    } else if let Some(captures) = target_header_re().captures(output) {
        let target = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if target != "none" {
            found.target = Some(target.to_owned());
        }
    }

    if let Some(captures) = stream_mode_re().captures(output) {
        found.stream_mode = captures.get(1).and_then(|m| StreamMode::parse(m.as_str()));
    }

    found
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
