// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Diff successive pane captures into incremental output chunks.

use tfclaw_proto::tailcap::tail_cap;

/// Marker injected when a capture diverges from its predecessor.
pub const REDRAW_SENTINEL: &str = "[tmux redraw]";

/// Compute the chunk to stream for a capture transition.
///
/// - identical captures emit nothing;
/// - a first capture emits the full content;
/// - a capture that extends the previous one emits only the appended suffix;
/// - anything else is a redraw and emits the sentinel plus the new tail.
///
/// Emitted chunks are tail-capped to `max_chars`.
pub fn compute_delta(prev: &str, next: &str, max_chars: usize) -> Option<String> {
    if prev == next {
        return None;
    }
    if prev.is_empty() {
        return Some(tail_cap(next, max_chars).to_owned());
    }
    if let Some(suffix) = next.strip_prefix(prev) {
        return Some(tail_cap(suffix, max_chars).to_owned());
    }
    Some(format!("\n{REDRAW_SENTINEL}\n{}\n", tail_cap(next, max_chars)))
}

#[cfg(test)]
#[path = "delta_tests.rs"]
mod tests;
