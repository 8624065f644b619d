// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tail-capped text retention for snapshot caches and output buffers.
//!
//! Snapshots are rendered text, so capping is measured in characters (not
//! bytes) and slices stay on char boundaries.

/// Return the last `max_chars` characters of `s`.
pub fn tail_cap(s: &str, max_chars: usize) -> &str {
    let total = s.chars().count();
    if total <= max_chars {
        return s;
    }
    let skip = total - max_chars;
    match s.char_indices().nth(skip) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

/// Append `chunk` to `existing` and cap the result to the last `max_chars`
/// characters.
pub fn append_capped(existing: &mut String, chunk: &str, max_chars: usize) {
    existing.push_str(chunk);
    if existing.chars().count() > max_chars {
        let capped = tail_cap(existing, max_chars).to_owned();
        *existing = capped;
    }
}

#[cfg(test)]
#[path = "tailcap_tests.rs"]
mod tests;
