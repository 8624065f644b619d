// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer-token policy: the token both authenticates a connection and
//! partitions it into a session.

use std::fmt;

/// Reasons a token fails admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    TooShort,
    TooLong,
    WeakToken,
    NotAllowed,
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TooShort => "token too short",
            Self::TooLong => "token too long",
            Self::WeakToken => "token fails strong-token policy",
            Self::NotAllowed => "token not in allowlist",
        };
        f.write_str(s)
    }
}

/// Validation policy applied at the relay's admission boundary.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub min_length: usize,
    pub max_length: usize,
    /// When on, tokens must match `[A-Za-z0-9._~-]{16,128}`.
    pub enforce_strong: bool,
    /// When non-empty, only these exact tokens are admitted.
    pub allowlist: Vec<String>,
}

impl Default for TokenPolicy {
    fn default() -> Self {
        Self { min_length: 8, max_length: 128, enforce_strong: false, allowlist: Vec::new() }
    }
}

impl TokenPolicy {
    /// Validate a presented token against length, pattern, and allowlist.
    pub fn validate(&self, token: &str) -> Result<(), TokenError> {
        let len = token.chars().count();
        if len < self.min_length {
            return Err(TokenError::TooShort);
        }
        if len > self.max_length {
            return Err(TokenError::TooLong);
        }
        if self.enforce_strong && !is_strong(token) {
            return Err(TokenError::WeakToken);
        }
        if !self.allowlist.is_empty()
            && !self.allowlist.iter().any(|t| constant_time_eq(t, token))
        {
            return Err(TokenError::NotAllowed);
        }
        Ok(())
    }
}

/// Strong-mode pattern: `[A-Za-z0-9._~-]{16,128}` (RFC 3986 unreserved).
pub fn is_strong(token: &str) -> bool {
    let len = token.len();
    (16..=128).contains(&len)
        && token.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-'))
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

/// Short non-reversible form of a token for log lines.
pub fn fingerprint(token: &str) -> String {
    let head: String = token.chars().take(8).collect();
    format!("{head}…({})", token.chars().count())
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod tests;
