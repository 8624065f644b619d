// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Translate a `terminal.input` byte/shortcut stream into multiplexer
//! actions: literal runs and named key presses.

/// Keys the translator can emit, by tmux key name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyName {
    Enter,
    Tab,
    Escape,
    CtrlC,
    CtrlD,
    CtrlZ,
}

impl KeyName {
    /// The tmux `send-keys` spelling of this key.
    pub fn tmux_name(&self) -> &'static str {
        match self {
            Self::Enter => "Enter",
            Self::Tab => "Tab",
            Self::Escape => "Escape",
            Self::CtrlC => "C-c",
            Self::CtrlD => "C-d",
            Self::CtrlZ => "C-z",
        }
    }
}

/// One unit of input submitted to the multiplexer, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAction {
    Literal(String),
    Key(KeyName),
}

/// Whole-string shortcut markers recognized before the byte scan.
const SHORTCUTS: &[(&str, KeyName)] = &[
    ("__CTRL_C__", KeyName::CtrlC),
    ("__CTRL_D__", KeyName::CtrlD),
    ("__CTRL_Z__", KeyName::CtrlZ),
    ("__ENTER__", KeyName::Enter),
];

/// Parse an input string into an ordered action sequence.
pub fn parse_input_actions(data: &str) -> Vec<InputAction> {
    for (marker, key) in SHORTCUTS {
        if data == *marker {
            return vec![InputAction::Key(*key)];
        }
    }

    let mut actions = Vec::new();
    let mut literal = String::new();
    let mut chars = data.chars().peekable();

    while let Some(c) = chars.next() {
        let key = match c {
            '\r' => {
                // Treat \r\n as a single Enter.
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                Some(KeyName::Enter)
            }
            '\n' => Some(KeyName::Enter),
            '\x03' => Some(KeyName::CtrlC),
            '\x04' => Some(KeyName::CtrlD),
            '\x1a' => Some(KeyName::CtrlZ),
            '\x1b' => Some(KeyName::Escape),
            '\t' => Some(KeyName::Tab),
            '\0' => None,
            other => {
                literal.push(other);
                continue;
            }
        };
        match key {
            Some(key) => {
                if !literal.is_empty() {
                    actions.push(InputAction::Literal(std::mem::take(&mut literal)));
                }
                actions.push(InputAction::Key(key));
            }
            None => {} // NUL bytes are dropped.
        }
    }

    if !literal.is_empty() {
        actions.push(InputAction::Literal(literal));
    }
    actions
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
