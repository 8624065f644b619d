// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-process tmux driver.
//!
//! Every operation is one subprocess invocation that may suspend for tens of
//! milliseconds; callers serialize sends per pane. The driver is agnostic to
//! the binary: `command` + `base_args` can point at a wrapper that tunnels
//! into another environment, in which case Windows-style working directories
//! are translated to the tunneled path layout.

use std::fmt;
use std::process::Stdio;

/// Driver configuration, derived from the agent config.
#[derive(Debug, Clone)]
pub struct TmuxConfig {
    pub command: String,
    pub base_args: Vec<String>,
    pub session: String,
    pub bootstrap_window: String,
}

/// Failures surfaced by tmux invocations.
#[derive(Debug)]
pub enum TmuxError {
    /// The multiplexer binary could not be spawned.
    NotFound(std::io::Error),
    /// The target pane or window no longer exists.
    PaneMissing(String),
    /// Any other nonzero exit, with trimmed stderr.
    Failed(String),
}

impl fmt::Display for TmuxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(e) => write!(f, "tmux not reachable: {e}"),
            Self::PaneMissing(reason) => write!(f, "pane missing: {reason}"),
            Self::Failed(msg) => write!(f, "tmux command failed: {msg}"),
        }
    }
}

impl std::error::Error for TmuxError {}

impl TmuxError {
    pub fn is_pane_missing(&self) -> bool {
        matches!(self, Self::PaneMissing(_))
    }
}

/// Handle on one tmux server + session.
pub struct Tmux {
    config: TmuxConfig,
}

impl Tmux {
    pub fn new(config: TmuxConfig) -> Self {
        Self { config }
    }

    pub fn session(&self) -> &str {
        &self.config.session
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.config.command);
        cmd.args(&self.config.base_args);
        cmd.stdin(Stdio::null());
        cmd
    }

    /// Run one tmux invocation, returning trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, TmuxError> {
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(TmuxError::NotFound)?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        if is_missing_target(&stderr) {
            Err(TmuxError::PaneMissing("pane not found".to_owned()))
        } else {
            Err(TmuxError::Failed(stderr))
        }
    }

    /// Whether the multiplexer binary responds at all.
    pub async fn probe(&self) -> bool {
        self.command()
            .arg("-V")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    pub async fn has_session(&self) -> bool {
        self.run(&["has-session", "-t", &self.config.session]).await.is_ok()
    }

    /// Kill the named session. Absence is not a failure.
    pub async fn kill_session(&self) -> Result<(), TmuxError> {
        match self.run(&["kill-session", "-t", &self.config.session]).await {
            Ok(_) => Ok(()),
            Err(TmuxError::PaneMissing(_)) | Err(TmuxError::Failed(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create the session with the hidden bootstrap window.
    pub async fn create_session(&self, cwd: &str) -> Result<(), TmuxError> {
        let cwd = translate_cwd(cwd);
        self.run(&[
            "new-session",
            "-d",
            "-s",
            &self.config.session,
            "-n",
            &self.config.bootstrap_window,
            "-c",
            &cwd,
        ])
        .await
        .map(|_| ())
    }

    /// Spawn a new window; returns `(window_id, pane_id)`.
    pub async fn new_window(
        &self,
        name: &str,
        cwd: Option<&str>,
    ) -> Result<(String, String), TmuxError> {
        let target = format!("{}:", self.config.session);
        let mut args: Vec<&str> = vec![
            "new-window",
            "-d",
            "-t",
            &target,
            "-n",
            name,
            "-P",
            "-F",
            "#{window_id} #{pane_id}",
        ];
        let translated;
        if let Some(cwd) = cwd {
            translated = translate_cwd(cwd);
            args.push("-c");
            args.push(&translated);
        }
        let out = self.run(&args).await?;
        let line = out.trim();
        match line.split_once(' ') {
            Some((window, pane)) => Ok((window.to_owned(), pane.to_owned())),
            None => Err(TmuxError::Failed(format!("unexpected new-window output: {line}"))),
        }
    }

    /// Kill a window by id. A missing window is not a failure.
    pub async fn kill_window(&self, window_id: &str) -> Result<(), TmuxError> {
        match self.run(&["kill-window", "-t", window_id]).await {
            Ok(_) => Ok(()),
            Err(TmuxError::PaneMissing(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Send literal text to a pane (no key-name interpretation).
    pub async fn send_literal(&self, pane_id: &str, text: &str) -> Result<(), TmuxError> {
        self.run(&["send-keys", "-t", pane_id, "-l", "--", text]).await.map(|_| ())
    }

    /// Send one named key (e.g. `Enter`, `C-c`) to a pane.
    pub async fn send_key(&self, pane_id: &str, key: &str) -> Result<(), TmuxError> {
        self.run(&["send-keys", "-t", pane_id, key]).await.map(|_| ())
    }

    /// Capture the last `lines` rendered lines of a pane.
    pub async fn capture_pane(&self, pane_id: &str, lines: u32) -> Result<String, TmuxError> {
        let start = format!("-{lines}");
        self.run(&["capture-pane", "-p", "-t", pane_id, "-S", &start]).await
    }

    /// Foreground command of a pane, when tmux can report one.
    pub async fn pane_command(&self, pane_id: &str) -> Option<String> {
        self.run(&["display-message", "-p", "-t", pane_id, "#{pane_current_command}"])
            .await
            .ok()
            .map(|out| out.trim().to_owned())
            .filter(|cmd| !cmd.is_empty())
    }
}

/// Does this stderr text indicate the target pane/window is gone?
fn is_missing_target(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("can't find pane")
        || lower.contains("can't find window")
        || lower.contains("no such window")
        || lower.contains("can't find session")
        || lower.contains("no server running")
}

/// Sanitize a requested title into a safe tmux window name.
pub fn sanitize_window_name(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .take(32)
        .collect();
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        "term".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Translate a Windows-style path into the tunneled layout (`C:\x` →
/// `/mnt/c/x`). Paths already in POSIX form pass through unchanged.
pub fn translate_cwd(path: &str) -> String {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        let drive = bytes[0].to_ascii_lowercase() as char;
        let rest = path[2..].replace('\\', "/");
        return format!("/mnt/{drive}{rest}");
    }
    path.to_owned()
}

#[cfg(test)]
#[path = "tmux_tests.rs"]
mod tests;
