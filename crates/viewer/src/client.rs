// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interactive viewer client.
//!
//! Connects as a relay client, renders the terminal list from `relay.state`,
//! prints streamed deltas, and forwards input. Line mode interprets `:`
//! commands; raw mode puts the local terminal in raw mode and ships every
//! byte as `terminal.input` until Ctrl+] (0x1d).

use std::io::Write;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use tfclaw_proto::wire::{parse_frame, CommandPayload, Frame, SessionState, TerminalSummary};

/// Leave raw mode on Ctrl+] (0x1d), same as telnet / docker attach.
const DETACH_KEY: u8 = 0x1d;

/// Interactive viewer for a tfclaw relay session.
#[derive(Debug, Clone, Parser)]
#[command(name = "tfclaw-viewer", version, about)]
pub struct ViewerArgs {
    /// Relay WebSocket URL, including the upgrade path.
    #[arg(long, default_value = "ws://127.0.0.1:8787/ws", env = "TFCLAW_RELAY_URL")]
    pub relay_url: String,

    /// Bearer token shared with the relay session.
    #[arg(long, env = "TFCLAW_TOKEN")]
    pub token: String,
}

impl ViewerArgs {
    pub fn connect_url(&self) -> String {
        let sep = if self.relay_url.contains('?') { '&' } else { '?' };
        format!("{}{}role=client&token={}", self.relay_url, sep, self.token)
    }
}

/// One parsed line-mode input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineCmd {
    List,
    Use(String),
    Raw,
    Quit,
    Input(String),
}

/// Interpret one line of line-mode input.
pub fn parse_line_command(line: &str) -> LineCmd {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    match trimmed {
        ":list" | ":ls" => LineCmd::List,
        ":raw" => LineCmd::Raw,
        ":quit" | ":q" => LineCmd::Quit,
        _ => match trimmed.strip_prefix(":use ") {
            Some(reference) => LineCmd::Use(reference.trim().to_owned()),
            None => LineCmd::Input(format!("{trimmed}\n")),
        },
    }
}

/// Resolve a terminal ref: exact id, exact title, then 1-based index.
pub fn resolve_ref(terminals: &[TerminalSummary], reference: &str) -> Option<TerminalSummary> {
    if let Some(t) = terminals.iter().find(|t| t.terminal_id == reference) {
        return Some(t.clone());
    }
    if let Some(t) = terminals.iter().find(|t| t.title == reference) {
        return Some(t.clone());
    }
    if let Ok(index) = reference.parse::<usize>() {
        if index >= 1 {
            return terminals.get(index - 1).cloned();
        }
    }
    None
}

/// Render the terminal list for the console.
pub fn render_list(state: &SessionState, selected: Option<&str>) -> String {
    let mut out = String::new();
    match state.agent {
        Some(ref agent) => {
            out.push_str(&format!("agent: {} ({})\n", agent.agent_id, agent.hostname));
        }
        None => out.push_str("agent: (not connected)\n"),
    }
    if state.terminals.is_empty() {
        out.push_str("no terminals\n");
        return out;
    }
    for (i, t) in state.terminals.iter().enumerate() {
        let marker = if Some(t.terminal_id.as_str()) == selected { "*" } else { " " };
        let active = if t.is_active { "" } else { " (inactive)" };
        out.push_str(&format!("{marker}{}. {}{active}\n", i + 1, t.title));
    }
    out
}

#[cfg(unix)]
mod raw_mode {
    use std::os::fd::{AsRawFd, BorrowedFd};

    use nix::sys::termios;

    /// RAII guard that restores the original terminal attributes on drop.
    ///
    /// Stores a raw fd (stdin) and the original termios state. The fd is
    /// valid for the lifetime of the process (stdin never closes).
    pub struct RawModeGuard {
        fd: i32,
        original: termios::Termios,
    }

    impl RawModeGuard {
        pub fn enter() -> anyhow::Result<Self> {
            let fd = std::io::stdin().as_raw_fd();
            let borrowed = borrow_fd(fd);
            let original = termios::tcgetattr(borrowed)?;
            let mut raw = original.clone();
            termios::cfmakeraw(&mut raw);
            termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &raw)?;
            Ok(Self { fd, original })
        }
    }

    impl Drop for RawModeGuard {
        fn drop(&mut self) {
            let borrowed = borrow_fd(self.fd);
            let _ = termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &self.original);
        }
    }

    /// Create a `BorrowedFd` from a raw fd that we know is valid.
    fn borrow_fd(fd: i32) -> BorrowedFd<'static> {
        // SAFETY: stdin fd 0 is valid for the lifetime of the process.
        #[allow(unsafe_code)]
        unsafe {
            BorrowedFd::borrow_raw(fd)
        }
    }
}

/// Run the viewer until `:quit` or the relay closes the socket.
pub async fn run(args: ViewerArgs) -> anyhow::Result<i32> {
    let url = args.connect_url();
    let (ws, _response) = tokio_tungstenite::connect_async(url.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("WebSocket connection failed: {e}"))?;
    let (mut ws_tx, mut ws_rx) = ws.split();

    let hello = Frame::ClientHello { client_type: tfclaw_proto::wire::ClientType::Viewer };
    ws_tx.send(Message::Text(hello.to_text().into())).await?;

    // Blocking thread feeding stdin bytes; canonical mode delivers lines,
    // raw mode delivers keystrokes.
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        use std::io::Read;
        let stdin = std::io::stdin();
        let mut handle = stdin.lock();
        let mut buf = [0u8; 4096];
        loop {
            match handle.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if stdin_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let mut stdout = std::io::stdout();
    let mut terminals: Vec<TerminalSummary> = Vec::new();
    let mut selected: Option<String> = None;
    let mut raw = false;
    #[cfg(unix)]
    let mut _raw_guard: Option<raw_mode::RawModeGuard> = None;

    eprintln!("connected; :list :use <n> :raw :quit");

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match parse_frame(&text) {
                            Ok(Frame::RelayState(state)) => {
                                terminals = state.terminals.clone();
                                if selected.is_none() {
                                    selected =
                                        terminals.first().map(|t| t.terminal_id.clone());
                                }
                                eprint!("{}", render_list(&state, selected.as_deref()));
                            }
                            Ok(Frame::AgentTerminalOutput { terminal_id, chunk, .. }) => {
                                if selected.as_deref() == Some(terminal_id.as_str()) {
                                    let _ = stdout.write_all(chunk.as_bytes());
                                    let _ = stdout.flush();
                                }
                            }
                            Ok(Frame::RelayAck { ok: false, message, .. }) => {
                                eprintln!(
                                    "relay: {}",
                                    message.as_deref().unwrap_or("request refused")
                                );
                            }
                            Ok(_) => {}
                            Err(_) => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }

            data = stdin_rx.recv() => {
                let Some(bytes) = data else { break };

                if raw {
                    // Raw passthrough until Ctrl+].
                    let (to_send, detach) =
                        match bytes.iter().position(|&b| b == DETACH_KEY) {
                            Some(pos) => (&bytes[..pos], true),
                            None => (&bytes[..], false),
                        };
                    if !to_send.is_empty() {
                        if let Some(ref id) = selected {
                            send_input(&mut ws_tx, id, &String::from_utf8_lossy(to_send)).await?;
                        }
                    }
                    if detach {
                        raw = false;
                        #[cfg(unix)]
                        {
                            _raw_guard = None;
                        }
                        eprintln!("\r\nline mode");
                    }
                    continue;
                }

                let line = String::from_utf8_lossy(&bytes);
                match parse_line_command(&line) {
                    LineCmd::Quit => break,
                    LineCmd::List => {
                        let state = SessionState {
                            agent: None,
                            terminals: terminals.clone(),
                            snapshots: Vec::new(),
                        };
                        eprint!("{}", render_list(&state, selected.as_deref()));
                    }
                    LineCmd::Use(reference) => {
                        match resolve_ref(&terminals, &reference) {
                            Some(t) => {
                                eprintln!("using {}", t.title);
                                selected = Some(t.terminal_id);
                            }
                            None => eprintln!("terminal not found: {reference}"),
                        }
                    }
                    LineCmd::Raw => {
                        if selected.is_none() {
                            eprintln!("no terminal selected");
                            continue;
                        }
                        #[cfg(unix)]
                        {
                            match raw_mode::RawModeGuard::enter() {
                                Ok(guard) => {
                                    _raw_guard = Some(guard);
                                    raw = true;
                                    eprintln!("raw mode; Ctrl+] to leave");
                                }
                                Err(e) => eprintln!("raw mode failed: {e}"),
                            }
                        }
                        #[cfg(not(unix))]
                        {
                            eprintln!("raw mode is only supported on unix");
                        }
                    }
                    LineCmd::Input(data) => {
                        if let Some(ref id) = selected {
                            send_input(&mut ws_tx, id, &data).await?;
                        } else {
                            eprintln!("no terminal selected");
                        }
                    }
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
    eprintln!("\r\ndetached.");
    Ok(0)
}

async fn send_input<S>(tx: &mut S, terminal_id: &str, data: &str) -> anyhow::Result<()>
where
    S: SinkExt<Message> + Unpin,
{
    let frame = Frame::ClientCommand {
        request_id: None,
        payload: CommandPayload::TerminalInput {
            terminal_id: terminal_id.to_owned(),
            data: data.to_owned(),
        },
    };
    tx.send(Message::Text(frame.to_text().into()))
        .await
        .map_err(|_| anyhow::anyhow!("WebSocket send failed"))
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
