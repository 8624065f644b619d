// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared relay state: the token-keyed session map and per-socket handles.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use tfclaw_proto::epoch_ms;
use tfclaw_proto::tailcap::append_capped;
use tfclaw_proto::wire::{
    AgentDescriptor, Frame, SessionState, TerminalSnapshot, TerminalSummary,
};

use crate::config::RelayConfig;
use crate::quota::QuotaMap;

pub type SocketId = u64;

/// Declared role of an admitted socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Agent,
    Client,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(Self::Agent),
            "client" => Some(Self::Client),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Client => "client",
        }
    }
}

/// Messages queued to a socket's writer half.
#[derive(Debug, Clone)]
pub enum Outbound {
    Text(String),
    Ping,
    Close { code: u16, reason: &'static str },
}

/// Identity handle for one admitted socket, shared with routing and the
/// heartbeat sweeper. The session holds these; the side-table lives in
/// [`RelayState::sockets`] so deletion is one-directional from the session.
pub struct SocketHandle {
    pub id: SocketId,
    pub role: Role,
    pub token: String,
    pub ip: IpAddr,
    pub alive: AtomicBool,
    pub last_seen_ms: AtomicU64,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl SocketHandle {
    fn new(id: SocketId, role: Role, token: String, ip: IpAddr, tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self {
            id,
            role,
            token,
            ip,
            alive: AtomicBool::new(true),
            last_seen_ms: AtomicU64::new(epoch_ms()),
            tx,
        }
    }

    /// Mark the socket live; called on any inbound frame or pong.
    pub fn touch(&self) {
        self.alive.store(true, Ordering::Relaxed);
        self.last_seen_ms.store(epoch_ms(), Ordering::Relaxed);
    }

    pub fn send_text(&self, text: String) -> bool {
        self.tx.send(Outbound::Text(text)).is_ok()
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_text(frame.to_text())
    }

    pub fn ping(&self) -> bool {
        self.tx.send(Outbound::Ping).is_ok()
    }

    pub fn close(&self, code: u16, reason: &'static str) -> bool {
        self.tx.send(Outbound::Close { code, reason }).is_ok()
    }
}

/// Per-token routing record. All mutation happens under `inner`, which
/// serializes agent swaps, snapshot appends, and broadcasts for the session.
pub struct Session {
    pub token: String,
    pub inner: Mutex<SessionInner>,
}

#[derive(Default)]
pub struct SessionInner {
    pub agent: Option<Arc<SocketHandle>>,
    pub descriptor: Option<AgentDescriptor>,
    pub clients: HashMap<SocketId, Arc<SocketHandle>>,
    pub terminals: IndexMap<String, TerminalSummary>,
    pub snapshots: HashMap<String, TerminalSnapshot>,
}

impl SessionInner {
    pub fn is_empty(&self) -> bool {
        self.agent.is_none() && self.clients.is_empty()
    }

    /// Full composed view. Snapshots are only reachable while their terminal
    /// is present in the summary map.
    pub fn compose_state(&self) -> SessionState {
        let terminals: Vec<TerminalSummary> = self.terminals.values().cloned().collect();
        let snapshots = terminals
            .iter()
            .filter_map(|t| self.snapshots.get(&t.terminal_id).cloned())
            .collect();
        SessionState { agent: self.descriptor.clone(), terminals, snapshots }
    }

    /// Minimal view containing a single terminal's summary and snapshot.
    pub fn compose_terminal_state(&self, terminal_id: &str) -> SessionState {
        SessionState {
            agent: self.descriptor.clone(),
            terminals: self.terminals.get(terminal_id).cloned().into_iter().collect(),
            snapshots: self.snapshots.get(terminal_id).cloned().into_iter().collect(),
        }
    }

    /// Append an output chunk to the terminal's cached snapshot, tail-capped,
    /// and bump the matching summary.
    pub fn append_snapshot(&mut self, terminal_id: &str, chunk: &str, at: u64, max_chars: usize) {
        let snap = self.snapshots.entry(terminal_id.to_owned()).or_insert_with(|| {
            TerminalSnapshot { terminal_id: terminal_id.to_owned(), output: String::new(), updated_at: at }
        });
        append_capped(&mut snap.output, chunk, max_chars);
        snap.updated_at = at;
        if let Some(summary) = self.terminals.get_mut(terminal_id) {
            summary.updated_at = at;
            summary.is_active = true;
        }
    }

    /// Replace the summary map and drop snapshots for vanished terminals.
    pub fn replace_terminals(&mut self, terminals: Vec<TerminalSummary>) {
        self.terminals = terminals.into_iter().map(|t| (t.terminal_id.clone(), t)).collect();
        self.snapshots.retain(|id, _| self.terminals.contains_key(id));
    }

    /// Send raw frame text to every client socket.
    pub fn broadcast_text(&self, text: &str) {
        for client in self.clients.values() {
            client.send_text(text.to_owned());
        }
    }

    /// Compose and broadcast a fresh `relay.state` to every client.
    pub fn broadcast_state(&self) {
        let frame = Frame::RelayState(self.compose_state());
        self.broadcast_text(&frame.to_text());
    }
}

/// Process-wide relay state.
pub struct RelayState {
    pub config: RelayConfig,
    pub sessions: RwLock<HashMap<String, Arc<Session>>>,
    pub sockets: RwLock<HashMap<SocketId, Arc<SocketHandle>>>,
    pub quotas: QuotaMap,
    pub socket_count: AtomicUsize,
    pub shutdown: CancellationToken,
    next_socket_id: AtomicU64,
}

impl RelayState {
    pub fn new(config: RelayConfig, shutdown: CancellationToken) -> Self {
        let quotas =
            QuotaMap::new(config.upgrade_rate_window(), config.max_upgrades_per_window_per_ip);
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            sockets: RwLock::new(HashMap::new()),
            quotas,
            socket_count: AtomicUsize::new(0),
            shutdown,
            next_socket_id: AtomicU64::new(1),
        }
    }

    /// Allocate a socket handle and register it in the side-table.
    pub async fn register_socket(
        &self,
        role: Role,
        token: String,
        ip: IpAddr,
    ) -> (Arc<SocketHandle>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(SocketHandle::new(id, role, token, ip, tx));
        self.sockets.write().await.insert(id, Arc::clone(&handle));
        self.socket_count.fetch_add(1, Ordering::Relaxed);
        self.quotas.inc_active(ip);
        (handle, rx)
    }

    /// Drop a socket from the side-table and quota counters.
    pub async fn unregister_socket(&self, handle: &SocketHandle) {
        if self.sockets.write().await.remove(&handle.id).is_some() {
            self.socket_count.fetch_sub(1, Ordering::Relaxed);
            self.quotas.dec_active(handle.ip);
        }
    }

    /// Look up or create the session for a token.
    pub async fn get_or_create_session(&self, token: &str) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(token) {
            return Arc::clone(session);
        }
        let mut sessions = self.sessions.write().await;
        Arc::clone(sessions.entry(token.to_owned()).or_insert_with(|| {
            Arc::new(Session { token: token.to_owned(), inner: Mutex::new(SessionInner::default()) })
        }))
    }

    /// Remove the session if it holds neither an agent nor any client.
    pub async fn drop_session_if_empty(&self, token: &str) {
        let mut sessions = self.sessions.write().await;
        let empty = match sessions.get(token) {
            Some(session) => session.inner.lock().await.is_empty(),
            None => return,
        };
        if empty {
            sessions.remove(token);
            tracing::info!(token = %tfclaw_proto::token::fingerprint(token), "session removed");
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
