// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use clap::Parser;

use crate::config::RelayConfig;

fn test_config() -> RelayConfig {
    RelayConfig::parse_from(["tfclaw-relay"])
}

fn summary(id: &str, title: &str) -> TerminalSummary {
    TerminalSummary {
        terminal_id: id.to_owned(),
        title: title.to_owned(),
        cwd: None,
        is_active: true,
        updated_at: 1,
        foreground_command: None,
    }
}

#[test]
fn append_snapshot_caps_and_bumps_summary() {
    let mut inner = SessionInner::default();
    inner.replace_terminals(vec![summary("t1", "shell")]);

    inner.append_snapshot("t1", "hello\n", 10, 100);
    inner.append_snapshot("t1", "world\n", 20, 100);

    let state = inner.compose_state();
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots[0].output, "hello\nworld\n");
    assert_eq!(state.snapshots[0].updated_at, 20);
    assert_eq!(state.terminals[0].updated_at, 20);
    assert!(state.terminals[0].is_active);
}

#[test]
fn append_snapshot_tail_caps() {
    let mut inner = SessionInner::default();
    inner.replace_terminals(vec![summary("t1", "shell")]);
    inner.append_snapshot("t1", "0123456789", 1, 4);
    let state = inner.compose_state();
    assert_eq!(state.snapshots[0].output, "6789");
}

#[test]
fn snapshots_unreachable_without_summary_entry() {
    let mut inner = SessionInner::default();
    inner.append_snapshot("ghost", "boo", 1, 100);
    assert!(inner.compose_state().snapshots.is_empty());

    // The cached text becomes visible once the terminal is listed.
    inner.replace_terminals(vec![summary("ghost", "shell")]);
    assert_eq!(inner.compose_state().snapshots.len(), 1);
}

#[test]
fn replace_terminals_prunes_stale_snapshots() {
    let mut inner = SessionInner::default();
    inner.replace_terminals(vec![summary("t1", "a"), summary("t2", "b")]);
    inner.append_snapshot("t1", "one", 1, 100);
    inner.append_snapshot("t2", "two", 1, 100);

    inner.replace_terminals(vec![summary("t2", "b")]);
    let state = inner.compose_state();
    assert_eq!(state.terminals.len(), 1);
    assert_eq!(state.snapshots.len(), 1);
    assert_eq!(state.snapshots[0].terminal_id, "t2");
}

#[test]
fn compose_terminal_state_is_minimal() {
    let mut inner = SessionInner::default();
    inner.replace_terminals(vec![summary("t1", "a"), summary("t2", "b")]);
    inner.append_snapshot("t1", "one", 1, 100);

    let state = inner.compose_terminal_state("t1");
    assert_eq!(state.terminals.len(), 1);
    assert_eq!(state.terminals[0].terminal_id, "t1");
    assert_eq!(state.snapshots.len(), 1);

    let missing = inner.compose_terminal_state("nope");
    assert!(missing.terminals.is_empty());
    assert!(missing.snapshots.is_empty());
}

#[tokio::test]
async fn session_created_once_per_token() {
    let state = RelayState::new(test_config(), CancellationToken::new());
    let a = state.get_or_create_session("tkn-abcdefghij").await;
    let b = state.get_or_create_session("tkn-abcdefghij").await;
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(state.sessions.read().await.len(), 1);
}

#[tokio::test]
async fn empty_session_dropped() {
    let state = RelayState::new(test_config(), CancellationToken::new());
    state.get_or_create_session("tkn-abcdefghij").await;
    state.drop_session_if_empty("tkn-abcdefghij").await;
    assert!(state.sessions.read().await.is_empty());
}

#[tokio::test]
async fn occupied_session_survives_drop_check() {
    let state = RelayState::new(test_config(), CancellationToken::new());
    let ip = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
    let (handle, _rx) = state.register_socket(Role::Client, "tkn-abcdefghij".to_owned(), ip).await;
    let session = state.get_or_create_session("tkn-abcdefghij").await;
    session.inner.lock().await.clients.insert(handle.id, Arc::clone(&handle));

    state.drop_session_if_empty("tkn-abcdefghij").await;
    assert_eq!(state.sessions.read().await.len(), 1);
}

#[tokio::test]
async fn register_socket_counts_and_quotas() {
    let state = RelayState::new(test_config(), CancellationToken::new());
    let ip = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
    let (handle, _rx) = state.register_socket(Role::Agent, "tkn-abcdefghij".to_owned(), ip).await;
    assert_eq!(state.socket_count.load(Ordering::Relaxed), 1);
    assert_eq!(state.quotas.active_count(ip), 1);

    state.unregister_socket(&handle).await;
    assert_eq!(state.socket_count.load(Ordering::Relaxed), 0);
    assert_eq!(state.quotas.active_count(ip), 0);

    // A second unregister of the same handle is a no-op.
    state.unregister_socket(&handle).await;
    assert_eq!(state.socket_count.load(Ordering::Relaxed), 0);
}

#[tokio::test]
async fn socket_handle_queues_outbound() -> anyhow::Result<()> {
    let state = RelayState::new(test_config(), CancellationToken::new());
    let ip = std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST);
    let (handle, mut rx) = state.register_socket(Role::Client, "tkn-abcdefghij".to_owned(), ip).await;

    assert!(handle.send_frame(&Frame::ack_ok(None, "hi")));
    assert!(handle.close(4000, "replaced"));

    match rx.recv().await {
        Some(Outbound::Text(text)) => assert!(text.contains(r#""ok":true"#)),
        other => anyhow::bail!("expected text frame, got {other:?}"),
    }
    match rx.recv().await {
        Some(Outbound::Close { code, reason }) => {
            assert_eq!(code, 4000);
            assert_eq!(reason, "replaced");
        }
        other => anyhow::bail!("expected close frame, got {other:?}"),
    }
    Ok(())
}
