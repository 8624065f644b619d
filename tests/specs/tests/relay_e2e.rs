// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end relay scenarios over real WebSocket connections.

use tfclaw_proto::wire::{
    AgentDescriptor, ClientType, CommandPayload, Frame, Platform, TerminalSummary,
};
use tfclaw_specs::{
    http_get, recv_close, recv_frame, send_frame, settle, RelayHarness,
};

const TOKEN: &str = "tkn-abcdefghij";

fn descriptor(agent_id: &str) -> AgentDescriptor {
    AgentDescriptor {
        agent_id: agent_id.to_owned(),
        platform: Platform::Linux,
        hostname: "box".to_owned(),
        connected_at: 1,
    }
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

#[tokio::test]
async fn late_joining_client_sees_warm_snapshot() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;

    let mut agent = relay.connect("agent", TOKEN).await?;
    send_frame(&mut agent, &Frame::AgentRegister(descriptor("a1"))).await?;
    send_frame(
        &mut agent,
        &Frame::AgentTerminalList { terminals: vec![summary("t1", "shell")] },
    )
    .await?;
    send_frame(
        &mut agent,
        &Frame::AgentTerminalOutput {
            terminal_id: "t1".to_owned(),
            chunk: "hello\n".to_owned(),
            at: 2,
        },
    )
    .await?;
    settle().await;

    let mut client = relay.connect("client", TOKEN).await?;
    match recv_frame(&mut client).await? {
        Frame::RelayState(state) => {
            assert_eq!(state.agent.map(|a| a.agent_id).as_deref(), Some("a1"));
            assert_eq!(state.terminals.len(), 1);
            assert_eq!(state.snapshots.len(), 1);
            assert_eq!(state.snapshots[0].terminal_id, "t1");
            assert_eq!(state.snapshots[0].output, "hello\n");
        }
        other => anyhow::bail!("expected relay.state first, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn second_agent_evicts_the_first_with_4000() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;

    let mut first = relay.connect("agent", TOKEN).await?;
    send_frame(&mut first, &Frame::AgentRegister(descriptor("a1"))).await?;
    settle().await;

    let _second = relay.connect("agent", TOKEN).await?;

    let (code, reason) = recv_close(&mut first).await?;
    assert_eq!(code, 4000);
    assert_eq!(reason, "Replaced by a newer agent connection");
    Ok(())
}

#[tokio::test]
async fn command_without_agent_is_refused() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;
    let mut client = relay.connect("client", "tkn-empty-0001").await?;

    // Join state arrives first.
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    send_frame(
        &mut client,
        &Frame::ClientCommand {
            request_id: Some("r1".to_owned()),
            payload: CommandPayload::TerminalCreate {
                title: Some("x".to_owned()),
                cwd: None,
            },
        },
    )
    .await?;

    match recv_frame(&mut client).await? {
        Frame::RelayAck { request_id, ok, message } => {
            assert_eq!(request_id.as_deref(), Some("r1"));
            assert!(!ok);
            assert_eq!(
                message.as_deref(),
                Some("No active terminal agent connected for this token.")
            );
        }
        other => anyhow::bail!("expected negative ack, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn hello_round_trip() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;
    let mut client = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    send_frame(&mut client, &Frame::ClientHello { client_type: ClientType::Viewer }).await?;

    match recv_frame(&mut client).await? {
        Frame::RelayAck { ok, message, .. } => {
            assert!(ok);
            assert_eq!(message.as_deref(), Some("hello viewer"));
        }
        other => anyhow::bail!("expected ack, got {other:?}"),
    }
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));
    Ok(())
}

#[tokio::test]
async fn output_streams_to_connected_clients_in_order() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;

    let mut agent = relay.connect("agent", TOKEN).await?;
    send_frame(
        &mut agent,
        &Frame::AgentTerminalList { terminals: vec![summary("t1", "shell")] },
    )
    .await?;
    settle().await;

    let mut client = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    for chunk in ["one\n", "two\n", "three\n"] {
        send_frame(
            &mut agent,
            &Frame::AgentTerminalOutput {
                terminal_id: "t1".to_owned(),
                chunk: chunk.to_owned(),
                at: 1,
            },
        )
        .await?;
    }

    for expected in ["one\n", "two\n", "three\n"] {
        match recv_frame(&mut client).await? {
            Frame::AgentTerminalOutput { terminal_id, chunk, .. } => {
                assert_eq!(terminal_id, "t1");
                assert_eq!(chunk, expected);
            }
            other => anyhow::bail!("expected terminal output, got {other:?}"),
        }
    }
    Ok(())
}

#[tokio::test]
async fn oversized_frame_closes_with_1009() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|c| c.max_message_bytes = 1_024).await?;
    let mut client = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    // A frame of exactly the cap is accepted (it merely fails to parse).
    use futures_util::SinkExt;
    use tokio_tungstenite::tungstenite::Message;
    let exact = "x".repeat(1_024);
    client.send(Message::Text(exact.into())).await?;
    match recv_frame(&mut client).await? {
        Frame::RelayAck { ok, message, .. } => {
            assert!(!ok);
            assert_eq!(message.as_deref(), Some("invalid message"));
        }
        other => anyhow::bail!("expected negative ack, got {other:?}"),
    }

    // One byte over the cap terminates the socket with 1009.
    let over = "x".repeat(1_025);
    client.send(Message::Text(over.into())).await?;
    let (code, _reason) = recv_close(&mut client).await?;
    assert_eq!(code, 1009);
    Ok(())
}

#[tokio::test]
async fn client_cap_closes_excess_client_with_1008() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|c| c.max_clients_per_session = 1).await?;

    let mut first = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut first).await?, Frame::RelayState(_)));

    let mut second = relay.connect("client", TOKEN).await?;
    let (code, _reason) = recv_close(&mut second).await?;
    assert_eq!(code, 1008);

    // The first client keeps working.
    send_frame(&mut first, &Frame::ClientHello { client_type: ClientType::Mobile }).await?;
    match recv_frame(&mut first).await? {
        Frame::RelayAck { ok, .. } => assert!(ok),
        other => anyhow::bail!("expected ack, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn message_rate_limit_acks_then_closes_1008() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|c| {
        c.max_messages_per_window = 2;
        c.message_rate_window_ms = 60_000;
    })
    .await?;
    let mut client = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    for _ in 0..3 {
        send_frame(&mut client, &Frame::ClientHello { client_type: ClientType::Web }).await?;
    }

    // Frames drain until the rate ack and the 1008 close.
    let mut saw_rate_ack = false;
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite::Message;
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "no close before deadline");
        match client.next().await {
            Some(Ok(Message::Text(text))) => {
                if text.contains("rate limit exceeded") {
                    saw_rate_ack = true;
                }
            }
            Some(Ok(Message::Close(Some(frame)))) => {
                assert_eq!(u16::from(frame.code), 1008);
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(_)) | None => break,
        }
    }
    assert!(saw_rate_ack);
    Ok(())
}

#[tokio::test]
async fn admission_rejections_by_status() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|c| c.max_upgrades_per_window_per_ip = 3).await?;

    // Bad token.
    let url = relay.ws_url("/ws", "client", "short");
    assert_eq!(relay.connect_expecting_rejection(&url).await?, 401);

    // Bogus role.
    let url = relay.ws_url("/ws", "admin", TOKEN);
    assert_eq!(relay.connect_expecting_rejection(&url).await?, 401);

    // Wrong path misses the WS route entirely (no quota spent).
    let url = relay.ws_url("/elsewhere", "client", TOKEN);
    assert_eq!(relay.connect_expecting_rejection(&url).await?, 404);

    // Third upgrade at the WS path fills the window; the next one is 429.
    let url = relay.ws_url("/ws", "client", TOKEN);
    let _ok = relay.connect("client", TOKEN).await?;
    assert_eq!(relay.connect_expecting_rejection(&url).await?, 429);
    Ok(())
}

#[tokio::test]
async fn session_cap_refuses_new_tokens_with_503() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|c| c.max_sessions = 1).await?;

    let _first = relay.connect("client", TOKEN).await?;
    settle().await;

    let url = relay.ws_url("/ws", "client", "tkn-0123456789");
    assert_eq!(relay.connect_expecting_rejection(&url).await?, 503);
    Ok(())
}

#[tokio::test]
async fn health_endpoint_reports_gauges() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;
    let _client = relay.connect("client", TOKEN).await?;
    settle().await;

    let response = http_get(relay.port, "/health").await?;
    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains("cache-control: no-store"));
    assert!(response.contains("x-content-type-options: nosniff"));
    assert!(response.contains(r#""ok":true"#));
    assert!(response.contains(r#""service":"tfclaw-relay""#));
    assert!(response.contains(r#""sessions":1"#));
    assert!(response.contains(r#""sockets":1"#));
    Ok(())
}

#[tokio::test]
async fn snapshot_command_returns_minimal_state() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;

    let mut agent = relay.connect("agent", TOKEN).await?;
    send_frame(
        &mut agent,
        &Frame::AgentTerminalList {
            terminals: vec![summary("t1", "a"), summary("t2", "b")],
        },
    )
    .await?;
    send_frame(
        &mut agent,
        &Frame::AgentTerminalOutput {
            terminal_id: "t1".to_owned(),
            chunk: "warm\n".to_owned(),
            at: 1,
        },
    )
    .await?;
    settle().await;

    let mut client = relay.connect("client", TOKEN).await?;
    assert!(matches!(recv_frame(&mut client).await?, Frame::RelayState(_)));

    send_frame(
        &mut client,
        &Frame::ClientCommand {
            request_id: None,
            payload: CommandPayload::TerminalSnapshot { terminal_id: "t1".to_owned() },
        },
    )
    .await?;

    match recv_frame(&mut client).await? {
        Frame::RelayState(state) => {
            assert_eq!(state.terminals.len(), 1);
            assert_eq!(state.terminals[0].terminal_id, "t1");
            assert_eq!(state.snapshots[0].output, "warm\n");
        }
        other => anyhow::bail!("expected minimal state, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn agent_departure_broadcasts_fresh_state() -> anyhow::Result<()> {
    let relay = RelayHarness::start(|_| {}).await?;

    let mut agent = relay.connect("agent", TOKEN).await?;
    send_frame(&mut agent, &Frame::AgentRegister(descriptor("a1"))).await?;
    settle().await;

    let mut client = relay.connect("client", TOKEN).await?;
    match recv_frame(&mut client).await? {
        Frame::RelayState(state) => assert!(state.agent.is_some()),
        other => anyhow::bail!("expected relay.state, got {other:?}"),
    }

    drop(agent);

    match recv_frame(&mut client).await? {
        Frame::RelayState(state) => assert!(state.agent.is_none()),
        other => anyhow::bail!("expected refreshed relay.state, got {other:?}"),
    }
    Ok(())
}
