// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::tmux::TmuxConfig;

fn limits() -> TerminalLimits {
    TerminalLimits { capture_lines: 300, max_delta_chars: 4_000, max_local_buffer: 100 }
}

/// Manager wired to a channel; the tmux handle is never invoked by these
/// tests (they exercise the pure state paths).
fn manager() -> (TerminalManager, mpsc::UnboundedReceiver<Frame>) {
    let tmux = Arc::new(Tmux::new(TmuxConfig {
        command: "tmux".to_owned(),
        base_args: Vec::new(),
        session: "tfclaw-test".to_owned(),
        bootstrap_window: "boot".to_owned(),
    }));
    let (tx, rx) = mpsc::unbounded_channel();
    (TerminalManager::new(tmux, limits(), tx), rx)
}

fn entry(id: &str, title: &str) -> Arc<TerminalEntry> {
    Arc::new(TerminalEntry {
        id: id.to_owned(),
        title: title.to_owned(),
        cwd: None,
        window_id: "@1".to_owned(),
        pane_id: "%1".to_owned(),
        state: Mutex::new(TerminalState {
            is_active: true,
            updated_at: 1,
            ..TerminalState::default()
        }),
        send_lock: Mutex::new(()),
    })
}

async fn insert(manager: &TerminalManager, e: Arc<TerminalEntry>) {
    manager.terminals.write().await.insert(e.id.clone(), e);
}

fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn summaries_preserve_insertion_order() {
    let (manager, _rx) = manager();
    insert(&manager, entry("t1", "alpha")).await;
    insert(&manager, entry("t2", "beta")).await;

    let summaries = manager.summaries().await;
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].title, "alpha");
    assert_eq!(summaries[1].title, "beta");
}

#[tokio::test]
async fn publish_sends_terminal_list_frame() -> anyhow::Result<()> {
    let (manager, mut rx) = manager();
    insert(&manager, entry("t1", "alpha")).await;
    manager.publish_terminal_list().await;

    match drain(&mut rx).pop() {
        Some(Frame::AgentTerminalList { terminals }) => {
            assert_eq!(terminals.len(), 1);
            assert_eq!(terminals[0].terminal_id, "t1");
        }
        other => anyhow::bail!("expected terminal_list, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn pane_close_emits_notice_before_list() -> anyhow::Result<()> {
    let (manager, mut rx) = manager();
    let e = entry("t2", "beta");
    insert(&manager, Arc::clone(&e)).await;

    manager.mark_pane_closed(&e, "pane not found").await;

    let frames = drain(&mut rx);
    match &frames[0] {
        Frame::AgentTerminalOutput { terminal_id, chunk, .. } => {
            assert_eq!(terminal_id, "t2");
            assert_eq!(chunk, "\n[tmux pane closed: pane not found]\n");
        }
        other => anyhow::bail!("expected output notice first, got {other:?}"),
    }
    match &frames[1] {
        Frame::AgentTerminalList { terminals } => {
            assert_eq!(terminals.len(), 1);
            assert!(!terminals[0].is_active);
        }
        other => anyhow::bail!("expected terminal_list second, got {other:?}"),
    }

    // A second death report is swallowed.
    manager.mark_pane_closed(&e, "pane not found").await;
    assert!(drain(&mut rx).is_empty());
    Ok(())
}

#[tokio::test]
async fn capture_errors_throttled_per_terminal() {
    let (manager, mut rx) = manager();
    let e = entry("t1", "alpha");
    insert(&manager, Arc::clone(&e)).await;

    let err = TmuxError::Failed("flaky".to_owned());
    manager.report_capture_error(&e, &err).await;
    manager.report_capture_error(&e, &err).await;
    manager.report_capture_error(&e, &err).await;

    let errors: Vec<Frame> = drain(&mut rx)
        .into_iter()
        .filter(|f| matches!(f, Frame::AgentError { .. }))
        .collect();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn write_input_to_unknown_terminal_fails() {
    let (manager, _rx) = manager();
    let err = match manager.write_input("missing", "ls\n").await {
        Err(e) => e,
        Ok(()) => AgentError::new(AgentErrorCode::AgentCommandFailed, "unexpected success"),
    };
    assert_eq!(err.code, AgentErrorCode::TerminalNotFound);
    assert!(err.message.contains("missing"));
}

#[tokio::test]
async fn close_unknown_terminal_fails() {
    let (manager, _rx) = manager();
    assert!(manager.close_terminal("missing").await.is_err());
}

#[tokio::test]
async fn emitted_output_carries_timestamp() -> anyhow::Result<()> {
    let (manager, mut rx) = manager();
    manager.emit_output("t1", "hello".to_owned());
    match drain(&mut rx).pop() {
        Some(Frame::AgentTerminalOutput { at, .. }) => assert!(at > 0),
        other => anyhow::bail!("expected terminal_output, got {other:?}"),
    }
    Ok(())
}
