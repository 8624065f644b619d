// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn summary(id: &str, title: &str, active: bool) -> TerminalSummary {
    TerminalSummary {
        terminal_id: id.to_owned(),
        title: title.to_owned(),
        cwd: None,
        is_active: active,
        updated_at: 1,
        foreground_command: None,
    }
}

#[yare::parameterized(
    list = { ":list", LineCmd::List },
    ls = { ":ls", LineCmd::List },
    raw = { ":raw", LineCmd::Raw },
    quit = { ":quit", LineCmd::Quit },
    q = { ":q", LineCmd::Quit },
)]
fn named_commands(line: &str, expected: LineCmd) {
    assert_eq!(parse_line_command(line), expected);
}

#[test]
fn use_takes_a_ref() {
    assert_eq!(parse_line_command(":use 2\n"), LineCmd::Use("2".to_owned()));
    assert_eq!(parse_line_command(":use shell"), LineCmd::Use("shell".to_owned()));
}

#[test]
fn plain_lines_become_input_with_newline() {
    assert_eq!(parse_line_command("echo hi\n"), LineCmd::Input("echo hi\n".to_owned()));
    assert_eq!(parse_line_command("ls"), LineCmd::Input("ls\n".to_owned()));
}

#[test]
fn trailing_crlf_is_stripped_before_parsing() {
    assert_eq!(parse_line_command(":quit\r\n"), LineCmd::Quit);
}

#[test]
fn refs_resolve_id_title_then_index() {
    let terminals = vec![summary("t1", "2", true), summary("t2", "shell", true)];
    assert_eq!(resolve_ref(&terminals, "t2").map(|t| t.terminal_id), Some("t2".to_owned()));
    // Title match beats numeric index.
    assert_eq!(resolve_ref(&terminals, "2").map(|t| t.terminal_id), Some("t1".to_owned()));
    assert_eq!(resolve_ref(&terminals, "1").map(|t| t.terminal_id), Some("t1".to_owned()));
    assert_eq!(resolve_ref(&terminals, "missing"), None);
}

#[test]
fn render_list_marks_selection_and_inactive() {
    let state = SessionState {
        agent: None,
        terminals: vec![summary("t1", "shell", true), summary("t2", "logs", false)],
        snapshots: Vec::new(),
    };
    let out = render_list(&state, Some("t2"));
    assert!(out.contains("agent: (not connected)"));
    assert!(out.contains(" 1. shell"));
    assert!(out.contains("*2. logs (inactive)"));
}

#[test]
fn render_list_without_terminals() {
    let state = SessionState::default();
    assert!(render_list(&state, None).contains("no terminals"));
}

#[test]
fn connect_url_appends_client_role() {
    let args = ViewerArgs {
        relay_url: "ws://relay.example/ws".to_owned(),
        token: "tkn-abcdefghij".to_owned(),
    };
    assert_eq!(args.connect_url(), "ws://relay.example/ws?role=client&token=tkn-abcdefghij");
}
