// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn passthrough_phrases_flip_the_flag() {
    assert_eq!(discover("passthrough enabled.").passthrough, Some(true));
    assert_eq!(discover("passthrough disabled.").passthrough, Some(false));
    assert_eq!(discover("nothing of note").passthrough, None);
}

#[test]
fn tmux_header_sets_target() {
    let found = discover("[tmux shell]\n$ ls\nfile.txt");
    assert_eq!(found.target.as_deref(), Some("shell"));
}

#[test]
fn none_target_header_is_ignored() {
    assert_eq!(discover("[tmux none]\npassthrough disabled.").target, None);
}

#[test]
fn explicit_target_set_wins_over_header() {
    let found = discover("[tmux old]\nTarget set to `new`");
    assert_eq!(found.target.as_deref(), Some("new"));
}

#[yare::parameterized(
    auto = { "stream_mode auto", StreamMode::Auto },
    on = { "stream_mode on", StreamMode::On },
    off = { "stream_mode off", StreamMode::Off },
)]
fn stream_mode_parsed(output: &str, expected: StreamMode) {
    assert_eq!(discover(output).stream_mode, Some(expected));
}

#[test]
fn combined_state_reply() {
    let output = "[tmux work]\npassthrough enabled.\nstream_mode off\ncapture_lines 40";
    let found = discover(output);
    assert_eq!(found.passthrough, Some(true));
    assert_eq!(found.target.as_deref(), Some("work"));
    assert_eq!(found.stream_mode, Some(StreamMode::Off));
}

#[test]
fn plain_output_discovers_nothing() {
    assert_eq!(discover("total 4\n-rw-r--r-- file"), Discovery::default());
}
