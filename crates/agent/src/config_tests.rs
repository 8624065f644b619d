// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn base_args() -> Vec<&'static str> {
    vec!["tfclaw-agent", "--token", "tkn-abcdefghij"]
}

fn defaults() -> AgentConfig {
    AgentConfig::parse_from(base_args())
}

#[test]
fn default_values() {
    let config = defaults();
    assert_eq!(config.relay_url, "ws://127.0.0.1:8787/ws");
    assert_eq!(config.start_terminals, 1);
    assert_eq!(config.poll_ms, 250);
    assert_eq!(config.capture_lines, 300);
    assert_eq!(config.max_delta_chars, 4_000);
    assert_eq!(config.max_local_buffer, 12_000);
    assert!(config.reset_on_boot);
    assert!(!config.persist_session_on_shutdown);
    assert!(config.validate().is_ok());
}

#[test]
fn short_token_rejected() {
    let mut config = defaults();
    config.token = "short".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn relay_url_must_be_websocket() {
    let mut config = defaults();
    config.relay_url = "http://relay.example/ws".to_owned();
    assert!(config.validate().is_err());
}

#[test]
fn connect_url_appends_role_and_token() {
    let config = defaults();
    assert_eq!(
        config.connect_url(),
        "ws://127.0.0.1:8787/ws?role=agent&token=tkn-abcdefghij"
    );
}

#[test]
fn connect_url_respects_existing_query() {
    let mut config = defaults();
    config.relay_url = "wss://relay.example/ws?keep=1".to_owned();
    assert_eq!(
        config.connect_url(),
        "wss://relay.example/ws?keep=1&role=agent&token=tkn-abcdefghij"
    );
}

#[test]
fn tmux_base_args_split_on_whitespace() {
    let mut config = defaults();
    config.tmux_base_args = Some("-L tfclaw".to_owned());
    assert_eq!(config.tmux_config().base_args, vec!["-L", "tfclaw"]);
}

#[test]
fn reset_on_boot_accepts_explicit_false() {
    let config =
        AgentConfig::parse_from(["tfclaw-agent", "--token", "tkn-abcdefghij", "--reset-on-boot", "false"]);
    assert!(!config.reset_on_boot);
}

#[test]
fn explicit_agent_id_wins() {
    let mut config = defaults();
    config.agent_id = Some("workstation-1".to_owned());
    assert_eq!(config.effective_agent_id(), "workstation-1");
}
