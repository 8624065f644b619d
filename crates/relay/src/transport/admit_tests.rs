// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::net::Ipv4Addr;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;

fn state_with(config: RelayConfig) -> Arc<RelayState> {
    Arc::new(RelayState::new(config, CancellationToken::new()))
}

fn default_state() -> Arc<RelayState> {
    state_with(RelayConfig::parse_from(["tfclaw-relay"]))
}

fn query(role: Option<&str>, token: Option<&str>) -> AdmitQuery {
    AdmitQuery { role: role.map(str::to_owned), token: token.map(str::to_owned) }
}

fn ip() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))
}

#[tokio::test]
async fn valid_client_admitted() -> anyhow::Result<()> {
    let state = default_state();
    let q = query(Some("client"), Some("tkn-abcdefghij"));
    let (role, token) = admit(&state, ip(), &q, &HeaderMap::new())
        .await
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(role, Role::Client);
    assert_eq!(token, "tkn-abcdefghij");
    Ok(())
}

#[tokio::test]
async fn missing_role_is_unauthorized() {
    let state = default_state();
    let q = query(None, Some("tkn-abcdefghij"));
    assert_eq!(
        admit(&state, ip(), &q, &HeaderMap::new()).await,
        Err(AdmissionError::Unauthorized)
    );
}

#[tokio::test]
async fn bogus_role_is_unauthorized() {
    let state = default_state();
    let q = query(Some("admin"), Some("tkn-abcdefghij"));
    assert_eq!(
        admit(&state, ip(), &q, &HeaderMap::new()).await,
        Err(AdmissionError::Unauthorized)
    );
}

#[tokio::test]
async fn short_token_is_unauthorized() {
    let state = default_state();
    let q = query(Some("client"), Some("short"));
    assert_eq!(
        admit(&state, ip(), &q, &HeaderMap::new()).await,
        Err(AdmissionError::Unauthorized)
    );
}

#[tokio::test]
async fn token_accepted_from_header() -> anyhow::Result<()> {
    let state = default_state();
    let q = query(Some("agent"), None);
    let mut headers = HeaderMap::new();
    headers.insert("x-auth-token", "tkn-abcdefghij".parse()?);
    let (role, token) =
        admit(&state, ip(), &q, &headers).await.map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(role, Role::Agent);
    assert_eq!(token, "tkn-abcdefghij");
    Ok(())
}

#[tokio::test]
async fn upgrade_window_returns_429_after_limit() {
    let mut config = RelayConfig::parse_from(["tfclaw-relay"]);
    config.max_upgrades_per_window_per_ip = 2;
    let state = state_with(config);
    let q = query(Some("client"), Some("tkn-abcdefghij"));

    assert!(admit(&state, ip(), &q, &HeaderMap::new()).await.is_ok());
    assert!(admit(&state, ip(), &q, &HeaderMap::new()).await.is_ok());
    assert_eq!(
        admit(&state, ip(), &q, &HeaderMap::new()).await,
        Err(AdmissionError::RateLimited)
    );
}

#[tokio::test]
async fn session_cap_refuses_new_tokens_only() {
    let mut config = RelayConfig::parse_from(["tfclaw-relay"]);
    config.max_sessions = 1;
    let state = state_with(config);
    state.get_or_create_session("tkn-abcdefghij").await;

    // Existing session's token still admits.
    let q = query(Some("client"), Some("tkn-abcdefghij"));
    assert!(admit(&state, ip(), &q, &HeaderMap::new()).await.is_ok());

    // A token that would create a second session is refused.
    let q2 = query(Some("client"), Some("tkn-0123456789"));
    assert_eq!(
        admit(&state, ip(), &q2, &HeaderMap::new()).await,
        Err(AdmissionError::OverCapacity)
    );
}

#[tokio::test]
async fn origin_allowlist_enforced_for_browser_clients() -> anyhow::Result<()> {
    let mut config = RelayConfig::parse_from(["tfclaw-relay"]);
    config.allowed_origins = Some("https://app.example".to_owned());
    let state = state_with(config);
    let q = query(Some("client"), Some("tkn-abcdefghij"));

    let mut bad = HeaderMap::new();
    bad.insert(header::ORIGIN, "https://evil.example".parse()?);
    assert_eq!(
        admit(&state, ip(), &q, &bad).await,
        Err(AdmissionError::ForbiddenOrigin)
    );

    let mut good = HeaderMap::new();
    good.insert(header::ORIGIN, "https://app.example".parse()?);
    assert!(admit(&state, ip(), &q, &good).await.is_ok());

    // No Origin header (non-browser peers) passes.
    assert!(admit(&state, ip(), &q, &HeaderMap::new()).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn connection_caps_return_over_capacity() {
    let mut config = RelayConfig::parse_from(["tfclaw-relay"]);
    config.max_connections = 0;
    let state = state_with(config);
    let q = query(Some("client"), Some("tkn-abcdefghij"));
    assert_eq!(
        admit(&state, ip(), &q, &HeaderMap::new()).await,
        Err(AdmissionError::OverCapacity)
    );
}
