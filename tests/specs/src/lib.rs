// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end relay tests.
//!
//! Serves the real relay router in-process on a free port and drives it
//! with plain tokio-tungstenite clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use tfclaw_proto::wire::{parse_frame, Frame};
use tfclaw_relay::config::RelayConfig;
use tfclaw_relay::heartbeat::spawn_heartbeat;
use tfclaw_relay::state::RelayState;
use tfclaw_relay::transport::build_router;

/// A WebSocket client connection to the in-process relay.
pub type WsClient = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// An in-process relay, shut down on drop.
pub struct RelayHarness {
    pub port: u16,
    shutdown: CancellationToken,
}

impl RelayHarness {
    /// Start a relay with default config, tweaked by `tweak`.
    pub async fn start(tweak: impl FnOnce(&mut RelayConfig)) -> anyhow::Result<Self> {
        let mut config = RelayConfig::parse_from(["tfclaw-relay"]);
        config.host = "127.0.0.1".to_owned();
        tweak(&mut config);
        config.validate()?;

        let shutdown = CancellationToken::new();
        let state = Arc::new(RelayState::new(config, shutdown.clone()));
        spawn_heartbeat(Arc::clone(&state));
        let router = build_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let graceful = shutdown.clone();
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(graceful.cancelled_owned())
            .await;
        });

        Ok(Self { port, shutdown })
    }

    pub fn ws_url(&self, path: &str, role: &str, token: &str) -> String {
        format!("ws://127.0.0.1:{}{path}?role={role}&token={token}", self.port)
    }

    /// Connect a socket with the given role and token at the default path.
    pub async fn connect(&self, role: &str, token: &str) -> anyhow::Result<WsClient> {
        let url = self.ws_url("/ws", role, token);
        let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(ws)
    }

    /// Attempt a connect and return the HTTP status of the rejection.
    pub async fn connect_expecting_rejection(&self, url: &str) -> anyhow::Result<u16> {
        match tokio_tungstenite::connect_async(url).await {
            Ok(_) => anyhow::bail!("upgrade unexpectedly succeeded"),
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                Ok(response.status().as_u16())
            }
            Err(other) => anyhow::bail!("unexpected connect error: {other}"),
        }
    }
}

impl Drop for RelayHarness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Send one frame as a text message.
pub async fn send_frame(ws: &mut WsClient, frame: &Frame) -> anyhow::Result<()> {
    ws.send(Message::Text(frame.to_text().into()))
        .await
        .map_err(|e| anyhow::anyhow!("send failed: {e}"))
}

/// Receive the next text frame, parsed. Pings and pongs are skipped.
pub async fn recv_frame(ws: &mut WsClient) -> anyhow::Result<Frame> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("no frame within {RECV_TIMEOUT:?}"))?;
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("no frame within {RECV_TIMEOUT:?}"))?;
        match msg {
            Some(Ok(Message::Text(text))) => {
                return parse_frame(&text).map_err(|e| anyhow::anyhow!("bad frame: {e}"));
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(other)) => anyhow::bail!("unexpected message: {other:?}"),
            Some(Err(e)) => anyhow::bail!("socket error: {e}"),
            None => anyhow::bail!("socket closed"),
        }
    }
}

/// Receive until a close frame arrives; returns `(code, reason)`.
pub async fn recv_close(ws: &mut WsClient) -> anyhow::Result<(u16, String)> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        let remaining = deadline
            .checked_duration_since(tokio::time::Instant::now())
            .ok_or_else(|| anyhow::anyhow!("no close within {RECV_TIMEOUT:?}"))?;
        let msg = tokio::time::timeout(remaining, ws.next())
            .await
            .map_err(|_| anyhow::anyhow!("no close within {RECV_TIMEOUT:?}"))?;
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => {
                return Ok((u16::from(frame.code), frame.reason.to_string()));
            }
            Some(Ok(Message::Close(None))) => return Ok((1005, String::new())),
            Some(Ok(_)) => continue,
            Some(Err(e)) => anyhow::bail!("socket error before close: {e}"),
            None => anyhow::bail!("socket ended without close frame"),
        }
    }
}

/// Raw HTTP/1.1 GET against the relay; returns the full response text.
pub async fn http_get(port: u16, path: &str) -> anyhow::Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(("127.0.0.1", port)).await?;
    let request =
        format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Give the relay a beat to route frames already in flight.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}
