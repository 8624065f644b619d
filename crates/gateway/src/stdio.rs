// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdin/stdout chat platform for local testing.
//!
//! Each stdin line becomes one inbound event for a single synthetic chat;
//! outbound messages print to stdout with their ids so recalls are visible.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chat::{ChatEvent, ChatPlatform};

const CHANNEL: &str = "stdio";
const CHAT_ID: &str = "local";

/// Console-backed [`ChatPlatform`].
pub struct StdioPlatform {
    next_id: AtomicU64,
}

impl StdioPlatform {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1) }
    }
}

impl Default for StdioPlatform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatPlatform for StdioPlatform {
    async fn send_message(
        &self,
        _channel: &str,
        _chat_id: &str,
        text: &str,
    ) -> anyhow::Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("[msg #{id}]\n{text}");
        Ok(id.to_string())
    }

    async fn delete_message(
        &self,
        _channel: &str,
        _chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<()> {
        println!("[recall #{message_id}]");
        Ok(())
    }

    async fn add_reaction(
        &self,
        _channel: &str,
        _chat_id: &str,
        _message_id: &str,
        _emoji: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn send_image(
        &self,
        _channel: &str,
        _chat_id: &str,
        mime_type: &str,
        image_base64: &str,
        caption: &str,
    ) -> anyhow::Result<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("[image #{id}] {caption} ({mime_type}, {} b64 chars)", image_base64.len());
        Ok(id.to_string())
    }
}

/// Read stdin lines into chat events until EOF or shutdown.
pub fn spawn_stdin_events(tx: mpsc::UnboundedSender<ChatEvent>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        let mut lines = stdin.lines();
        let mut seq = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            seq += 1;
                            let event = ChatEvent {
                                channel: CHANNEL.to_owned(),
                                chat_id: CHAT_ID.to_owned(),
                                message_id: format!("stdin-{seq}"),
                                user_id: "local".to_owned(),
                                text,
                            };
                            if tx.send(event).is_err() {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(_) => break,
                    }
                }
            }
        }
    });
}
