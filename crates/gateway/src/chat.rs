// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The chat-platform boundary.
//!
//! The real messenger SDK lives outside this crate; the gateway only needs
//! send/delete/react/upload and a stream of inbound events.

use async_trait::async_trait;

/// One inbound chat message or event.
#[derive(Debug, Clone)]
pub struct ChatEvent {
    pub channel: String,
    pub chat_id: String,
    /// Platform message or event id, used for deduplication.
    pub message_id: String,
    pub user_id: String,
    pub text: String,
}

impl ChatEvent {
    /// Routing key: one interpreter session per `channel:chatId`.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }
}

/// Outbound surface of the chat platform.
///
/// `send_message` returns the posted message's id so progress coalescing can
/// delete superseded messages. Platforms with true in-place edits can
/// implement `delete_message` as a no-op and edit in `send_message` instead;
/// the observable property is at most one current progress message.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn send_message(
        &self,
        channel: &str,
        chat_id: &str,
        text: &str,
    ) -> anyhow::Result<String>;

    async fn delete_message(
        &self,
        channel: &str,
        chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<()>;

    async fn add_reaction(
        &self,
        channel: &str,
        chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<()>;

    async fn send_image(
        &self,
        channel: &str,
        chat_id: &str,
        mime_type: &str,
        image_base64: &str,
        caption: &str,
    ) -> anyhow::Result<String>;
}
