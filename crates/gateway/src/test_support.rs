// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory chat platform for exercising the router and coalescer.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::chat::ChatPlatform;

/// One recorded platform call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Send { id: String, text: String },
    Delete { id: String },
    React { message_id: String, emoji: String },
    Image { id: String, mime_type: String, caption: String },
}

/// Chat platform that records every call and never fails.
#[derive(Default)]
pub struct FakePlatform {
    next_id: AtomicU64,
    pub calls: Mutex<Vec<PlatformCall>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// All recorded calls, in order.
    pub fn recorded(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    /// Texts of sent messages, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PlatformCall::Send { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ids of deleted messages, in order.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                PlatformCall::Delete { id } => Some(id.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn send_message(
        &self,
        _channel: &str,
        _chat_id: &str,
        text: &str,
    ) -> anyhow::Result<String> {
        let id = self.next();
        self.calls.lock().push(PlatformCall::Send { id: id.clone(), text: text.to_owned() });
        Ok(id)
    }

    async fn delete_message(
        &self,
        _channel: &str,
        _chat_id: &str,
        message_id: &str,
    ) -> anyhow::Result<()> {
        self.calls.lock().push(PlatformCall::Delete { id: message_id.to_owned() });
        Ok(())
    }

    async fn add_reaction(
        &self,
        _channel: &str,
        _chat_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> anyhow::Result<()> {
        self.calls.lock().push(PlatformCall::React {
            message_id: message_id.to_owned(),
            emoji: emoji.to_owned(),
        });
        Ok(())
    }

    async fn send_image(
        &self,
        _channel: &str,
        _chat_id: &str,
        mime_type: &str,
        _image_base64: &str,
        caption: &str,
    ) -> anyhow::Result<String> {
        let id = self.next();
        self.calls.lock().push(PlatformCall::Image {
            id: id.clone(),
            mime_type: mime_type.to_owned(),
            caption: caption.to_owned(),
        });
        Ok(id)
    }
}
