// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress coalescing: one evolving "live" message per in-flight request.
//!
//! The chat platform here has no in-place edits, so the scheme is send-new +
//! delete-old after a short delay; at most one current progress message is
//! the observable property.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::chat::ChatPlatform;

/// Notice posted once when streaming is off and updates keep arriving.
pub const WAITING_NOTICE: &str = "Tfclaw is waiting for Generating...";

/// How streamed updates reach the chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Auto,
    On,
    Off,
}

impl StreamMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::On => "on",
            Self::Off => "off",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(Self::Auto),
            "on" => Some(Self::On),
            "off" => Some(Self::Off),
            _ => None,
        }
    }
}

enum ProgressMsg {
    Update(String),
    Final(String),
    Stop,
}

/// Handle on one progress session. Cloneable; the worker task serializes all
/// platform calls for the session.
#[derive(Clone)]
pub struct ProgressSession {
    tx: mpsc::UnboundedSender<ProgressMsg>,
    pub request_id: String,
}

impl ProgressSession {
    /// Open a session for `request_id` and spawn its serialized worker.
    pub fn open(
        platform: Arc<dyn ChatPlatform>,
        channel: String,
        chat_id: String,
        request_id: String,
        stream_mode: StreamMode,
        recall_delay: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(platform, channel, chat_id, stream_mode, recall_delay, rx));
        Self { tx, request_id }
    }

    /// Queue a streamed update.
    pub fn update(&self, body: String) {
        let _ = self.tx.send(ProgressMsg::Update(body));
    }

    /// Queue the final reply; the worker posts it after every pending update
    /// and then exits.
    pub fn finish(&self, body: String) {
        let _ = self.tx.send(ProgressMsg::Final(body));
    }

    /// Stop the session without a final message (superseded by a newer
    /// request on the same chat). Pending updates are discarded.
    pub fn stop(&self) {
        let _ = self.tx.send(ProgressMsg::Stop);
    }
}

async fn worker(
    platform: Arc<dyn ChatPlatform>,
    channel: String,
    chat_id: String,
    stream_mode: StreamMode,
    recall_delay: Duration,
    mut rx: mpsc::UnboundedReceiver<ProgressMsg>,
) {
    let mut last_body: Option<String> = None;
    let mut last_message_id: Option<String> = None;
    let mut sent_first = false;
    let mut notice_sent = false;

    while let Some(msg) = rx.recv().await {
        match msg {
            ProgressMsg::Update(body) => {
                if last_body.as_deref() == Some(body.as_str()) {
                    continue;
                }
                last_body = Some(body.clone());

                if stream_mode == StreamMode::Off {
                    if !sent_first {
                        sent_first = true;
                        if let Ok(id) = platform.send_message(&channel, &chat_id, &body).await {
                            last_message_id = Some(id);
                        }
                    } else if !notice_sent {
                        notice_sent = true;
                        if let Ok(id) =
                            platform.send_message(&channel, &chat_id, WAITING_NOTICE).await
                        {
                            last_message_id = Some(id);
                        }
                    }
                    // Later updates are suppressed.
                    continue;
                }

                sent_first = true;
                let previous = last_message_id.take();
                if let Ok(id) = platform.send_message(&channel, &chat_id, &body).await {
                    last_message_id = Some(id);
                }
                schedule_recall(&platform, &channel, &chat_id, previous, recall_delay);
            }
            ProgressMsg::Final(body) => {
                let previous = last_message_id.take();
                let _ = platform.send_message(&channel, &chat_id, &body).await;
                schedule_recall(&platform, &channel, &chat_id, previous, recall_delay);
                return;
            }
            ProgressMsg::Stop => return,
        }
    }
}

/// Delete a superseded progress message after the recall delay.
fn schedule_recall(
    platform: &Arc<dyn ChatPlatform>,
    channel: &str,
    chat_id: &str,
    message_id: Option<String>,
    delay: Duration,
) {
    let Some(message_id) = message_id else { return };
    let platform = Arc::clone(platform);
    let channel = channel.to_owned();
    let chat_id = chat_id.to_owned();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = platform.delete_message(&channel, &chat_id, &message_id).await {
            tracing::debug!(err = %e, "progress recall failed");
        }
    });
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
