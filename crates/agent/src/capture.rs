// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Screen/window capture seam.
//!
//! Real display and window grabbing is an external collaborator; this module
//! defines the interface the agent drives and a default backend that only
//! advertises the primary display.

use async_trait::async_trait;

use tfclaw_proto::wire::{CaptureSource, CaptureSourceKind};

/// A completed grab, ready to wrap in an `agent.screen_capture` frame.
#[derive(Debug, Clone)]
pub struct Grab {
    pub mime_type: String,
    pub image_base64: String,
}

/// Backend interface for enumerating and grabbing capture sources.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Enumerate available screens (and, where the platform supports it,
    /// visible top-level windows).
    async fn list_sources(&self) -> anyhow::Result<Vec<CaptureSource>>;

    /// Grab the pixels of one source as an encoded image.
    async fn grab(
        &self,
        source: CaptureSourceKind,
        source_id: Option<&str>,
    ) -> anyhow::Result<Grab>;
}

/// Default backend: lists the primary display, cannot grab.
pub struct NullCaptureBackend;

#[async_trait]
impl CaptureBackend for NullCaptureBackend {
    async fn list_sources(&self) -> anyhow::Result<Vec<CaptureSource>> {
        Ok(vec![CaptureSource {
            source: CaptureSourceKind::Screen,
            source_id: "screen:0".to_owned(),
            label: "Primary display".to_owned(),
        }])
    }

    async fn grab(
        &self,
        source: CaptureSourceKind,
        source_id: Option<&str>,
    ) -> anyhow::Result<Grab> {
        let id = source_id.unwrap_or("primary");
        match source {
            CaptureSourceKind::Screen => {
                anyhow::bail!("screen capture backend not available for {id}")
            }
            CaptureSourceKind::Window => {
                anyhow::bail!("window capture is not supported on this platform")
            }
        }
    }
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod tests;
