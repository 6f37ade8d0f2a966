// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stored input images.

use crate::run::RunId;
use crate::ThreadKey;
use serde::{Deserialize, Serialize};

/// How long an input image is retained before opportunistic purge.
pub const INPUT_IMAGE_TTL_MS: u64 = 3 * 24 * 60 * 60 * 1000;

/// An input image scoped to a run, or buffered pre-run for `(source, thread_key)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputImage {
    pub id: String,
    /// Owning run; `None` while buffered pre-ingest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub source: String,
    pub thread_key: ThreadKey,
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
    /// Position within the message's image list
    pub position: u32,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl InputImage {
    /// Whether the image has outlived its retention window.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at_ms
    }
}
