// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message ingest request and payload hashing.
//!
//! Dedup is keyed on `(source, idempotency_key)`; the payload hash guards
//! against key reuse with a different message body.

use crate::run::DeliveryMode;
use crate::ThreadKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An image attached to an ingested message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// A message ingest request from an adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunIngest {
    /// Adapter label (e.g. "cli", "telegram", "task:{taskId}")
    pub source: String,
    pub thread_key: ThreadKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
    pub text: String,
    pub delivery_mode: DeliveryMode,
    /// Caller-provided dedup key, unique per source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<IngestImage>,
}

impl RunIngest {
    /// Canonical hash of the ingest payload.
    ///
    /// Covers thread key, text, delivery mode, and each image's mime type,
    /// filename, and content digest. Two ingests with the same
    /// `(source, idempotency_key)` must produce the same hash to be
    /// treated as duplicates.
    pub fn payload_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.thread_key.as_str().as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.text.as_bytes());
        hasher.update([0x1f]);
        hasher.update(self.delivery_mode.to_string().as_bytes());
        for image in &self.images {
            hasher.update([0x1f]);
            hasher.update(image.mime_type.as_bytes());
            hasher.update([0x1f]);
            hasher.update(image.filename.as_bytes());
            hasher.update([0x1f]);
            let digest = Sha256::digest(&image.bytes);
            hasher.update(digest);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
