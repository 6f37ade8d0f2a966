// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Snapshot persistence for crash recovery.
//!
//! Snapshots store the complete materialized state at a point in time,
//! identified by the WAL sequence number, as zstd-compressed JSON.
//! Recovery loads the snapshot and replays WAL entries after that
//! sequence. The save path is: write `.tmp` → fsync → rename → fsync
//! directory; only after the directory fsync is WAL truncation safe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::StoreError;
use crate::state::StoreState;

/// Current snapshot format version.
pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// zstd level 3 is a good balance of speed and compression
const COMPRESSION_LEVEL: i32 = 3;

/// A snapshot of the materialized state at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    /// WAL sequence number at the time of snapshot
    pub seq: u64,
    pub state: StoreState,
    pub created_at: DateTime<Utc>,
}

impl StoreSnapshot {
    /// Create a new snapshot at the current time.
    pub fn new(seq: u64, state: StoreState) -> Self {
        Self {
            version: CURRENT_SNAPSHOT_VERSION,
            seq,
            state,
            created_at: Utc::now(),
        }
    }

    /// Save the snapshot durably (tmp + fsync + rename + dir fsync).
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json_bytes = serde_json::to_vec(self)?;
        let compressed = zstd::encode_all(json_bytes.as_slice(), COMPRESSION_LEVEL)
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;

        let tmp_path = path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&compressed)?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, path)?;

        if let Some(parent) = path.parent() {
            let dir = File::open(parent)?;
            dir.sync_all()?;
        }

        Ok(())
    }

    /// Load a snapshot if one exists.
    ///
    /// Returns `Ok(None)` if the file doesn't exist. A corrupt or
    /// unknown-version snapshot is rotated to `.bak` and `None` is
    /// returned so recovery proceeds from WAL replay alone.
    pub fn load(path: &Path) -> Result<Option<Self>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let rotate = |reason: &str| -> Result<(), StoreError> {
            let bak_path = rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                reason,
                "unusable snapshot, moving to .bak and starting from WAL",
            );
            fs::rename(path, &bak_path)?;
            Ok(())
        };

        let file = File::open(path)?;
        let decoder = match zstd::stream::read::Decoder::new(file) {
            Ok(d) => d,
            Err(e) => {
                rotate(&e.to_string())?;
                return Ok(None);
            }
        };

        let snapshot: StoreSnapshot = match serde_json::from_reader(decoder) {
            Ok(s) => s,
            Err(e) => {
                rotate(&e.to_string())?;
                return Ok(None);
            }
        };

        if snapshot.version != CURRENT_SNAPSHOT_VERSION {
            rotate(&format!("unknown version {}", snapshot.version))?;
            return Ok(None);
        }

        Ok(Some(snapshot))
    }
}

const MAX_BAK_FILES: u32 = 3;

/// Pick the next `.bak` / `.bak.N` path, rotating older backups out.
///
/// Keeps up to [`MAX_BAK_FILES`] backups: `.bak`, `.bak.2`, `.bak.3`.
/// The oldest backup is removed when the limit is reached.
pub(crate) fn rotate_bak_path(path: &Path) -> PathBuf {
    let bak = |n: u32| {
        if n == 1 {
            path.with_extension("bak")
        } else {
            path.with_extension(format!("bak.{n}"))
        }
    };

    let oldest = bak(MAX_BAK_FILES);
    if oldest.exists() {
        let _ = fs::remove_file(&oldest);
    }

    for n in (1..MAX_BAK_FILES).rev() {
        let src = bak(n);
        if src.exists() {
            let _ = fs::rename(&src, bak(n + 1));
        }
    }

    bak(1)
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;
