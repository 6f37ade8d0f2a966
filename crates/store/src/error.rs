// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store error types

use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity lookup failed
    #[error("{0}")]
    NotFound(String),

    /// State-transition or uniqueness conflict (terminal-state updates,
    /// idempotency payload mismatch)
    #[error("{0}")]
    Conflict(String),

    /// Invalid argument at the store boundary
    #[error("{0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}

impl StoreError {
    /// Whether this error reports a benign "already terminal" race.
    pub fn is_already_terminal(&self) -> bool {
        matches!(self, StoreError::Conflict(msg)
            if msg.contains("already succeeded") || msg.contains("already failed"))
    }
}
