// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error taxonomy

use baton_adapters::{ChatError, SessionError};
use baton_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the orchestration core.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input at the service boundary
    #[error("{0}")]
    Validation(String),

    /// Terminal-state transitions on non-running entities, idempotency
    /// payload mismatch, duplicate creation
    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// Too many concurrent attempts on a limited resource
    #[error("{0}")]
    Capacity(String),

    /// Messenger or agent-session failure; carries the upstream's retry
    /// hint when it gave one
    #[error("{message}")]
    Upstream {
        message: String,
        retry_after: Option<u64>,
    },

    /// Store or invariant violation
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub fn upstream(message: impl Into<String>) -> Self {
        EngineError::Upstream {
            message: message.into(),
            retry_after: None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(msg) => EngineError::NotFound(msg),
            StoreError::Conflict(msg) => EngineError::Conflict(msg),
            StoreError::Invalid(msg) => EngineError::Validation(msg),
            other => EngineError::Internal(other.to_string()),
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(e: SessionError) -> Self {
        EngineError::upstream(e.to_string())
    }
}

impl From<ChatError> for EngineError {
    fn from(e: ChatError) -> Self {
        let retry_after = e.retry_after_seconds();
        EngineError::Upstream {
            message: e.to_string(),
            retry_after,
        }
    }
}
