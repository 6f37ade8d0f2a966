// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent session adapters.
//!
//! An [`AgentSession`] is one long-lived, single-threaded cooperative
//! interaction with the coding-agent runtime: user messages go in via
//! `prompt` / `follow_up` / `steer`, and the session emits
//! [`SessionEvent`]s to subscribed listeners. Event delivery is message
//! passing: no mutable state is shared across the boundary, and every
//! subscription comes with a guaranteed unsubscribe.

use async_trait::async_trait;
use baton_core::{ThreadKey, ThreadSession};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

mod noop;

pub use noop::{NoopAgentSession, NoopSessionFactory};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeAgentSession, FakeSessionFactory, SessionCall};

/// Errors from agent session operations
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),
    #[error("session open failed: {0}")]
    OpenFailed(String),
    #[error("send failed: {0}")]
    SendFailed(String),
    #[error("session closed")]
    Closed,
}

/// Why an assistant message stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    StopSequence,
    MaxTokens,
    Error,
    Aborted,
}

impl StopReason {
    /// Whether a run closed out by this stop reason must fail.
    pub fn is_failure(&self) -> bool {
        matches!(self, StopReason::Error | StopReason::Aborted)
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndTurn => write!(f, "end_turn"),
            StopReason::StopSequence => write!(f, "stop_sequence"),
            StopReason::MaxTokens => write!(f, "max_tokens"),
            StopReason::Error => write!(f, "error"),
            StopReason::Aborted => write!(f, "aborted"),
        }
    }
}

/// Message author role within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A completed assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub stop_reason: StopReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Streaming content delta within a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "delta_kind", rename_all = "snake_case")]
pub enum MessageDelta {
    Text {
        delta: String,
    },
    Thinking {
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_index: Option<u32>,
    },
}

/// Events emitted by an agent session.
///
/// Serializes with `{"type": "...", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageStart {
        role: MessageRole,
    },
    MessageUpdate {
        #[serde(flatten)]
        delta: MessageDelta,
    },
    MessageEnd {
        role: MessageRole,
        /// Present for assistant messages
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<AssistantMessage>,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial_result: String,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },
    TurnStart,
    TurnEnd {
        tool_result_count: u32,
    },
    AgentStart,
    AgentEnd,
}

/// Listener receiving session events, in emission order.
pub type SessionListener = Arc<dyn Fn(SessionEvent) + Send + Sync>;

/// Subscription guard. Unsubscribes on `unsubscribe()` or on drop.
pub struct SessionSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SessionSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Explicitly remove the listener.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// One long-lived interaction with the coding-agent runtime.
#[async_trait]
pub trait AgentSession: Send + Sync + 'static {
    /// Start the very first turn with a user message.
    async fn prompt(&self, text: &str) -> Result<(), SessionError>;

    /// Append a user turn behind the in-flight agent turn.
    async fn follow_up(&self, text: &str) -> Result<(), SessionError>;

    /// Interrupt the in-flight turn with a replacing user message.
    async fn steer(&self, text: &str) -> Result<(), SessionError>;

    /// Register a listener for session events.
    fn subscribe(&self, listener: SessionListener) -> SessionSubscription;
}

/// A session opened (or resumed) for a thread.
pub struct OpenedSession {
    pub session: Arc<dyn AgentSession>,
    pub session_id: String,
    /// Transcript file backing the session, persisted for resume
    pub session_file_path: String,
}

/// Opens agent sessions for threads.
#[async_trait]
pub trait AgentSessionFactory: Send + Sync + 'static {
    /// Resolve a session for the thread.
    ///
    /// `existing` is the persisted pointer from a previous open, when
    /// there is one; implementations resume from it where they can and
    /// fall back to a fresh session otherwise.
    async fn open(
        &self,
        thread_key: &ThreadKey,
        existing: Option<&ThreadSession>,
    ) -> Result<OpenedSession, SessionError>;
}
