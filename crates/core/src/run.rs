// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run entity.
//!
//! A `Run` is one ingested user message accepted for execution: its life
//! goes ingest → dispatch → agent turn → terminal. Status transitions are
//! one-way `running → succeeded | failed`.

use crate::ThreadKey;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a run.
    pub struct RunId;
}

/// How a run is delivered to an in-flight agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Interrupt the current turn with a replacing user message
    Steer,
    /// Queue behind the current turn
    FollowUp,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMode::Steer => write!(f, "steer"),
            DeliveryMode::FollowUp => write!(f, "follow_up"),
        }
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Whether this status is terminal (no further transitions expected)
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Output of a successfully completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutput {
    /// Final assistant message text
    pub text: String,
    /// Model provider that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Model identifier that produced the message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Delivery mode the run was submitted with
    pub delivery_mode: DeliveryMode,
}

/// A single accepted user message and its execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    /// Adapter label that ingested the message (e.g. "cli", "telegram")
    pub source: String,
    /// Conversation routing key
    pub thread_key: ThreadKey,
    /// Originating user, when the adapter knows one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_key: Option<String>,
    pub delivery_mode: DeliveryMode,
    /// The user message text
    pub input_text: String,
    pub status: RunStatus,
    /// Final output; present iff status is `succeeded`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<RunOutput>,
    /// Failure reason; present iff status is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Epoch milliseconds when created
    pub created_at_ms: u64,
    /// Epoch milliseconds of last update
    pub updated_at_ms: u64,
}

impl Run {
    /// Check if the run is in a terminal state
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Builder for `Run` with test defaults.
#[cfg(any(test, feature = "test-support"))]
pub struct RunBuilder {
    id: RunId,
    source: String,
    thread_key: ThreadKey,
    user_key: Option<String>,
    delivery_mode: DeliveryMode,
    input_text: String,
    status: RunStatus,
    created_at_ms: u64,
}

#[cfg(any(test, feature = "test-support"))]
impl Default for RunBuilder {
    fn default() -> Self {
        Self {
            id: RunId::new("run-1"),
            source: "cli".to_string(),
            thread_key: ThreadKey::new("cli:default"),
            user_key: None,
            delivery_mode: DeliveryMode::FollowUp,
            input_text: "hello".to_string(),
            status: RunStatus::Running,
            created_at_ms: 0,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl RunBuilder {
    pub fn id(mut self, v: impl Into<String>) -> Self {
        self.id = RunId::new(v);
        self
    }
    pub fn source(mut self, v: impl Into<String>) -> Self {
        self.source = v.into();
        self
    }
    pub fn thread_key(mut self, v: impl Into<String>) -> Self {
        self.thread_key = ThreadKey::new(v);
        self
    }
    pub fn user_key(mut self, v: impl Into<String>) -> Self {
        self.user_key = Some(v.into());
        self
    }
    pub fn delivery_mode(mut self, v: DeliveryMode) -> Self {
        self.delivery_mode = v;
        self
    }
    pub fn input_text(mut self, v: impl Into<String>) -> Self {
        self.input_text = v.into();
        self
    }
    pub fn status(mut self, v: RunStatus) -> Self {
        self.status = v;
        self
    }
    pub fn build(self) -> Run {
        Run {
            id: self.id,
            source: self.source,
            thread_key: self.thread_key,
            user_key: self.user_key,
            delivery_mode: self.delivery_mode,
            input_text: self.input_text,
            status: self.status,
            output: None,
            error_message: None,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.created_at_ms,
        }
    }
}

#[cfg(any(test, feature = "test-support"))]
impl Run {
    /// Create a builder with test defaults.
    pub fn builder() -> RunBuilder {
        RunBuilder::default()
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
