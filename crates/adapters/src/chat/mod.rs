// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chat messenger adapters.
//!
//! [`ChatApi`] is the low-level message surface the progress reporter
//! edits status messages through. [`ChatBridge`] is the higher-level
//! task-topic surface the scheduled-task service uses.

use async_trait::async_trait;
use baton_core::{DeliveryTarget, RunId, TaskId, ThreadKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod noop;

pub use noop::NoopChatBridge;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{ChatCall, FakeChatApi, FakeChatBridge};

/// Errors from messenger operations.
#[derive(Debug, Clone, Error)]
pub enum ChatError {
    /// Rate limited; retry no sooner than the given number of seconds
    #[error("retry after {seconds}s")]
    RetryAfter { seconds: u64 },
    /// The referenced message no longer exists or can no longer be edited
    #[error("message to edit not found")]
    MessageGone,
    #[error("chat api error: {0}")]
    Api(String),
}

impl ChatError {
    /// Whether the operation may be retried (after the stated delay).
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChatError::RetryAfter { .. })
    }

    /// The upstream's retry hint, when it gave one.
    pub fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            ChatError::RetryAfter { seconds } => Some(*seconds),
            _ => None,
        }
    }
}

/// Where to send messages: a chat, optionally a topic within it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoute {
    pub chat_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_thread_id: Option<i64>,
}

/// Reference to a sent message (for edit/delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A task execution topic created by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicRoute {
    pub chat_id: i64,
    pub message_thread_id: i64,
}

impl TopicRoute {
    pub fn chat_route(&self) -> ChatRoute {
        ChatRoute {
            chat_id: self.chat_id,
            message_thread_id: Some(self.message_thread_id),
        }
    }
}

/// Thread key for a chat topic: `telegram:chat:{chat}:topic:{topic}`.
pub fn topic_thread_key(chat_id: i64, message_thread_id: i64) -> ThreadKey {
    ThreadKey::new(format!("telegram:chat:{chat_id}:topic:{message_thread_id}"))
}

/// Low-level messenger message surface.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    async fn send_message(&self, route: &ChatRoute, text: &str) -> Result<MessageRef, ChatError>;

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError>;

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError>;

    /// Show a "typing" chat action.
    async fn send_typing(&self, route: &ChatRoute) -> Result<(), ChatError>;
}

/// Task-topic surface of the messenger.
#[async_trait]
pub trait ChatBridge: Send + Sync + 'static {
    /// Whether the bridge can create forum topics at all.
    fn supports_topics(&self) -> bool;

    /// Create a fresh execution topic for a task inside `chat_id`.
    ///
    /// Not idempotent upstream; the caller must persist the returned
    /// route before dispatching anything through it.
    async fn create_task_topic(
        &self,
        chat_id: i64,
        task_id: &TaskId,
        title: &str,
    ) -> Result<TopicRoute, ChatError>;

    /// Best-effort rename of a task's execution topic.
    async fn sync_task_topic_title(
        &self,
        route: &TopicRoute,
        task_id: &TaskId,
        title: &str,
    ) -> Result<(), ChatError>;

    /// Deliver a run's terminal output to a task's delivery target.
    async fn deliver_run(&self, run_id: &RunId, target: &DeliveryTarget) -> Result<(), ChatError>;
}
