// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake chat adapters for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{ChatApi, ChatBridge, ChatError, ChatRoute, MessageRef, TopicRoute};
use async_trait::async_trait;
use baton_core::{DeliveryTarget, RunId, TaskId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Recorded chat call
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCall {
    SendMessage {
        route: ChatRoute,
        text: String,
    },
    EditMessage {
        message: MessageRef,
        text: String,
    },
    DeleteMessage {
        message: MessageRef,
    },
    Typing {
        route: ChatRoute,
    },
    CreateTaskTopic {
        chat_id: i64,
        task_id: TaskId,
        title: String,
    },
    SyncTaskTopicTitle {
        route: TopicRoute,
        task_id: TaskId,
        title: String,
    },
    DeliverRun {
        run_id: RunId,
        target: DeliveryTarget,
    },
}

struct FakeChatState {
    calls: Vec<ChatCall>,
    /// Current text of each live message, by message id
    messages: HashMap<i64, String>,
    deleted: Vec<i64>,
    next_message_id: i64,
    /// Scripted per-call outcomes for `send_message`; `None` = success.
    /// An empty queue means success too.
    send_results: VecDeque<Option<ChatError>>,
    edit_errors: VecDeque<ChatError>,
    typing_errors: VecDeque<ChatError>,
}

/// Fake messenger message surface: records calls, stores message text,
/// and pops scripted errors per operation.
#[derive(Clone)]
pub struct FakeChatApi {
    inner: Arc<Mutex<FakeChatState>>,
}

impl Default for FakeChatApi {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeChatState {
                calls: Vec::new(),
                messages: HashMap::new(),
                deleted: Vec::new(),
                next_message_id: 0,
                send_results: VecDeque::new(),
                edit_errors: VecDeque::new(),
                typing_errors: VecDeque::new(),
            })),
        }
    }
}

impl FakeChatApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an error for an upcoming `send_message` call (FIFO).
    pub fn push_send_error(&self, error: ChatError) {
        self.inner.lock().send_results.push_back(Some(error));
    }

    /// Queue an explicit success for an upcoming `send_message` call, so
    /// a later queued error hits a specific call.
    pub fn push_send_ok(&self) {
        self.inner.lock().send_results.push_back(None);
    }

    /// Queue an error for an upcoming `edit_message` call (FIFO).
    pub fn push_edit_error(&self, error: ChatError) {
        self.inner.lock().edit_errors.push_back(error);
    }

    /// Queue an error for an upcoming `send_typing` call (FIFO).
    pub fn push_typing_error(&self, error: ChatError) {
        self.inner.lock().typing_errors.push_back(error);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.inner.lock().calls.clone()
    }

    /// Current text of a live message.
    pub fn message_text(&self, message_id: i64) -> Option<String> {
        self.inner.lock().messages.get(&message_id).cloned()
    }

    /// Ids of deleted messages, in deletion order.
    pub fn deleted(&self) -> Vec<i64> {
        self.inner.lock().deleted.clone()
    }

    /// Texts of messages sent so far, in send order (including deleted).
    pub fn sent_texts(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ChatCall::SendMessage { text, .. } => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn send_message(&self, route: &ChatRoute, text: &str) -> Result<MessageRef, ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::SendMessage {
            route: route.clone(),
            text: text.to_string(),
        });
        if let Some(Some(error)) = inner.send_results.pop_front() {
            return Err(error);
        }
        inner.next_message_id += 1;
        let id = inner.next_message_id;
        inner.messages.insert(id, text.to_string());
        Ok(MessageRef {
            chat_id: route.chat_id,
            message_id: id,
        })
    }

    async fn edit_message(&self, message: &MessageRef, text: &str) -> Result<(), ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::EditMessage {
            message: *message,
            text: text.to_string(),
        });
        if let Some(error) = inner.edit_errors.pop_front() {
            return Err(error);
        }
        if !inner.messages.contains_key(&message.message_id) {
            return Err(ChatError::MessageGone);
        }
        inner.messages.insert(message.message_id, text.to_string());
        Ok(())
    }

    async fn delete_message(&self, message: &MessageRef) -> Result<(), ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::DeleteMessage { message: *message });
        if inner.messages.remove(&message.message_id).is_none() {
            return Err(ChatError::MessageGone);
        }
        inner.deleted.push(message.message_id);
        Ok(())
    }

    async fn send_typing(&self, route: &ChatRoute) -> Result<(), ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::Typing {
            route: route.clone(),
        });
        if let Some(error) = inner.typing_errors.pop_front() {
            return Err(error);
        }
        Ok(())
    }
}

struct FakeBridgeState {
    calls: Vec<ChatCall>,
    next_topic_id: i64,
    supports_topics: bool,
    create_errors: VecDeque<ChatError>,
    sync_errors: VecDeque<ChatError>,
}

/// Fake task-topic bridge.
#[derive(Clone)]
pub struct FakeChatBridge {
    inner: Arc<Mutex<FakeBridgeState>>,
}

impl Default for FakeChatBridge {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeBridgeState {
                calls: Vec::new(),
                next_topic_id: 100,
                supports_topics: true,
                create_errors: VecDeque::new(),
                sync_errors: VecDeque::new(),
            })),
        }
    }
}

impl FakeChatBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// A bridge with no topic support (plain chats only).
    pub fn without_topics() -> Self {
        let bridge = Self::new();
        bridge.inner.lock().supports_topics = false;
        bridge
    }

    pub fn push_create_error(&self, error: ChatError) {
        self.inner.lock().create_errors.push_back(error);
    }

    pub fn push_sync_error(&self, error: ChatError) {
        self.inner.lock().sync_errors.push_back(error);
    }

    pub fn calls(&self) -> Vec<ChatCall> {
        self.inner.lock().calls.clone()
    }
}

#[async_trait]
impl ChatBridge for FakeChatBridge {
    fn supports_topics(&self) -> bool {
        self.inner.lock().supports_topics
    }

    async fn create_task_topic(
        &self,
        chat_id: i64,
        task_id: &TaskId,
        title: &str,
    ) -> Result<TopicRoute, ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::CreateTaskTopic {
            chat_id,
            task_id: task_id.clone(),
            title: title.to_string(),
        });
        if let Some(error) = inner.create_errors.pop_front() {
            return Err(error);
        }
        inner.next_topic_id += 1;
        Ok(TopicRoute {
            chat_id,
            message_thread_id: inner.next_topic_id,
        })
    }

    async fn sync_task_topic_title(
        &self,
        route: &TopicRoute,
        task_id: &TaskId,
        title: &str,
    ) -> Result<(), ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::SyncTaskTopicTitle {
            route: *route,
            task_id: task_id.clone(),
            title: title.to_string(),
        });
        if let Some(error) = inner.sync_errors.pop_front() {
            return Err(error);
        }
        Ok(())
    }

    async fn deliver_run(&self, run_id: &RunId, target: &DeliveryTarget) -> Result<(), ChatError> {
        let mut inner = self.inner.lock();
        inner.calls.push(ChatCall::DeliverRun {
            run_id: run_id.clone(),
            target: target.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
