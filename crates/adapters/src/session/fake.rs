// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake agent session for testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{
    AgentSession, AgentSessionFactory, AssistantMessage, MessageRole, OpenedSession, SessionError,
    SessionEvent, SessionListener, SessionSubscription, StopReason,
};
use async_trait::async_trait;
use baton_core::{ThreadKey, ThreadSession};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Recorded session call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCall {
    Prompt(String),
    FollowUp(String),
    Steer(String),
}

struct FakeSessionState {
    calls: Vec<SessionCall>,
    listeners: HashMap<u64, SessionListener>,
    next_listener_id: u64,
    fail_next: Option<SessionError>,
    /// Responses consumed by auto-respond mode, front first
    responses: Vec<String>,
    auto_respond: bool,
}

/// Fake agent session: records calls and replays scripted events.
///
/// In auto-respond mode every delivered message immediately produces a
/// full turn (user message start, assistant message end, agent end),
/// which is enough for service-level tests. Controller tests drive
/// events manually via [`FakeAgentSession::emit`].
#[derive(Clone)]
pub struct FakeAgentSession {
    inner: Arc<Mutex<FakeSessionState>>,
}

impl Default for FakeAgentSession {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeSessionState {
                calls: Vec::new(),
                listeners: HashMap::new(),
                next_listener_id: 0,
                fail_next: None,
                responses: Vec::new(),
                auto_respond: false,
            })),
        }
    }
}

impl FakeAgentSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session that answers every message with a scripted (or
    /// echoed) assistant turn.
    pub fn auto_responding() -> Self {
        let session = Self::new();
        session.inner.lock().auto_respond = true;
        session
    }

    /// Queue a response text for auto-respond mode (FIFO). When the queue
    /// is empty, the session echoes `"ok: {input}"`.
    pub fn push_response(&self, text: impl Into<String>) {
        self.inner.lock().responses.push(text.into());
    }

    /// Fail the next prompt/follow_up/steer call with the given error.
    pub fn fail_next(&self, error: SessionError) {
        self.inner.lock().fail_next = Some(error);
    }

    /// Get all recorded calls
    pub fn calls(&self) -> Vec<SessionCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of live listeners (for unsubscribe tests)
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Emit an event to all current listeners, in registration order.
    pub fn emit(&self, event: SessionEvent) {
        let listeners: Vec<(u64, SessionListener)> = {
            let inner = self.inner.lock();
            let mut listeners: Vec<_> = inner
                .listeners
                .iter()
                .map(|(id, l)| (*id, Arc::clone(l)))
                .collect();
            listeners.sort_by_key(|(id, _)| *id);
            listeners
        };
        for (_, listener) in listeners {
            listener(event.clone());
        }
    }

    /// Emit a complete assistant turn for `input`.
    pub fn emit_turn(&self, response: &str) {
        self.emit(SessionEvent::AgentStart);
        self.emit(SessionEvent::TurnStart);
        self.emit(SessionEvent::MessageStart {
            role: MessageRole::User,
        });
        self.emit(SessionEvent::MessageStart {
            role: MessageRole::Assistant,
        });
        self.emit(SessionEvent::MessageEnd {
            role: MessageRole::Assistant,
            message: Some(AssistantMessage {
                text: response.to_string(),
                provider: Some("fake".to_string()),
                model: Some("fake-1".to_string()),
                stop_reason: StopReason::EndTurn,
                error_message: None,
            }),
        });
        self.emit(SessionEvent::TurnEnd {
            tool_result_count: 0,
        });
        self.emit(SessionEvent::AgentEnd);
    }

    fn record(&self, call: SessionCall, input: &str) -> Result<(), SessionError> {
        let (fail, respond_with) = {
            let mut inner = self.inner.lock();
            inner.calls.push(call);
            let fail = inner.fail_next.take();
            let respond_with = if fail.is_none() && inner.auto_respond {
                Some(if inner.responses.is_empty() {
                    format!("ok: {input}")
                } else {
                    inner.responses.remove(0)
                })
            } else {
                None
            };
            (fail, respond_with)
        };
        if let Some(error) = fail {
            return Err(error);
        }
        if let Some(response) = respond_with {
            self.emit_turn(&response);
        }
        Ok(())
    }
}

#[async_trait]
impl AgentSession for FakeAgentSession {
    async fn prompt(&self, text: &str) -> Result<(), SessionError> {
        self.record(SessionCall::Prompt(text.to_string()), text)
    }

    async fn follow_up(&self, text: &str) -> Result<(), SessionError> {
        self.record(SessionCall::FollowUp(text.to_string()), text)
    }

    async fn steer(&self, text: &str) -> Result<(), SessionError> {
        self.record(SessionCall::Steer(text.to_string()), text)
    }

    fn subscribe(&self, listener: SessionListener) -> SessionSubscription {
        let id = {
            let mut inner = self.inner.lock();
            inner.next_listener_id += 1;
            let id = inner.next_listener_id;
            inner.listeners.insert(id, listener);
            id
        };
        let state = Arc::clone(&self.inner);
        SessionSubscription::new(move || {
            state.lock().listeners.remove(&id);
        })
    }
}

struct FakeFactoryState {
    sessions: HashMap<String, FakeAgentSession>,
    opened: Vec<(ThreadKey, Option<ThreadSession>)>,
    next_id: u64,
    auto_respond: bool,
    fail_next_open: Option<SessionError>,
}

/// Fake session factory: hands out one [`FakeAgentSession`] per thread key.
#[derive(Clone)]
pub struct FakeSessionFactory {
    inner: Arc<Mutex<FakeFactoryState>>,
}

impl Default for FakeSessionFactory {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeFactoryState {
                sessions: HashMap::new(),
                opened: Vec::new(),
                next_id: 0,
                auto_respond: false,
                fail_next_open: None,
            })),
        }
    }
}

impl FakeSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// All sessions opened by this factory auto-respond to every message.
    pub fn auto_responding() -> Self {
        let factory = Self::new();
        factory.inner.lock().auto_respond = true;
        factory
    }

    /// Fail the next `open` call with the given error.
    pub fn fail_next_open(&self, error: SessionError) {
        self.inner.lock().fail_next_open = Some(error);
    }

    /// The session opened for a thread, if any.
    pub fn session_for(&self, thread_key: &ThreadKey) -> Option<FakeAgentSession> {
        self.inner.lock().sessions.get(thread_key.as_str()).cloned()
    }

    /// Recorded `open` calls: thread key and the persisted pointer passed in.
    pub fn opened(&self) -> Vec<(ThreadKey, Option<ThreadSession>)> {
        self.inner.lock().opened.clone()
    }
}

#[async_trait]
impl AgentSessionFactory for FakeSessionFactory {
    async fn open(
        &self,
        thread_key: &ThreadKey,
        existing: Option<&ThreadSession>,
    ) -> Result<OpenedSession, SessionError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_open.take() {
            return Err(error);
        }
        inner
            .opened
            .push((thread_key.clone(), existing.cloned()));

        inner.next_id += 1;
        let session_id = format!("fake-sess-{}", inner.next_id);
        let session = if inner.auto_respond {
            FakeAgentSession::auto_responding()
        } else {
            FakeAgentSession::new()
        };
        inner
            .sessions
            .insert(thread_key.as_str().to_string(), session.clone());

        Ok(OpenedSession {
            session: Arc::new(session),
            session_file_path: format!("/tmp/fake-sessions/{session_id}.jsonl"),
            session_id,
        })
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
