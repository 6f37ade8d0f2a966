// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracing wrappers for agent sessions.

use crate::session::{
    AgentSession, AgentSessionFactory, OpenedSession, SessionError, SessionListener,
    SessionSubscription,
};
use async_trait::async_trait;
use baton_core::{ShortId, ThreadKey, ThreadSession};
use std::sync::Arc;
use tracing::{info, warn};

/// Wraps an agent session with tracing of every delivery.
pub struct TracedSession {
    inner: Arc<dyn AgentSession>,
    thread_key: ThreadKey,
}

impl TracedSession {
    pub fn new(inner: Arc<dyn AgentSession>, thread_key: ThreadKey) -> Self {
        Self { inner, thread_key }
    }

    fn log(&self, op: &'static str, text: &str, result: &Result<(), SessionError>) {
        match result {
            Ok(()) => info!(
                thread = %self.thread_key,
                op,
                chars = text.len(),
                "session delivery"
            ),
            Err(e) => warn!(
                thread = %self.thread_key,
                op,
                error = %e,
                "session delivery failed"
            ),
        }
    }
}

#[async_trait]
impl AgentSession for TracedSession {
    async fn prompt(&self, text: &str) -> Result<(), SessionError> {
        let result = self.inner.prompt(text).await;
        self.log("prompt", text, &result);
        result
    }

    async fn follow_up(&self, text: &str) -> Result<(), SessionError> {
        let result = self.inner.follow_up(text).await;
        self.log("follow_up", text, &result);
        result
    }

    async fn steer(&self, text: &str) -> Result<(), SessionError> {
        let result = self.inner.steer(text).await;
        self.log("steer", text, &result);
        result
    }

    fn subscribe(&self, listener: SessionListener) -> SessionSubscription {
        self.inner.subscribe(listener)
    }
}

/// Wraps a session factory so every opened session is traced.
pub struct TracedSessionFactory<F> {
    inner: F,
}

impl<F> TracedSessionFactory<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<F: AgentSessionFactory> AgentSessionFactory for TracedSessionFactory<F> {
    async fn open(
        &self,
        thread_key: &ThreadKey,
        existing: Option<&ThreadSession>,
    ) -> Result<OpenedSession, SessionError> {
        let resumed = existing.is_some();
        let opened = self.inner.open(thread_key, existing).await?;
        info!(
            thread = %thread_key,
            session = opened.session_id.short(12),
            resumed,
            "agent session opened"
        );
        Ok(OpenedSession {
            session: Arc::new(TracedSession::new(
                Arc::clone(&opened.session),
                thread_key.clone(),
            )),
            session_id: opened.session_id,
            session_file_path: opened.session_file_path,
        })
    }
}

#[cfg(test)]
#[path = "traced_tests.rs"]
mod tests;
