// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op session adapter.
//!
//! Stands in when no coding-agent runtime is wired up: sessions open but
//! every delivery fails with a clear error, so runs terminate instead of
//! hanging.

use super::{
    AgentSession, AgentSessionFactory, OpenedSession, SessionError, SessionListener,
    SessionSubscription,
};
use async_trait::async_trait;
use baton_core::{ThreadKey, ThreadSession};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Session with no runtime behind it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAgentSession;

#[async_trait]
impl AgentSession for NoopAgentSession {
    async fn prompt(&self, _text: &str) -> Result<(), SessionError> {
        Err(SessionError::SendFailed(
            "agent runtime not configured".to_string(),
        ))
    }

    async fn follow_up(&self, _text: &str) -> Result<(), SessionError> {
        Err(SessionError::SendFailed(
            "agent runtime not configured".to_string(),
        ))
    }

    async fn steer(&self, _text: &str) -> Result<(), SessionError> {
        Err(SessionError::SendFailed(
            "agent runtime not configured".to_string(),
        ))
    }

    fn subscribe(&self, _listener: SessionListener) -> SessionSubscription {
        SessionSubscription::new(|| {})
    }
}

/// Factory producing [`NoopAgentSession`]s.
#[derive(Clone, Debug, Default)]
pub struct NoopSessionFactory {
    counter: Arc<AtomicU64>,
}

impl NoopSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentSessionFactory for NoopSessionFactory {
    async fn open(
        &self,
        _thread_key: &ThreadKey,
        existing: Option<&ThreadSession>,
    ) -> Result<OpenedSession, SessionError> {
        let session_id = match existing {
            Some(session) => session.session_id.clone(),
            None => format!("noop-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1),
        };
        Ok(OpenedSession {
            session: Arc::new(NoopAgentSession),
            session_file_path: format!("/dev/null/{session_id}"),
            session_id,
        })
    }
}
