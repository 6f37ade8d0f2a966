// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run executor: owns the per-thread agent sessions.
//!
//! For each run the executor resolves (or opens) the thread's long-lived
//! session, ensures the one controller per session, and submits the run.
//! Sessions are retained across terminal states; only a thread-session
//! reset tears one down.

use baton_adapters::AgentSessionFactory;
use baton_core::{Clock, Run, RunId, RunOutput, ThreadKey, ThreadSession};
use baton_store::RunStore;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::controller::ThreadRunController;
use crate::error::EngineError;
use crate::progress::ProgressBus;

struct SessionEntry<C: Clock> {
    controller: Arc<ThreadRunController<C>>,
    session_id: String,
}

/// Resolves agent sessions per thread key and executes runs through
/// their controllers.
pub struct RunExecutor<C: Clock> {
    store: RunStore,
    factory: Arc<dyn AgentSessionFactory>,
    bus: ProgressBus,
    clock: C,
    sessions: Mutex<HashMap<String, Arc<SessionEntry<C>>>>,
}

impl<C: Clock> RunExecutor<C> {
    pub fn new(
        store: RunStore,
        factory: Arc<dyn AgentSessionFactory>,
        bus: ProgressBus,
        clock: C,
    ) -> Self {
        Self {
            store,
            factory,
            bus,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Execute a run to completion through its thread's controller.
    pub async fn execute(&self, run: &Run) -> Result<RunOutput, EngineError> {
        info!(run = %run.id, thread = %run.thread_key, mode = %run.delivery_mode, "executing run");

        let entry = self.ensure_session(&run.thread_key).await?;
        let completion = entry.controller.submit(run.clone()).await;

        match completion.await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(message)) => Err(EngineError::upstream(message)),
            Err(_) => Err(EngineError::Internal(
                "run controller dropped the completion".to_string(),
            )),
        }
    }

    /// Cancel a run currently submitted to its thread's controller.
    pub async fn cancel(&self, thread_key: &ThreadKey, run_id: &RunId) -> bool {
        let entry = {
            let sessions = self.sessions.lock();
            sessions.get(thread_key.as_str()).cloned()
        };
        match entry {
            Some(entry) => entry.controller.cancel(run_id).await,
            None => false,
        }
    }

    /// Resolve the thread's session entry, opening a session (and
    /// persisting its pointer) when the thread has none.
    async fn ensure_session(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<Arc<SessionEntry<C>>, EngineError> {
        if let Some(entry) = self.sessions.lock().get(thread_key.as_str()) {
            return Ok(Arc::clone(entry));
        }

        let existing = self.store.get_thread_session(thread_key);
        let opened = self.factory.open(thread_key, existing.as_ref()).await?;

        // Persist the pointer on first open (or when resume produced a
        // fresh session).
        let pointer_changed = existing
            .as_ref()
            .map(|s| s.session_id != opened.session_id)
            .unwrap_or(true);
        if pointer_changed {
            let now_ms = self.clock.epoch_ms();
            self.store.upsert_thread_session(ThreadSession {
                thread_key: thread_key.clone(),
                session_id: opened.session_id.clone(),
                session_file_path: opened.session_file_path.clone(),
                created_at_ms: existing.map(|s| s.created_at_ms).unwrap_or(now_ms),
                updated_at_ms: now_ms,
            })?;
        }

        let controller = Arc::new(ThreadRunController::new(
            opened.session,
            self.bus.clone(),
            self.clock.clone(),
        ));
        let entry = Arc::new(SessionEntry {
            controller,
            session_id: opened.session_id,
        });

        let mut sessions = self.sessions.lock();
        // A concurrent open for the same thread may have won the race;
        // keep the first entry and dispose ours.
        if let Some(existing_entry) = sessions.get(thread_key.as_str()) {
            let loser = Arc::clone(&entry);
            tokio::spawn(async move { loser.controller.dispose().await });
            return Ok(Arc::clone(existing_entry));
        }
        sessions.insert(thread_key.as_str().to_string(), Arc::clone(&entry));
        info!(thread = %thread_key, session = %entry.session_id, "thread session ready");
        Ok(entry)
    }

    /// Tear down the thread's session: dispose the controller and delete
    /// the persisted pointer. The next ingest recreates both lazily.
    pub async fn reset_thread_session(&self, thread_key: &ThreadKey) -> Result<bool, EngineError> {
        let entry = self.sessions.lock().remove(thread_key.as_str());
        if let Some(entry) = &entry {
            entry.controller.dispose().await;
        }
        let had_pointer = self.store.delete_thread_session(thread_key)?;
        Ok(entry.is_some() || had_pointer)
    }

    /// Dispose every live controller (shutdown path).
    pub async fn dispose_all(&self) {
        let entries: Vec<Arc<SessionEntry<C>>> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            entry.controller.dispose().await;
        }
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
