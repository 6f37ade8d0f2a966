// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-thread run queue and dispatcher.
//!
//! Guarantees at most one concurrent run per thread key. Enqueueing is
//! idempotent on run id and crash-safe: the service's recovery pass
//! re-enqueues every run still `running` in the store via
//! [`RunScheduler::ensure_enqueued`]. Cross-thread dispatch is unbounded
//! unless a global concurrency cap is configured.

use async_trait::async_trait;
use baton_core::{Run, RunId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Executes a run to its terminal state.
#[async_trait]
pub trait RunDispatcher: Send + Sync + 'static {
    async fn dispatch(&self, run_id: &RunId);
}

#[derive(Default)]
struct ThreadQueue {
    queued: VecDeque<RunId>,
    in_flight: Option<RunId>,
}

struct SchedulerState {
    threads: HashMap<String, ThreadQueue>,
    /// Run ids currently queued or in flight
    known: HashSet<String>,
    /// Thread key for each known run (for cancel)
    run_threads: HashMap<String, String>,
    dispatcher: Option<Arc<dyn RunDispatcher>>,
    running: bool,
    tasks: HashMap<String, JoinHandle<()>>,
}

/// In-process run queue: per-thread FIFO plus an in-flight set.
#[derive(Clone)]
pub struct RunScheduler {
    inner: Arc<Mutex<SchedulerState>>,
    concurrency: Option<Arc<Semaphore>>,
}

impl RunScheduler {
    pub fn new() -> Self {
        Self::with_concurrency_limit(None)
    }

    /// Cap concurrent dispatches across all threads.
    pub fn with_concurrency_limit(limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SchedulerState {
                threads: HashMap::new(),
                known: HashSet::new(),
                run_threads: HashMap::new(),
                dispatcher: None,
                running: false,
                tasks: HashMap::new(),
            })),
            concurrency: limit.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Start dispatching through the given dispatcher. Runs enqueued
    /// before start are picked up immediately.
    pub fn start(&self, dispatcher: Arc<dyn RunDispatcher>) {
        let ready: Vec<String> = {
            let mut state = self.inner.lock();
            state.dispatcher = Some(dispatcher);
            state.running = true;
            state
                .threads
                .iter()
                .filter(|(_, q)| q.in_flight.is_none() && !q.queued.is_empty())
                .map(|(key, _)| key.clone())
                .collect()
        };
        for thread_key in ready {
            self.dispatch_next(&thread_key);
        }
    }

    /// Stop dispatching and drain in-flight runs to their natural
    /// terminal. Queued runs stay queued for the next start.
    pub async fn stop(&self) {
        let tasks: Vec<JoinHandle<()>> = {
            let mut state = self.inner.lock();
            state.running = false;
            state.tasks.drain().map(|(_, handle)| handle).collect()
        };
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "run dispatch task panicked during drain");
                }
            }
        }
    }

    /// Queue a run for its thread. Idempotent on run id.
    pub fn enqueue(&self, run: &Run) {
        {
            let mut state = self.inner.lock();
            if state.known.contains(run.id.as_str()) {
                return;
            }
            state.known.insert(run.id.as_str().to_string());
            state
                .run_threads
                .insert(run.id.as_str().to_string(), run.thread_key.as_str().to_string());
            state
                .threads
                .entry(run.thread_key.as_str().to_string())
                .or_default()
                .queued
                .push_back(run.id.clone());
            debug!(run = %run.id, thread = %run.thread_key, "run enqueued");
        }
        self.dispatch_next(run.thread_key.as_str());
    }

    /// No-op when the run is already queued or in flight; used by the
    /// recovery pass.
    pub fn ensure_enqueued(&self, run: &Run) {
        self.enqueue(run);
    }

    /// Remove a queued (not in-flight) run. Returns whether it was removed.
    pub fn remove_queued(&self, run_id: &RunId) -> bool {
        let mut state = self.inner.lock();
        let Some(thread_key) = state.run_threads.get(run_id.as_str()).cloned() else {
            return false;
        };
        let Some(queue) = state.threads.get_mut(&thread_key) else {
            return false;
        };
        if queue.in_flight.as_ref() == Some(run_id) {
            return false;
        }
        let before = queue.queued.len();
        queue.queued.retain(|id| id != run_id);
        let removed = queue.queued.len() < before;
        if removed {
            state.known.remove(run_id.as_str());
            state.run_threads.remove(run_id.as_str());
        }
        removed
    }

    /// Whether the run is currently being executed (not merely queued).
    pub fn is_in_flight(&self, run_id: &RunId) -> bool {
        let state = self.inner.lock();
        state
            .run_threads
            .get(run_id.as_str())
            .and_then(|key| state.threads.get(key))
            .is_some_and(|q| q.in_flight.as_ref() == Some(run_id))
    }

    /// Pop the next queued run for the thread and spawn its dispatch.
    fn dispatch_next(&self, thread_key: &str) {
        let (run_id, dispatcher) = {
            let mut state = self.inner.lock();
            if !state.running {
                return;
            }
            let Some(dispatcher) = state.dispatcher.clone() else {
                return;
            };
            let Some(queue) = state.threads.get_mut(thread_key) else {
                return;
            };
            if queue.in_flight.is_some() {
                return;
            }
            let Some(run_id) = queue.queued.pop_front() else {
                return;
            };
            queue.in_flight = Some(run_id.clone());
            (run_id, dispatcher)
        };

        let scheduler = self.clone();
        let thread_key = thread_key.to_string();
        let task_run_id = run_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = match &scheduler.concurrency {
                Some(semaphore) => Arc::clone(semaphore).acquire_owned().await.ok(),
                None => None,
            };
            dispatcher.dispatch(&run_id).await;
            scheduler.complete(&thread_key, &run_id);
        });
        self.inner
            .lock()
            .tasks
            .insert(task_run_id.as_str().to_string(), handle);
    }

    /// Mark a run complete and hand the thread to its next queued run.
    fn complete(&self, thread_key: &str, run_id: &RunId) {
        {
            let mut state = self.inner.lock();
            state.known.remove(run_id.as_str());
            state.run_threads.remove(run_id.as_str());
            state.tasks.remove(run_id.as_str());
            state.tasks.retain(|_, handle| !handle.is_finished());
            if let Some(queue) = state.threads.get_mut(thread_key) {
                if queue.in_flight.as_ref() == Some(run_id) {
                    queue.in_flight = None;
                }
                if queue.in_flight.is_none() && queue.queued.is_empty() {
                    state.threads.remove(thread_key);
                }
            }
        }
        self.dispatch_next(thread_key);
    }
}

impl Default for RunScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
