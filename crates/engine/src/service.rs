// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run service: the public façade over the run lifecycle.
//!
//! Ingest → dedup → persist → enqueue → execute → terminal → recover.
//! A recovery pass runs at init and then every 15 seconds: any run still
//! `running` in the store is re-enqueued, which makes enqueueing
//! crash-safe end to end.

use async_trait::async_trait;
use baton_adapters::AgentSessionFactory;
use baton_core::{
    Clock, IdGen, ProgressEvent, ProgressKind, Run, RunId, RunIngest, RunStatus, ThreadKey,
    UuidIdGen,
};
use baton_store::RunStore;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::executor::RunExecutor;
use crate::progress::{ProgressBus, ProgressListener, ProgressSubscription};
use crate::scheduler::{RunDispatcher, RunScheduler};

/// Recovery timer period.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(15);

/// Upper bound on runs re-enqueued per recovery pass.
const RECOVERY_BATCH: usize = 1000;

/// Result of `ingest_message`.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub run: Run,
    /// True when an existing run was returned via the dedup record
    pub deduplicated: bool,
}

pub(crate) struct ServiceInner<C: Clock> {
    pub(crate) store: RunStore,
    pub(crate) scheduler: RunScheduler,
    pub(crate) executor: RunExecutor<C>,
    pub(crate) bus: ProgressBus,
    pub(crate) clock: C,
    recovery_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Public façade: `ingest_message`, `get_run`, `subscribe_run_progress`,
/// `cancel_run`, `reset_thread_session`, lifecycle hooks.
pub struct RunService<C: Clock> {
    inner: Arc<ServiceInner<C>>,
}

impl<C: Clock> Clone for RunService<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> RunService<C> {
    pub fn new(store: RunStore, factory: Arc<dyn AgentSessionFactory>, clock: C) -> Self {
        Self::with_concurrency_limit(store, factory, clock, None)
    }

    /// Cap concurrent run execution across all threads.
    pub fn with_concurrency_limit(
        store: RunStore,
        factory: Arc<dyn AgentSessionFactory>,
        clock: C,
        limit: Option<usize>,
    ) -> Self {
        let bus = ProgressBus::new();
        let executor = RunExecutor::new(store.clone(), factory, bus.clone(), clock.clone());
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(ServiceInner {
                store,
                scheduler: RunScheduler::with_concurrency_limit(limit),
                executor,
                bus,
                clock,
                recovery_task: parking_lot::Mutex::new(None),
                shutdown_tx,
            }),
        }
    }

    /// Start dispatching: wire the scheduler, run the first recovery
    /// pass, and start the recovery timer.
    pub async fn init(&self) {
        let dispatcher: Arc<dyn RunDispatcher> = Arc::new(ServiceDispatcher {
            inner: Arc::downgrade(&self.inner),
        });
        self.inner.scheduler.start(dispatcher);

        let recovered = self.inner.recovery_pass();
        if recovered > 0 {
            info!(recovered, "re-enqueued running runs at startup");
        }

        let inner = Arc::downgrade(&self.inner);
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RECOVERY_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await; // immediate first tick, already covered above
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        let recovered = inner.recovery_pass();
                        if recovered > 0 {
                            debug!(recovered, "recovery pass re-enqueued runs");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *self.inner.recovery_task.lock() = Some(task);
    }

    /// Stop the recovery timer, drain in-flight runs, and release
    /// sessions. In-flight runs reach their natural terminal.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let task = self.inner.recovery_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.inner.scheduler.stop().await;
        self.inner.executor.dispose_all().await;
    }

    /// Accept a user message: dedup, persist, and queue for execution.
    pub async fn ingest_message(&self, ingest: RunIngest) -> Result<IngestOutcome, EngineError> {
        validate_ingest(&ingest)?;

        let run_id = RunId::new(UuidIdGen.next());
        let created = self.inner.store.create_run(run_id, &ingest)?;

        if created.deduplicated {
            // The original may still be queued or in flight; make sure it
            // is (recovery may not have run yet).
            if created.run.status == RunStatus::Running {
                self.inner.scheduler.ensure_enqueued(&created.run);
            }
            return Ok(IngestOutcome {
                run: created.run,
                deduplicated: true,
            });
        }

        self.inner.emit(&created.run, ProgressKind::Queued);
        self.inner.scheduler.enqueue(&created.run);
        Ok(IngestOutcome {
            run: created.run,
            deduplicated: false,
        })
    }

    pub fn get_run(&self, run_id: &RunId) -> Option<Run> {
        self.inner.store.get_run(run_id)
    }

    /// Subscribe to a run's progress stream. With `replay`, the listener
    /// first receives the buffered prefix.
    pub fn subscribe_run_progress(
        &self,
        run_id: &RunId,
        listener: ProgressListener,
        replay: bool,
    ) -> ProgressSubscription {
        self.inner.bus.subscribe(run_id, listener, replay)
    }

    /// Cancel a run: a queued run is removed and failed immediately; an
    /// executing run is detached from its controller and failed (the
    /// agent turn is not aborted).
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<Run, EngineError> {
        let run = self
            .inner
            .store
            .get_run(run_id)
            .ok_or_else(|| EngineError::NotFound(format!("run {} not found", run_id)))?;
        if run.is_terminal() {
            return Ok(run);
        }

        if self.inner.scheduler.remove_queued(run_id) {
            self.inner.fail_run(&run, "cancelled by user");
            return Ok(self.inner.store.get_run(run_id).unwrap_or(run));
        }

        // Currently executing (or orphaned): reject through the controller
        // so the dispatch path records the failure.
        self.inner.executor.cancel(&run.thread_key, run_id).await;
        Ok(self.inner.store.get_run(run_id).unwrap_or(run))
    }

    /// Destroy the thread's agent session; it is recreated lazily on the
    /// next ingest for the thread.
    pub async fn reset_thread_session(&self, thread_key: &ThreadKey) -> Result<bool, EngineError> {
        self.inner.executor.reset_thread_session(thread_key).await
    }

    /// Run one recovery pass now (tests and diagnostics).
    pub fn recover_now(&self) -> usize {
        self.inner.recovery_pass()
    }

    pub fn store(&self) -> &RunStore {
        &self.inner.store
    }

    pub fn bus(&self) -> &ProgressBus {
        &self.inner.bus
    }
}

impl<C: Clock> ServiceInner<C> {
    fn emit(&self, run: &Run, kind: ProgressKind) {
        self.bus.publish(ProgressEvent {
            run_id: run.id.clone(),
            thread_key: run.thread_key.clone(),
            source: run.source.clone(),
            delivery_mode: run.delivery_mode,
            timestamp_ms: self.clock.epoch_ms(),
            kind,
        });
    }

    /// Re-enqueue every run still `running` in the store.
    fn recovery_pass(&self) -> usize {
        let running = self.store.list_running_runs(RECOVERY_BATCH);
        let count = running.len();
        for run in running {
            self.scheduler.ensure_enqueued(&run);
        }
        count
    }

    /// Mark a run failed and emit the matching progress event, swallowing
    /// the benign already-terminal race.
    fn fail_run(&self, run: &Run, message: &str) {
        match self.store.mark_failed(&run.id, message) {
            Ok(_) => self.emit(
                run,
                ProgressKind::Failed {
                    error_message: message.to_string(),
                },
            ),
            Err(e) if e.is_already_terminal() => {
                debug!(run = %run.id, "run already terminal on fail");
            }
            Err(e) => error!(run = %run.id, error = %e, "failed to mark run failed"),
        }
    }

    /// Execute a loaded run to its terminal state, emitting `started`
    /// and the terminal progress event.
    pub(crate) async fn execute_loaded_run(&self, run: Run) {
        self.emit(&run, ProgressKind::Started);

        match self.executor.execute(&run).await {
            Ok(output) => match self.store.mark_succeeded(&run.id, output.clone()) {
                Ok(_) => self.emit(&run, ProgressKind::Succeeded { output }),
                Err(e) if e.is_already_terminal() => {
                    debug!(run = %run.id, "run already terminal on success");
                }
                Err(e) => error!(run = %run.id, error = %e, "failed to mark run succeeded"),
            },
            Err(e) => {
                let message = e.to_string();
                self.fail_run(&run, &message);
            }
        }
    }
}

struct ServiceDispatcher<C: Clock> {
    inner: Weak<ServiceInner<C>>,
}

#[async_trait]
impl<C: Clock> RunDispatcher for ServiceDispatcher<C> {
    async fn dispatch(&self, run_id: &RunId) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let Some(run) = inner.store.get_run(run_id) else {
            warn!(run = %run_id, "dispatched run missing from store");
            return;
        };
        if run.is_terminal() {
            return;
        }
        inner.execute_loaded_run(run).await;
    }
}

fn validate_ingest(ingest: &RunIngest) -> Result<(), EngineError> {
    if ingest.source.trim().is_empty() {
        return Err(EngineError::Validation("source must not be empty".to_string()));
    }
    if ingest.thread_key.as_str().trim().is_empty() {
        return Err(EngineError::Validation(
            "thread_key must not be empty".to_string(),
        ));
    }
    if ingest.text.trim().is_empty() && ingest.images.is_empty() {
        return Err(EngineError::Validation(
            "message must carry text or images".to_string(),
        ));
    }
    if ingest
        .idempotency_key
        .as_ref()
        .is_some_and(|key| key.trim().is_empty())
    {
        return Err(EngineError::Validation(
            "idempotency_key must not be empty when set".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
