// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled-task service.
//!
//! A periodic tick advances `once | cron | rrule` schedules, materializes
//! occurrences (unique per `(task, scheduled_for)`), and feeds them
//! through the run service's ingest path under the occurrence's
//! deterministic idempotency key: dispatching a duplicate of an
//! already-dispatched occurrence is a no-op at the store level.
//!
//! Each tick makes three passes: process due tasks, resume `pending`
//! occurrences (crash between materialize and dispatch), and reconcile
//! `dispatched` occurrences against their runs. A tick never overlaps
//! itself.

use baton_adapters::{topic_thread_key, ChatBridge, ChatRoute};
use baton_core::{
    Clock, DeliveryMode, DeliveryTarget, IdGen, ProgressEvent, ProgressKind, RunId, RunIngest,
    RunStatus, Schedule, ScheduledTask, TaskId, TaskRun, TaskRunId, TaskRunStatus, ThreadKey,
    UuidIdGen,
};
use baton_store::{RunStore, TaskFilter};
use parking_lot::Mutex as PlMutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::schedule::{initial_next_run, next_run_after_occurrence, normalize_rrule, validate_schedule};
use crate::service::RunService;

/// Tick loop configuration.
#[derive(Debug, Clone)]
pub struct TaskServiceConfig {
    pub tick_interval: Duration,
    /// Due tasks processed per tick
    pub due_batch: usize,
    /// Pending/dispatched occurrences examined per tick
    pub resume_batch: usize,
}

impl Default for TaskServiceConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            due_batch: 20,
            resume_batch: 200,
        }
    }
}

/// Input for creating a scheduled task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub instructions: String,
    pub schedule: Schedule,
    /// IANA timezone the schedule is evaluated in
    pub timezone: String,
    pub creator_thread_key: ThreadKey,
    pub owner_user_key: Option<String>,
    pub delivery: DeliveryTarget,
}

/// Partial update for a task.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub enabled: Option<bool>,
    pub schedule: Option<Schedule>,
    pub timezone: Option<String>,
}

/// Result of `update_task`: the stored task plus a non-fatal warning
/// (e.g. a failed best-effort topic rename).
#[derive(Debug, Clone)]
pub struct UpdatedTask {
    pub task: ScheduledTask,
    pub warning: Option<String>,
}

struct TaskInner<C: Clock> {
    store: RunStore,
    runs: RunService<C>,
    bridge: Arc<dyn ChatBridge>,
    clock: C,
    config: TaskServiceConfig,
    /// At most one tick body executes at a time
    tick_guard: Mutex<()>,
    /// Occurrences with a live delivery subscriber
    attached: PlMutex<HashSet<String>>,
    tick_task: PlMutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

/// Periodic scheduler for tasks and their occurrences.
pub struct ScheduledTaskService<C: Clock> {
    inner: Arc<TaskInner<C>>,
}

impl<C: Clock> Clone for ScheduledTaskService<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Clock> ScheduledTaskService<C> {
    pub fn new(
        store: RunStore,
        runs: RunService<C>,
        bridge: Arc<dyn ChatBridge>,
        clock: C,
        config: TaskServiceConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(TaskInner {
                store,
                runs,
                bridge,
                clock,
                config,
                tick_guard: Mutex::new(()),
                attached: PlMutex::new(HashSet::new()),
                tick_task: PlMutex::new(None),
                shutdown_tx,
            }),
        }
    }

    /// Start the tick loop.
    pub fn start(&self) {
        let service = self.clone();
        let mut shutdown_rx = self.inner.shutdown_tx.subscribe();
        let interval = self.inner.config.tick_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => service.tick().await,
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *self.inner.tick_task.lock() = Some(task);
    }

    /// Stop the tick loop; an in-flight tick finishes first.
    pub async fn stop(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        let task = self.inner.tick_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        // Wait out a tick body that was mid-flight
        let _guard = self.inner.tick_guard.lock().await;
    }

    /// Run one tick now. A tick body never overlaps another.
    pub async fn tick(&self) {
        let Ok(_guard) = self.inner.tick_guard.try_lock() else {
            debug!("tick skipped, previous tick still running");
            return;
        };
        self.process_due_tasks().await;
        self.resume_pending().await;
        self.reconcile_dispatched().await;
    }

    // === task CRUD ===

    pub async fn create_task(&self, new: NewTask) -> Result<ScheduledTask, EngineError> {
        if new.title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty".to_string()));
        }
        if new.instructions.trim().is_empty() {
            return Err(EngineError::Validation(
                "instructions must not be empty".to_string(),
            ));
        }

        let now = self.inner.clock.now_utc();
        let schedule = match new.schedule {
            Schedule::Rrule { expr } => Schedule::Rrule {
                expr: normalize_rrule(&expr, &new.timezone, now)?,
            },
            other => other,
        };
        validate_schedule(&schedule, &new.timezone)?;
        let next_run_at = initial_next_run(&schedule, &new.timezone, now)?;

        let now_ms = self.inner.clock.epoch_ms();
        let task = ScheduledTask {
            id: TaskId::new(UuidIdGen.next()),
            title: new.title,
            instructions: new.instructions,
            enabled: true,
            schedule,
            timezone: new.timezone,
            creator_thread_key: new.creator_thread_key,
            owner_user_key: new.owner_user_key,
            delivery: new.delivery,
            execution_thread_key: None,
            next_run_at,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };
        let task = self.inner.store.create_task(task)?;
        info!(task = %task.id, kind = task.schedule.kind(), "scheduled task created");
        Ok(task)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Result<ScheduledTask, EngineError> {
        self.inner
            .store
            .get_task(task_id)
            .ok_or_else(|| EngineError::NotFound(format!("task {} not found", task_id)))
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<ScheduledTask> {
        self.inner.store.list_tasks(filter)
    }

    pub fn delete_task(&self, task_id: &TaskId) -> Result<(), EngineError> {
        self.inner.store.delete_task(task_id)?;
        Ok(())
    }

    /// Apply a patch. `next_run_at` is recomputed iff `enabled` flips on
    /// or a schedule field changes; disabling clears it. A title change
    /// attempts a best-effort rename of a task-owned execution topic;
    /// failure becomes a warning, not an error.
    pub async fn update_task(
        &self,
        task_id: &TaskId,
        patch: TaskPatch,
    ) -> Result<UpdatedTask, EngineError> {
        let mut task = self.get_task(task_id)?;
        let now = self.inner.clock.now_utc();

        let title_changed = patch
            .title
            .as_ref()
            .is_some_and(|title| title != &task.title);
        let schedule_changed = patch.schedule.is_some() || patch.timezone.is_some();
        let enabled_flipped_on = patch.enabled == Some(true) && !task.enabled;

        if let Some(title) = patch.title {
            if title.trim().is_empty() {
                return Err(EngineError::Validation("title must not be empty".to_string()));
            }
            task.title = title;
        }
        if let Some(instructions) = patch.instructions {
            task.instructions = instructions;
        }
        if let Some(timezone) = patch.timezone {
            task.timezone = timezone;
        }
        if let Some(schedule) = patch.schedule {
            task.schedule = match schedule {
                Schedule::Rrule { expr } => Schedule::Rrule {
                    expr: normalize_rrule(&expr, &task.timezone, now)?,
                },
                other => other,
            };
        }
        validate_schedule(&task.schedule, &task.timezone)?;

        if let Some(enabled) = patch.enabled {
            task.enabled = enabled;
        }
        if !task.enabled {
            task.next_run_at = None;
        } else if enabled_flipped_on || schedule_changed {
            task.next_run_at = initial_next_run(&task.schedule, &task.timezone, now)?;
        }

        let task = self.inner.store.update_task(task)?;

        let warning = if title_changed {
            self.try_rename_topic(&task).await
        } else {
            None
        };

        Ok(UpdatedTask { task, warning })
    }

    /// Best-effort rename of the task's execution topic. Only applies
    /// when the topic is task-owned; the creator's topic is never
    /// touched.
    async fn try_rename_topic(&self, task: &ScheduledTask) -> Option<String> {
        if task.delivery.provider != "telegram" || !self.inner.bridge.supports_topics() {
            return None;
        }
        let route: baton_adapters::TopicRoute =
            serde_json::from_value(task.delivery.route.clone()).ok()?;
        let owned = task.execution_thread_key.as_ref()
            == Some(&topic_thread_key(route.chat_id, route.message_thread_id));
        if !owned {
            return None;
        }
        match self
            .inner
            .bridge
            .sync_task_topic_title(&route, &task.id, &task.title)
            .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!(task = %task.id, error = %e, "topic rename failed");
                Some(format!("topic rename failed: {e}"))
            }
        }
    }

    /// Strip the execution-thread pointer from every task executing under
    /// `thread_key`. The tasks stay intact; the next dispatch re-creates
    /// their topics.
    pub fn clear_task_execution_thread_by_thread_key(
        &self,
        thread_key: &ThreadKey,
    ) -> Result<usize, EngineError> {
        let mut cleared = 0;
        for task in self.inner.store.list_tasks(&TaskFilter::default()) {
            if task.execution_thread_key.as_ref() == Some(thread_key) {
                self.inner.store.clear_task_execution_thread(&task.id)?;
                cleared += 1;
            }
        }
        Ok(cleared)
    }

    /// Fire a task immediately: materialize an occurrence at the current
    /// instant and dispatch it through the normal path.
    pub async fn run_now(
        &self,
        task_id: &TaskId,
    ) -> Result<(ScheduledTask, TaskRun), EngineError> {
        let task = self.get_task(task_id)?;
        let scheduled_for = self.inner.clock.now_utc();

        let (occurrence, _created) = self.inner.store.create_or_get_task_run(
            TaskRunId::new(UuidIdGen.next()),
            task_id,
            scheduled_for,
        )?;

        let task = match self.ensure_execution_thread(&task).await {
            Ok(task) => task,
            Err(e) => {
                self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    Some(e.to_string()),
                )?;
                let occurrence = self.require_task_run(&occurrence.id)?;
                return Ok((task, occurrence));
            }
        };

        if occurrence.status == TaskRunStatus::Pending {
            self.dispatch_occurrence(&task, &occurrence).await;
        }
        let occurrence = self.require_task_run(&occurrence.id)?;
        Ok((task, occurrence))
    }

    fn require_task_run(&self, task_run_id: &TaskRunId) -> Result<TaskRun, EngineError> {
        self.inner
            .store
            .get_task_run(task_run_id)
            .ok_or_else(|| EngineError::NotFound(format!("task run {} not found", task_run_id)))
    }

    // === tick passes ===

    /// Pass (a): materialize and dispatch due tasks.
    async fn process_due_tasks(&self) {
        let now = self.inner.clock.now_utc();
        for task in self.inner.store.list_due_tasks(now, self.inner.config.due_batch) {
            if let Err(e) = self.process_due_task(task).await {
                warn!(error = %e, "due-task processing failed");
            }
        }
    }

    async fn process_due_task(&self, task: ScheduledTask) -> Result<(), EngineError> {
        let Some(scheduled_for) = task.next_run_at else {
            return Ok(());
        };

        // Advance from the current wall time, not the fired instant, so a
        // task that was down for hours gets one future next_run_at.
        let now = self.inner.clock.now_utc();
        let (next_enabled, next_run_at) =
            match next_run_after_occurrence(&task.schedule, &task.timezone, now) {
                Ok(advance) => advance,
                Err(e) => {
                    warn!(task = %task.id, error = %e, "schedule advance failed, disabling task");
                    (false, None)
                }
            };

        let occurrence = self.inner.store.advance_task_after_occurrence(
            TaskRunId::new(UuidIdGen.next()),
            &task.id,
            scheduled_for,
            next_enabled,
            next_run_at,
        )?;

        let task = match self.ensure_execution_thread(&task).await {
            Ok(task) => task,
            Err(e) => {
                warn!(task = %task.id, error = %e, "execution thread unavailable");
                self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    Some(e.to_string()),
                )?;
                return Ok(());
            }
        };

        if occurrence.status == TaskRunStatus::Pending {
            self.dispatch_occurrence(&task, &occurrence).await;
        }
        Ok(())
    }

    /// Pass (b): dispatch occurrences left `pending` by a crash between
    /// materialization and dispatch.
    async fn resume_pending(&self) {
        let pending = self
            .inner
            .store
            .list_task_runs_by_statuses(&[TaskRunStatus::Pending], self.inner.config.resume_batch);
        for occurrence in pending {
            let Some(task) = self.inner.store.get_task(&occurrence.task_id) else {
                let _ = self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    Some("task deleted before dispatch".to_string()),
                );
                continue;
            };
            match self.ensure_execution_thread(&task).await {
                Ok(task) => self.dispatch_occurrence(&task, &occurrence).await,
                Err(e) => {
                    let _ = self.inner.store.mark_task_run_terminal(
                        &occurrence.id,
                        TaskRunStatus::Failed,
                        Some(e.to_string()),
                    );
                }
            }
        }
    }

    /// Pass (c): resolve `dispatched` occurrences against their runs.
    async fn reconcile_dispatched(&self) {
        let dispatched = self.inner.store.list_task_runs_by_statuses(
            &[TaskRunStatus::Dispatched],
            self.inner.config.resume_batch,
        );
        for occurrence in dispatched {
            let Some(run_id) = occurrence.run_id.clone() else {
                let _ = self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    Some("dispatched occurrence has no run".to_string()),
                );
                continue;
            };
            let Some(run) = self.inner.runs.get_run(&run_id) else {
                let _ = self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    Some(format!("run {} not found", run_id)),
                );
                continue;
            };
            match run.status {
                RunStatus::Running => {
                    // Still executing; make sure a delivery subscriber is
                    // attached (lost on restart).
                    if let Some(task) = self.inner.store.get_task(&occurrence.task_id) {
                        self.attach_delivery(&task, occurrence.id.clone(), &run_id);
                    }
                }
                RunStatus::Succeeded => {
                    let _ = self.inner.store.mark_task_run_terminal(
                        &occurrence.id,
                        TaskRunStatus::Succeeded,
                        None,
                    );
                    if let Some(task) = self.inner.store.get_task(&occurrence.task_id) {
                        self.deliver(&run_id, &task).await;
                    }
                }
                RunStatus::Failed => {
                    let _ = self.inner.store.mark_task_run_terminal(
                        &occurrence.id,
                        TaskRunStatus::Failed,
                        run.error_message.clone(),
                    );
                }
            }
        }
    }

    // === execution thread & dispatch ===

    /// Resolve the task's execution thread, assigning one on first use.
    ///
    /// Telegram tasks get a brand-new topic; the creator's topic is
    /// never reused as an execution topic. Other providers derive a
    /// deterministic per-task key.
    async fn ensure_execution_thread(
        &self,
        task: &ScheduledTask,
    ) -> Result<ScheduledTask, EngineError> {
        if task.execution_thread_key.is_some() {
            return Ok(task.clone());
        }

        if task.delivery.provider == "telegram" {
            if !self.inner.bridge.supports_topics() {
                return Err(EngineError::upstream("telegram_topics_unavailable"));
            }
            let route: ChatRoute = serde_json::from_value(task.delivery.route.clone())
                .map_err(|e| EngineError::Validation(format!("invalid telegram route: {e}")))?;
            let topic = self
                .inner
                .bridge
                .create_task_topic(route.chat_id, &task.id, &task.title)
                .await?;
            let thread_key = topic_thread_key(topic.chat_id, topic.message_thread_id);
            let delivery = DeliveryTarget {
                provider: "telegram".to_string(),
                route: serde_json::to_value(topic)
                    .map_err(|e| EngineError::Internal(e.to_string()))?,
            };
            info!(task = %task.id, thread = %thread_key, "execution topic created");
            Ok(self
                .inner
                .store
                .set_task_execution_thread(&task.id, thread_key, Some(delivery))?)
        } else {
            let thread_key = ThreadKey::new(format!(
                "{}:task:{}",
                sanitize_provider(&task.delivery.provider),
                task.id
            ));
            Ok(self
                .inner
                .store
                .set_task_execution_thread(&task.id, thread_key, None)?)
        }
    }

    /// Dispatch an occurrence; failures mark the occurrence, never the
    /// task.
    async fn dispatch_occurrence(&self, task: &ScheduledTask, occurrence: &TaskRun) {
        if let Err(e) = self.try_dispatch(task, occurrence).await {
            warn!(task = %task.id, occurrence = %occurrence.id, error = %e, "dispatch failed");
            let _ = self.inner.store.mark_task_run_terminal(
                &occurrence.id,
                TaskRunStatus::Failed,
                Some(e.to_string()),
            );
        }
    }

    async fn try_dispatch(
        &self,
        task: &ScheduledTask,
        occurrence: &TaskRun,
    ) -> Result<(), EngineError> {
        let thread_key = task.execution_thread_key.clone().ok_or_else(|| {
            EngineError::Internal(format!("task {} has no execution thread", task.id))
        })?;

        let outcome = self
            .inner
            .runs
            .ingest_message(RunIngest {
                source: format!("task:{}", task.id),
                thread_key,
                user_key: task.owner_user_key.clone(),
                text: compose_instructions(task, occurrence),
                delivery_mode: DeliveryMode::FollowUp,
                idempotency_key: Some(occurrence.idempotency_key.clone()),
                images: Vec::new(),
            })
            .await?;

        match outcome.run.status {
            RunStatus::Running => {
                self.inner
                    .store
                    .mark_task_run_dispatched(&occurrence.id, &outcome.run.id)?;
                self.attach_delivery(task, occurrence.id.clone(), &outcome.run.id);
            }
            RunStatus::Succeeded => {
                self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Succeeded,
                    None,
                )?;
                self.deliver(&outcome.run.id, task).await;
            }
            RunStatus::Failed => {
                self.inner.store.mark_task_run_terminal(
                    &occurrence.id,
                    TaskRunStatus::Failed,
                    outcome.run.error_message.clone(),
                )?;
            }
        }
        Ok(())
    }

    /// Subscribe to the run's progress; on terminal, mark the occurrence
    /// and deliver the output. Idempotent per occurrence.
    fn attach_delivery(&self, task: &ScheduledTask, task_run_id: TaskRunId, run_id: &RunId) {
        {
            let mut attached = self.inner.attached.lock();
            if !attached.insert(task_run_id.as_str().to_string()) {
                return;
            }
        }

        let (terminal_tx, mut terminal_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let subscription = self.inner.runs.subscribe_run_progress(
            run_id,
            Arc::new(move |event| {
                if event.is_terminal() {
                    let _ = terminal_tx.send(event.clone());
                }
            }),
            true,
        );

        let store = self.inner.store.clone();
        let bridge = Arc::clone(&self.inner.bridge);
        let inner = Arc::clone(&self.inner);
        let target = task.delivery.clone();
        let run_id = run_id.clone();
        tokio::spawn(async move {
            let _subscription = subscription;
            if let Some(event) = terminal_rx.recv().await {
                match &event.kind {
                    ProgressKind::Succeeded { .. } => {
                        let _ = store.mark_task_run_terminal(
                            &task_run_id,
                            TaskRunStatus::Succeeded,
                            None,
                        );
                        if let Err(e) = bridge.deliver_run(&run_id, &target).await {
                            warn!(run = %run_id, error = %e, "run delivery failed");
                        }
                    }
                    ProgressKind::Failed { error_message } => {
                        let _ = store.mark_task_run_terminal(
                            &task_run_id,
                            TaskRunStatus::Failed,
                            Some(error_message.clone()),
                        );
                    }
                    _ => {}
                }
            }
            inner.attached.lock().remove(task_run_id.as_str());
        });
    }

    /// Best-effort delivery of a run's output to the task's target.
    async fn deliver(&self, run_id: &RunId, task: &ScheduledTask) {
        if let Err(e) = self
            .inner
            .bridge
            .deliver_run(run_id, &task.delivery)
            .await
        {
            warn!(run = %run_id, task = %task.id, error = %e, "run delivery failed");
        }
    }
}

/// Fixed dispatch header ahead of the task's instruction body.
fn compose_instructions(task: &ScheduledTask, occurrence: &TaskRun) -> String {
    format!(
        "[SCHEDULED TASK]\ntitle: {}\ntask_id: {}\nscheduled_for: {} (UTC)\ntimezone: {}\n\n{}",
        task.title,
        task.id,
        baton_core::format_scheduled_for(occurrence.scheduled_for),
        task.timezone,
        task.instructions,
    )
}

/// Provider tag reduced to `[a-z0-9_-]` for thread keys.
fn sanitize_provider(provider: &str) -> String {
    let sanitized: String = provider
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
#[path = "tasks_tests.rs"]
mod tests;
