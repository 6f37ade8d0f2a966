// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transactional run/task store façade.
//!
//! All operations take the store lock, read the materialized state,
//! commit mutations to the WAL (the durability point), and apply them.
//! The lock makes each operation atomic; the single-variant mutations
//! make the crash-sensitive ones atomic across restarts too.

use baton_core::{
    occurrence_idempotency_key, DeliveryTarget, InputImage, Run, RunId, RunIngest, RunOutput,
    RunStatus, ScheduledTask, TaskId, TaskRun, TaskRunId, TaskRunStatus, ThreadKey, ThreadSession,
    INPUT_IMAGE_TTL_MS,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::mutation::Mutation;
use crate::snapshot::StoreSnapshot;
use crate::state::{IngestRecord, StoreState};
use crate::wal::Wal;

/// Checkpoint after this many committed mutations.
const SNAPSHOT_EVERY: usize = 512;

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Store file locations.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub wal_path: PathBuf,
    pub snapshot_path: PathBuf,
}

impl StoreConfig {
    /// Conventional layout under a state directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            wal_path: dir.join("wal").join("store.wal"),
            snapshot_path: dir.join("snapshot.zst"),
        }
    }
}

/// Result of `create_run`.
#[derive(Debug, Clone)]
pub struct CreatedRun {
    pub run: Run,
    /// True when an existing run was returned via the ingest dedup record
    pub deduplicated: bool,
}

/// Filter for `list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub creator_thread_key: Option<ThreadKey>,
    pub enabled: Option<bool>,
}

struct Inner {
    state: StoreState,
    wal: Wal,
    snapshot_path: PathBuf,
    mutations_since_snapshot: usize,
}

/// Durable state for runs, thread sessions, ingest dedup, input images,
/// and scheduled tasks with their occurrences.
#[derive(Clone)]
pub struct RunStore {
    inner: Arc<Mutex<Inner>>,
}

impl RunStore {
    /// Open the store: load the snapshot (if any) and replay the WAL tail.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let (mut state, after_seq) = match StoreSnapshot::load(&config.snapshot_path)? {
            Some(snapshot) => (snapshot.state, snapshot.seq),
            None => (StoreState::default(), 0),
        };

        let (wal, replay) = Wal::open(&config.wal_path, after_seq)?;
        let replayed = replay.len();
        for entry in &replay {
            state.apply(&entry.mutation);
        }

        info!(
            replayed,
            seq = wal.seq(),
            snapshot = %config.snapshot_path.display(),
            "store opened"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                wal,
                snapshot_path: config.snapshot_path,
                mutations_since_snapshot: replayed,
            })),
        })
    }

    /// Commit mutations: WAL first (durability point), then apply.
    fn commit(inner: &mut Inner, mutations: Vec<Mutation>) -> Result<(), StoreError> {
        if mutations.is_empty() {
            return Ok(());
        }
        for mutation in &mutations {
            debug!(op = mutation.name(), "committing mutation");
        }
        inner.wal.commit(&mutations)?;
        for mutation in &mutations {
            inner.state.apply(mutation);
        }
        inner.mutations_since_snapshot += mutations.len();
        if inner.mutations_since_snapshot >= SNAPSHOT_EVERY {
            Self::checkpoint_inner(inner)?;
        }
        Ok(())
    }

    fn checkpoint_inner(inner: &mut Inner) -> Result<(), StoreError> {
        let snapshot = StoreSnapshot::new(inner.wal.seq(), inner.state.clone());
        snapshot.save(&inner.snapshot_path)?;
        // Snapshot (including dir fsync) is durable; the WAL can go.
        inner.wal.truncate()?;
        inner.mutations_since_snapshot = 0;
        debug!(seq = snapshot.seq, "store checkpoint written");
        Ok(())
    }

    /// Write a snapshot and truncate the WAL.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::checkpoint_inner(&mut inner)
    }

    /// Final checkpoint on shutdown.
    pub fn close(&self) -> Result<(), StoreError> {
        self.checkpoint()
    }

    // === runs ===

    /// Create a run from an ingest request, deduplicating on
    /// `(source, idempotency_key)`.
    ///
    /// Expired input images for the ingest's `(source, thread_key)` are
    /// purged opportunistically. Pending pre-run images for the same scope
    /// are claimed by the new run. The in-process store lock makes the
    /// dedup lookup and the insert one atomic step, so the unique key can
    /// never race.
    pub fn create_run(&self, run_id: RunId, ingest: &RunIngest) -> Result<CreatedRun, StoreError> {
        let mut inner = self.inner.lock();
        let now_ms = epoch_ms_now();
        let mut mutations = Vec::new();

        let expired: Vec<String> = inner
            .state
            .input_images
            .values()
            .filter(|img| {
                img.source == ingest.source
                    && img.thread_key == ingest.thread_key
                    && img.is_expired(now_ms)
            })
            .map(|img| img.id.as_str().to_string())
            .collect();
        if !expired.is_empty() {
            debug!(count = expired.len(), "purging expired input images on ingest");
            mutations.push(Mutation::ImagesPurged { ids: expired });
        }

        if let Some(key) = &ingest.idempotency_key {
            if let Some(record) = inner.state.get_ingest_record(&ingest.source, key) {
                if record.payload_hash != ingest.payload_hash() {
                    return Err(StoreError::Conflict("idempotency_payload_mismatch".to_string()));
                }
                let run_id = record.run_id.clone();
                let run = inner
                    .state
                    .runs
                    .get(run_id.as_str())
                    .cloned()
                    .ok_or_else(|| {
                        StoreError::NotFound(format!("run {} for ingest record not found", run_id))
                    })?;
                Self::commit(&mut inner, mutations)?;
                return Ok(CreatedRun {
                    run,
                    deduplicated: true,
                });
            }
        }

        let run = Run {
            id: run_id.clone(),
            source: ingest.source.clone(),
            thread_key: ingest.thread_key.clone(),
            user_key: ingest.user_key.clone(),
            delivery_mode: ingest.delivery_mode,
            input_text: ingest.text.clone(),
            status: RunStatus::Running,
            output: None,
            error_message: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        };

        let record = ingest.idempotency_key.as_ref().map(|key| IngestRecord {
            source: ingest.source.clone(),
            idempotency_key: key.clone(),
            run_id: run_id.clone(),
            payload_hash: ingest.payload_hash(),
            created_at_ms: now_ms,
        });

        // Inline images first, then any still-buffered pre-run images for
        // this (source, thread_key), in buffer order.
        let mut images = Vec::new();
        let mut position: u32 = 0;
        for img in &ingest.images {
            images.push(InputImage {
                id: format!("{}-img-{}", run_id, position),
                run_id: Some(run_id.clone()),
                source: ingest.source.clone(),
                thread_key: ingest.thread_key.clone(),
                bytes: img.bytes.clone(),
                mime_type: img.mime_type.clone(),
                filename: img.filename.clone(),
                position,
                created_at_ms: now_ms,
                expires_at_ms: now_ms + INPUT_IMAGE_TTL_MS,
            });
            position += 1;
        }

        let mut pending: Vec<&InputImage> = inner
            .state
            .input_images
            .values()
            .filter(|img| {
                img.run_id.is_none()
                    && img.source == ingest.source
                    && img.thread_key == ingest.thread_key
                    && !img.is_expired(now_ms)
            })
            .collect();
        pending.sort_by_key(|img| (img.created_at_ms, img.position));

        let mut claimed_pending = Vec::new();
        for img in pending {
            claimed_pending.push(img.id.as_str().to_string());
            images.push(InputImage {
                id: format!("{}-img-{}", run_id, position),
                run_id: Some(run_id.clone()),
                position,
                ..img.clone()
            });
            position += 1;
        }

        mutations.push(Mutation::RunCreated {
            run: run.clone(),
            ingest: record,
            images,
            claimed_pending,
        });
        Self::commit(&mut inner, mutations)?;

        Ok(CreatedRun {
            run,
            deduplicated: false,
        })
    }

    pub fn get_run(&self, run_id: &RunId) -> Option<Run> {
        self.inner.lock().state.runs.get(run_id.as_str()).cloned()
    }

    /// List runs still in `running` status, oldest first.
    pub fn list_running_runs(&self, limit: usize) -> Vec<Run> {
        let inner = self.inner.lock();
        let mut runs: Vec<Run> = inner
            .state
            .runs
            .values()
            .filter(|run| run.status == RunStatus::Running)
            .cloned()
            .collect();
        runs.sort_by_key(|run| (run.created_at_ms, run.id.as_str().to_string()));
        runs.truncate(limit);
        runs
    }

    fn require_running(state: &StoreState, run_id: &RunId) -> Result<(), StoreError> {
        match state.runs.get(run_id.as_str()) {
            None => Err(StoreError::NotFound(format!("run {} not found", run_id))),
            Some(run) if run.status != RunStatus::Running => Err(StoreError::Conflict(format!(
                "run {} already {}",
                run_id, run.status
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Transition a running run to `succeeded`.
    ///
    /// Fails with a message revealing the current status when the run is
    /// already terminal or missing; callers treat "already terminal" as a
    /// benign race.
    pub fn mark_succeeded(&self, run_id: &RunId, output: RunOutput) -> Result<Run, StoreError> {
        let mut inner = self.inner.lock();
        Self::require_running(&inner.state, run_id)?;
        Self::commit(
            &mut inner,
            vec![Mutation::RunSucceeded {
                run_id: run_id.clone(),
                output,
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_run(&inner.state, run_id)
    }

    /// Transition a running run to `failed`.
    pub fn mark_failed(&self, run_id: &RunId, error_message: &str) -> Result<Run, StoreError> {
        let mut inner = self.inner.lock();
        Self::require_running(&inner.state, run_id)?;
        Self::commit(
            &mut inner,
            vec![Mutation::RunFailed {
                run_id: run_id.clone(),
                error_message: error_message.to_string(),
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_run(&inner.state, run_id)
    }

    fn cloned_run(state: &StoreState, run_id: &RunId) -> Result<Run, StoreError> {
        state
            .runs
            .get(run_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run {} not found", run_id)))
    }

    // === thread sessions ===

    pub fn get_thread_session(&self, thread_key: &ThreadKey) -> Option<ThreadSession> {
        self.inner
            .lock()
            .state
            .thread_sessions
            .get(thread_key.as_str())
            .cloned()
    }

    pub fn upsert_thread_session(&self, session: ThreadSession) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(&mut inner, vec![Mutation::ThreadSessionUpserted { session }])
    }

    /// Delete a thread's session pointer. Returns whether one existed.
    pub fn delete_thread_session(&self, thread_key: &ThreadKey) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.thread_sessions.contains_key(thread_key.as_str()) {
            return Ok(false);
        }
        Self::commit(
            &mut inner,
            vec![Mutation::ThreadSessionDeleted {
                thread_key: thread_key.clone(),
            }],
        )?;
        Ok(true)
    }

    // === input images ===

    /// Buffer a pre-run input image for `(source, thread_key)`.
    pub fn buffer_input_image(&self, image: InputImage) -> Result<(), StoreError> {
        if image.run_id.is_some() {
            return Err(StoreError::Invalid(
                "buffered input image must not carry a run id".to_string(),
            ));
        }
        let mut inner = self.inner.lock();
        Self::commit(&mut inner, vec![Mutation::ImageBuffered { image }])
    }

    pub fn list_run_input_images(&self, run_id: &RunId) -> Vec<InputImage> {
        let inner = self.inner.lock();
        let mut images: Vec<InputImage> = inner
            .state
            .input_images
            .values()
            .filter(|img| img.run_id.as_ref() == Some(run_id))
            .cloned()
            .collect();
        images.sort_by_key(|img| img.position);
        images
    }

    pub fn delete_run_input_images(&self, run_id: &RunId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        Self::commit(
            &mut inner,
            vec![Mutation::RunImagesDeleted {
                run_id: run_id.clone(),
            }],
        )
    }

    /// Purge expired images everywhere: both expired pre-ingest pending
    /// rows and expired run-bound rows. Returns the purge count.
    pub fn purge_expired_input_images(&self, now_ms: u64) -> Result<usize, StoreError> {
        let mut inner = self.inner.lock();
        let ids: Vec<String> = inner
            .state
            .input_images
            .values()
            .filter(|img| img.is_expired(now_ms))
            .map(|img| img.id.as_str().to_string())
            .collect();
        let count = ids.len();
        if count > 0 {
            Self::commit(&mut inner, vec![Mutation::ImagesPurged { ids }])?;
        }
        Ok(count)
    }

    // === scheduled tasks ===

    pub fn create_task(&self, task: ScheduledTask) -> Result<ScheduledTask, StoreError> {
        let mut inner = self.inner.lock();
        if inner.state.tasks.contains_key(task.id.as_str()) {
            return Err(StoreError::Conflict(format!(
                "task {} already exists",
                task.id
            )));
        }
        Self::commit(&mut inner, vec![Mutation::TaskCreated { task: task.clone() }])?;
        Ok(task)
    }

    pub fn get_task(&self, task_id: &TaskId) -> Option<ScheduledTask> {
        self.inner.lock().state.tasks.get(task_id.as_str()).cloned()
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<ScheduledTask> {
        let inner = self.inner.lock();
        let mut tasks: Vec<ScheduledTask> = inner
            .state
            .tasks
            .values()
            .filter(|task| {
                filter
                    .creator_thread_key
                    .as_ref()
                    .is_none_or(|key| &task.creator_thread_key == key)
                    && filter.enabled.is_none_or(|enabled| task.enabled == enabled)
            })
            .cloned()
            .collect();
        tasks.sort_by_key(|task| (task.created_at_ms, task.id.as_str().to_string()));
        tasks
    }

    /// Replace a stored task. The caller computes patch semantics.
    pub fn update_task(&self, mut task: ScheduledTask) -> Result<ScheduledTask, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(task.id.as_str()) {
            return Err(StoreError::NotFound(format!("task {} not found", task.id)));
        }
        task.updated_at_ms = epoch_ms_now();
        Self::commit(&mut inner, vec![Mutation::TaskUpdated { task: task.clone() }])?;
        Ok(task)
    }

    /// Delete a task and its occurrences.
    pub fn delete_task(&self, task_id: &TaskId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(task_id.as_str()) {
            return Err(StoreError::NotFound(format!("task {} not found", task_id)));
        }
        Self::commit(
            &mut inner,
            vec![Mutation::TaskDeleted {
                task_id: task_id.clone(),
            }],
        )
    }

    /// Assign a task's execution thread. First assignment wins; a second
    /// call returns the task unchanged.
    pub fn set_task_execution_thread(
        &self,
        task_id: &TaskId,
        thread_key: ThreadKey,
        delivery: Option<DeliveryTarget>,
    ) -> Result<ScheduledTask, StoreError> {
        let mut inner = self.inner.lock();
        let existing = inner
            .state
            .tasks
            .get(task_id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("task {} not found", task_id)))?;
        if existing.execution_thread_key.is_some() {
            return Ok(existing.clone());
        }
        Self::commit(
            &mut inner,
            vec![Mutation::TaskExecutionThreadSet {
                task_id: task_id.clone(),
                thread_key,
                delivery,
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_task(&inner.state, task_id)
    }

    /// Strip a task's execution thread pointer (keeps the task intact;
    /// the next dispatch re-creates the thread).
    pub fn clear_task_execution_thread(&self, task_id: &TaskId) -> Result<ScheduledTask, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(task_id.as_str()) {
            return Err(StoreError::NotFound(format!("task {} not found", task_id)));
        }
        Self::commit(
            &mut inner,
            vec![Mutation::TaskExecutionThreadCleared {
                task_id: task_id.clone(),
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_task(&inner.state, task_id)
    }

    fn cloned_task(state: &StoreState, task_id: &TaskId) -> Result<ScheduledTask, StoreError> {
        state
            .tasks
            .get(task_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task {} not found", task_id)))
    }

    /// Enabled tasks due at or before `now`, soonest first.
    pub fn list_due_tasks(&self, now: DateTime<Utc>, limit: usize) -> Vec<ScheduledTask> {
        let inner = self.inner.lock();
        let mut due: Vec<ScheduledTask> = inner
            .state
            .tasks
            .values()
            .filter(|task| task.enabled && task.next_run_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|task| (task.next_run_at, task.id.as_str().to_string()));
        due.truncate(limit);
        due
    }

    // === task occurrences ===

    fn new_occurrence(
        id: TaskRunId,
        task_id: &TaskId,
        scheduled_for: DateTime<Utc>,
        now_ms: u64,
    ) -> TaskRun {
        TaskRun {
            id,
            task_id: task_id.clone(),
            scheduled_for,
            status: TaskRunStatus::Pending,
            run_id: None,
            idempotency_key: occurrence_idempotency_key(task_id, scheduled_for),
            error_message: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    /// Get or create the unique occurrence for `(task_id, scheduled_for)`.
    ///
    /// `candidate_id` is used only when the occurrence does not yet exist.
    /// Returns the occurrence and whether it was created by this call.
    pub fn create_or_get_task_run(
        &self,
        candidate_id: TaskRunId,
        task_id: &TaskId,
        scheduled_for: DateTime<Utc>,
    ) -> Result<(TaskRun, bool), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(task_id.as_str()) {
            return Err(StoreError::NotFound(format!("task {} not found", task_id)));
        }
        if let Some(existing) = inner.state.get_occurrence(task_id, scheduled_for) {
            return Ok((existing.clone(), false));
        }
        let occurrence = Self::new_occurrence(candidate_id, task_id, scheduled_for, epoch_ms_now());
        Self::commit(
            &mut inner,
            vec![Mutation::TaskRunCreated {
                occurrence: occurrence.clone(),
            }],
        )?;
        Ok((occurrence, true))
    }

    /// Ensure the occurrence for `(task_id, scheduled_for)` exists and
    /// advance the task's schedule, in one atomic mutation.
    ///
    /// A tick crash can therefore never record the occurrence without
    /// advancing the task (or vice versa), so the same `scheduled_for`
    /// cannot fire twice.
    pub fn advance_task_after_occurrence(
        &self,
        candidate_id: TaskRunId,
        task_id: &TaskId,
        scheduled_for: DateTime<Utc>,
        next_enabled: bool,
        next_run_at: Option<DateTime<Utc>>,
    ) -> Result<TaskRun, StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.tasks.contains_key(task_id.as_str()) {
            return Err(StoreError::NotFound(format!("task {} not found", task_id)));
        }
        let occurrence = match inner.state.get_occurrence(task_id, scheduled_for) {
            Some(existing) => existing.clone(),
            None => Self::new_occurrence(candidate_id, task_id, scheduled_for, epoch_ms_now()),
        };
        Self::commit(
            &mut inner,
            vec![Mutation::TaskOccurrenceRecorded {
                occurrence: occurrence.clone(),
                next_enabled,
                next_run_at,
                at_ms: epoch_ms_now(),
            }],
        )?;
        inner
            .state
            .get_occurrence(task_id, scheduled_for)
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!(
                    "occurrence for task {} at {} not found after insert",
                    task_id, scheduled_for
                ))
            })
    }

    /// Record that an occurrence was handed to the run engine.
    ///
    /// Idempotent: a dispatched or terminal occurrence is returned
    /// unchanged (re-dispatch of a known occurrence is a no-op).
    pub fn mark_task_run_dispatched(
        &self,
        task_run_id: &TaskRunId,
        run_id: &RunId,
    ) -> Result<TaskRun, StoreError> {
        let mut inner = self.inner.lock();
        let current = Self::cloned_task_run(&inner.state, task_run_id)?;
        if current.status != TaskRunStatus::Pending {
            return Ok(current);
        }
        Self::commit(
            &mut inner,
            vec![Mutation::TaskRunDispatched {
                task_run_id: task_run_id.clone(),
                run_id: run_id.clone(),
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_task_run(&inner.state, task_run_id)
    }

    /// Move an occurrence to a terminal status. Already-terminal
    /// occurrences are returned unchanged.
    pub fn mark_task_run_terminal(
        &self,
        task_run_id: &TaskRunId,
        status: TaskRunStatus,
        error_message: Option<String>,
    ) -> Result<TaskRun, StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::Invalid(format!(
                "{} is not a terminal task run status",
                status
            )));
        }
        let mut inner = self.inner.lock();
        let current = Self::cloned_task_run(&inner.state, task_run_id)?;
        if current.is_terminal() {
            return Ok(current);
        }
        Self::commit(
            &mut inner,
            vec![Mutation::TaskRunTerminal {
                task_run_id: task_run_id.clone(),
                status,
                error_message,
                at_ms: epoch_ms_now(),
            }],
        )?;
        Self::cloned_task_run(&inner.state, task_run_id)
    }

    pub fn get_task_run(&self, task_run_id: &TaskRunId) -> Option<TaskRun> {
        self.inner
            .lock()
            .state
            .task_runs
            .get(task_run_id.as_str())
            .cloned()
    }

    /// Occurrences in any of the given statuses, earliest `scheduled_for`
    /// first.
    pub fn list_task_runs_by_statuses(
        &self,
        statuses: &[TaskRunStatus],
        limit: usize,
    ) -> Vec<TaskRun> {
        let inner = self.inner.lock();
        let mut runs: Vec<TaskRun> = inner
            .state
            .task_runs
            .values()
            .filter(|tr| statuses.contains(&tr.status))
            .cloned()
            .collect();
        runs.sort_by_key(|tr| (tr.scheduled_for, tr.id.as_str().to_string()));
        runs.truncate(limit);
        runs
    }

    fn cloned_task_run(state: &StoreState, task_run_id: &TaskRunId) -> Result<TaskRun, StoreError> {
        state
            .task_runs
            .get(task_run_id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("task run {} not found", task_run_id)))
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
