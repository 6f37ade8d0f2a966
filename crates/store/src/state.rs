// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from mutation replay

use baton_core::{
    format_scheduled_for, InputImage, Run, RunStatus, ScheduledTask, TaskId, TaskRun,
    TaskRunStatus, ThreadSession,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::mutation::Mutation;

/// Dedup record for an ingested message: `(source, idempotency_key) → run`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestRecord {
    pub source: String,
    pub idempotency_key: String,
    pub run_id: baton_core::RunId,
    /// Canonical hash of the ingest payload, for key-reuse detection
    pub payload_hash: String,
    pub created_at_ms: u64,
}

/// Composite map key for ingest dedup records.
pub(crate) fn ingest_key(source: &str, idempotency_key: &str) -> String {
    format!("{}\u{1f}{}", source, idempotency_key)
}

/// Composite map key for the occurrence uniqueness index.
pub(crate) fn occurrence_key(task_id: &TaskId, scheduled_for: DateTime<Utc>) -> String {
    format!("{}\u{1f}{}", task_id, format_scheduled_for(scheduled_for))
}

/// Materialized state built from mutation replay.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreState {
    pub runs: HashMap<String, Run>,
    #[serde(default)]
    pub ingest_records: HashMap<String, IngestRecord>,
    /// All input images by id, both run-bound and pending pre-run
    #[serde(default)]
    pub input_images: HashMap<String, InputImage>,
    /// Thread → session pointer, keyed by thread key
    #[serde(default)]
    pub thread_sessions: HashMap<String, ThreadSession>,
    #[serde(default)]
    pub tasks: HashMap<String, ScheduledTask>,
    #[serde(default)]
    pub task_runs: HashMap<String, TaskRun>,
    /// `(task_id, scheduled_for)` → task_run_id uniqueness index
    #[serde(default)]
    pub occurrence_index: HashMap<String, String>,
}

impl StoreState {
    /// Look up an ingest dedup record.
    pub fn get_ingest_record(&self, source: &str, idempotency_key: &str) -> Option<&IngestRecord> {
        self.ingest_records.get(&ingest_key(source, idempotency_key))
    }

    /// Look up the occurrence for `(task_id, scheduled_for)`.
    pub fn get_occurrence(&self, task_id: &TaskId, scheduled_for: DateTime<Utc>) -> Option<&TaskRun> {
        let id = self.occurrence_index.get(&occurrence_key(task_id, scheduled_for))?;
        self.task_runs.get(id)
    }

    /// Apply a mutation to the state.
    ///
    /// Must be idempotent: recovery may re-apply a mutation that is
    /// already reflected in a snapshot.
    pub fn apply(&mut self, mutation: &Mutation) {
        match mutation {
            Mutation::RunCreated {
                run,
                ingest,
                images,
                claimed_pending,
            } => {
                if self.runs.contains_key(run.id.as_str()) {
                    return;
                }
                self.runs.insert(run.id.as_str().to_string(), run.clone());
                if let Some(record) = ingest {
                    self.ingest_records.insert(
                        ingest_key(&record.source, &record.idempotency_key),
                        record.clone(),
                    );
                }
                for id in claimed_pending {
                    self.input_images.remove(id);
                }
                for image in images {
                    self.input_images.insert(image.id.clone(), image.clone());
                }
            }

            Mutation::RunSucceeded { run_id, output, at_ms } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    if run.status == RunStatus::Running {
                        run.status = RunStatus::Succeeded;
                        run.output = Some(output.clone());
                        run.updated_at_ms = *at_ms;
                    }
                }
            }

            Mutation::RunFailed {
                run_id,
                error_message,
                at_ms,
            } => {
                if let Some(run) = self.runs.get_mut(run_id.as_str()) {
                    if run.status == RunStatus::Running {
                        run.status = RunStatus::Failed;
                        run.error_message = Some(error_message.clone());
                        run.updated_at_ms = *at_ms;
                    }
                }
            }

            Mutation::ImageBuffered { image } => {
                self.input_images.insert(image.id.clone(), image.clone());
            }

            Mutation::RunImagesDeleted { run_id } => {
                self.input_images
                    .retain(|_, img| img.run_id.as_ref() != Some(run_id));
            }

            Mutation::ImagesPurged { ids } => {
                for id in ids {
                    self.input_images.remove(id);
                }
            }

            Mutation::ThreadSessionUpserted { session } => {
                self.thread_sessions
                    .insert(session.thread_key.as_str().to_string(), session.clone());
            }

            Mutation::ThreadSessionDeleted { thread_key } => {
                self.thread_sessions.remove(thread_key.as_str());
            }

            Mutation::TaskCreated { task } => {
                if !self.tasks.contains_key(task.id.as_str()) {
                    self.tasks.insert(task.id.as_str().to_string(), task.clone());
                }
            }

            Mutation::TaskUpdated { task } => {
                if self.tasks.contains_key(task.id.as_str()) {
                    self.tasks.insert(task.id.as_str().to_string(), task.clone());
                }
            }

            Mutation::TaskDeleted { task_id } => {
                self.tasks.remove(task_id.as_str());
                let removed: Vec<String> = self
                    .task_runs
                    .values()
                    .filter(|tr| &tr.task_id == task_id)
                    .map(|tr| tr.id.as_str().to_string())
                    .collect();
                for id in removed {
                    self.task_runs.remove(&id);
                }
                self.occurrence_index
                    .retain(|key, _| !key.starts_with(&format!("{}\u{1f}", task_id)));
            }

            Mutation::TaskExecutionThreadSet {
                task_id,
                thread_key,
                delivery,
                at_ms,
            } => {
                if let Some(task) = self.tasks.get_mut(task_id.as_str()) {
                    // First assignment wins for the task's life
                    if task.execution_thread_key.is_none() {
                        task.execution_thread_key = Some(thread_key.clone());
                        if let Some(delivery) = delivery {
                            task.delivery = delivery.clone();
                        }
                        task.updated_at_ms = *at_ms;
                    }
                }
            }

            Mutation::TaskExecutionThreadCleared { task_id, at_ms } => {
                if let Some(task) = self.tasks.get_mut(task_id.as_str()) {
                    if task.execution_thread_key.take().is_some() {
                        task.updated_at_ms = *at_ms;
                    }
                }
            }

            Mutation::TaskOccurrenceRecorded {
                occurrence,
                next_enabled,
                next_run_at,
                at_ms,
            } => {
                self.insert_occurrence(occurrence);
                if let Some(task) = self.tasks.get_mut(occurrence.task_id.as_str()) {
                    task.enabled = *next_enabled;
                    task.next_run_at = *next_run_at;
                    task.updated_at_ms = *at_ms;
                }
            }

            Mutation::TaskRunCreated { occurrence } => {
                self.insert_occurrence(occurrence);
            }

            Mutation::TaskRunDispatched {
                task_run_id,
                run_id,
                at_ms,
            } => {
                if let Some(tr) = self.task_runs.get_mut(task_run_id.as_str()) {
                    if tr.status == TaskRunStatus::Pending {
                        tr.status = TaskRunStatus::Dispatched;
                        tr.run_id = Some(run_id.clone());
                        tr.updated_at_ms = *at_ms;
                    }
                }
            }

            Mutation::TaskRunTerminal {
                task_run_id,
                status,
                error_message,
                at_ms,
            } => {
                if let Some(tr) = self.task_runs.get_mut(task_run_id.as_str()) {
                    if !tr.status.is_terminal() {
                        tr.status = *status;
                        tr.error_message = error_message.clone();
                        tr.updated_at_ms = *at_ms;
                    }
                }
            }
        }
    }

    /// Insert an occurrence unless `(task_id, scheduled_for)` already exists.
    fn insert_occurrence(&mut self, occurrence: &TaskRun) {
        let key = occurrence_key(&occurrence.task_id, occurrence.scheduled_for);
        if self.occurrence_index.contains_key(&key) {
            return;
        }
        self.occurrence_index
            .insert(key, occurrence.id.as_str().to_string());
        self.task_runs
            .insert(occurrence.id.as_str().to_string(), occurrence.clone());
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
