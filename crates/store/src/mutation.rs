// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store mutations.
//!
//! One mutation = one atomic state transition. Transitions that must not
//! be separated by a crash are a single variant: `RunCreated` carries the
//! run, its ingest-dedup record, and its images together;
//! `TaskOccurrenceRecorded` carries the occurrence insert and the task's
//! schedule advance together.

use baton_core::{
    DeliveryTarget, InputImage, Run, RunId, RunOutput, ScheduledTask, TaskId, TaskRun, TaskRunId,
    TaskRunStatus, ThreadKey, ThreadSession,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::IngestRecord;

/// A single durable state transition.
///
/// Serializes with `{"op": "...", ...fields}` format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    // -- runs --
    RunCreated {
        run: Run,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ingest: Option<IngestRecord>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        images: Vec<InputImage>,
        /// Pending pre-run images claimed by this run (removed from buffer)
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        claimed_pending: Vec<String>,
    },
    RunSucceeded {
        run_id: RunId,
        output: RunOutput,
        at_ms: u64,
    },
    RunFailed {
        run_id: RunId,
        error_message: String,
        at_ms: u64,
    },

    // -- input images --
    ImageBuffered {
        image: InputImage,
    },
    RunImagesDeleted {
        run_id: RunId,
    },
    ImagesPurged {
        ids: Vec<String>,
    },

    // -- thread sessions --
    ThreadSessionUpserted {
        session: ThreadSession,
    },
    ThreadSessionDeleted {
        thread_key: ThreadKey,
    },

    // -- scheduled tasks --
    TaskCreated {
        task: ScheduledTask,
    },
    TaskUpdated {
        task: ScheduledTask,
    },
    TaskDeleted {
        task_id: TaskId,
    },
    TaskExecutionThreadSet {
        task_id: TaskId,
        thread_key: ThreadKey,
        /// Updated delivery target (e.g. topic route assigned by the bridge)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        delivery: Option<DeliveryTarget>,
        at_ms: u64,
    },
    TaskExecutionThreadCleared {
        task_id: TaskId,
        at_ms: u64,
    },

    // -- task occurrences --
    /// Insert an occurrence (if absent) and advance the owning task's
    /// schedule in one step.
    TaskOccurrenceRecorded {
        occurrence: TaskRun,
        next_enabled: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_run_at: Option<DateTime<Utc>>,
        at_ms: u64,
    },
    TaskRunCreated {
        occurrence: TaskRun,
    },
    TaskRunDispatched {
        task_run_id: TaskRunId,
        run_id: RunId,
        at_ms: u64,
    },
    TaskRunTerminal {
        task_run_id: TaskRunId,
        status: TaskRunStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        at_ms: u64,
    },
}

impl Mutation {
    /// Short tag for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Mutation::RunCreated { .. } => "run_created",
            Mutation::RunSucceeded { .. } => "run_succeeded",
            Mutation::RunFailed { .. } => "run_failed",
            Mutation::ImageBuffered { .. } => "image_buffered",
            Mutation::RunImagesDeleted { .. } => "run_images_deleted",
            Mutation::ImagesPurged { .. } => "images_purged",
            Mutation::ThreadSessionUpserted { .. } => "thread_session_upserted",
            Mutation::ThreadSessionDeleted { .. } => "thread_session_deleted",
            Mutation::TaskCreated { .. } => "task_created",
            Mutation::TaskUpdated { .. } => "task_updated",
            Mutation::TaskDeleted { .. } => "task_deleted",
            Mutation::TaskExecutionThreadSet { .. } => "task_execution_thread_set",
            Mutation::TaskExecutionThreadCleared { .. } => "task_execution_thread_cleared",
            Mutation::TaskOccurrenceRecorded { .. } => "task_occurrence_recorded",
            Mutation::TaskRunCreated { .. } => "task_run_created",
            Mutation::TaskRunDispatched { .. } => "task_run_dispatched",
            Mutation::TaskRunTerminal { .. } => "task_run_terminal",
        }
    }
}
