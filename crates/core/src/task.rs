// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scheduled tasks and their occurrences.
//!
//! A `ScheduledTask` describes a recurring (or one-shot) instruction set;
//! a `TaskRun` is one materialized firing at a fixed `scheduled_for`
//! instant, unique per `(task_id, scheduled_for)`.

use crate::run::RunId;
use crate::ThreadKey;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a scheduled task.
    pub struct TaskId;
}

crate::define_id! {
    /// Unique identifier for a task occurrence.
    pub struct TaskRunId;
}

/// When a task fires. Exactly one expression per task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Schedule {
    /// Fires once when now ≥ `at`, then the task auto-disables
    Once { at: DateTime<Utc> },
    /// 5-field cron expression evaluated in the task timezone
    Cron { expr: String },
    /// iCalendar RRULE body, normalized to carry a DTSTART anchor
    Rrule { expr: String },
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Once { .. } => "once",
            Schedule::Cron { .. } => "cron",
            Schedule::Rrule { .. } => "rrule",
        }
    }
}

/// Where a task's runs are delivered.
///
/// `route` is provider-specific (chat id, topic id, ...); the core only
/// routes on `provider`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTarget {
    pub provider: String,
    pub route: serde_json::Value,
}

/// A scheduled task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub title: String,
    /// Instruction body dispatched on each occurrence
    pub instructions: String,
    pub enabled: bool,
    pub schedule: Schedule,
    /// IANA timezone name the schedule is evaluated in
    pub timezone: String,
    /// Thread the task was created from (never used for execution)
    pub creator_thread_key: ThreadKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_user_key: Option<String>,
    pub delivery: DeliveryTarget,
    /// Thread the task's runs execute under; assigned on first dispatch
    /// and never re-assigned for the task's life.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_thread_key: Option<ThreadKey>,
    /// Next instant the task is due; `None` iff disabled or exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

/// Status of a task occurrence through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRunStatus {
    Pending,
    Dispatched,
    Succeeded,
    Failed,
}

impl TaskRunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskRunStatus::Succeeded | TaskRunStatus::Failed)
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRunStatus::Pending => write!(f, "pending"),
            TaskRunStatus::Dispatched => write!(f, "dispatched"),
            TaskRunStatus::Succeeded => write!(f, "succeeded"),
            TaskRunStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One materialized firing of a scheduled task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: TaskRunId,
    pub task_id: TaskId,
    pub scheduled_for: DateTime<Utc>,
    pub status: TaskRunStatus,
    /// Run created by dispatching this occurrence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<RunId>,
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl TaskRun {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Canonical ISO-UTC rendering of a `scheduled_for` instant (millisecond
/// precision, `Z` suffix). Used in occurrence idempotency keys.
pub fn format_scheduled_for(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Deterministic dedup key for a task occurrence.
pub fn occurrence_idempotency_key(task_id: &TaskId, scheduled_for: DateTime<Utc>) -> String {
    format!(
        "task:{}:scheduled_for:{}",
        task_id,
        format_scheduled_for(scheduled_for)
    )
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
