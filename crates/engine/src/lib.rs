// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! baton-engine: the run and scheduled-task orchestration core.
//!
//! - [`RunService`] is the public façade: ingest → dedup → persist →
//!   dispatch → execute → terminal → recover.
//! - [`RunScheduler`] keeps at-most-one run in flight per thread.
//! - [`RunExecutor`] owns the long-lived agent session per thread and the
//!   [`ThreadRunController`] that mediates between session events and runs.
//! - [`ScheduledTaskService`] advances once/cron/rrule schedules and feeds
//!   occurrences through the same ingest path.
//! - [`ProgressReporter`] reduces a run's progress stream into one
//!   edit-in-place chat status message.

mod controller;
mod error;
mod executor;
mod progress;
mod reporter;
mod schedule;
mod scheduler;
mod service;
mod tasks;

pub use controller::ThreadRunController;
pub use error::EngineError;
pub use executor::RunExecutor;
pub use progress::{ProgressBus, ProgressListener, ProgressSubscription};
pub use reporter::{ProgressReporter, ReporterConfig, ReporterHandle};
pub use schedule::{
    initial_next_run, next_run_after_occurrence, normalize_rrule, validate_schedule,
    validate_timezone,
};
pub use scheduler::{RunDispatcher, RunScheduler};
pub use service::{IngestOutcome, RunService};
pub use tasks::{NewTask, ScheduledTaskService, TaskPatch, TaskServiceConfig, UpdatedTask};
