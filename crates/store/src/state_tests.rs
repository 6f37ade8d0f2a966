// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::{DeliveryMode, RunId, RunOutput, TaskRunId, ThreadKey};
use chrono::TimeZone;

fn run(id: &str) -> Run {
    Run::builder().id(id).build()
}

fn run_created(id: &str) -> Mutation {
    Mutation::RunCreated {
        run: run(id),
        ingest: None,
        images: Vec::new(),
        claimed_pending: Vec::new(),
    }
}

fn task(id: &str) -> ScheduledTask {
    ScheduledTask {
        id: TaskId::new(id),
        title: "daily report".to_string(),
        instructions: "write the report".to_string(),
        enabled: true,
        schedule: baton_core::Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        },
        timezone: "UTC".to_string(),
        creator_thread_key: ThreadKey::new("cli:default"),
        owner_user_key: None,
        delivery: baton_core::DeliveryTarget {
            provider: "cli".to_string(),
            route: serde_json::Value::Null,
        },
        execution_thread_key: None,
        next_run_at: Some(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()),
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
    }
}

fn occurrence(id: &str, task_id: &str, hour: u32) -> TaskRun {
    let scheduled_for = Utc.with_ymd_and_hms(2026, 2, 1, hour, 0, 0).unwrap();
    TaskRun {
        id: TaskRunId::new(id),
        task_id: TaskId::new(task_id),
        scheduled_for,
        status: TaskRunStatus::Pending,
        run_id: None,
        idempotency_key: baton_core::occurrence_idempotency_key(&TaskId::new(task_id), scheduled_for),
        error_message: None,
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
    }
}

#[test]
fn run_created_idempotent() {
    let mut state = StoreState::default();
    state.apply(&run_created("run-1"));
    let created_at = state.runs["run-1"].created_at_ms;

    // Re-apply (simulates snapshot + WAL double-apply)
    state.apply(&run_created("run-1"));

    assert_eq!(state.runs.len(), 1);
    assert_eq!(state.runs["run-1"].created_at_ms, created_at);
}

#[test]
fn run_terminal_transitions_one_way() {
    let mut state = StoreState::default();
    state.apply(&run_created("run-1"));
    state.apply(&Mutation::RunSucceeded {
        run_id: RunId::new("run-1"),
        output: RunOutput {
            text: "done".to_string(),
            provider: None,
            model: None,
            delivery_mode: DeliveryMode::FollowUp,
        },
        at_ms: 2_000,
    });
    assert_eq!(state.runs["run-1"].status, RunStatus::Succeeded);

    // A late failure must not overwrite the terminal state
    state.apply(&Mutation::RunFailed {
        run_id: RunId::new("run-1"),
        error_message: "late".to_string(),
        at_ms: 3_000,
    });
    assert_eq!(state.runs["run-1"].status, RunStatus::Succeeded);
    assert!(state.runs["run-1"].error_message.is_none());
}

#[test]
fn occurrence_unique_per_scheduled_for() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });

    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-1", "t-1", 9),
    });
    // Same (task, scheduled_for) under a different id must be ignored
    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-2", "t-1", 9),
    });

    assert_eq!(state.task_runs.len(), 1);
    assert!(state.task_runs.contains_key("tr-1"));

    // A different instant is a new occurrence
    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-3", "t-1", 10),
    });
    assert_eq!(state.task_runs.len(), 2);
}

#[test]
fn occurrence_recorded_advances_task() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });

    let next = Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap();
    state.apply(&Mutation::TaskOccurrenceRecorded {
        occurrence: occurrence("tr-1", "t-1", 9),
        next_enabled: true,
        next_run_at: Some(next),
        at_ms: 2_000,
    });

    assert_eq!(state.tasks["t-1"].next_run_at, Some(next));
    assert!(state.tasks["t-1"].enabled);
    assert_eq!(state.task_runs.len(), 1);

    // Once-task style advance: disabled, no next run
    state.apply(&Mutation::TaskOccurrenceRecorded {
        occurrence: occurrence("tr-2", "t-1", 10),
        next_enabled: false,
        next_run_at: None,
        at_ms: 3_000,
    });
    assert!(!state.tasks["t-1"].enabled);
    assert_eq!(state.tasks["t-1"].next_run_at, None);
}

#[test]
fn execution_thread_first_assignment_wins() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });

    state.apply(&Mutation::TaskExecutionThreadSet {
        task_id: TaskId::new("t-1"),
        thread_key: ThreadKey::new("telegram:chat:1:topic:5"),
        delivery: None,
        at_ms: 2_000,
    });
    state.apply(&Mutation::TaskExecutionThreadSet {
        task_id: TaskId::new("t-1"),
        thread_key: ThreadKey::new("telegram:chat:1:topic:9"),
        delivery: None,
        at_ms: 3_000,
    });

    assert_eq!(
        state.tasks["t-1"].execution_thread_key,
        Some(ThreadKey::new("telegram:chat:1:topic:5"))
    );
}

#[test]
fn task_deleted_removes_occurrences() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });
    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-1", "t-1", 9),
    });

    state.apply(&Mutation::TaskDeleted {
        task_id: TaskId::new("t-1"),
    });

    assert!(state.tasks.is_empty());
    assert!(state.task_runs.is_empty());
    assert!(state.occurrence_index.is_empty());
}

#[test]
fn task_run_dispatched_idempotent() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });
    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-1", "t-1", 9),
    });

    state.apply(&Mutation::TaskRunDispatched {
        task_run_id: TaskRunId::new("tr-1"),
        run_id: RunId::new("run-1"),
        at_ms: 2_000,
    });
    assert_eq!(state.task_runs["tr-1"].status, TaskRunStatus::Dispatched);

    // Re-apply with a different run id: first dispatch wins
    state.apply(&Mutation::TaskRunDispatched {
        task_run_id: TaskRunId::new("tr-1"),
        run_id: RunId::new("run-2"),
        at_ms: 3_000,
    });
    assert_eq!(state.task_runs["tr-1"].run_id, Some(RunId::new("run-1")));
}

#[test]
fn task_run_terminal_idempotent() {
    let mut state = StoreState::default();
    state.apply(&Mutation::TaskCreated { task: task("t-1") });
    state.apply(&Mutation::TaskRunCreated {
        occurrence: occurrence("tr-1", "t-1", 9),
    });

    state.apply(&Mutation::TaskRunTerminal {
        task_run_id: TaskRunId::new("tr-1"),
        status: TaskRunStatus::Failed,
        error_message: Some("boom".to_string()),
        at_ms: 2_000,
    });
    state.apply(&Mutation::TaskRunTerminal {
        task_run_id: TaskRunId::new("tr-1"),
        status: TaskRunStatus::Succeeded,
        error_message: None,
        at_ms: 3_000,
    });

    assert_eq!(state.task_runs["tr-1"].status, TaskRunStatus::Failed);
    assert_eq!(state.task_runs["tr-1"].error_message.as_deref(), Some("boom"));
}

#[test]
fn thread_session_upsert_and_delete() {
    let mut state = StoreState::default();
    let session = ThreadSession {
        thread_key: ThreadKey::new("cli:default"),
        session_id: "sess-1".to_string(),
        session_file_path: "/tmp/sess-1.jsonl".to_string(),
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
    };
    state.apply(&Mutation::ThreadSessionUpserted {
        session: session.clone(),
    });
    assert_eq!(state.thread_sessions["cli:default"], session);

    state.apply(&Mutation::ThreadSessionDeleted {
        thread_key: ThreadKey::new("cli:default"),
    });
    assert!(state.thread_sessions.is_empty());
}
