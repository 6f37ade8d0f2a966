// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::TaskRunId;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, hour, minute, 0).unwrap()
}

#[test]
fn create_and_get_task() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();

    let task = store.get_task(&TaskId::new("t-1")).unwrap();
    assert_eq!(task.title, "daily report");
    assert!(task.enabled);

    let err = store.create_task(cron_task("t-1")).unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
}

#[test]
fn list_tasks_filters() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();
    let mut other = cron_task("t-2");
    other.creator_thread_key = ThreadKey::new("telegram:chat:5");
    other.enabled = false;
    other.next_run_at = None;
    store.create_task(other).unwrap();

    assert_eq!(store.list_tasks(&TaskFilter::default()).len(), 2);
    assert_eq!(
        store
            .list_tasks(&TaskFilter {
                creator_thread_key: Some(ThreadKey::new("cli:default")),
                ..Default::default()
            })
            .len(),
        1
    );
    assert_eq!(
        store
            .list_tasks(&TaskFilter {
                enabled: Some(false),
                ..Default::default()
            })
            .len(),
        1
    );
}

#[test]
fn list_due_tasks_respects_now_and_limit() {
    let (_dir, store) = temp_store();
    for (id, hour) in [("t-1", 9), ("t-2", 10), ("t-3", 11)] {
        let mut task = cron_task(id);
        task.next_run_at = Some(at(hour, 0));
        store.create_task(task).unwrap();
    }

    let due = store.list_due_tasks(at(10, 30), 10);
    assert_eq!(due.len(), 2);
    assert_eq!(due[0].id, "t-1");
    assert_eq!(due[1].id, "t-2");

    let limited = store.list_due_tasks(at(10, 30), 1);
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, "t-1");
}

#[test]
fn disabled_tasks_are_never_due() {
    let (_dir, store) = temp_store();
    let mut task = cron_task("t-1");
    task.enabled = false;
    task.next_run_at = Some(at(9, 0));
    store.create_task(task).unwrap();

    assert!(store.list_due_tasks(at(12, 0), 10).is_empty());
}

#[test]
fn create_or_get_task_run_is_idempotent() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();

    let (first, created) = store
        .create_or_get_task_run(TaskRunId::new("tr-1"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();
    assert!(created);
    assert_eq!(first.status, TaskRunStatus::Pending);
    assert_eq!(
        first.idempotency_key,
        "task:t-1:scheduled_for:2026-02-01T09:00:00.000Z"
    );

    let (second, created) = store
        .create_or_get_task_run(TaskRunId::new("tr-ignored"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();
    assert!(!created);
    assert_eq!(second.id, "tr-1");
}

#[test]
fn advance_records_occurrence_and_moves_schedule_atomically() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();

    let next = at(10, 0);
    let occurrence = store
        .advance_task_after_occurrence(
            TaskRunId::new("tr-1"),
            &TaskId::new("t-1"),
            at(9, 0),
            true,
            Some(next),
        )
        .unwrap();

    assert_eq!(occurrence.status, TaskRunStatus::Pending);
    let task = store.get_task(&TaskId::new("t-1")).unwrap();
    assert_eq!(task.next_run_at, Some(next));

    // Re-advancing the same instant reuses the occurrence
    let again = store
        .advance_task_after_occurrence(
            TaskRunId::new("tr-2"),
            &TaskId::new("t-1"),
            at(9, 0),
            false,
            None,
        )
        .unwrap();
    assert_eq!(again.id, "tr-1");
    assert!(!store.get_task(&TaskId::new("t-1")).unwrap().enabled);
}

#[test]
fn dispatch_and_terminal_lifecycle() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();
    let (occurrence, _) = store
        .create_or_get_task_run(TaskRunId::new("tr-1"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();

    let dispatched = store
        .mark_task_run_dispatched(&occurrence.id, &RunId::new("run-1"))
        .unwrap();
    assert_eq!(dispatched.status, TaskRunStatus::Dispatched);
    assert_eq!(dispatched.run_id, Some(RunId::new("run-1")));

    // Second dispatch is a no-op returning current state
    let again = store
        .mark_task_run_dispatched(&occurrence.id, &RunId::new("run-9"))
        .unwrap();
    assert_eq!(again.run_id, Some(RunId::new("run-1")));

    let done = store
        .mark_task_run_terminal(&occurrence.id, TaskRunStatus::Succeeded, None)
        .unwrap();
    assert_eq!(done.status, TaskRunStatus::Succeeded);

    // Terminal is sticky
    let sticky = store
        .mark_task_run_terminal(
            &occurrence.id,
            TaskRunStatus::Failed,
            Some("late".to_string()),
        )
        .unwrap();
    assert_eq!(sticky.status, TaskRunStatus::Succeeded);
}

#[test]
fn mark_terminal_rejects_non_terminal_status() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();
    let (occurrence, _) = store
        .create_or_get_task_run(TaskRunId::new("tr-1"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();

    let err = store
        .mark_task_run_terminal(&occurrence.id, TaskRunStatus::Pending, None)
        .unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}

#[test]
fn list_task_runs_by_statuses() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();
    let (a, _) = store
        .create_or_get_task_run(TaskRunId::new("tr-1"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();
    store
        .create_or_get_task_run(TaskRunId::new("tr-2"), &TaskId::new("t-1"), at(10, 0))
        .unwrap();
    store
        .mark_task_run_dispatched(&a.id, &RunId::new("run-1"))
        .unwrap();

    let pending = store.list_task_runs_by_statuses(&[TaskRunStatus::Pending], 10);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "tr-2");

    let both = store.list_task_runs_by_statuses(
        &[TaskRunStatus::Pending, TaskRunStatus::Dispatched],
        10,
    );
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].id, "tr-1"); // earliest scheduled_for first
}

#[test]
fn execution_thread_set_once_and_cleared() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();

    let task = store
        .set_task_execution_thread(
            &TaskId::new("t-1"),
            ThreadKey::new("cli:task:t-1"),
            None,
        )
        .unwrap();
    assert_eq!(task.execution_thread_key, Some(ThreadKey::new("cli:task:t-1")));

    // Second assignment returns the task unchanged
    let unchanged = store
        .set_task_execution_thread(
            &TaskId::new("t-1"),
            ThreadKey::new("cli:task:other"),
            None,
        )
        .unwrap();
    assert_eq!(
        unchanged.execution_thread_key,
        Some(ThreadKey::new("cli:task:t-1"))
    );

    let cleared = store
        .clear_task_execution_thread(&TaskId::new("t-1"))
        .unwrap();
    assert!(cleared.execution_thread_key.is_none());
}

#[test]
fn delete_task_drops_occurrences() {
    let (_dir, store) = temp_store();
    store.create_task(cron_task("t-1")).unwrap();
    store
        .create_or_get_task_run(TaskRunId::new("tr-1"), &TaskId::new("t-1"), at(9, 0))
        .unwrap();

    store.delete_task(&TaskId::new("t-1")).unwrap();
    assert!(store.get_task(&TaskId::new("t-1")).is_none());
    assert!(store.get_task_run(&TaskRunId::new("tr-1")).is_none());

    let err = store.delete_task(&TaskId::new("t-1")).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}
