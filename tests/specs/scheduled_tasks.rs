//! Scheduled-task behavior.

use crate::prelude::*;
use baton_core::{DeliveryTarget, Schedule, TaskRunStatus, ThreadKey};
use baton_engine::NewTask;
use chrono::Utc;
use std::time::Duration;

fn cli_task(schedule: Schedule) -> NewTask {
    NewTask {
        title: "nightly digest".to_string(),
        instructions: "summarize the day".to_string(),
        schedule,
        timezone: "UTC".to_string(),
        creator_thread_key: ThreadKey::new("cli:default"),
        owner_user_key: None,
        delivery: DeliveryTarget {
            provider: "cli".to_string(),
            route: serde_json::Value::Null,
        },
    }
}

// S3: a once-task due one minute ago, with a fast tick, produces exactly
// one succeeded occurrence within five seconds, and the task ends up
// disabled with no next run.
#[tokio::test]
async fn once_task_fires_exactly_once_then_disables() {
    let w = world_with_tick(Duration::from_millis(20)).await;

    let task = w
        .tasks
        .create_task(cli_task(Schedule::Once {
            at: Utc::now() - chrono::Duration::minutes(1),
        }))
        .await
        .unwrap();
    w.tasks.start();

    let done = eventually(Duration::from_secs(5), || {
        let succeeded = w
            .store
            .list_task_runs_by_statuses(&[TaskRunStatus::Succeeded], 10);
        succeeded.len() == 1
    })
    .await;
    assert!(done, "exactly one occurrence should succeed");

    // Give a few more ticks a chance to misbehave
    tokio::time::sleep(Duration::from_millis(200)).await;

    let all = w.store.list_task_runs_by_statuses(
        &[
            TaskRunStatus::Pending,
            TaskRunStatus::Dispatched,
            TaskRunStatus::Succeeded,
            TaskRunStatus::Failed,
        ],
        10,
    );
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].status, TaskRunStatus::Succeeded);

    let stored = w.tasks.get_task(&task.id).unwrap();
    assert!(!stored.enabled);
    assert_eq!(stored.next_run_at, None);

    w.tasks.stop().await;
    w.runs.shutdown().await;
}

// S4: a bare monthly RRULE stored for a UTC task carries both the
// injected DTSTART anchor and the RRULE body.
#[tokio::test]
async fn rrule_task_stores_normalized_expression() {
    let w = world().await;

    let task = w
        .tasks
        .create_task(cli_task(Schedule::Rrule {
            expr: "FREQ=MONTHLY;BYDAY=MO;BYSETPOS=1;BYHOUR=9;BYMINUTE=0;BYSECOND=0".to_string(),
        }))
        .await
        .unwrap();

    let Schedule::Rrule { expr } = &task.schedule else {
        panic!("expected an rrule schedule");
    };
    assert!(expr.contains("DTSTART;TZID=UTC:"), "{expr}");
    assert!(
        expr.contains("RRULE:FREQ=MONTHLY;BYDAY=MO;BYSETPOS=1;BYHOUR=9;BYMINUTE=0;BYSECOND=0"),
        "{expr}"
    );
    assert!(task.next_run_at.is_some());

    w.runs.shutdown().await;
}

// The dispatched instruction text carries the fixed header and the
// occurrence's idempotency key makes dispatch exactly-once.
#[tokio::test]
async fn occurrence_dispatch_is_idempotent_across_ticks() {
    let w = world_with_tick(Duration::from_millis(20)).await;

    w.tasks
        .create_task(cli_task(Schedule::Once {
            at: Utc::now() - chrono::Duration::seconds(5),
        }))
        .await
        .unwrap();

    // Tick manually many times; the occurrence must stay unique
    for _ in 0..5 {
        w.tasks.tick().await;
    }
    let done = eventually(Duration::from_secs(5), || {
        !w.store
            .list_task_runs_by_statuses(&[TaskRunStatus::Succeeded], 10)
            .is_empty()
    })
    .await;
    assert!(done);
    for _ in 0..5 {
        w.tasks.tick().await;
    }

    let all = w.store.list_task_runs_by_statuses(
        &[
            TaskRunStatus::Pending,
            TaskRunStatus::Dispatched,
            TaskRunStatus::Succeeded,
            TaskRunStatus::Failed,
        ],
        10,
    );
    assert_eq!(all.len(), 1);

    let run = w.runs.get_run(all[0].run_id.as_ref().unwrap()).unwrap();
    assert!(run.input_text.starts_with("[SCHEDULED TASK]\n"));
    assert!(run.input_text.ends_with("\n\nsummarize the day"));

    w.runs.shutdown().await;
}

// run_now fires immediately without touching the task's schedule.
#[tokio::test]
async fn run_now_dispatches_without_advancing_schedule() {
    let w = world().await;

    let task = w
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "0 9 1 1 *".to_string(),
        }))
        .await
        .unwrap();

    let (_task, occurrence) = w.tasks.run_now(&task.id).await.unwrap();
    let occurrence_id = occurrence.id.clone();
    let done = eventually(Duration::from_secs(5), || {
        w.store
            .get_task_run(&occurrence_id)
            .is_some_and(|tr| tr.status == TaskRunStatus::Succeeded)
    })
    .await;
    assert!(done, "run_now occurrence should succeed");

    let stored = w.tasks.get_task(&task.id).unwrap();
    assert!(stored.enabled);
    assert_eq!(stored.next_run_at, task.next_run_at);

    w.runs.shutdown().await;
}
