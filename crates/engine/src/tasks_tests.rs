// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_adapters::{ChatCall, FakeChatBridge, FakeSessionFactory};
use baton_core::FakeClock;
use baton_store::StoreConfig;
use chrono::TimeZone;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: RunStore,
    runs: RunService<FakeClock>,
    tasks: ScheduledTaskService<FakeClock>,
    bridge: FakeChatBridge,
    clock: FakeClock,
}

async fn harness() -> Harness {
    harness_with_bridge(FakeChatBridge::new()).await
}

async fn harness_with_bridge(bridge: FakeChatBridge) -> Harness {
    let dir = TempDir::new().unwrap();
    let store = RunStore::open(StoreConfig::in_dir(dir.path())).unwrap();
    // Feb 1 2026 08:00 UTC
    let clock = FakeClock::at_epoch_ms(1_769_932_800_000);
    let runs = RunService::new(
        store.clone(),
        Arc::new(FakeSessionFactory::auto_responding()),
        clock.clone(),
    );
    runs.init().await;
    let tasks = ScheduledTaskService::new(
        store.clone(),
        runs.clone(),
        Arc::new(bridge.clone()),
        clock.clone(),
        TaskServiceConfig::default(),
    );
    Harness {
        _dir: dir,
        store,
        runs,
        tasks,
        bridge,
        clock,
    }
}

fn cli_task(schedule: Schedule) -> NewTask {
    NewTask {
        title: "daily report".to_string(),
        instructions: "write the report".to_string(),
        schedule,
        timezone: "UTC".to_string(),
        creator_thread_key: ThreadKey::new("cli:default"),
        owner_user_key: Some("user-1".to_string()),
        delivery: DeliveryTarget {
            provider: "cli".to_string(),
            route: serde_json::Value::Null,
        },
    }
}

fn telegram_task(schedule: Schedule) -> NewTask {
    NewTask {
        delivery: DeliveryTarget {
            provider: "telegram".to_string(),
            route: serde_json::json!({"chat_id": 101}),
        },
        creator_thread_key: ThreadKey::new("telegram:chat:101:topic:7"),
        ..cli_task(schedule)
    }
}

fn once_at(clock: &FakeClock, offset_secs: i64) -> Schedule {
    let at = clock.now_utc() + chrono::Duration::seconds(offset_secs);
    Schedule::Once { at }
}

async fn settle() {
    for _ in 0..500 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn create_task_computes_initial_next_run() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        }))
        .await
        .unwrap();

    assert!(task.enabled);
    assert_eq!(
        task.next_run_at,
        Some(chrono::Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap())
    );
    h.runs.shutdown().await;
}

#[tokio::test]
async fn create_task_normalizes_rrule() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Rrule {
            expr: "FREQ=MONTHLY;BYDAY=MO;BYSETPOS=1;BYHOUR=9;BYMINUTE=0;BYSECOND=0".to_string(),
        }))
        .await
        .unwrap();

    let Schedule::Rrule { expr } = &task.schedule else {
        panic!("expected rrule schedule");
    };
    assert!(expr.contains("DTSTART;TZID=UTC:"), "{expr}");
    assert!(
        expr.contains("RRULE:FREQ=MONTHLY;BYDAY=MO;BYSETPOS=1;BYHOUR=9;BYMINUTE=0;BYSECOND=0"),
        "{expr}"
    );
    h.runs.shutdown().await;
}

#[tokio::test]
async fn due_once_task_fires_exactly_once_and_disables() {
    let h = harness().await;
    // Due one minute ago
    let task = h.tasks.create_task(cli_task(once_at(&h.clock, -60))).await.unwrap();

    h.tasks.tick().await;
    settle().await;
    // Extra ticks must not create further occurrences
    h.tasks.tick().await;
    h.tasks.tick().await;
    settle().await;

    let occurrences = h
        .store
        .list_task_runs_by_statuses(
            &[
                TaskRunStatus::Pending,
                TaskRunStatus::Dispatched,
                TaskRunStatus::Succeeded,
                TaskRunStatus::Failed,
            ],
            100,
        );
    assert_eq!(occurrences.len(), 1);

    let stored = h.tasks.get_task(&task.id).unwrap();
    assert!(!stored.enabled);
    assert_eq!(stored.next_run_at, None);

    // Reconcile resolves the dispatched occurrence once the run finishes
    h.tasks.tick().await;
    settle().await;
    h.tasks.tick().await;
    let occurrence = h.store.get_task_run(&occurrences[0].id).unwrap();
    assert_eq!(occurrence.status, TaskRunStatus::Succeeded);

    h.runs.shutdown().await;
}

#[tokio::test]
async fn dispatch_goes_through_ingest_with_occurrence_key() {
    let h = harness().await;
    let task = h.tasks.create_task(cli_task(once_at(&h.clock, -1))).await.unwrap();

    h.tasks.tick().await;
    settle().await;

    let occurrence = &h
        .store
        .list_task_runs_by_statuses(
            &[TaskRunStatus::Dispatched, TaskRunStatus::Succeeded],
            10,
        )[0];
    let run = h.runs.get_run(occurrence.run_id.as_ref().unwrap()).unwrap();

    assert_eq!(run.source, format!("task:{}", task.id));
    assert_eq!(run.thread_key.as_str(), format!("cli:task:{}", task.id));
    assert_eq!(run.delivery_mode, DeliveryMode::FollowUp);
    assert!(run.input_text.starts_with("[SCHEDULED TASK]\n"));
    assert!(run.input_text.contains(&format!("task_id: {}", task.id)));
    assert!(run.input_text.ends_with("\n\nwrite the report"));
    assert_eq!(run.user_key.as_deref(), Some("user-1"));

    h.runs.shutdown().await;
}

#[tokio::test]
async fn telegram_task_gets_fresh_topic_never_creator() {
    let h = harness_with_bridge(FakeChatBridge::new()).await;
    let task = h
        .tasks
        .create_task(telegram_task(once_at(&h.clock, -1)))
        .await
        .unwrap();

    h.tasks.tick().await;
    settle().await;

    let stored = h.tasks.get_task(&task.id).unwrap();
    let execution = stored.execution_thread_key.unwrap();
    assert!(execution.as_str().starts_with("telegram:chat:101:topic:"));
    // The creator's topic (7) is never reused
    assert_ne!(execution, ThreadKey::new("telegram:chat:101:topic:7"));

    let created_topics = h
        .bridge
        .calls()
        .iter()
        .filter(|call| matches!(call, ChatCall::CreateTaskTopic { .. }))
        .count();
    assert_eq!(created_topics, 1);

    h.runs.shutdown().await;
}

#[tokio::test]
async fn telegram_without_topics_fails_the_occurrence() {
    let h = harness_with_bridge(FakeChatBridge::without_topics()).await;
    h.tasks
        .create_task(telegram_task(once_at(&h.clock, -1)))
        .await
        .unwrap();

    h.tasks.tick().await;
    settle().await;

    let failed = h
        .store
        .list_task_runs_by_statuses(&[TaskRunStatus::Failed], 10);
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].error_message.as_deref(),
        Some("telegram_topics_unavailable")
    );

    h.runs.shutdown().await;
}

#[tokio::test]
async fn execution_thread_is_assigned_once() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "* * * * *".to_string(),
        }))
        .await
        .unwrap();

    // First firing assigns the execution thread
    h.clock.advance(std::time::Duration::from_secs(120));
    h.tasks.tick().await;
    settle().await;
    let first = h.tasks.get_task(&task.id).unwrap().execution_thread_key;
    assert!(first.is_some());

    // Later firings keep it
    h.clock.advance(std::time::Duration::from_secs(120));
    h.tasks.tick().await;
    settle().await;
    let second = h.tasks.get_task(&task.id).unwrap().execution_thread_key;
    assert_eq!(first, second);

    h.runs.shutdown().await;
}

#[tokio::test]
async fn update_disable_clears_next_run() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        }))
        .await
        .unwrap();

    let updated = h
        .tasks
        .update_task(
            &task.id,
            TaskPatch {
                enabled: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!updated.task.enabled);
    assert_eq!(updated.task.next_run_at, None);

    // Re-enable recomputes from the current wall time
    let updated = h
        .tasks
        .update_task(
            &task.id,
            TaskPatch {
                enabled: Some(true),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.task.enabled);
    assert!(updated.task.next_run_at.is_some());

    h.runs.shutdown().await;
}

#[tokio::test]
async fn update_schedule_recomputes_next_run() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        }))
        .await
        .unwrap();

    let updated = h
        .tasks
        .update_task(
            &task.id,
            TaskPatch {
                schedule: Some(Schedule::Cron {
                    expr: "0 18 * * *".to_string(),
                }),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(
        updated.task.next_run_at,
        Some(chrono::Utc.with_ymd_and_hms(2026, 2, 1, 18, 0, 0).unwrap())
    );

    h.runs.shutdown().await;
}

#[tokio::test]
async fn title_only_update_renames_owned_topic_best_effort() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(telegram_task(once_at(&h.clock, -1)))
        .await
        .unwrap();

    // Fire once so the execution topic exists and is task-owned
    h.tasks.tick().await;
    settle().await;

    let updated = h
        .tasks
        .update_task(
            &task.id,
            TaskPatch {
                title: Some("weekly report".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.warning.is_none());
    assert!(h.bridge.calls().iter().any(|call| matches!(
        call,
        ChatCall::SyncTaskTopicTitle { title, .. } if title == "weekly report"
    )));

    // A failing rename is a warning, not an error
    h.bridge
        .push_sync_error(baton_adapters::ChatError::Api("boom".to_string()));
    let updated = h
        .tasks
        .update_task(
            &task.id,
            TaskPatch {
                title: Some("monthly report".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(updated.warning.unwrap().contains("topic rename failed"));

    h.runs.shutdown().await;
}

#[tokio::test]
async fn run_now_creates_and_dispatches_occurrence() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            // Far away; only run_now fires it
            expr: "0 9 1 1 *".to_string(),
        }))
        .await
        .unwrap();

    let (_task, occurrence) = h.tasks.run_now(&task.id).await.unwrap();
    settle().await;

    assert!(matches!(
        occurrence.status,
        TaskRunStatus::Dispatched | TaskRunStatus::Succeeded
    ));
    assert!(occurrence.run_id.is_some());

    // The task's own schedule is untouched by run_now
    let stored = h.tasks.get_task(&task.id).unwrap();
    assert!(stored.enabled);
    assert_eq!(stored.next_run_at, task.next_run_at);

    h.runs.shutdown().await;
}

#[tokio::test]
async fn clear_execution_thread_by_thread_key() {
    let h = harness().await;
    let task = h.tasks.create_task(cli_task(once_at(&h.clock, -1))).await.unwrap();
    h.tasks.tick().await;
    settle().await;

    let stored = h.tasks.get_task(&task.id).unwrap();
    let thread_key = stored.execution_thread_key.clone().unwrap();

    let cleared = h
        .tasks
        .clear_task_execution_thread_by_thread_key(&thread_key)
        .unwrap();
    assert_eq!(cleared, 1);
    assert!(h.tasks.get_task(&task.id).unwrap().execution_thread_key.is_none());

    h.runs.shutdown().await;
}

#[tokio::test]
async fn pending_occurrence_is_resumed_on_next_tick() {
    let h = harness().await;
    let task = h
        .tasks
        .create_task(cli_task(Schedule::Cron {
            expr: "0 9 1 1 *".to_string(),
        }))
        .await
        .unwrap();

    // Simulate a crash after materialization: the occurrence exists in
    // `pending` but was never dispatched.
    let (occurrence, created) = h
        .store
        .create_or_get_task_run(
            baton_core::TaskRunId::new("tr-orphan"),
            &task.id,
            h.clock.now_utc(),
        )
        .unwrap();
    assert!(created);
    assert_eq!(occurrence.status, TaskRunStatus::Pending);

    h.tasks.tick().await;
    settle().await;

    let resumed = h.store.get_task_run(&occurrence.id).unwrap();
    assert!(matches!(
        resumed.status,
        TaskRunStatus::Dispatched | TaskRunStatus::Succeeded
    ));
    assert!(resumed.run_id.is_some());

    h.runs.shutdown().await;
}
