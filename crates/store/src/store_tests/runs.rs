// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn create_run_starts_running() {
    let (_dir, store) = temp_store();
    let created = store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();

    assert!(!created.deduplicated);
    assert_eq!(created.run.status, RunStatus::Running);
    assert_eq!(created.run.input_text, "hello");
    assert_eq!(store.get_run(&RunId::new("run-1")).unwrap().id, "run-1");
}

#[test]
fn mark_succeeded_sets_output() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();

    let run = store
        .mark_succeeded(&RunId::new("run-1"), output("all done"))
        .unwrap();
    assert_eq!(run.status, RunStatus::Succeeded);
    assert_eq!(run.output.unwrap().text, "all done");
    assert!(run.error_message.is_none());
}

#[test]
fn mark_failed_sets_error() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();

    let run = store.mark_failed(&RunId::new("run-1"), "boom").unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error_message.as_deref(), Some("boom"));
    assert!(run.output.is_none());
}

#[test]
fn mark_failed_after_succeeded_reveals_status() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();
    store
        .mark_succeeded(&RunId::new("run-1"), output("done"))
        .unwrap();

    let err = store.mark_failed(&RunId::new("run-1"), "late").unwrap_err();
    assert!(err.to_string().contains("already succeeded"), "{err}");
    assert!(err.is_already_terminal());
}

#[test]
fn mark_succeeded_after_failed_reveals_status() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();
    store.mark_failed(&RunId::new("run-1"), "boom").unwrap();

    let err = store
        .mark_succeeded(&RunId::new("run-1"), output("late"))
        .unwrap_err();
    assert!(err.to_string().contains("already failed"), "{err}");
}

#[yare::parameterized(
    succeeded = { true, "already succeeded" },
    failed    = { false, "already failed" },
)]
fn second_terminal_transition_names_current_status(succeed_first: bool, expected: &str) {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();
    if succeed_first {
        store
            .mark_succeeded(&RunId::new("run-1"), output("done"))
            .unwrap();
    } else {
        store.mark_failed(&RunId::new("run-1"), "boom").unwrap();
    }

    let err = store.mark_failed(&RunId::new("run-1"), "late").unwrap_err();
    assert!(err.to_string().contains(expected), "{err}");
}

#[test]
fn mark_terminal_on_missing_run_is_not_found() {
    let (_dir, store) = temp_store();
    let err = store.mark_failed(&RunId::new("ghost"), "boom").unwrap_err();
    assert!(err.to_string().contains("not found"), "{err}");
    assert!(!err.is_already_terminal());
}

#[test]
fn list_running_runs_excludes_terminal() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("a", None))
        .unwrap();
    store
        .create_run(RunId::new("run-2"), &ingest("b", None))
        .unwrap();
    store
        .mark_succeeded(&RunId::new("run-1"), output("done"))
        .unwrap();

    let running = store.list_running_runs(10);
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, "run-2");
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::in_dir(dir.path());

    {
        let store = RunStore::open(config.clone()).unwrap();
        store
            .create_run(RunId::new("run-1"), &ingest("hello", Some("k1")))
            .unwrap();
        store
            .create_run(RunId::new("run-2"), &ingest("bye", None))
            .unwrap();
        store
            .mark_failed(&RunId::new("run-2"), "crashed early")
            .unwrap();
    }

    let store = RunStore::open(config).unwrap();
    assert_eq!(store.get_run(&RunId::new("run-1")).unwrap().status, RunStatus::Running);
    assert_eq!(store.get_run(&RunId::new("run-2")).unwrap().status, RunStatus::Failed);

    // Dedup records survive too
    let again = store
        .create_run(RunId::new("run-3"), &ingest("hello", Some("k1")))
        .unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.run.id, "run-1");
}

#[test]
fn checkpoint_then_reopen_recovers_from_snapshot() {
    let dir = TempDir::new().unwrap();
    let config = StoreConfig::in_dir(dir.path());

    {
        let store = RunStore::open(config.clone()).unwrap();
        store
            .create_run(RunId::new("run-1"), &ingest("hello", None))
            .unwrap();
        store.checkpoint().unwrap();
        // Post-checkpoint mutation lands in the fresh WAL
        store
            .create_run(RunId::new("run-2"), &ingest("bye", None))
            .unwrap();
    }

    let store = RunStore::open(config).unwrap();
    assert!(store.get_run(&RunId::new("run-1")).is_some());
    assert!(store.get_run(&RunId::new("run-2")).is_some());
}

#[test]
fn thread_session_round_trip() {
    let (_dir, store) = temp_store();
    let key = ThreadKey::new("cli:default");
    assert!(store.get_thread_session(&key).is_none());

    store
        .upsert_thread_session(ThreadSession {
            thread_key: key.clone(),
            session_id: "sess-1".to_string(),
            session_file_path: "/tmp/sess-1.jsonl".to_string(),
            created_at_ms: 1,
            updated_at_ms: 1,
        })
        .unwrap();
    assert_eq!(store.get_thread_session(&key).unwrap().session_id, "sess-1");

    assert!(store.delete_thread_session(&key).unwrap());
    assert!(store.get_thread_session(&key).is_none());
    assert!(!store.delete_thread_session(&key).unwrap());
}
