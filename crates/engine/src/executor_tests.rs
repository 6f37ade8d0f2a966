// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_adapters::FakeSessionFactory;
use baton_core::FakeClock;
use baton_store::{RunStore, StoreConfig};
use tempfile::TempDir;

fn temp_store() -> (TempDir, RunStore) {
    let dir = TempDir::new().unwrap();
    let store = RunStore::open(StoreConfig::in_dir(dir.path())).unwrap();
    (dir, store)
}

fn executor(
    store: &RunStore,
    factory: &FakeSessionFactory,
) -> RunExecutor<FakeClock> {
    RunExecutor::new(
        store.clone(),
        Arc::new(factory.clone()),
        ProgressBus::new(),
        FakeClock::at_epoch_ms(1_000),
    )
}

fn run(id: &str) -> Run {
    Run::builder()
        .id(id)
        .thread_key("cli:default")
        .input_text("hello")
        .build()
}

#[tokio::test]
async fn execute_resolves_with_session_output() {
    let (_dir, store) = temp_store();
    let factory = FakeSessionFactory::auto_responding();
    let executor = executor(&store, &factory);

    let output = executor.execute(&run("run-1")).await.unwrap();
    assert_eq!(output.text, "ok: hello");
}

#[tokio::test]
async fn first_execute_persists_session_pointer() {
    let (_dir, store) = temp_store();
    let factory = FakeSessionFactory::auto_responding();
    let executor = executor(&store, &factory);

    let key = ThreadKey::new("cli:default");
    assert!(store.get_thread_session(&key).is_none());

    executor.execute(&run("run-1")).await.unwrap();

    let session = store.get_thread_session(&key).unwrap();
    assert_eq!(session.session_id, "fake-sess-1");
    assert!(session.session_file_path.ends_with("fake-sess-1.jsonl"));
}

#[tokio::test]
async fn session_is_retained_across_runs() {
    let (_dir, store) = temp_store();
    let factory = FakeSessionFactory::auto_responding();
    let executor = executor(&store, &factory);

    executor.execute(&run("run-1")).await.unwrap();
    executor.execute(&run("run-2")).await.unwrap();

    // Only one session was ever opened for the thread
    assert_eq!(factory.opened().len(), 1);
}

#[tokio::test]
async fn reset_recreates_session_on_next_run() {
    let (_dir, store) = temp_store();
    let factory = FakeSessionFactory::auto_responding();
    let executor = executor(&store, &factory);
    let key = ThreadKey::new("cli:default");

    executor.execute(&run("run-1")).await.unwrap();
    assert!(executor.reset_thread_session(&key).await.unwrap());
    assert!(store.get_thread_session(&key).is_none());

    executor.execute(&run("run-2")).await.unwrap();
    assert_eq!(factory.opened().len(), 2);
    assert_eq!(
        store.get_thread_session(&key).unwrap().session_id,
        "fake-sess-2"
    );
}

#[tokio::test]
async fn existing_pointer_is_passed_to_factory() {
    let (_dir, store) = temp_store();
    let key = ThreadKey::new("cli:default");
    store
        .upsert_thread_session(ThreadSession {
            thread_key: key.clone(),
            session_id: "old-sess".to_string(),
            session_file_path: "/tmp/old.jsonl".to_string(),
            created_at_ms: 1,
            updated_at_ms: 1,
        })
        .unwrap();

    let factory = FakeSessionFactory::auto_responding();
    let executor = executor(&store, &factory);
    executor.execute(&run("run-1")).await.unwrap();

    let opened = factory.opened();
    assert_eq!(opened.len(), 1);
    assert_eq!(
        opened[0].1.as_ref().map(|s| s.session_id.as_str()),
        Some("old-sess")
    );
    // The factory produced a fresh session; the pointer is updated
    assert_eq!(
        store.get_thread_session(&key).unwrap().session_id,
        "fake-sess-1"
    );
}

#[tokio::test]
async fn open_failure_surfaces_as_upstream_error() {
    let (_dir, store) = temp_store();
    let factory = FakeSessionFactory::auto_responding();
    factory.fail_next_open(baton_adapters::SessionError::OpenFailed(
        "no workspace".to_string(),
    ));
    let executor = executor(&store, &factory);

    let err = executor.execute(&run("run-1")).await.unwrap_err();
    assert!(matches!(err, EngineError::Upstream { .. }));
}
