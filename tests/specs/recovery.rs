//! Crash recovery behavior.

use crate::prelude::*;
use baton_core::{RunId, RunStatus};
use baton_store::{RunStore, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

// A run accepted before a crash (still `running` in the store) is
// re-enqueued by the recovery pass and driven to its terminal state.
#[tokio::test]
async fn running_runs_survive_restart_and_complete() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig::in_dir(dir.path());

    let orphan = {
        let store = RunStore::open(config.clone()).unwrap();
        store
            .create_run(RunId::new("orphan-1"), &ingest("finish me", None))
            .unwrap()
            .run
    };

    // "Restart": fresh store handle over the same files, fresh services
    let store = RunStore::open(config).unwrap();
    let factory = baton_adapters::FakeSessionFactory::auto_responding();
    let runs = baton_engine::RunService::new(
        store.clone(),
        Arc::new(factory),
        baton_core::SystemClock,
    );
    runs.init().await;

    let done = eventually(Duration::from_secs(5), || {
        runs.get_run(&orphan.id)
            .is_some_and(|run| run.status == RunStatus::Succeeded)
    })
    .await;
    assert!(done, "recovered run should complete");

    runs.shutdown().await;
}

// The store's state (runs, dedup records, sessions) survives a
// checkpointed restart.
#[tokio::test]
async fn dedup_records_survive_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig::in_dir(dir.path());

    {
        let store = RunStore::open(config.clone()).unwrap();
        store
            .create_run(RunId::new("run-1"), &ingest("hello", Some("k1")))
            .unwrap();
        store.checkpoint().unwrap();
    }

    let store = RunStore::open(config).unwrap();
    let again = store
        .create_run(RunId::new("run-2"), &ingest("hello", Some("k1")))
        .unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.run.id, "run-1");
}
