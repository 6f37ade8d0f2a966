//! Ingest and dedup behavior.

use crate::prelude::*;
use baton_core::RunStatus;
use std::time::Duration;

// S1: the same (source, idempotency_key, payload) ingested twice returns
// the same run, the second time flagged as deduplicated.
#[tokio::test]
async fn same_key_and_payload_dedupes_to_one_run() {
    let w = world().await;

    let first = w
        .runs
        .ingest_message(ingest("hello", Some("k1")))
        .await
        .unwrap();
    let second = w
        .runs
        .ingest_message(ingest("hello", Some("k1")))
        .await
        .unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.run.id, second.run.id);

    w.runs.shutdown().await;
}

#[tokio::test]
async fn key_reuse_with_different_payload_is_rejected() {
    let w = world().await;

    w.runs
        .ingest_message(ingest("hello", Some("k1")))
        .await
        .unwrap();
    let err = w
        .runs
        .ingest_message(ingest("tampered", Some("k1")))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "idempotency_payload_mismatch");

    w.runs.shutdown().await;
}

#[tokio::test]
async fn ingested_message_runs_to_success() {
    let w = world().await;

    let outcome = w.runs.ingest_message(ingest("hello", None)).await.unwrap();
    let run_id = outcome.run.id.clone();

    let done = eventually(Duration::from_secs(5), || {
        w.runs
            .get_run(&run_id)
            .is_some_and(|run| run.status == RunStatus::Succeeded)
    })
    .await;
    assert!(done, "run should succeed");

    let run = w.runs.get_run(&run_id).unwrap();
    assert_eq!(run.output.unwrap().text, "ok: hello");

    w.runs.shutdown().await;
}

#[tokio::test]
async fn terminal_runs_reject_further_transitions() {
    let w = world().await;

    let outcome = w.runs.ingest_message(ingest("hello", None)).await.unwrap();
    let run_id = outcome.run.id.clone();
    eventually(Duration::from_secs(5), || {
        w.runs.get_run(&run_id).is_some_and(|run| run.is_terminal())
    })
    .await;

    let err = w.store.mark_failed(&run_id, "late failure").unwrap_err();
    assert!(err.to_string().contains("already succeeded"), "{err}");

    w.runs.shutdown().await;
}
