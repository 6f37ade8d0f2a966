//! Progress-reporter behavior over a live run.

use crate::prelude::*;
use baton_adapters::{ChatRoute, FakeChatApi};
use baton_core::{ProgressKind, RunStatus};
use baton_engine::{ProgressReporter, ReporterConfig};
use std::sync::Arc;
use std::time::Duration;

fn route() -> ChatRoute {
    ChatRoute {
        chat_id: 101,
        message_thread_id: None,
    }
}

// A reporter attached to a real run sees replayed progress and finishes
// with the run. The auto-responding session produces no tool or thinking
// events, so the empty-success rule applies: the status message is
// deleted, not edited.
#[tokio::test]
async fn empty_success_deletes_status_message() {
    let w = world().await;
    let chat = FakeChatApi::new();

    let outcome = w.runs.ingest_message(ingest("hello", None)).await.unwrap();
    let handle = ProgressReporter::attach(
        &w.runs,
        &outcome.run.id,
        Arc::new(chat.clone()),
        route(),
        "starting agent…",
        ReporterConfig::default(),
    );

    let run_id = outcome.run.id.clone();
    eventually(Duration::from_secs(5), || {
        w.runs
            .get_run(&run_id)
            .is_some_and(|run| run.status == RunStatus::Succeeded)
    })
    .await;
    handle.wait().await;

    // Whatever was sent got deleted again
    assert!(chat
        .sent_texts()
        .iter()
        .all(|text| text == "starting agent…"));
    let sent = chat.sent_texts().len();
    assert_eq!(chat.deleted().len(), sent);

    w.runs.shutdown().await;
}

// The terminal progress event and the stored error message carry the
// same string, and the reporter's final render ends with it.
#[tokio::test]
async fn failure_message_matches_between_store_and_report() {
    let w = world().await;
    let chat = FakeChatApi::new();
    w.factory.fail_next_open(baton_adapters::SessionError::OpenFailed(
        "agent offline".to_string(),
    ));

    let outcome = w.runs.ingest_message(ingest("hello", None)).await.unwrap();
    let run_id = outcome.run.id.clone();

    // Collect terminal progress concurrently with the reporter
    let failed_event: Arc<std::sync::Mutex<Option<String>>> =
        Arc::new(std::sync::Mutex::new(None));
    let sink = Arc::clone(&failed_event);
    let _sub = w.runs.subscribe_run_progress(
        &run_id,
        Arc::new(move |event| {
            if let ProgressKind::Failed { error_message } = &event.kind {
                if let Ok(mut slot) = sink.lock() {
                    *slot = Some(error_message.clone());
                }
            }
        }),
        true,
    );
    let handle = ProgressReporter::attach(
        &w.runs,
        &run_id,
        Arc::new(chat.clone()),
        route(),
        "starting agent…",
        ReporterConfig::default(),
    );

    eventually(Duration::from_secs(5), || {
        w.runs.get_run(&run_id).is_some_and(|run| run.is_terminal())
    })
    .await;
    handle.wait().await;

    let run = w.runs.get_run(&run_id).unwrap();
    let stored = run.error_message.unwrap();
    assert_eq!(
        failed_event.lock().unwrap().as_deref(),
        Some(stored.as_str())
    );

    let body = chat.message_text(1).unwrap();
    assert!(body.lines().last().unwrap().starts_with("error: "), "{body}");

    w.runs.shutdown().await;
}
