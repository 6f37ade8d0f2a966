// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn same_key_same_payload_returns_existing_run() {
    let (_dir, store) = temp_store();

    let first = store
        .create_run(RunId::new("run-1"), &ingest("hello", Some("k1")))
        .unwrap();
    let second = store
        .create_run(RunId::new("run-2"), &ingest("hello", Some("k1")))
        .unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(second.run.id, "run-1");
    assert!(store.get_run(&RunId::new("run-2")).is_none());
}

#[test]
fn same_key_different_payload_is_a_conflict() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", Some("k1")))
        .unwrap();

    let err = store
        .create_run(RunId::new("run-2"), &ingest("different text", Some("k1")))
        .unwrap_err();
    assert!(matches!(err, StoreError::Conflict(_)));
    assert_eq!(err.to_string(), "idempotency_payload_mismatch");
}

#[test]
fn keys_are_scoped_per_source() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", Some("k1")))
        .unwrap();

    let mut other_source = ingest("hello", Some("k1"));
    other_source.source = "telegram".to_string();
    let created = store
        .create_run(RunId::new("run-2"), &other_source)
        .unwrap();

    assert!(!created.deduplicated);
    assert_eq!(created.run.id, "run-2");
}

#[test]
fn no_key_never_deduplicates() {
    let (_dir, store) = temp_store();
    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();
    let second = store
        .create_run(RunId::new("run-2"), &ingest("hello", None))
        .unwrap();
    assert!(!second.deduplicated);
    assert_eq!(second.run.id, "run-2");
}

#[test]
fn dedup_payload_covers_images() {
    let (_dir, store) = temp_store();

    let mut with_image = ingest("hello", Some("k1"));
    with_image.images.push(IngestImage {
        bytes: vec![1, 2, 3],
        mime_type: "image/png".to_string(),
        filename: "a.png".to_string(),
    });
    store.create_run(RunId::new("run-1"), &with_image).unwrap();

    // Same key, same text, different image bytes: payload mismatch
    let mut tampered = with_image.clone();
    tampered.images[0].bytes = vec![9, 9, 9];
    let err = store.create_run(RunId::new("run-2"), &tampered).unwrap_err();
    assert_eq!(err.to_string(), "idempotency_payload_mismatch");

    // Identical replays dedup cleanly
    let replay = store.create_run(RunId::new("run-3"), &with_image).unwrap();
    assert!(replay.deduplicated);
    assert_eq!(replay.run.id, "run-1");
}
