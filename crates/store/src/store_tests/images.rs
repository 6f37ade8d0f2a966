// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::InputImage;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn pending_image(id: &str, expires_at_ms: u64) -> InputImage {
    InputImage {
        id: id.to_string(),
        run_id: None,
        source: "cli".to_string(),
        thread_key: ThreadKey::new("cli:default"),
        bytes: vec![0xAB],
        mime_type: "image/png".to_string(),
        filename: format!("{id}.png"),
        position: 0,
        created_at_ms: 0,
        expires_at_ms,
    }
}

#[test]
fn ingest_images_are_bound_to_the_run() {
    let (_dir, store) = temp_store();

    let mut req = ingest("look at this", None);
    req.images.push(IngestImage {
        bytes: vec![1, 2],
        mime_type: "image/png".to_string(),
        filename: "shot.png".to_string(),
    });
    store.create_run(RunId::new("run-1"), &req).unwrap();

    let images = store.list_run_input_images(&RunId::new("run-1"));
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].filename, "shot.png");
    assert_eq!(images[0].position, 0);
    assert_eq!(images[0].run_id, Some(RunId::new("run-1")));
}

#[test]
fn pending_images_are_claimed_by_next_ingest() {
    let (_dir, store) = temp_store();
    store
        .buffer_input_image(pending_image("pending-1", now_ms() + 60_000))
        .unwrap();

    store
        .create_run(RunId::new("run-1"), &ingest("here it is", None))
        .unwrap();

    let images = store.list_run_input_images(&RunId::new("run-1"));
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].filename, "pending-1.png");

    // The pending buffer is drained; a second run claims nothing
    store
        .create_run(RunId::new("run-2"), &ingest("again", None))
        .unwrap();
    assert!(store.list_run_input_images(&RunId::new("run-2")).is_empty());
}

#[test]
fn expired_pending_images_are_purged_on_ingest() {
    let (_dir, store) = temp_store();
    store.buffer_input_image(pending_image("stale", 1)).unwrap();

    store
        .create_run(RunId::new("run-1"), &ingest("hello", None))
        .unwrap();

    // The stale image is neither claimed nor still buffered
    assert!(store.list_run_input_images(&RunId::new("run-1")).is_empty());
    assert_eq!(store.purge_expired_input_images(now_ms()).unwrap(), 0);
}

#[test]
fn purge_covers_run_bound_images() {
    let (_dir, store) = temp_store();
    let mut req = ingest("look", None);
    req.images.push(IngestImage {
        bytes: vec![1],
        mime_type: "image/png".to_string(),
        filename: "shot.png".to_string(),
    });
    store.create_run(RunId::new("run-1"), &req).unwrap();

    // Not yet expired
    assert_eq!(store.purge_expired_input_images(now_ms()).unwrap(), 0);

    // Far future: TTL elapsed
    let future = now_ms() + baton_core::INPUT_IMAGE_TTL_MS + 1;
    assert_eq!(store.purge_expired_input_images(future).unwrap(), 1);
    assert!(store.list_run_input_images(&RunId::new("run-1")).is_empty());
}

#[test]
fn delete_run_input_images_removes_only_that_run() {
    let (_dir, store) = temp_store();
    for (run_id, name) in [("run-1", "a"), ("run-2", "b")] {
        let mut req = ingest(name, None);
        req.images.push(IngestImage {
            bytes: vec![1],
            mime_type: "image/png".to_string(),
            filename: format!("{name}.png"),
        });
        store.create_run(RunId::new(run_id), &req).unwrap();
    }

    store.delete_run_input_images(&RunId::new("run-1")).unwrap();
    assert!(store.list_run_input_images(&RunId::new("run-1")).is_empty());
    assert_eq!(store.list_run_input_images(&RunId::new("run-2")).len(), 1);
}

#[test]
fn buffered_image_with_run_id_is_rejected() {
    let (_dir, store) = temp_store();
    let mut image = pending_image("bad", now_ms() + 1_000);
    image.run_id = Some(RunId::new("run-1"));
    let err = store.buffer_input_image(image).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));
}
