// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::Run;
use std::io::Write as _;
use tempfile::TempDir;

fn state_with_run(id: &str) -> StoreState {
    let mut state = StoreState::default();
    state.apply(&crate::mutation::Mutation::RunCreated {
        run: Run::builder().id(id).build(),
        ingest: None,
        images: Vec::new(),
        claimed_pending: Vec::new(),
    });
    state
}

#[test]
fn save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.zst");

    let snapshot = StoreSnapshot::new(7, state_with_run("run-1"));
    snapshot.save(&path).unwrap();

    let loaded = StoreSnapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 7);
    assert_eq!(loaded.version, CURRENT_SNAPSHOT_VERSION);
    assert!(loaded.state.runs.contains_key("run-1"));
}

#[test]
fn load_missing_returns_none() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.zst");
    assert!(StoreSnapshot::load(&path).unwrap().is_none());
}

#[test]
fn corrupt_snapshot_rotates_to_bak() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.zst");

    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"not a zstd stream").unwrap();
    }

    assert!(StoreSnapshot::load(&path).unwrap().is_none());
    assert!(!path.exists());
    assert!(path.with_extension("bak").exists());
}

#[test]
fn save_overwrites_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.zst");

    StoreSnapshot::new(1, state_with_run("run-1"))
        .save(&path)
        .unwrap();
    StoreSnapshot::new(2, state_with_run("run-2"))
        .save(&path)
        .unwrap();

    let loaded = StoreSnapshot::load(&path).unwrap().unwrap();
    assert_eq!(loaded.seq, 2);
    assert!(loaded.state.runs.contains_key("run-2"));
}

#[test]
fn bak_rotation_keeps_bounded_backups() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("snapshot.zst");

    for _ in 0..5 {
        {
            let mut file = std::fs::File::create(&path).unwrap();
            file.write_all(b"garbage").unwrap();
        }
        assert!(StoreSnapshot::load(&path).unwrap().is_none());
    }

    assert!(path.with_extension("bak").exists());
    assert!(path.with_extension("bak.2").exists());
    assert!(path.with_extension("bak.3").exists());
    assert!(!path.with_extension("bak.4").exists());
}
