// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::Run;
use std::io::Write as _;
use tempfile::TempDir;

fn mutation(id: &str) -> Mutation {
    Mutation::RunCreated {
        run: Run::builder().id(id).build(),
        ingest: None,
        images: Vec::new(),
        claimed_pending: Vec::new(),
    }
}

#[test]
fn commit_and_replay_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    {
        let (mut wal, replay) = Wal::open(&path, 0).unwrap();
        assert!(replay.is_empty());
        wal.commit(&[mutation("run-1")]).unwrap();
        wal.commit(&[mutation("run-2"), mutation("run-3")]).unwrap();
        assert_eq!(wal.seq(), 3);
    }

    let (wal, replay) = Wal::open(&path, 0).unwrap();
    assert_eq!(wal.seq(), 3);
    assert_eq!(replay.len(), 3);
    assert_eq!(replay[0].seq, 1);
    assert_eq!(replay[2].seq, 3);
}

#[test]
fn replay_skips_snapshotted_prefix() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    {
        let (mut wal, _) = Wal::open(&path, 0).unwrap();
        wal.commit(&[mutation("run-1"), mutation("run-2"), mutation("run-3")])
            .unwrap();
    }

    let (wal, replay) = Wal::open(&path, 2).unwrap();
    assert_eq!(wal.seq(), 3);
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].seq, 3);
}

#[test]
fn seq_continues_after_snapshot_even_when_empty() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    // Simulates reopening after checkpoint truncation: WAL is empty but
    // the snapshot seq must carry forward so new entries sort after it.
    let (mut wal, replay) = Wal::open(&path, 42).unwrap();
    assert!(replay.is_empty());
    assert_eq!(wal.seq(), 42);
    assert_eq!(wal.commit(&[mutation("run-1")]).unwrap(), 43);
}

#[test]
fn corrupt_tail_rotates_to_bak_keeping_prefix() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    {
        let (mut wal, _) = Wal::open(&path, 0).unwrap();
        wal.commit(&[mutation("run-1"), mutation("run-2")]).unwrap();
    }

    // Append a torn line (simulated crash mid-write)
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap();
        file.write_all(b"{\"seq\":3,\"mutation\":{\"op\":\"run_cr").unwrap();
    }

    let (wal, replay) = Wal::open(&path, 0).unwrap();
    assert_eq!(replay.len(), 2);
    assert_eq!(wal.seq(), 2);
    assert!(path.with_extension("bak").exists());

    // The rewritten WAL must be clean on the next open
    drop(wal);
    let (_, replay) = Wal::open(&path, 0).unwrap();
    assert_eq!(replay.len(), 2);
}

#[test]
fn truncate_drops_entries_and_keeps_counting() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.wal");

    let (mut wal, _) = Wal::open(&path, 0).unwrap();
    wal.commit(&[mutation("run-1"), mutation("run-2")]).unwrap();
    wal.truncate().unwrap();
    assert_eq!(wal.seq(), 2);

    wal.commit(&[mutation("run-3")]).unwrap();
    drop(wal);

    let (_, replay) = Wal::open(&path, 2).unwrap();
    assert_eq!(replay.len(), 1);
    assert_eq!(replay[0].seq, 3);
}
