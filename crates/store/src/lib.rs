// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! baton-store: durable run/task state.
//!
//! Every store transaction is a single [`Mutation`] appended to a JSONL
//! write-ahead log and applied to the in-memory [`StoreState`]. Recovery
//! loads the latest snapshot and replays the WAL tail. Applying a
//! mutation is idempotent, so a replay that re-applies an already
//! snapshotted entry is harmless.

mod error;
mod mutation;
mod snapshot;
mod state;
mod store;
mod wal;

pub use error::StoreError;
pub use mutation::Mutation;
pub use snapshot::{StoreSnapshot, CURRENT_SNAPSHOT_VERSION};
pub use state::{IngestRecord, StoreState};
pub use store::{CreatedRun, RunStore, StoreConfig, TaskFilter};
pub use wal::{Wal, WalEntry};
