//! Behavioral specifications for the Baton orchestration core.
//!
//! These tests are end-to-end in-process: they wire the store and both
//! services with fake agent/messenger adapters and verify observable
//! behavior. See tests/specs/prelude.rs for the shared harness.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/ingest.rs"]
mod ingest;

#[path = "specs/recovery.rs"]
mod recovery;

#[path = "specs/reporter.rs"]
mod reporter;

#[path = "specs/scheduled_tasks.rs"]
mod scheduled_tasks;
