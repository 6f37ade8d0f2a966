// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistent thread → agent-session link.

use crate::ThreadKey;
use serde::{Deserialize, Serialize};

/// The durable pointer from a thread to its long-lived agent session.
///
/// One per thread. Destroyed by "reset session"; recreated lazily on the
/// next ingest for the thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSession {
    pub thread_key: ThreadKey,
    pub session_id: String,
    /// Transcript file backing the session, for resume after restart
    pub session_file_path: String,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}
