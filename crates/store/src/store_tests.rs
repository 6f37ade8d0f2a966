// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::{DeliveryMode, IngestImage, Schedule};
use chrono::TimeZone;
use tempfile::TempDir;

#[path = "store_tests/dedup.rs"]
mod dedup;
#[path = "store_tests/images.rs"]
mod images;
#[path = "store_tests/runs.rs"]
mod runs;
#[path = "store_tests/tasks.rs"]
mod tasks;

fn temp_store() -> (TempDir, RunStore) {
    let dir = TempDir::new().unwrap();
    let store = RunStore::open(StoreConfig::in_dir(dir.path())).unwrap();
    (dir, store)
}

fn ingest(text: &str, idempotency_key: Option<&str>) -> RunIngest {
    RunIngest {
        source: "cli".to_string(),
        thread_key: ThreadKey::new("cli:default"),
        user_key: None,
        text: text.to_string(),
        delivery_mode: DeliveryMode::FollowUp,
        idempotency_key: idempotency_key.map(String::from),
        images: Vec::new(),
    }
}

fn output(text: &str) -> RunOutput {
    RunOutput {
        text: text.to_string(),
        provider: Some("anthropic".to_string()),
        model: Some("opus".to_string()),
        delivery_mode: DeliveryMode::FollowUp,
    }
}

fn cron_task(id: &str) -> ScheduledTask {
    ScheduledTask {
        id: TaskId::new(id),
        title: "daily report".to_string(),
        instructions: "write the report".to_string(),
        enabled: true,
        schedule: Schedule::Cron {
            expr: "0 9 * * *".to_string(),
        },
        timezone: "UTC".to_string(),
        creator_thread_key: ThreadKey::new("cli:default"),
        owner_user_key: None,
        delivery: DeliveryTarget {
            provider: "cli".to_string(),
            route: serde_json::Value::Null,
        },
        execution_thread_key: None,
        next_run_at: Some(Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()),
        created_at_ms: 1_000,
        updated_at_ms: 1_000,
    }
}
