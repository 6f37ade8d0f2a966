//! Shared harness for behavioral specs.

use baton_adapters::{FakeChatBridge, FakeSessionFactory};
use baton_core::{DeliveryMode, RunIngest, SystemClock, ThreadKey};
use baton_engine::{RunService, ScheduledTaskService, TaskServiceConfig};
use baton_store::{RunStore, StoreConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct World {
    pub _dir: TempDir,
    pub store: RunStore,
    pub runs: RunService<SystemClock>,
    pub tasks: ScheduledTaskService<SystemClock>,
    pub factory: FakeSessionFactory,
    pub bridge: FakeChatBridge,
}

/// Wire the full stack over a temp store, with auto-responding fake
/// sessions and a fake messenger bridge. The task tick runs fast.
pub async fn world() -> World {
    world_with_tick(Duration::from_millis(20)).await
}

pub async fn world_with_tick(tick_interval: Duration) -> World {
    let dir = TempDir::new().unwrap();
    let store = RunStore::open(StoreConfig::in_dir(dir.path())).unwrap();
    let factory = FakeSessionFactory::auto_responding();
    let bridge = FakeChatBridge::new();

    let runs = RunService::new(store.clone(), Arc::new(factory.clone()), SystemClock);
    runs.init().await;

    let tasks = ScheduledTaskService::new(
        store.clone(),
        runs.clone(),
        Arc::new(bridge.clone()),
        SystemClock,
        TaskServiceConfig {
            tick_interval,
            ..Default::default()
        },
    );

    World {
        _dir: dir,
        store,
        runs,
        tasks,
        factory,
        bridge,
    }
}

pub fn ingest(text: &str, idempotency_key: Option<&str>) -> RunIngest {
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

/// Poll until the closure returns true or the timeout elapses.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
