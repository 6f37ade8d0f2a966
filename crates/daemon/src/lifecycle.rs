// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use baton_adapters::{AgentSessionFactory, ChatBridge};
use baton_core::SystemClock;
use baton_engine::{RunService, ScheduledTaskService, TaskServiceConfig};
use baton_store::{RunStore, StoreConfig, StoreError};
use fs2::FileExt;
use thiserror::Error;
use tracing::info;

/// Errors during daemon startup and shutdown.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no state directory available for this user")]
    NoStateDir,
    #[error("another daemon already holds {0}")]
    AlreadyRunning(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Root state directory (e.g. ~/.local/state/baton)
    pub state_dir: PathBuf,
    /// Path to lock/PID file
    pub lock_path: PathBuf,
    /// Path to daemon log directory
    pub log_dir: PathBuf,
    /// Path to WAL file
    pub wal_path: PathBuf,
    /// Path to snapshot file
    pub snapshot_path: PathBuf,
    /// Global run concurrency cap, if any
    pub run_concurrency: Option<usize>,
}

impl Config {
    /// Load configuration for the user-level daemon.
    ///
    /// Uses fixed paths under `~/.local/state/baton/` (or
    /// `$XDG_STATE_HOME/baton/`). One daemon serves a user.
    pub fn load() -> Result<Self, LifecycleError> {
        let state_dir = dirs::state_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".local/state")))
            .ok_or(LifecycleError::NoStateDir)?
            .join("baton");
        Ok(Self::in_dir(state_dir))
    }

    /// Fixed layout under an explicit state directory (tests).
    pub fn in_dir(state_dir: PathBuf) -> Self {
        let store = StoreConfig::in_dir(&state_dir);
        Self {
            lock_path: state_dir.join("daemon.pid"),
            log_dir: state_dir.join("logs"),
            wal_path: store.wal_path,
            snapshot_path: store.snapshot_path,
            run_concurrency: None,
            state_dir,
        }
    }
}

/// A started daemon: the store plus both services.
pub struct Daemon {
    pub config: Config,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub store: RunStore,
    pub runs: RunService<SystemClock>,
    pub tasks: ScheduledTaskService<SystemClock>,
}

/// Start the daemon: lock the state directory, open the store (snapshot +
/// WAL replay), start the run service (recovery pass + timer) and the
/// scheduled-task tick loop.
pub async fn startup(
    config: Config,
    factory: Arc<dyn AgentSessionFactory>,
    bridge: Arc<dyn ChatBridge>,
) -> Result<Daemon, LifecycleError> {
    std::fs::create_dir_all(&config.state_dir)?;

    let mut lock_file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&config.lock_path)?;
    if lock_file.try_lock_exclusive().is_err() {
        return Err(LifecycleError::AlreadyRunning(config.lock_path.clone()));
    }
    writeln!(lock_file, "{}", std::process::id())?;

    let store = RunStore::open(StoreConfig {
        wal_path: config.wal_path.clone(),
        snapshot_path: config.snapshot_path.clone(),
    })?;

    let runs = RunService::with_concurrency_limit(
        store.clone(),
        factory,
        SystemClock,
        config.run_concurrency,
    );
    runs.init().await;

    let tasks = ScheduledTaskService::new(
        store.clone(),
        runs.clone(),
        bridge,
        SystemClock,
        TaskServiceConfig::default(),
    );
    tasks.start();

    info!(state_dir = %config.state_dir.display(), "daemon started");

    Ok(Daemon {
        config,
        lock_file,
        store,
        runs,
        tasks,
    })
}

impl Daemon {
    /// Graceful shutdown: stop the tick loop, drain in-flight runs, and
    /// checkpoint the store.
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        self.tasks.stop().await;
        self.runs.shutdown().await;
        self.store.close()?;
        info!("daemon stopped");
        Ok(())
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
