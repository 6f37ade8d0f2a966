// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! batond: the Baton orchestration daemon.
//!
//! Runs the store, the run service, and the scheduled-task scheduler.
//! The agent-runtime and messenger adapters are wired here; this binary
//! ships with the no-op stand-ins, real deployments embed the library
//! and supply their own.

use std::process::ExitCode;
use std::sync::Arc;

use baton_adapters::{NoopChatBridge, NoopSessionFactory};
use baton_daemon::{startup, Config};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("batond: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = std::fs::create_dir_all(&config.log_dir) {
        eprintln!("batond: cannot create log dir: {e}");
        return ExitCode::FAILURE;
    }
    let file_appender = tracing_appender::rolling::daily(&config.log_dir, "batond.log");
    let (writer, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();

    let daemon = match startup(
        config,
        Arc::new(NoopSessionFactory::new()),
        Arc::new(NoopChatBridge),
    )
    .await
    {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "startup failed");
            eprintln!("batond: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("batond ready");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "signal wait failed");
    }

    info!("batond shutting down");
    match daemon.shutdown().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "shutdown failed");
            ExitCode::FAILURE
        }
    }
}
