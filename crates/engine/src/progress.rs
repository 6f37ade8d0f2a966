// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-run progress event bus.
//!
//! Single writer (the run service and controllers), many readers. Each
//! run gets a bounded ring buffer; a subscription with replay receives
//! the buffered prefix then live events, exactly once and in publication
//! order: registration and publication share one lock, so there is no
//! gap and no duplicate at the seam. Listeners run synchronously under
//! that lock and must not call back into the bus.
//!
//! Terminal events start a retention timer after which the run's buffer
//! and listener set are dropped.

use baton_core::{ProgressEvent, RunId};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Ring buffer bound per run.
const RING_CAPACITY: usize = 256;

/// How long terminal runs keep their buffer for late subscribers.
const TERMINAL_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Listener receiving progress events in publication order.
pub type ProgressListener = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Subscription guard. Unsubscribes on `unsubscribe()` or on drop.
pub struct ProgressSubscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl ProgressSubscription {
    fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for ProgressSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

struct RunChannel {
    buffer: VecDeque<ProgressEvent>,
    listeners: HashMap<u64, ProgressListener>,
    terminal: bool,
}

impl RunChannel {
    fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            listeners: HashMap::new(),
            terminal: false,
        }
    }
}

struct BusState {
    channels: HashMap<String, RunChannel>,
    next_listener_id: u64,
}

/// Per-run ordered progress stream with bounded ring buffer and terminal
/// retention.
#[derive(Clone)]
pub struct ProgressBus {
    inner: Arc<Mutex<BusState>>,
    terminal_retention: Duration,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusState {
                channels: HashMap::new(),
                next_listener_id: 0,
            })),
            terminal_retention: TERMINAL_RETENTION,
        }
    }

    /// Override the terminal retention window (tests).
    pub fn with_terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    /// Publish an event: append to the run's ring buffer and deliver to
    /// every listener, in order.
    pub fn publish(&self, event: ProgressEvent) {
        let terminal = event.is_terminal();
        let run_id = event.run_id.clone();
        {
            let mut state = self.inner.lock();
            let channel = state
                .channels
                .entry(run_id.as_str().to_string())
                .or_insert_with(RunChannel::new);

            channel.buffer.push_back(event.clone());
            while channel.buffer.len() > RING_CAPACITY {
                channel.buffer.pop_front();
            }
            if terminal {
                channel.terminal = true;
            }

            let mut listeners: Vec<(u64, ProgressListener)> = channel
                .listeners
                .iter()
                .map(|(id, l)| (*id, Arc::clone(l)))
                .collect();
            listeners.sort_by_key(|(id, _)| *id);
            for (_, listener) in listeners {
                listener(&event);
            }
        }

        if terminal {
            self.schedule_cleanup(run_id);
        }
    }

    /// Drop the run's buffer and listeners after the retention window.
    fn schedule_cleanup(&self, run_id: RunId) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // No runtime (sync tests): skip timed cleanup
            return;
        };
        let inner = Arc::clone(&self.inner);
        let retention = self.terminal_retention;
        handle.spawn(async move {
            tokio::time::sleep(retention).await;
            let removed = inner.lock().channels.remove(run_id.as_str());
            if removed.is_some() {
                debug!(run = %run_id, "progress channel retired");
            }
        });
    }

    /// Subscribe to a run's progress stream.
    ///
    /// With `replay`, the listener first receives the buffered prefix.
    pub fn subscribe(
        &self,
        run_id: &RunId,
        listener: ProgressListener,
        replay: bool,
    ) -> ProgressSubscription {
        let id = {
            let mut state = self.inner.lock();
            state.next_listener_id += 1;
            let id = state.next_listener_id;
            let channel = state
                .channels
                .entry(run_id.as_str().to_string())
                .or_insert_with(RunChannel::new);

            if replay {
                for event in &channel.buffer {
                    listener(event);
                }
            }
            channel.listeners.insert(id, listener);
            id
        };

        let inner = Arc::clone(&self.inner);
        let run_id = run_id.as_str().to_string();
        ProgressSubscription::new(move || {
            let mut state = inner.lock();
            if let Some(channel) = state.channels.get_mut(&run_id) {
                channel.listeners.remove(&id);
            }
        })
    }

    /// Snapshot of a run's buffered events.
    pub fn buffered(&self, run_id: &RunId) -> Vec<ProgressEvent> {
        let state = self.inner.lock();
        state
            .channels
            .get(run_id.as_str())
            .map(|c| c.buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of buffered events for a run (ring-bound checks).
    pub fn buffered_len(&self, run_id: &RunId) -> usize {
        let state = self.inner.lock();
        state
            .channels
            .get(run_id.as_str())
            .map(|c| c.buffer.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
