// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use baton_core::{DeliveryMode, ProgressKind, RunOutput, ThreadKey};

fn event(run: &str, n: u32) -> ProgressEvent {
    ProgressEvent {
        run_id: RunId::new(run),
        thread_key: ThreadKey::new("cli:default"),
        source: "cli".to_string(),
        delivery_mode: DeliveryMode::FollowUp,
        timestamp_ms: n as u64,
        kind: ProgressKind::TurnEnd {
            tool_result_count: n,
        },
    }
}

fn terminal(run: &str) -> ProgressEvent {
    ProgressEvent {
        run_id: RunId::new(run),
        thread_key: ThreadKey::new("cli:default"),
        source: "cli".to_string(),
        delivery_mode: DeliveryMode::FollowUp,
        timestamp_ms: 0,
        kind: ProgressKind::Succeeded {
            output: RunOutput {
                text: "done".to_string(),
                provider: None,
                model: None,
                delivery_mode: DeliveryMode::FollowUp,
            },
        },
    }
}

fn collector() -> (ProgressListener, Arc<Mutex<Vec<ProgressEvent>>>) {
    let seen: Arc<Mutex<Vec<ProgressEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (Arc::new(move |e: &ProgressEvent| sink.lock().push(e.clone())), seen)
}

#[test]
fn publish_reaches_listeners_in_order() {
    let bus = ProgressBus::new();
    let run = RunId::new("run-1");
    let (listener, seen) = collector();
    let _sub = bus.subscribe(&run, listener, false);

    for n in 0..5 {
        bus.publish(event("run-1", n));
    }

    let counts: Vec<u32> = seen
        .lock()
        .iter()
        .map(|e| match e.kind {
            ProgressKind::TurnEnd { tool_result_count } => tool_result_count,
            _ => u32::MAX,
        })
        .collect();
    assert_eq!(counts, vec![0, 1, 2, 3, 4]);
}

#[test]
fn replay_is_prefix_then_live_exactly_once() {
    let bus = ProgressBus::new();
    let run = RunId::new("run-1");

    for n in 0..3 {
        bus.publish(event("run-1", n));
    }

    let (listener, seen) = collector();
    let _sub = bus.subscribe(&run, listener, true);
    // Replay delivered the buffered prefix immediately
    assert_eq!(seen.lock().len(), 3);

    bus.publish(event("run-1", 3));
    let counts: Vec<u32> = seen
        .lock()
        .iter()
        .map(|e| match e.kind {
            ProgressKind::TurnEnd { tool_result_count } => tool_result_count,
            _ => u32::MAX,
        })
        .collect();
    // No gap, no duplicate at the replay/live seam
    assert_eq!(counts, vec![0, 1, 2, 3]);
}

#[test]
fn subscribe_without_replay_sees_only_live() {
    let bus = ProgressBus::new();
    let run = RunId::new("run-1");
    bus.publish(event("run-1", 0));

    let (listener, seen) = collector();
    let _sub = bus.subscribe(&run, listener, false);
    bus.publish(event("run-1", 1));

    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn ring_buffer_is_bounded_at_256() {
    let bus = ProgressBus::new();
    let run = RunId::new("run-1");

    for n in 0..300 {
        bus.publish(event("run-1", n));
    }

    assert_eq!(bus.buffered_len(&run), 256);
    // The oldest events were trimmed
    let first = bus.buffered(&run).remove(0);
    assert!(matches!(
        first.kind,
        ProgressKind::TurnEnd {
            tool_result_count: 44
        }
    ));
}

#[test]
fn unsubscribe_stops_delivery() {
    let bus = ProgressBus::new();
    let run = RunId::new("run-1");
    let (listener, seen) = collector();
    let sub = bus.subscribe(&run, listener, false);

    bus.publish(event("run-1", 0));
    sub.unsubscribe();
    bus.publish(event("run-1", 1));

    assert_eq!(seen.lock().len(), 1);
}

#[test]
fn listeners_are_isolated_per_run() {
    let bus = ProgressBus::new();
    let (listener, seen) = collector();
    let _sub = bus.subscribe(&RunId::new("run-1"), listener, false);

    bus.publish(event("run-2", 0));
    assert!(seen.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn terminal_event_retires_channel_after_retention() {
    let bus = ProgressBus::new().with_terminal_retention(Duration::from_secs(10));
    let run = RunId::new("run-1");

    bus.publish(event("run-1", 0));
    bus.publish(terminal("run-1"));
    assert_eq!(bus.buffered_len(&run), 2);

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(bus.buffered_len(&run), 0);
}

#[tokio::test(start_paused = true)]
async fn non_terminal_channels_are_retained() {
    let bus = ProgressBus::new().with_terminal_retention(Duration::from_secs(10));
    bus.publish(event("run-1", 0));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(bus.buffered_len(&RunId::new("run-1")), 1);
}
