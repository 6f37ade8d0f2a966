// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-thread run controller.
//!
//! One agent session is a long-lived, single-threaded cooperative
//! interaction. The controller matches each submitted run to the
//! session's next user-message / assistant-message boundary: a run
//! resolves iff its user message was delivered to the session and an
//! assistant message with a non-failure stop reason then closed out.
//!
//! Dispatch is serialized under the controller state lock so deliveries
//! cannot reorder: an idle session gets `prompt`, an in-flight one gets
//! `steer` or `follow_up` by the run's delivery mode. A steer arriving
//! while no turn is in flight is delivered as `prompt`.

use baton_adapters::{
    AgentSession, AssistantMessage, MessageDelta, MessageRole, SessionEvent, SessionSubscription,
};
use baton_core::{Clock, DeliveryMode, ProgressEvent, ProgressKind, Run, RunId, RunOutput};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::progress::ProgressBus;

/// Result delivered to a run's submitter: the output, or the precise
/// failure message that becomes the run's `error_message`.
pub type RunCompletion = oneshot::Receiver<Result<RunOutput, String>>;

struct PendingRun {
    run: Run,
    delivered: bool,
    last_assistant: Option<AssistantMessage>,
    responder: Option<oneshot::Sender<Result<RunOutput, String>>>,
}

impl PendingRun {
    fn resolve(&mut self, result: Result<RunOutput, String>) {
        if let Some(responder) = self.responder.take() {
            let _ = responder.send(result);
        }
    }
}

struct ControllerState {
    pending: VecDeque<PendingRun>,
    active: Option<RunId>,
    in_flight: bool,
    /// Lifecycle progress queued until a run becomes active
    queued_lifecycle: Vec<ProgressKind>,
    disposed: bool,
}

struct ControllerInner<C: Clock> {
    session: Arc<dyn AgentSession>,
    bus: ProgressBus,
    clock: C,
    state: Mutex<ControllerState>,
}

/// State machine mediating between one agent session and its runs.
pub struct ThreadRunController<C: Clock> {
    inner: Arc<ControllerInner<C>>,
    subscription: parking_lot::Mutex<Option<SessionSubscription>>,
    events_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<C: Clock> ThreadRunController<C> {
    /// Create a controller over the session and start routing its events.
    pub fn new(session: Arc<dyn AgentSession>, bus: ProgressBus, clock: C) -> Self {
        let inner = Arc::new(ControllerInner {
            session: Arc::clone(&session),
            bus,
            clock,
            state: Mutex::new(ControllerState {
                pending: VecDeque::new(),
                active: None,
                in_flight: false,
                queued_lifecycle: Vec::new(),
                disposed: false,
            }),
        });

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SessionEvent>();
        let subscription = session.subscribe(Arc::new(move |event| {
            let _ = events_tx.send(event);
        }));

        let router = Arc::clone(&inner);
        let events_task = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                router.handle_event(event).await;
            }
        });

        Self {
            inner,
            subscription: parking_lot::Mutex::new(Some(subscription)),
            events_task: parking_lot::Mutex::new(Some(events_task)),
        }
    }

    /// Submit a run against the session.
    ///
    /// Returns a completion future that resolves when the run's turn
    /// closes out, or fails with the precise reason.
    pub async fn submit(&self, run: Run) -> RunCompletion {
        let (tx, rx) = oneshot::channel();

        let mut state = self.inner.state.lock().await;
        if state.disposed {
            let _ = tx.send(Err("cancelled: controller disposed".to_string()));
            return rx;
        }

        let delivery_mode = run.delivery_mode;
        let text = run.input_text.clone();
        let run_id = run.id.clone();
        state.pending.push_back(PendingRun {
            run,
            delivered: false,
            last_assistant: None,
            responder: Some(tx),
        });

        // Dispatch while still holding the state lock so a concurrent
        // submit cannot reorder deliveries.
        let result = if !state.in_flight {
            state.in_flight = true;
            self.inner.session.prompt(&text).await
        } else {
            match delivery_mode {
                DeliveryMode::Steer => self.inner.session.steer(&text).await,
                DeliveryMode::FollowUp => self.inner.session.follow_up(&text).await,
            }
        };

        if let Err(e) = result {
            if let Some(idx) = state.pending.iter().position(|p| p.run.id == run_id) {
                if let Some(mut record) = state.pending.remove(idx) {
                    record.resolve(Err(format!("session delivery failed: {e}")));
                }
            }
        }

        rx
    }

    /// Cancel a submitted run. The agent turn is not aborted; the run is
    /// detached and failed.
    pub async fn cancel(&self, run_id: &RunId) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(idx) = state.pending.iter().position(|p| &p.run.id == run_id) else {
            return false;
        };
        if state.active.as_ref() == Some(run_id) {
            state.active = None;
        }
        if let Some(mut record) = state.pending.remove(idx) {
            record.resolve(Err("cancelled by user".to_string()));
        }
        true
    }

    /// Number of runs awaiting completion.
    pub async fn pending_len(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Unsubscribe from the session and reject all still-pending runs.
    pub async fn dispose(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
        if let Some(task) = self.events_task.lock().take() {
            task.abort();
        }

        let mut state = self.inner.state.lock().await;
        state.disposed = true;
        state.active = None;
        while let Some(mut record) = state.pending.pop_front() {
            record.resolve(Err("cancelled: controller disposed".to_string()));
        }
    }
}

impl<C: Clock> ControllerInner<C> {
    fn emit(&self, run: &Run, kind: ProgressKind) {
        self.bus.publish(ProgressEvent {
            run_id: run.id.clone(),
            thread_key: run.thread_key.clone(),
            source: run.source.clone(),
            delivery_mode: run.delivery_mode,
            timestamp_ms: self.clock.epoch_ms(),
            kind,
        });
    }

    fn emit_for_active(&self, state: &ControllerState, kind: ProgressKind) {
        let Some(active) = &state.active else {
            return;
        };
        if let Some(record) = state.pending.iter().find(|p| &p.run.id == active) {
            self.emit(&record.run, kind);
        }
    }

    async fn handle_event(&self, event: SessionEvent) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state.disposed {
            return;
        }

        match event {
            SessionEvent::MessageStart {
                role: MessageRole::User,
            } => {
                // A new user message reached the session: the previously
                // active run (if any) is complete, and the first
                // undelivered record becomes active.
                if state.active.is_some() {
                    self.complete_active(state, "next_user_message");
                }
                match state.pending.iter_mut().find(|p| !p.delivered) {
                    Some(record) => {
                        record.delivered = true;
                        let run = record.run.clone();
                        state.active = Some(run.id.clone());
                        self.emit(&run, ProgressKind::Delivered);
                    }
                    None => debug!("user message with no undelivered pending run"),
                }
            }

            SessionEvent::MessageStart {
                role: MessageRole::Assistant,
            } => {
                let queued: Vec<ProgressKind> = state.queued_lifecycle.drain(..).collect();
                for kind in queued {
                    self.emit_for_active(state, kind);
                }
            }

            SessionEvent::MessageUpdate { delta } => match delta {
                MessageDelta::Text { delta } => {
                    self.emit_for_active(state, ProgressKind::AssistantTextDelta { delta });
                }
                MessageDelta::Thinking {
                    delta,
                    content_index,
                } => {
                    self.emit_for_active(
                        state,
                        ProgressKind::AssistantThinkingDelta {
                            delta,
                            content_index,
                        },
                    );
                }
            },

            SessionEvent::MessageEnd { role, message } => {
                if role == MessageRole::Assistant {
                    if let Some(active) = state.active.clone() {
                        if let Some(record) =
                            state.pending.iter_mut().find(|p| p.run.id == active)
                        {
                            record.last_assistant = message;
                        }
                    }
                }
            }

            SessionEvent::ToolExecutionStart {
                tool_call_id,
                tool_name,
                args,
            } => {
                self.emit_for_active(
                    state,
                    ProgressKind::ToolExecutionStart {
                        tool_call_id,
                        tool_name,
                        args,
                    },
                );
            }

            SessionEvent::ToolExecutionUpdate {
                tool_call_id,
                tool_name,
                partial_result,
            } => {
                self.emit_for_active(
                    state,
                    ProgressKind::ToolExecutionUpdate {
                        tool_call_id,
                        tool_name,
                        partial_result,
                    },
                );
            }

            SessionEvent::ToolExecutionEnd {
                tool_call_id,
                tool_name,
                result,
                is_error,
            } => {
                self.emit_for_active(
                    state,
                    ProgressKind::ToolExecutionEnd {
                        tool_call_id,
                        tool_name,
                        result,
                        is_error,
                    },
                );
            }

            SessionEvent::TurnStart => self.lifecycle(state, ProgressKind::TurnStart),
            SessionEvent::AgentStart => self.lifecycle(state, ProgressKind::AgentStart),

            SessionEvent::TurnEnd { tool_result_count } => {
                self.emit_for_active(state, ProgressKind::TurnEnd { tool_result_count });
            }

            SessionEvent::AgentEnd => {
                state.in_flight = false;
                self.emit_for_active(state, ProgressKind::AgentEnd);
                self.complete_active(state, "agent_end");
                while let Some(mut record) = state.pending.pop_front() {
                    warn!(run = %record.run.id, "agent ended before message delivery");
                    record.resolve(Err("agent ended before message delivery".to_string()));
                }
            }
        }
    }

    /// Queue lifecycle progress until there is an active run, then emit.
    fn lifecycle(&self, state: &mut ControllerState, kind: ProgressKind) {
        if state.active.is_some() {
            self.emit_for_active(state, kind);
        } else {
            state.queued_lifecycle.push(kind);
        }
    }

    /// Resolve or fail the active record.
    fn complete_active(&self, state: &mut ControllerState, trigger: &str) {
        let Some(active) = state.active.take() else {
            return;
        };
        let Some(idx) = state.pending.iter().position(|p| p.run.id == active) else {
            return;
        };
        let Some(mut record) = state.pending.remove(idx) else {
            return;
        };

        match record.last_assistant.take() {
            None => {
                record.resolve(Err(format!("no assistant response before {trigger}")));
            }
            Some(message) if message.stop_reason.is_failure() => {
                let reason = message.error_message.clone().unwrap_or_else(|| {
                    format!("assistant stopped with {}", message.stop_reason)
                });
                record.resolve(Err(reason));
            }
            Some(message) => {
                let delivery_mode = record.run.delivery_mode;
                record.resolve(Ok(RunOutput {
                    text: message.text,
                    provider: message.provider,
                    model: message.model,
                    delivery_mode,
                }));
            }
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
