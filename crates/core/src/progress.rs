// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run progress events.
//!
//! Every event carries the run's routing context; the `kind` payload is a
//! tagged variant. `succeeded` and `failed` are terminal.

use crate::run::{DeliveryMode, RunId, RunOutput};
use crate::ThreadKey;
use serde::{Deserialize, Serialize};

/// A single progress event for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub run_id: RunId,
    pub thread_key: ThreadKey,
    pub source: String,
    pub delivery_mode: DeliveryMode,
    /// Epoch milliseconds when the event was published
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub kind: ProgressKind,
}

impl ProgressEvent {
    /// Whether this event closes out the run's progress stream.
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}

/// Payload of a progress event.
///
/// Serializes with `{"type": "...", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressKind {
    /// Accepted and waiting for the thread's dispatch slot
    Queued,
    /// Picked up by the executor
    Started,
    /// The run's user message reached the agent session
    Delivered,
    AgentStart,
    AgentEnd,
    TurnStart,
    TurnEnd {
        tool_result_count: u32,
    },
    AssistantTextDelta {
        delta: String,
    },
    AssistantThinkingDelta {
        delta: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_index: Option<u32>,
    },
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial_result: String,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: String,
        is_error: bool,
    },
    Succeeded {
        output: RunOutput,
    },
    Failed {
        error_message: String,
    },
}

impl ProgressKind {
    /// Whether this kind is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressKind::Succeeded { .. } | ProgressKind::Failed { .. })
    }

    /// Short tag for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ProgressKind::Queued => "queued",
            ProgressKind::Started => "started",
            ProgressKind::Delivered => "delivered",
            ProgressKind::AgentStart => "agent_start",
            ProgressKind::AgentEnd => "agent_end",
            ProgressKind::TurnStart => "turn_start",
            ProgressKind::TurnEnd { .. } => "turn_end",
            ProgressKind::AssistantTextDelta { .. } => "assistant_text_delta",
            ProgressKind::AssistantThinkingDelta { .. } => "assistant_thinking_delta",
            ProgressKind::ToolExecutionStart { .. } => "tool_execution_start",
            ProgressKind::ToolExecutionUpdate { .. } => "tool_execution_update",
            ProgressKind::ToolExecutionEnd { .. } => "tool_execution_end",
            ProgressKind::Succeeded { .. } => "succeeded",
            ProgressKind::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
#[path = "progress_tests.rs"]
mod tests;
