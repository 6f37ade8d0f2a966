// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Progress reporter: one edit-in-place status message per run.
//!
//! The reporter reduces a run's progress stream into a single chat
//! message. The body is the startup line (until real events arrive), a
//! bounded event log (`> tool …` and `~ thinking …` lines), and a final
//! `error: …` line on failure. Edits are rate limited, a typing
//! heartbeat runs while the run executes, and overflowed log lines are
//! peeled into an archive flushed as `progress log (continued):`
//! messages. On a success with no logged events the status message is
//! deleted instead of finalized.

use baton_adapters::{ChatApi, ChatError, ChatRoute, MessageRef};
use baton_core::{format_secs_1dp, Clock, ProgressEvent, ProgressKind, RunId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::progress::ProgressSubscription;
use crate::service::RunService;

/// Reporter tuning knobs.
#[derive(Debug, Clone)]
pub struct ReporterConfig {
    /// Minimum interval between status-message edits
    pub min_edit_interval: Duration,
    /// Minimum interval between thinking-only edits
    pub thinking_edit_interval: Duration,
    /// Typing heartbeat period while running
    pub typing_interval: Duration,
    /// Messenger message size limit
    pub message_limit: usize,
    /// Flush the pending archive once it reaches this many characters
    pub archive_flush_threshold: usize,
    /// Attempts per archive send, honouring retry-after
    pub max_send_attempts: u32,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            min_edit_interval: Duration::from_millis(1500),
            thinking_edit_interval: Duration::from_millis(1800),
            typing_interval: Duration::from_millis(4000),
            message_limit: 3500,
            archive_flush_threshold: 1800,
            max_send_attempts: 3,
        }
    }
}

/// Handle to a running reporter task.
pub struct ReporterHandle {
    task: JoinHandle<()>,
}

impl ReporterHandle {
    /// Wait for the reporter to finish (terminal event or stream end).
    pub async fn wait(self) {
        let _ = self.task.await;
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Queued,
    Running,
    Succeeded,
    Failed,
}

struct LogLine {
    id: u64,
    text: String,
}

struct ThinkingTail {
    line_id: u64,
    content_index: Option<u32>,
    text: String,
}

/// Per-run chat status reporter.
pub struct ProgressReporter {
    chat: Arc<dyn ChatApi>,
    route: ChatRoute,
    config: ReporterConfig,
    _subscription: Option<ProgressSubscription>,

    startup_line: String,
    phase: Phase,
    status: Option<MessageRef>,
    last_body: String,

    log: VecDeque<LogLine>,
    next_line_id: u64,
    any_log_lines: bool,
    tool_labels: HashMap<String, String>,
    tool_lines: HashMap<String, u64>,
    tool_started_ms: HashMap<String, u64>,
    thinking: Option<ThinkingTail>,
    error_line: Option<String>,
    archive: VecDeque<String>,

    other_dirty: bool,
    thinking_dirty: bool,
    last_edit_at: Option<Instant>,
    last_thinking_edit_at: Option<Instant>,
    deferred_until: Option<Instant>,
    next_typing_at: Instant,
}

impl ProgressReporter {
    /// Subscribe to a run on the service (with replay) and spawn the
    /// reporter over its progress stream.
    pub fn attach<C: Clock>(
        service: &RunService<C>,
        run_id: &RunId,
        chat: Arc<dyn ChatApi>,
        route: ChatRoute,
        startup_line: impl Into<String>,
        config: ReporterConfig,
    ) -> ReporterHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let subscription = service.subscribe_run_progress(
            run_id,
            Arc::new(move |event| {
                let _ = events_tx.send(event.clone());
            }),
            true,
        );
        Self::spawn(chat, route, startup_line, events_rx, Some(subscription), config)
    }

    /// Spawn a reporter over an already-wired event stream.
    pub fn spawn(
        chat: Arc<dyn ChatApi>,
        route: ChatRoute,
        startup_line: impl Into<String>,
        events: mpsc::UnboundedReceiver<ProgressEvent>,
        subscription: Option<ProgressSubscription>,
        config: ReporterConfig,
    ) -> ReporterHandle {
        let typing_interval = config.typing_interval;
        let reporter = Self {
            chat,
            route,
            config,
            _subscription: subscription,
            startup_line: startup_line.into(),
            phase: Phase::Queued,
            status: None,
            last_body: String::new(),
            log: VecDeque::new(),
            next_line_id: 0,
            any_log_lines: false,
            tool_labels: HashMap::new(),
            tool_lines: HashMap::new(),
            tool_started_ms: HashMap::new(),
            thinking: None,
            error_line: None,
            archive: VecDeque::new(),
            other_dirty: false,
            thinking_dirty: false,
            last_edit_at: None,
            last_thinking_edit_at: None,
            deferred_until: None,
            next_typing_at: Instant::now() + typing_interval,
        };
        let task = tokio::spawn(reporter.run(events));
        ReporterHandle { task }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ProgressEvent>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => {
                        if self.on_event(event).await {
                            return;
                        }
                    }
                    // Publisher gone without a terminal event: leave the
                    // last rendered state in place.
                    None => return,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    self.on_timer().await;
                }
            }
        }
    }

    fn next_deadline(&self) -> Instant {
        let mut deadline = Instant::now() + Duration::from_secs(3600);
        if self.phase == Phase::Running {
            deadline = deadline.min(self.next_typing_at);
        }
        if self.is_dirty() {
            deadline = deadline.min(self.render_allowed_at());
        }
        deadline
    }

    fn is_dirty(&self) -> bool {
        self.other_dirty || self.thinking_dirty
    }

    fn render_allowed_at(&self) -> Instant {
        let now = Instant::now();
        let mut at = match self.last_edit_at {
            Some(last) => last + self.config.min_edit_interval,
            None => now,
        };
        if self.thinking_dirty && !self.other_dirty {
            if let Some(last) = self.last_thinking_edit_at {
                at = at.max(last + self.config.thinking_edit_interval);
            }
        }
        if let Some(deferred) = self.deferred_until {
            at = at.max(deferred);
        }
        at
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if self.phase == Phase::Running && now >= self.next_typing_at {
            match self.chat.send_typing(&self.route).await {
                Ok(()) => self.next_typing_at = now + self.config.typing_interval,
                Err(ChatError::RetryAfter { seconds }) => {
                    self.next_typing_at = now + Duration::from_secs(seconds);
                }
                Err(e) => {
                    debug!(error = %e, "typing heartbeat failed");
                    self.next_typing_at = now + self.config.typing_interval;
                }
            }
        }
        if self.is_dirty() && now >= self.render_allowed_at() {
            self.render().await;
        }
    }

    /// Apply an event. Returns true when the run is terminal and the
    /// reporter is done.
    async fn on_event(&mut self, event: ProgressEvent) -> bool {
        match event.kind {
            ProgressKind::Queued | ProgressKind::Delivered => {}

            ProgressKind::Started => {
                self.phase = Phase::Running;
                self.next_typing_at = Instant::now() + self.config.typing_interval;
                self.mark_dirty(false);
            }

            ProgressKind::AgentStart
            | ProgressKind::AgentEnd
            | ProgressKind::TurnStart
            | ProgressKind::TurnEnd { .. }
            | ProgressKind::AssistantTextDelta { .. }
            | ProgressKind::ToolExecutionUpdate { .. } => {
                self.thinking = None;
            }

            ProgressKind::ToolExecutionStart {
                tool_call_id,
                tool_name,
                args,
            } => {
                self.thinking = None;
                let label = summarize_tool(&tool_name, &args);
                let line_id = self.push_line(format!("> {label}"));
                self.tool_labels.insert(tool_call_id.clone(), label);
                self.tool_lines.insert(tool_call_id.clone(), line_id);
                self.tool_started_ms.insert(tool_call_id, event.timestamp_ms);
                self.mark_dirty(false);
            }

            ProgressKind::ToolExecutionEnd {
                tool_call_id,
                tool_name,
                is_error,
                ..
            } => {
                self.thinking = None;
                let label = self
                    .tool_labels
                    .remove(&tool_call_id)
                    .unwrap_or_else(|| tool_name.clone());
                let elapsed_ms = self
                    .tool_started_ms
                    .remove(&tool_call_id)
                    .map(|start| event.timestamp_ms.saturating_sub(start))
                    .unwrap_or(0);
                let outcome = if is_error { "[✗] failed" } else { "[✓] done" };
                let text = format!("> {label} {outcome} ({})", format_secs_1dp(elapsed_ms));

                let mut rewrote = false;
                if let Some(line_id) = self.tool_lines.remove(&tool_call_id) {
                    // Rewrite the start line in place
                    if let Some(line) = self.log.iter_mut().find(|line| line.id == line_id) {
                        line.text = text.clone();
                        rewrote = true;
                    }
                }
                if !rewrote {
                    // The start line was archived; append instead
                    self.push_line(text);
                }
                self.mark_dirty(false);
            }

            ProgressKind::AssistantThinkingDelta {
                delta,
                content_index,
            } => {
                let limit = 220;
                let continued = self
                    .thinking
                    .as_ref()
                    .is_some_and(|tail| tail.content_index == content_index);
                if continued {
                    if let Some(tail) = self.thinking.as_mut() {
                        tail.text.push_str(&delta);
                        let rendered = format!("~ {}", truncate_chars(&tail.text, limit));
                        let line_id = tail.line_id;
                        if let Some(line) = self.log.iter_mut().find(|l| l.id == line_id) {
                            line.text = rendered;
                        }
                    }
                } else {
                    let line_id = self.push_line(format!("~ {}", truncate_chars(&delta, limit)));
                    self.thinking = Some(ThinkingTail {
                        line_id,
                        content_index,
                        text: delta,
                    });
                }
                self.mark_dirty(true);
            }

            ProgressKind::Succeeded { .. } => {
                self.phase = Phase::Succeeded;
                self.finish_success().await;
                return true;
            }

            ProgressKind::Failed { error_message } => {
                self.phase = Phase::Failed;
                self.error_line = Some(format!("error: {}", truncate_chars(&error_message, 200)));
                self.mark_dirty(false);
                self.render_final().await;
                return true;
            }
        }

        // Opportunistic render when the rate limit allows it
        if self.is_dirty() && Instant::now() >= self.render_allowed_at() {
            self.render().await;
        }
        false
    }

    fn push_line(&mut self, text: String) -> u64 {
        self.next_line_id += 1;
        let id = self.next_line_id;
        self.log.push_back(LogLine { id, text });
        self.any_log_lines = true;
        id
    }

    fn mark_dirty(&mut self, thinking: bool) {
        if thinking {
            self.thinking_dirty = true;
        } else {
            self.other_dirty = true;
        }
    }

    fn compose_body(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.any_log_lines {
            parts.push(&self.startup_line);
        }
        for line in &self.log {
            parts.push(&line.text);
        }
        if let Some(error) = &self.error_line {
            parts.push(error);
        }
        if parts.is_empty() {
            self.startup_line.clone()
        } else {
            parts.join("\n")
        }
    }

    /// Peel oldest log lines into the archive until the body fits.
    fn peel_overflow(&mut self) -> String {
        loop {
            let body = self.compose_body();
            if body.chars().count() <= self.config.message_limit || self.log.is_empty() {
                return body;
            }
            if let Some(line) = self.log.pop_front() {
                if let Some(tail) = &self.thinking {
                    if tail.line_id == line.id {
                        self.thinking = None;
                    }
                }
                self.tool_lines.retain(|_, id| *id != line.id);
                self.archive.push_back(line.text);
            }
        }
    }

    async fn render(&mut self) {
        let body = self.peel_overflow();

        if self.archive_chars() >= self.config.archive_flush_threshold {
            self.flush_archive(false).await;
        }

        if body == self.last_body {
            self.clear_dirty();
            return;
        }

        let result = match &self.status {
            None => match self.chat.send_message(&self.route, &body).await {
                Ok(message) => {
                    self.status = Some(message);
                    Ok(())
                }
                Err(e) => Err(e),
            },
            Some(message) => match self.chat.edit_message(message, &body).await {
                Err(ChatError::MessageGone) => {
                    // The status message is gone; send a fresh one and
                    // keep editing that.
                    match self.chat.send_message(&self.route, &body).await {
                        Ok(message) => {
                            self.status = Some(message);
                            Ok(())
                        }
                        Err(e) => Err(e),
                    }
                }
                other => other,
            },
        };

        match result {
            Ok(()) => {
                let now = Instant::now();
                self.last_body = body;
                self.last_edit_at = Some(now);
                if self.thinking_dirty {
                    self.last_thinking_edit_at = Some(now);
                }
                self.deferred_until = None;
                self.clear_dirty();
            }
            Err(ChatError::RetryAfter { seconds }) => {
                // Defer; the pending render flag stays set.
                self.deferred_until = Some(Instant::now() + Duration::from_secs(seconds));
            }
            Err(e) => {
                warn!(error = %e, "status message render failed");
            }
        }
    }

    fn clear_dirty(&mut self) {
        self.other_dirty = false;
        self.thinking_dirty = false;
    }

    async fn finish_success(&mut self) {
        if !self.any_log_lines {
            // Only the startup line was ever shown; remove the message
            // instead of leaving a stale husk.
            if let Some(message) = self.status.take() {
                if let Err(e) = self.chat.delete_message(&message).await {
                    debug!(error = %e, "status message delete failed");
                }
            }
            return;
        }
        self.render_final().await;
    }

    async fn render_final(&mut self) {
        self.deferred_until = None;
        self.mark_dirty(false);
        self.render().await;
        self.flush_archive(true).await;
    }

    fn archive_chars(&self) -> usize {
        self.archive.iter().map(|line| line.chars().count() + 1).sum()
    }

    /// Flush pending archive lines as `progress log (continued):`
    /// messages. When a send fails, only the unsent suffix stays pending.
    async fn flush_archive(&mut self, force: bool) {
        if self.archive.is_empty() {
            return;
        }
        if !force && self.archive_chars() < self.config.archive_flush_threshold {
            return;
        }

        while !self.archive.is_empty() {
            let (text, line_count) = pack_archive_chunk(&self.archive, self.config.message_limit);
            match self.send_with_retry(&text).await {
                Ok(()) => {
                    self.archive.drain(..line_count);
                }
                Err(e) => {
                    warn!(error = %e, pending = self.archive.len(), "archive flush interrupted");
                    return;
                }
            }
        }
    }

    async fn send_with_retry(&self, text: &str) -> Result<(), ChatError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.chat.send_message(&self.route, text).await {
                Ok(_) => return Ok(()),
                Err(ChatError::RetryAfter { seconds }) if attempts < self.config.max_send_attempts => {
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pack a prefix of the archive into one message, returning the text and
/// the exact number of lines it contains, so partial flush failures peel
/// exactly the sent prefix.
fn pack_archive_chunk(archive: &VecDeque<String>, limit: usize) -> (String, usize) {
    const HEADER: &str = "progress log (continued):";
    let mut text = HEADER.to_string();
    let mut used = HEADER.chars().count();
    let mut count = 0;

    for line in archive {
        let line_chars = line.chars().count() + 1;
        if count > 0 && used + line_chars > limit {
            break;
        }
        text.push('\n');
        text.push_str(line);
        used += line_chars;
        count += 1;
        if used >= limit {
            break;
        }
    }

    (text, count)
}

/// One-line summary of a tool call: the tool name plus its most
/// informative argument.
fn summarize_tool(tool_name: &str, args: &serde_json::Value) -> String {
    const KEYS: [&str; 6] = ["path", "command", "query", "task", "url", "text"];
    for key in KEYS {
        if let Some(value) = args.get(key) {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return format!("{} {}={}", tool_name, key, truncate_chars(&value, 180));
        }
    }
    tool_name.to_string()
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let mut truncated: String = text.chars().take(limit).collect();
        truncated.push('…');
        truncated
    }
}

#[cfg(test)]
#[path = "reporter_tests.rs"]
mod tests;
