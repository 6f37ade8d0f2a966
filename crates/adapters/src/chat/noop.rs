// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! No-op chat bridge.
//!
//! Stands in when no messenger is wired up: topic creation is
//! unavailable and run delivery is a logged no-op.

use super::{ChatBridge, ChatError, TopicRoute};
use async_trait::async_trait;
use baton_core::{DeliveryTarget, RunId, TaskId};
use tracing::debug;

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopChatBridge;

#[async_trait]
impl ChatBridge for NoopChatBridge {
    fn supports_topics(&self) -> bool {
        false
    }

    async fn create_task_topic(
        &self,
        _chat_id: i64,
        _task_id: &TaskId,
        _title: &str,
    ) -> Result<TopicRoute, ChatError> {
        Err(ChatError::Api("no messenger configured".to_string()))
    }

    async fn sync_task_topic_title(
        &self,
        _route: &TopicRoute,
        _task_id: &TaskId,
        _title: &str,
    ) -> Result<(), ChatError> {
        Ok(())
    }

    async fn deliver_run(&self, run_id: &RunId, _target: &DeliveryTarget) -> Result<(), ChatError> {
        debug!(run = %run_id, "run delivery skipped, no messenger configured");
        Ok(())
    }
}
