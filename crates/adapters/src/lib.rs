// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! baton-adapters: seams to the external collaborators.
//!
//! The run engine consumes the coding-agent runtime through
//! [`AgentSession`] and the chat messenger through [`ChatApi`] /
//! [`ChatBridge`]. Fakes for all three live behind the `test-support`
//! feature.

pub mod chat;
pub mod session;
mod traced;

pub use chat::{
    topic_thread_key, ChatApi, ChatBridge, ChatError, ChatRoute, MessageRef, NoopChatBridge,
    TopicRoute,
};
pub use session::{
    AgentSession, AgentSessionFactory, AssistantMessage, MessageDelta, MessageRole,
    NoopAgentSession, NoopSessionFactory, OpenedSession, SessionError, SessionEvent,
    SessionListener, SessionSubscription, StopReason,
};
pub use traced::{TracedSession, TracedSessionFactory};

#[cfg(any(test, feature = "test-support"))]
pub use chat::{ChatCall, FakeChatApi, FakeChatBridge};
#[cfg(any(test, feature = "test-support"))]
pub use session::{FakeAgentSession, FakeSessionFactory, SessionCall};
