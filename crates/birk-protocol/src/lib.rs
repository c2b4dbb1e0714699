// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Protocol types for the birk agent runtime.
//!
//! Callers and the agent communicate through two queues: a submission
//! queue carrying [`Submission`]s (user requests) into the agent, and an
//! event queue carrying [`Event`]s (progress, output, approvals) back out.
//! This crate defines both sides of that contract plus the conversation
//! history items ([`ResponseItem`]) and the persisted rollout record
//! ([`RolloutItem`]).  It is deliberately free of I/O so every other crate
//! can depend on it.

mod models;
mod protocol;
mod rollout;

pub use models::{response_item_text, ContentItem, ResponseItem};
pub use protocol::{
    AskForApproval, Event, EventMsg, InputItem, NotificationKind, Op, ReviewDecision,
    SandboxPolicy, Submission, TokenUsage, TurnAbortReason,
};
pub use rollout::{CompactedItem, RolloutItem, SessionMeta, TurnContextItem};
