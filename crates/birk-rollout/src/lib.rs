// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Ordered conversation persistence for the birk agent runtime.
//!
//! One rollout per conversation: SessionMeta at sequence 0, then every
//! persistable item in emission order, with sequences contiguous from 0.
//! All mutation is serialized through a per-recorder writer task so
//! sequences never skip; listing and history reads open their own
//! read-only connections.

mod export;
mod policy;
mod recorder;
mod store;

pub use export::export_jsonl;
pub use policy::{is_persisted, is_user_input};
pub use recorder::{
    cleanup_expired, get_rollout_history, list_conversations, ConversationSummary,
    ConversationsPage, Cursor, InitialHistory, ResumedHistory, RolloutRecorder,
    RolloutRecorderParams,
};
pub use store::LIST_SCAN_CAP;

/// Storage-layer failures.  Write failures are logged and surfaced as
/// warnings by the session; the event stream stays truthful either way.
#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("rollout store error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("recorder is closed")]
    Closed,
    #[error("rollout not found: {0}")]
    NotFound(String),
    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}
