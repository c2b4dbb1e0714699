// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::ResponseItem;
use crate::protocol::{AskForApproval, EventMsg, SandboxPolicy};

/// First item of every rollout: the identity and creation metadata of
/// the conversation.  Always persisted at sequence 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    /// Conversation UUID (v4), equal to the session id.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl SessionMeta {
    pub fn new(id: impl Into<String>, instructions: Option<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            instructions,
        }
    }
}

/// Snapshot of the turn context recorded when an override changed the
/// model, cwd or sandbox mid-conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContextItem {
    pub model: String,
    pub cwd: String,
    pub approval_policy: AskForApproval,
    pub sandbox_policy: SandboxPolicy,
}

/// Marker recorded when the conversation was summarized in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactedItem {
    /// The summary that replaced the older history.
    pub message: String,
}

/// One persisted entry of a rollout.
///
/// Which variants actually reach storage is decided by the persistence
/// policy in the rollout crate; this type is just the union of everything
/// that *can* be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RolloutItem {
    SessionMeta(SessionMeta),
    ResponseItem(ResponseItem),
    TurnContext(TurnContextItem),
    Compacted(CompactedItem),
    Event(EventMsg),
}

impl RolloutItem {
    /// Stable type tag used as the `item_type` column in storage.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::SessionMeta(_) => "session_meta",
            Self::ResponseItem(_) => "response_item",
            Self::TurnContext(_) => "turn_context",
            Self::Compacted(_) => "compacted",
            Self::Event(_) => "event",
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_meta_round_trips_with_millisecond_timestamp() {
        let meta = SessionMeta::new("3b2e1c9a-0000-4000-8000-000000000001", None);
        let json = serde_json::to_string(&meta).unwrap();
        let back: SessionMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, meta.id);
        assert_eq!(back.timestamp, meta.timestamp);
    }

    #[test]
    fn rollout_item_tagged_with_payload() {
        let item = RolloutItem::Compacted(CompactedItem { message: "sum".into() });
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(r#""type":"compacted""#), "{json}");
        assert!(json.contains(r#""payload""#), "{json}");
        let back: RolloutItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn type_tag_matches_serde_tag() {
        let item = RolloutItem::SessionMeta(SessionMeta::new("id", None));
        let json = serde_json::to_string(&item).unwrap();
        assert!(json.contains(&format!(r#""type":"{}""#, item.type_tag())));
    }

    #[test]
    fn response_item_rollout_round_trips() {
        let item = RolloutItem::ResponseItem(ResponseItem::user_text("hello"));
        let json = serde_json::to_string(&item).unwrap();
        let back: RolloutItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back, item);
    }
}
