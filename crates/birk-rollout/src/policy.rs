// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The persistence policy: which rollout items reach storage.
//!
//! Deltas are never persisted (their terminal items are), transient
//! notifications are never persisted, and raw reasoning is only kept when
//! the session was configured to show it.  The table is frozen; resumed
//! conversations rely on it being stable across versions.

use birk_protocol::{EventMsg, ResponseItem, RolloutItem};

/// Returns `true` when `item` should be written to storage.
pub fn is_persisted(item: &RolloutItem, show_raw_reasoning: bool) -> bool {
    match item {
        RolloutItem::SessionMeta(_)
        | RolloutItem::TurnContext(_)
        | RolloutItem::Compacted(_) => true,

        RolloutItem::ResponseItem(ri) => match ri {
            ResponseItem::Message { .. }
            | ResponseItem::FunctionCall { .. }
            | ResponseItem::FunctionCallOutput { .. } => true,
            ResponseItem::Reasoning { .. } => show_raw_reasoning,
        },

        RolloutItem::Event(msg) => match msg {
            EventMsg::TaskStarted { .. }
            | EventMsg::TaskComplete { .. }
            | EventMsg::TaskFailed { .. }
            | EventMsg::TurnAborted { .. }
            | EventMsg::ToolCallBegin { .. }
            | EventMsg::ToolCallEnd { .. }
            | EventMsg::Error { .. }
            | EventMsg::StreamError { .. }
            | EventMsg::TokenCount { .. } => true,

            // Deltas and transient UI traffic: the terminal items carry
            // the durable content.
            EventMsg::AgentMessage { .. }
            | EventMsg::AgentMessageDelta { .. }
            | EventMsg::AgentReasoning { .. }
            | EventMsg::AgentReasoningDelta { .. }
            | EventMsg::ToolOutputDelta { .. }
            | EventMsg::ExecApprovalRequest { .. }
            | EventMsg::PatchApprovalRequest { .. }
            | EventMsg::PlanUpdate { .. }
            | EventMsg::Notification { .. }
            | EventMsg::SessionConfigured { .. }
            | EventMsg::ShutdownComplete => false,
        },
    }
}

/// Whether this item counts as user input for conversation listing.
/// Rollouts without any user input are hidden from `list_conversations`.
pub fn is_user_input(item: &RolloutItem) -> bool {
    matches!(
        item,
        RolloutItem::ResponseItem(ResponseItem::Message { role, .. }) if role == "user"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use birk_protocol::{
        CompactedItem, NotificationKind, SessionMeta, TokenUsage, TurnAbortReason,
    };

    #[test]
    fn session_meta_always_persisted() {
        let item = RolloutItem::SessionMeta(SessionMeta::new("id", None));
        assert!(is_persisted(&item, false));
    }

    #[test]
    fn compacted_always_persisted() {
        let item = RolloutItem::Compacted(CompactedItem { message: "s".into() });
        assert!(is_persisted(&item, false));
    }

    #[test]
    fn message_and_function_items_persisted() {
        assert!(is_persisted(
            &RolloutItem::ResponseItem(ResponseItem::user_text("q")),
            false
        ));
        assert!(is_persisted(
            &RolloutItem::ResponseItem(ResponseItem::function_output("c1", "ok")),
            false
        ));
    }

    #[test]
    fn reasoning_item_follows_show_raw_flag() {
        let item = RolloutItem::ResponseItem(ResponseItem::Reasoning {
            id: None,
            summary: vec![],
            content: vec![],
        });
        assert!(!is_persisted(&item, false));
        assert!(is_persisted(&item, true));
    }

    #[test]
    fn lifecycle_events_persisted() {
        for msg in [
            EventMsg::TaskStarted { model: "m".into(), cwd: "c".into() },
            EventMsg::TaskComplete {
                turn_count: 1,
                token_usage: TokenUsage::default(),
                last_agent_message: None,
            },
            EventMsg::TaskFailed { message: "x".into() },
            EventMsg::TurnAborted { reason: TurnAbortReason::UserInterrupt },
            EventMsg::TokenCount { usage: TokenUsage::default() },
        ] {
            assert!(is_persisted(&RolloutItem::Event(msg), false));
        }
    }

    #[test]
    fn deltas_and_notifications_never_persisted() {
        for msg in [
            EventMsg::AgentMessageDelta { delta: "d".into() },
            EventMsg::AgentReasoningDelta { delta: "d".into() },
            EventMsg::Notification {
                kind: NotificationKind::System,
                payload: serde_json::Value::Null,
            },
        ] {
            assert!(!is_persisted(&RolloutItem::Event(msg), true));
        }
    }

    #[test]
    fn user_message_counts_as_user_input() {
        assert!(is_user_input(&RolloutItem::ResponseItem(ResponseItem::user_text("q"))));
        assert!(!is_user_input(&RolloutItem::ResponseItem(
            ResponseItem::assistant_text("a")
        )));
        assert!(!is_user_input(&RolloutItem::SessionMeta(SessionMeta::new("id", None))));
    }
}
