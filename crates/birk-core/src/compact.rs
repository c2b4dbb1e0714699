// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation compaction: a tool-free summarization turn whose result
//! replaces the accumulated history.

use birk_protocol::{ContentItem, ResponseItem};

/// Instruction appended as the final user message of the compaction
/// call.  No tools are offered so the model can only summarize.
pub const COMPACT_PROMPT: &str = "Summarize this conversation for your own future reference. \
Capture, in order: the user's goals, what has been done so far (including tool calls and \
their outcomes), decisions made and why, and what remains open. Be specific about page \
URLs, selectors and data the work depends on. Reply with the summary only.";

/// Build the single history item that replaces the summarized
/// conversation: a user-role bridge carrying the summary, so the next
/// request reads as a fresh conversation that "remembers" the old one.
pub fn build_bridge_item(summary: &str) -> ResponseItem {
    ResponseItem::Message {
        id: None,
        role: "user".into(),
        content: vec![ContentItem::InputText {
            text: format!(
                "Context from the conversation so far (older turns were summarized):\n\n{summary}"
            ),
        }],
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use birk_protocol::response_item_text;

    #[test]
    fn bridge_item_is_a_user_message_containing_the_summary() {
        let item = build_bridge_item("the user wants a table sorted");
        assert_eq!(item.role(), Some("user"));
        assert!(response_item_text(&item).contains("the user wants a table sorted"));
    }

    #[test]
    fn compact_prompt_forbids_tools_implicitly() {
        // The prompt asks for a reply consisting of the summary only.
        assert!(COMPACT_PROMPT.contains("summary only"));
    }
}
