// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// One element of conversation history, in the shape the Responses API
/// expects on the wire.
///
/// The `content` field of the message-like variants is always an array,
/// never a bare string — providers reject mixed forms and downstream code
/// relies on it (see [`response_item_text`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseItem {
    Message {
        /// Present on Azure requests, where every input item needs an id.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        role: String,
        content: Vec<ContentItem>,
    },
    Reasoning {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        summary: Vec<ContentItem>,
        content: Vec<ContentItem>,
    },
    FunctionCall {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        name: String,
        /// JSON-encoded argument object, forwarded verbatim.
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        call_id: String,
        content: Vec<ContentItem>,
    },
}

impl ResponseItem {
    /// A user message with a single text content item.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::Message {
            id: None,
            role: "user".into(),
            content: vec![ContentItem::InputText { text: text.into() }],
        }
    }

    /// An assistant message with a single output-text content item.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::Message {
            id: None,
            role: "assistant".into(),
            content: vec![ContentItem::OutputText { text: text.into() }],
        }
    }

    /// A function call output whose content is a single output-text item.
    pub fn function_output(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::FunctionCallOutput {
            id: None,
            call_id: call_id.into(),
            content: vec![ContentItem::OutputText { text: text.into() }],
        }
    }

    /// Role of a message item; `None` for non-message items.
    pub fn role(&self) -> Option<&str> {
        match self {
            Self::Message { role, .. } => Some(role),
            _ => None,
        }
    }
}

/// One block inside a [`ResponseItem`] content array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
    ReasoningText { text: String },
}

impl ContentItem {
    /// The text carried by this item; empty for images.
    pub fn text(&self) -> &str {
        match self {
            Self::InputText { text }
            | Self::OutputText { text }
            | Self::ReasoningText { text } => text,
            Self::InputImage { .. } => "",
        }
    }
}

/// Joined text of all content items of a message-like [`ResponseItem`].
///
/// Returns an empty string for function calls (which carry arguments, not
/// content).  Never panics.
pub fn response_item_text(item: &ResponseItem) -> String {
    match item {
        ResponseItem::Message { content, .. }
        | ResponseItem::FunctionCallOutput { content, .. } => {
            content.iter().map(ContentItem::text).collect()
        }
        ResponseItem::Reasoning { content, summary, .. } => {
            if content.is_empty() {
                summary.iter().map(ContentItem::text).collect()
            } else {
                content.iter().map(ContentItem::text).collect()
            }
        }
        ResponseItem::FunctionCall { .. } => String::new(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
