// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

use birk_config::{ProviderConfig, ReasoningEffort, ReasoningSummary};
use birk_protocol::ResponseItem;

/// Built-in base instructions used when the caller does not override them.
/// The full system prompt lives outside the runtime; this is the minimal
/// contract every model sees.
const DEFAULT_BASE_INSTRUCTIONS: &str = "You are a browser-resident coding and web agent. \
You operate on live pages through the provided tools; prefer tool calls over guessing page \
state, and report what you changed when you finish.";

/// Everything needed to build one model request.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    /// Conversation history, oldest first.
    pub input: Vec<ResponseItem>,
    pub tools: Vec<ToolSpec>,
    /// Replaces the built-in base instructions when set.
    pub base_instructions_override: Option<String>,
    /// Appended after the base instructions.
    pub user_instructions: Option<String>,
    /// JSON schema constraining the final assistant message.
    pub output_schema: Option<Value>,
}

impl Prompt {
    /// Base instructions (override or the model default) followed by the
    /// user instructions, separated by a blank line.
    pub fn full_instructions(&self, _model: &str) -> String {
        let base = self
            .base_instructions_override
            .as_deref()
            .unwrap_or(DEFAULT_BASE_INSTRUCTIONS);
        match self.user_instructions.as_deref() {
            Some(user) if !user.is_empty() => format!("{base}\n\n{user}"),
            _ => base.to_string(),
        }
    }

    /// Shallow clone of the input items, ready for wire mutation (Azure
    /// id-attachment) without touching the caller's history.
    pub fn formatted_input(&self) -> Vec<ResponseItem> {
        self.input.clone()
    }
}

/// A tool exposed to the model, in the Responses API wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolSpec {
    Function {
        name: String,
        description: String,
        strict: bool,
        parameters: Value,
    },
    LocalShell,
    WebSearch,
    Custom {
        name: String,
        description: String,
        format: Value,
    },
}

impl ToolSpec {
    /// The name the model uses to invoke this tool.
    pub fn name(&self) -> &str {
        match self {
            Self::Function { name, .. } | Self::Custom { name, .. } => name,
            Self::LocalShell => "local_shell",
            Self::WebSearch => "web_search",
        }
    }
}

/// Reasoning parameters forwarded for reasoning-capable models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReasoningParam {
    pub effort: ReasoningEffort,
    pub summary: ReasoningSummary,
}

/// The `text` request field carrying an output schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextParam {
    pub format: Value,
}

/// JSON body of `POST {base_url}/responses`.
///
/// `tool_choice`, `parallel_tool_calls` and `stream` are fixed by this
/// runtime and not configurable; optional fields are omitted from the
/// serialized body entirely rather than sent as null.
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesApiRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<ResponseItem>,
    pub tools: Vec<ToolSpec>,
    pub tool_choice: &'static str,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,
    pub store: bool,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextParam>,
}

impl ResponsesApiRequest {
    /// Assemble the request for `prompt` under the given provider.
    ///
    /// Azure Responses deployments require `store = true` and an id on
    /// every input item; everywhere else `store` is false and ids are
    /// left absent.
    pub fn build(
        prompt: &Prompt,
        model: &str,
        conversation_id: &str,
        provider: &ProviderConfig,
        reasoning: Option<ReasoningParam>,
    ) -> Self {
        let mut input = prompt.formatted_input();
        let azure = provider.is_azure_responses();
        if azure {
            attach_item_ids(&mut input);
        }
        let include = if reasoning.is_some() {
            vec!["reasoning.encrypted_content"]
        } else {
            Vec::new()
        };
        Self {
            model: model.to_string(),
            instructions: prompt.full_instructions(model),
            input,
            tools: prompt.tools.clone(),
            tool_choice: "auto",
            parallel_tool_calls: false,
            reasoning,
            store: azure,
            stream: true,
            include,
            prompt_cache_key: Some(conversation_id.to_string()),
            text: prompt
                .output_schema
                .clone()
                .map(|format| TextParam { format }),
        }
    }
}

/// Give every input item an id.  Azure rejects Responses-API payloads
/// whose stored input items have no id.
fn attach_item_ids(input: &mut [ResponseItem]) {
    for (i, item) in input.iter_mut().enumerate() {
        let slot = match item {
            ResponseItem::Message { id, .. }
            | ResponseItem::Reasoning { id, .. }
            | ResponseItem::FunctionCall { id, .. }
            | ResponseItem::FunctionCallOutput { id, .. } => id,
        };
        if slot.is_none() {
            *slot = Some(format!("item_{i}"));
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
