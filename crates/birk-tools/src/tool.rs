// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trait every browser-side tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Whether this tool needs user approval before it runs.
    /// Default: no (read-only tools).
    fn requires_approval(&self) -> bool {
        false
    }
    /// Execute the tool.  Errors are translated to `TOOL_ERROR` responses
    /// by the registry; they never abort the task.
    async fn execute(&self, params: Value) -> anyhow::Result<Value>;
}

/// Description of a registered tool, for building the model-facing spec
/// list.  Mirrors the model crate's tool shape without depending on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub requires_approval: bool,
}

/// One tool invocation as dispatched by the turn manager.
#[derive(Debug, Clone)]
pub struct ToolExecutionRequest {
    pub tool_name: String,
    pub parameters: Value,
    pub session_id: String,
    pub turn_id: String,
    /// Per-call override; the registry default applies when `None`.
    pub timeout: Option<Duration>,
}

/// Stable error codes of the execution boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ToolErrorCode {
    UnknownTool,
    InvalidParameters,
    Timeout,
    ToolError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolError {
    pub code: ToolErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Result of one tool execution.
///
/// Exactly one of `data` / `error` is set, matching `success`.  The
/// failure modes are data for the model, not exceptions: the turn
/// manager serializes this response into a `function_call_output` so the
/// model can observe and react to the failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolExecutionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolError>,
    /// Wall-clock execution time in milliseconds.
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolExecutionResponse {
    pub fn ok(data: Value, duration: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms: duration.as_millis() as u64,
            metadata: None,
        }
    }

    pub fn err(code: ToolErrorCode, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError { code, message: message.into(), details: None }),
            duration_ms: duration.as_millis() as u64,
            metadata: None,
        }
    }

    pub fn err_with_details(
        code: ToolErrorCode,
        message: impl Into<String>,
        details: Value,
        duration: Duration,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ToolError {
                code,
                message: message.into(),
                details: Some(details),
            }),
            duration_ms: duration.as_millis() as u64,
            metadata: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
