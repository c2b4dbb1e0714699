// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, warn};

use crate::tool::{
    Tool, ToolDefinition, ToolErrorCode, ToolExecutionRequest, ToolExecutionResponse,
};
use crate::validate::validate_parameters;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Central registry holding all available tools.
///
/// Immutable after construction; shared behind an `Arc` by the session
/// and every running turn.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_default_timeout(timeout: Duration) -> Self {
        Self {
            tools: HashMap::new(),
            default_timeout: timeout,
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Definitions of all registered tools, name-sorted for a stable
    /// model-facing order.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
                requires_approval: t.requires_approval(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Like [`Self::list_tools`] but filtered by the config name lists:
    /// a non-empty `enabled` acts as an allow-list, `disabled` always
    /// removes.
    pub fn list_tools_filtered(&self, enabled: &[String], disabled: &[String]) -> Vec<ToolDefinition> {
        self.list_tools()
            .into_iter()
            .filter(|d| enabled.is_empty() || enabled.iter().any(|n| n == &d.name))
            .filter(|d| !disabled.iter().any(|n| n == &d.name))
            .collect()
    }

    /// Execute one tool call under the boundary contract.
    ///
    /// Never panics and never returns `Err`: every failure mode becomes a
    /// structured response the model can observe.
    pub async fn execute(&self, req: ToolExecutionRequest) -> ToolExecutionResponse {
        let started = Instant::now();

        let tool = match self.tools.get(&req.tool_name) {
            Some(t) => Arc::clone(t),
            None => {
                warn!(tool = %req.tool_name, "unknown tool requested");
                return ToolExecutionResponse::err(
                    ToolErrorCode::UnknownTool,
                    format!("unknown tool: {}", req.tool_name),
                    started.elapsed(),
                );
            }
        };

        if let Err(violation) = validate_parameters(&tool.parameters_schema(), &req.parameters) {
            return ToolExecutionResponse::err(
                ToolErrorCode::InvalidParameters,
                format!("invalid parameters for {}: {violation}", req.tool_name),
                started.elapsed(),
            );
        }

        let timeout = req.timeout.unwrap_or(self.default_timeout);
        debug!(
            tool = %req.tool_name,
            session_id = %req.session_id,
            turn_id = %req.turn_id,
            timeout_ms = timeout.as_millis() as u64,
            "executing tool"
        );

        match tokio::time::timeout(timeout, tool.execute(req.parameters)).await {
            Ok(Ok(data)) => ToolExecutionResponse::ok(data, started.elapsed()),
            Ok(Err(e)) => ToolExecutionResponse::err_with_details(
                ToolErrorCode::ToolError,
                format!("{} failed: {e}", req.tool_name),
                json!(format!("{e:#}")),
                started.elapsed(),
            ),
            Err(_) => ToolExecutionResponse::err(
                ToolErrorCode::Timeout,
                format!(
                    "{} timed out after {} ms",
                    req.tool_name,
                    timeout.as_millis()
                ),
                started.elapsed(),
            ),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;

    /// Minimal echo tool for registry tests.
    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            })
        }
        async fn execute(&self, params: Value) -> anyhow::Result<Value> {
            Ok(json!({ "echo": params["text"] }))
        }
    }

    /// Sleeps longer than any sane test timeout.
    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "never finishes in time"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(json!(null))
        }
    }

    /// Always fails.
    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always errors"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            anyhow::bail!("element not found")
        }
    }

    fn request(name: &str, params: Value) -> ToolExecutionRequest {
        ToolExecutionRequest {
            tool_name: name.into(),
            parameters: params,
            session_id: "s1".into(),
            turn_id: "t1".into(),
            timeout: None,
        }
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds_with_duration() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let resp = reg.execute(request("echo", json!({ "text": "hi" }))).await;
        assert!(resp.success);
        assert_eq!(resp.data.unwrap()["echo"], "hi");
    }

    #[tokio::test]
    async fn unknown_tool_returns_unknown_tool_code() {
        let reg = ToolRegistry::new();
        let resp = reg.execute(request("missing", json!({}))).await;
        assert!(!resp.success);
        assert_eq!(resp.error.unwrap().code, ToolErrorCode::UnknownTool);
    }

    #[tokio::test]
    async fn invalid_parameters_rejected_before_execution() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let resp = reg.execute(request("echo", json!({ "text": 42 }))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, ToolErrorCode::InvalidParameters);
        assert!(err.message.contains("$.text"), "{}", err.message);
    }

    #[tokio::test]
    async fn missing_required_parameter_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "echo" });
        let resp = reg.execute(request("echo", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, ToolErrorCode::InvalidParameters);
    }

    #[tokio::test]
    async fn timeout_produces_timeout_code() {
        let mut reg = ToolRegistry::with_default_timeout(Duration::from_millis(20));
        reg.register(SlowTool);
        let resp = reg.execute(request("slow", json!({}))).await;
        assert_eq!(resp.error.unwrap().code, ToolErrorCode::Timeout);
    }

    #[tokio::test]
    async fn per_request_timeout_overrides_default() {
        let mut reg = ToolRegistry::new(); // default 30 s
        reg.register(SlowTool);
        let mut req = request("slow", json!({}));
        req.timeout = Some(Duration::from_millis(20));
        let resp = reg.execute(req).await;
        assert_eq!(resp.error.unwrap().code, ToolErrorCode::Timeout);
    }

    #[tokio::test]
    async fn tool_failure_becomes_tool_error_with_details() {
        let mut reg = ToolRegistry::new();
        reg.register(FailTool);
        let resp = reg.execute(request("fail", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, ToolErrorCode::ToolError);
        assert!(err.message.contains("element not found"));
        assert!(err.details.is_some());
    }

    #[test]
    fn list_tools_is_name_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "zeta" });
        reg.register(EchoTool { name: "alpha" });
        let names: Vec<String> = reg.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn filtered_list_respects_enabled_and_disabled() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "a" });
        reg.register(EchoTool { name: "b" });
        reg.register(EchoTool { name: "c" });

        let only_ab = reg.list_tools_filtered(&["a".into(), "b".into()], &[]);
        assert_eq!(only_ab.len(), 2);

        let no_b = reg.list_tools_filtered(&[], &["b".into()]);
        assert!(no_b.iter().all(|d| d.name != "b"));

        // disabled wins over enabled
        let conflict = reg.list_tools_filtered(&["a".into()], &["a".into()]);
        assert!(conflict.is_empty());
    }

    #[test]
    fn registering_same_name_twice_overwrites() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool { name: "t" });
        reg.register(EchoTool { name: "t" });
        assert_eq!(reg.names().len(), 1);
    }
}
