// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! birk — a browser-resident agent runtime.
//!
//! Callers enqueue operations (submission queue), the runtime drives
//! model turns and tool calls, and emits a totally-ordered event stream
//! (event queue) while persisting the conversation into a rollout store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use birk::{Agent, Config, Op, InputItem, ResponsesClient, ToolRegistry};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let client = Arc::new(ResponsesClient::new(&config, "conv-1"));
//! let tools = Arc::new(ToolRegistry::new());
//! let agent = Agent::new(config, client, tools, None, None)?;
//!
//! agent.submit(Op::UserInput {
//!     items: vec![InputItem::Text { text: "Summarize this page.".into() }],
//! });
//! while let Some(event) = agent.next_event().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub use birk_config::{Config, ModelConfig, ProviderConfig, RolloutConfig, ToolsConfig, WireApi};
pub use birk_core::{
    Agent, Notifier, RegularTask, Session, SessionServices, SessionTask, TaskKind, TurnContext,
};
pub use birk_model::{
    ModelClient, Prompt, ResponseEvent, ResponsesClient, ScriptedMockClient, StreamError, ToolSpec,
};
pub use birk_protocol::{
    AskForApproval, ContentItem, Event, EventMsg, InputItem, NotificationKind, Op, ResponseItem,
    ReviewDecision, RolloutItem, SandboxPolicy, Submission, TokenUsage, TurnAbortReason,
};
pub use birk_rollout::{
    cleanup_expired, export_jsonl, get_rollout_history, list_conversations, Cursor,
    InitialHistory, RolloutRecorder, RolloutRecorderParams,
};
pub use birk_tools::{Tool, ToolExecutionRequest, ToolExecutionResponse, ToolRegistry};
