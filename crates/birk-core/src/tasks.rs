// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use birk_protocol::{ContentItem, InputItem, ResponseItem, TokenUsage};

use crate::context::TurnContext;
use crate::runner::TaskRunner;
use crate::session::Session;
use crate::state::TaskKind;

/// How a task body ended when it did not complete.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    /// Cooperative cancellation; the abort path emits `TurnAborted`.
    #[error("task cancelled")]
    Cancelled,
    /// Fatal failure; surfaced as `TaskFailed`.
    #[error("{0}")]
    Fatal(String),
}

/// What a finished task reports back for its `TaskComplete` event.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    pub last_agent_message: Option<String>,
    pub turn_count: u32,
    pub token_usage: TokenUsage,
}

/// Async task that drives a session's turn machinery.
///
/// Implementations encapsulate one workflow (regular chat, compaction,
/// review).  Each instance is owned by the session and executed on a
/// background tokio task; `run` must watch the cancellation token and
/// terminate quickly once it fires.
#[async_trait]
pub trait SessionTask: Send + Sync + 'static {
    fn kind(&self) -> TaskKind;

    async fn run(
        self: Arc<Self>,
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        input: Vec<InputItem>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, TaskError>;

    /// Cleanup hook after `Session::abort_all_tasks` cancelled the task.
    async fn abort(&self, session: Arc<Session>, sub_id: &str) {
        let _ = (session, sub_id);
    }
}

/// Lifecycle of an [`AgentTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Initializing,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Coordinator for one regular task: owns the status, the cancellation
/// signal and the [`TaskRunner`] driving the turn loop.
pub struct AgentTask {
    session: Arc<Session>,
    ctx: Arc<TurnContext>,
    sub_id: String,
    cancel: CancellationToken,
    status: Mutex<TaskStatus>,
}

impl AgentTask {
    pub fn new(
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            ctx,
            sub_id,
            cancel,
            status: Mutex::new(TaskStatus::Initializing),
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.status.lock().unwrap()
    }

    /// Signal cancellation.  Idempotent: a second call is a no-op.
    pub fn cancel(&self) {
        let mut status = self.status.lock().unwrap();
        if matches!(*status, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled) {
            return;
        }
        *status = TaskStatus::Cancelled;
        self.cancel.cancel();
    }

    pub async fn run(&self, input: Vec<ResponseItem>) -> Result<TaskOutcome, TaskError> {
        *self.status.lock().unwrap() = TaskStatus::Running;
        let runner = TaskRunner::new(
            Arc::clone(&self.session),
            Arc::clone(&self.ctx),
            self.sub_id.clone(),
            self.cancel.clone(),
        );
        let result = runner.run_loop(input).await;
        let mut status = self.status.lock().unwrap();
        match &result {
            Ok(_) => *status = TaskStatus::Completed,
            Err(TaskError::Cancelled) => *status = TaskStatus::Cancelled,
            Err(TaskError::Fatal(_)) => *status = TaskStatus::Failed,
        }
        result
    }
}

/// A user-facing conversational task: one or more model turns with tool
/// calls in between.
#[derive(Default)]
pub struct RegularTask {
    agent_task: Mutex<Option<Arc<AgentTask>>>,
}

#[async_trait]
impl SessionTask for RegularTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Regular
    }

    async fn run(
        self: Arc<Self>,
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        input: Vec<InputItem>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        let items = input_items_to_response_items(input);
        let agent_task = Arc::new(AgentTask::new(session.clone(), ctx, sub_id, cancel));
        *self.agent_task.lock().unwrap() = Some(Arc::clone(&agent_task));

        let mut outcome = agent_task.run(items).await?;
        // The terminal assistant message lives in conversation history;
        // surface it on the completion event.
        outcome.last_agent_message = session.last_assistant_message().await;
        Ok(outcome)
    }

    async fn abort(&self, _session: Arc<Session>, sub_id: &str) {
        debug!(sub_id, "aborting regular task");
        if let Some(task) = self.agent_task.lock().unwrap().take() {
            task.cancel();
        }
    }
}

/// Summarizes the conversation in place to reclaim context window.
#[derive(Default)]
pub struct CompactTask;

#[async_trait]
impl SessionTask for CompactTask {
    fn kind(&self) -> TaskKind {
        TaskKind::Compact
    }

    async fn run(
        self: Arc<Self>,
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        _input: Vec<InputItem>,
        cancel: CancellationToken,
    ) -> Result<TaskOutcome, TaskError> {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        session
            .compact(&sub_id, &ctx)
            .await
            .map_err(|e| TaskError::Fatal(format!("compaction failed: {e}")))?;
        Ok(TaskOutcome::default())
    }
}

/// Convert submitted input items into `role: user` conversation items.
///
/// Contiguous text/image items merge into a single user message so one
/// submission reads as one message; tool results become standalone
/// `function_call_output` items.
pub fn input_items_to_response_items(input: Vec<InputItem>) -> Vec<ResponseItem> {
    let mut out = Vec::new();
    let mut content: Vec<ContentItem> = Vec::new();
    for item in input {
        match item {
            InputItem::Text { text } => content.push(ContentItem::InputText { text }),
            InputItem::Image { image_url } => {
                content.push(ContentItem::InputImage { image_url })
            }
            InputItem::ToolResult { call_id, output } => {
                if !content.is_empty() {
                    out.push(ResponseItem::Message {
                        id: None,
                        role: "user".into(),
                        content: std::mem::take(&mut content),
                    });
                }
                out.push(ResponseItem::function_output(call_id, output));
            }
        }
    }
    if !content.is_empty() {
        out.push(ResponseItem::Message { id: None, role: "user".into(), content });
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_and_image_merge_into_one_user_message() {
        let items = input_items_to_response_items(vec![
            InputItem::Text { text: "look at".into() },
            InputItem::Image { image_url: "data:image/png;base64,A".into() },
        ]);
        assert_eq!(items.len(), 1);
        match &items[0] {
            ResponseItem::Message { role, content, .. } => {
                assert_eq!(role, "user");
                assert_eq!(content.len(), 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn tool_result_becomes_function_call_output() {
        let items = input_items_to_response_items(vec![InputItem::ToolResult {
            call_id: "c9".into(),
            output: "ok".into(),
        }]);
        assert_eq!(items.len(), 1);
        assert!(matches!(
            &items[0],
            ResponseItem::FunctionCallOutput { call_id, .. } if call_id == "c9"
        ));
    }

    #[test]
    fn tool_result_splits_surrounding_text() {
        let items = input_items_to_response_items(vec![
            InputItem::Text { text: "before".into() },
            InputItem::ToolResult { call_id: "c1".into(), output: "out".into() },
            InputItem::Text { text: "after".into() },
        ]);
        assert_eq!(items.len(), 3);
        assert!(matches!(items[0], ResponseItem::Message { .. }));
        assert!(matches!(items[1], ResponseItem::FunctionCallOutput { .. }));
        assert!(matches!(items[2], ResponseItem::Message { .. }));
    }

    #[test]
    fn empty_input_yields_no_items() {
        assert!(input_items_to_response_items(vec![]).is_empty());
    }
}
