// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Submission queue entry — one request from the caller.
///
/// `id` is generated by the agent on `submit()` and echoed back as the
/// `id` of every [`Event`] the submission gives rise to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub op: Op,
}

/// A single item of user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Text { text: String },
    Image { image_url: String },
    /// Output of a tool executed outside the agent loop, folded back into
    /// the conversation as a `function_call_output`.
    ToolResult { call_id: String, output: String },
}

/// The operation carried by a [`Submission`].  Consumed exactly once by
/// the submission loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    /// Input from the user.  If a task is already running the items are
    /// injected into it; otherwise a new task is spawned.
    UserInput { items: Vec<InputItem> },

    /// Like `UserInput` but carries the full per-turn context, overriding
    /// the session's persistent defaults for this task only.
    UserTurn {
        items: Vec<InputItem>,
        /// Base URL of the page context the turn operates on (the browser
        /// rendition of a working directory).
        cwd: String,
        approval_policy: AskForApproval,
        sandbox_policy: SandboxPolicy,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        effort: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// Override parts of the persistent turn context for subsequent
    /// turns.  All fields are optional; omitted fields keep their current
    /// value.  Does not enqueue any input and never spawns a task.
    OverrideTurnContext {
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_policy: Option<AskForApproval>,
        #[serde(skip_serializing_if = "Option::is_none")]
        sandbox_policy: Option<SandboxPolicy>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        effort: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },

    /// Abort all running tasks.  Answered with [`EventMsg::TurnAborted`].
    Interrupt,

    /// The user's decision for a pending command approval.
    ExecApproval {
        execution_id: String,
        decision: ReviewDecision,
    },

    /// The user's decision for a pending patch approval.
    PatchApproval {
        execution_id: String,
        decision: ReviewDecision,
    },

    /// Summarize the conversation so far to reclaim context window.
    Compact,

    /// Flush the rollout and terminate the submission loop.
    Shutdown,
}

/// The user's answer to an approval request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject,
    /// Skip the call and wind the whole task down.  Also the value every
    /// pending approval is resolved with when its task aborts.
    #[default]
    Abort,
}

/// When the user is consulted before a tool call runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AskForApproval {
    /// Only known-safe read-only calls are auto-approved.
    #[serde(rename = "untrusted")]
    UnlessTrusted,
    /// Auto-approve, escalate to the user when the call fails.
    OnFailure,
    /// The tool's own `requires_approval` flag decides.
    #[default]
    OnRequest,
    /// Never ask; failures go straight back to the model.
    Never,
}

/// Execution restrictions for browser-side tool calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxPolicy {
    /// DOM inspection only; no mutation, no navigation.
    ReadOnly,
    /// DOM/storage writes confined to the current page.
    #[default]
    PageWrite,
    /// Navigation, tab management and network interception allowed.
    FullAccess,
}

/// Why a turn was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnAbortReason {
    UserInterrupt,
    /// A newer task replaced this one.
    Replaced,
    Error,
}

/// Token usage for one turn or accumulated over a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub cached_input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Fold another turn's usage into this accumulator.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.cached_input_tokens += other.cached_input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_tokens += other.total_tokens;
    }

    /// Tokens that count against the context window after this turn.
    pub fn tokens_in_context_window(&self) -> u64 {
        self.total_tokens
    }
}

/// Severity/kind tag for [`EventMsg::Notification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    System,
    Warning,
    RateLimits,
}

/// Event queue entry.  `id` is the id of the submission that caused it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub msg: EventMsg,
}

/// Events emitted by the agent.  Totally ordered within a session;
/// consumers treat the stream as the canonical ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventMsg {
    /// A task began executing for a submission.
    TaskStarted { model: String, cwd: String },
    /// The task finished normally.
    TaskComplete {
        turn_count: u32,
        token_usage: TokenUsage,
        #[serde(skip_serializing_if = "Option::is_none")]
        last_agent_message: Option<String>,
    },
    /// The task hit a fatal error.
    TaskFailed { message: String },
    /// The task was aborted before finishing.
    TurnAborted { reason: TurnAbortReason },

    /// A complete assistant message (after streaming finished).
    AgentMessage { message: String },
    /// One streamed chunk of the assistant message.
    AgentMessageDelta { delta: String },
    /// A complete reasoning block.
    AgentReasoning { text: String },
    /// One streamed chunk of model reasoning.
    AgentReasoningDelta { delta: String },

    /// A tool call is about to execute.
    ToolCallBegin {
        call_id: String,
        name: String,
        args: Value,
    },
    /// A tool call finished.
    ToolCallEnd {
        call_id: String,
        ok: bool,
        duration_ms: u64,
        result: String,
    },
    /// Incremental output from a long-running tool.
    ToolOutputDelta {
        call_id: String,
        stream: String,
        chunk: String,
    },

    /// The agent is waiting for the user to approve a command.
    ExecApprovalRequest {
        execution_id: String,
        command: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        explanation: Option<String>,
    },
    /// The agent is waiting for the user to approve a patch.
    PatchApprovalRequest {
        execution_id: String,
        summary: String,
    },

    /// The agent updated its plan / todo list.
    PlanUpdate { tasks: Vec<String> },
    /// Token usage after a completed turn.
    TokenCount { usage: TokenUsage },
    /// Informational side-channel message (never persisted).
    Notification {
        kind: NotificationKind,
        payload: Value,
    },

    /// A recoverable error; the session continues.
    Error { message: String },
    /// A model stream error, possibly retryable.
    StreamError { message: String, retryable: bool },

    /// Emitted once after a session is created or resumed so consumers
    /// can reset their display state.
    SessionConfigured {
        session_id: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rollout_id: Option<String>,
    },
    /// The submission loop has drained and is about to exit.
    ShutdownComplete,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Op serialization ──────────────────────────────────────────────────────

    #[test]
    fn op_user_input_round_trips() {
        let op = Op::UserInput {
            items: vec![InputItem::Text { text: "hi".into() }],
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""type":"user_input""#), "tag missing: {json}");
        let back: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn op_override_omits_unset_fields() {
        let op = Op::OverrideTurnContext {
            cwd: None,
            approval_policy: None,
            sandbox_policy: None,
            model: Some("gpt-5".into()),
            effort: None,
            summary: None,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains("gpt-5"));
        assert!(!json.contains("cwd"), "unset fields must be omitted: {json}");
    }

    #[test]
    fn op_interrupt_is_bare_tag() {
        let json = serde_json::to_string(&Op::Interrupt).unwrap();
        assert_eq!(json, r#"{"type":"interrupt"}"#);
    }

    #[test]
    fn exec_approval_decision_round_trips() {
        let op = Op::ExecApproval {
            execution_id: "c1".into(),
            decision: ReviewDecision::Approve,
        };
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.contains(r#""decision":"approve""#));
        let back: Op = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    // ── EventMsg serialization ────────────────────────────────────────────────

    #[test]
    fn event_msg_task_started_tagged() {
        let msg = EventMsg::TaskStarted {
            model: "gpt-5".into(),
            cwd: "https://example.com".into(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"task_started""#));
    }

    #[test]
    fn event_msg_turn_aborted_reason_round_trips() {
        let msg = EventMsg::TurnAborted {
            reason: TurnAbortReason::UserInterrupt,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("user_interrupt"));
        let back: EventMsg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn event_msg_task_complete_omits_absent_last_message() {
        let msg = EventMsg::TaskComplete {
            turn_count: 2,
            token_usage: TokenUsage::default(),
            last_agent_message: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(!json.contains("last_agent_message"));
    }

    // ── TokenUsage ────────────────────────────────────────────────────────────

    #[test]
    fn token_usage_add_accumulates_all_fields() {
        let mut total = TokenUsage {
            input_tokens: 10,
            cached_input_tokens: 5,
            output_tokens: 3,
            total_tokens: 13,
        };
        total.add(&TokenUsage {
            input_tokens: 7,
            cached_input_tokens: 0,
            output_tokens: 2,
            total_tokens: 9,
        });
        assert_eq!(total.input_tokens, 17);
        assert_eq!(total.cached_input_tokens, 5);
        assert_eq!(total.output_tokens, 5);
        assert_eq!(total.total_tokens, 22);
    }

    // ── Policy defaults ───────────────────────────────────────────────────────

    #[test]
    fn approval_default_is_on_request() {
        assert_eq!(AskForApproval::default(), AskForApproval::OnRequest);
    }

    #[test]
    fn sandbox_default_is_page_write() {
        assert_eq!(SandboxPolicy::default(), SandboxPolicy::PageWrite);
    }

    #[test]
    fn sandbox_policy_kebab_case_wire_format() {
        let json = serde_json::to_string(&SandboxPolicy::FullAccess).unwrap();
        assert_eq!(json, r#""full-access""#);
    }
}
