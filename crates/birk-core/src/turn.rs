// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use birk_model::{ResponseEvent, StreamError};
use birk_protocol::{
    AskForApproval, ContentItem, EventMsg, NotificationKind, ResponseItem, ReviewDecision,
    TokenUsage,
};
use birk_tools::ToolExecutionRequest;

use crate::context::TurnContext;
use crate::session::Session;

/// How a turn ended when it did not complete.
#[derive(Debug)]
pub enum TurnError {
    Cancelled,
    /// The model stream failed; `retryable` decides whether the runner
    /// tries the turn again.
    Stream(StreamError),
}

/// Result of one completed model turn.
#[derive(Debug, Default)]
pub struct TurnOutcome {
    /// Tool calls were dispatched, so the model expects another turn
    /// with their outputs in history.
    pub had_tool_calls: bool,
    pub token_usage: Option<TokenUsage>,
}

/// Executes one model request/response round: streams events, dispatches
/// tool calls, folds everything into history, and emits the protocol
/// events in their required order.
pub struct TurnManager {
    session: Arc<Session>,
    ctx: Arc<TurnContext>,
    sub_id: String,
    cancel: CancellationToken,
}

impl TurnManager {
    pub fn new(
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        cancel: CancellationToken,
    ) -> Self {
        Self { session, ctx, sub_id, cancel }
    }

    pub async fn run_turn(&self) -> Result<TurnOutcome, TurnError> {
        let prompt = self.session.build_prompt(&self.ctx).await;
        let mut stream = self
            .session
            .model_client()
            .stream(&prompt)
            .await
            .map_err(TurnError::Stream)?;

        let mut delta_buf = String::new();
        let mut outcome = TurnOutcome::default();

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(TurnError::Cancelled),
                ev = stream.next() => ev,
            };
            let event = match event {
                Some(Ok(ev)) => ev,
                Some(Err(e)) => return Err(TurnError::Stream(e)),
                // Stream ended without a Completed marker; treat the
                // turn as finished with whatever arrived.
                None => break,
            };

            match event {
                ResponseEvent::Created => {}

                ResponseEvent::OutputTextDelta(delta) if !delta.is_empty() => {
                    delta_buf.push_str(&delta);
                    self.emit(EventMsg::AgentMessageDelta { delta }).await;
                }
                ResponseEvent::OutputTextDelta(_) => {}

                ResponseEvent::ReasoningSummaryDelta(delta)
                | ResponseEvent::ReasoningContentDelta(delta) => {
                    if self.session.show_raw_reasoning() {
                        self.emit(EventMsg::AgentReasoningDelta { delta }).await;
                    }
                }

                ResponseEvent::OutputItemDone(item) => {
                    self.handle_output_item(item, &mut delta_buf, &mut outcome).await?;
                }

                ResponseEvent::WebSearchCallBegin { call_id } => {
                    self.emit(EventMsg::Notification {
                        kind: NotificationKind::System,
                        payload: serde_json::json!({ "web_search_call": call_id }),
                    })
                    .await;
                }

                ResponseEvent::RateLimits(snapshot) => {
                    self.emit(EventMsg::Notification {
                        kind: NotificationKind::RateLimits,
                        payload: serde_json::to_value(&snapshot).unwrap_or(Value::Null),
                    })
                    .await;
                }

                ResponseEvent::Completed { response_id, token_usage } => {
                    debug!(response_id = %response_id, "turn completed");
                    outcome.token_usage = token_usage;
                    break;
                }
            }
        }

        if let Some(usage) = outcome.token_usage {
            self.emit(EventMsg::TokenCount { usage }).await;
        }
        Ok(outcome)
    }

    async fn handle_output_item(
        &self,
        item: ResponseItem,
        delta_buf: &mut String,
        outcome: &mut TurnOutcome,
    ) -> Result<(), TurnError> {
        match item {
            ResponseItem::Message { role, content, .. } if role == "assistant" => {
                // The accumulated deltas are authoritative for the final
                // text; the item's own content only counts when nothing
                // was streamed.
                let message = if delta_buf.is_empty() {
                    content.iter().map(ContentItem::text).collect()
                } else {
                    std::mem::take(delta_buf)
                };
                let item = ResponseItem::Message {
                    id: None,
                    role,
                    content: vec![ContentItem::OutputText { text: message.clone() }],
                };
                self.session.record_conversation_items(&[item]).await;
                self.emit(EventMsg::AgentMessage { message }).await;
            }
            ResponseItem::Message { .. } => {}

            reasoning @ ResponseItem::Reasoning { .. } => {
                if self.session.show_raw_reasoning() {
                    let text = birk_protocol::response_item_text(&reasoning);
                    self.session.record_conversation_items(&[reasoning]).await;
                    self.emit(EventMsg::AgentReasoning { text }).await;
                }
            }

            ResponseItem::FunctionCall { call_id, name, arguments, .. } => {
                let call = ResponseItem::FunctionCall {
                    id: None,
                    call_id: call_id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                };
                self.session.record_conversation_items(&[call]).await;
                let output = self.dispatch_function_call(call_id, name, arguments).await;
                self.session.record_conversation_items(&[output]).await;
                outcome.had_tool_calls = true;
            }

            ResponseItem::FunctionCallOutput { .. } => {
                // Only this runtime produces outputs; a model echoing one
                // back is malformed and ignored.
                warn!("ignoring function_call_output item from model stream");
            }
        }
        Ok(())
    }

    /// Run one tool call through the approval gate and the registry.
    ///
    /// Event order per call is fixed: `ToolCallBegin` → (approval
    /// request) → `ToolCallEnd`.  Failures never abort the task — they
    /// come back as error outputs the model can react to.
    async fn dispatch_function_call(
        &self,
        call_id: String,
        name: String,
        arguments: String,
    ) -> ResponseItem {
        let args: Value = match serde_json::from_str(&arguments) {
            Ok(v) => v,
            Err(e) => {
                // Unparseable arguments: no Begin/End pair, just an
                // error output for the model.
                return ResponseItem::function_output(
                    call_id,
                    format!("invalid tool arguments: {e}"),
                );
            }
        };

        self.emit(EventMsg::ToolCallBegin {
            call_id: call_id.clone(),
            name: name.clone(),
            args: args.clone(),
        })
        .await;

        let requires_approval = self
            .session
            .tools()
            .get(&name)
            .map(|t| t.requires_approval())
            .unwrap_or(false);
        if approval_required(self.ctx.approval_policy, requires_approval) {
            let decision = self
                .session
                .request_approval(&self.sub_id, &call_id, &name, &args, &self.cancel)
                .await;
            if decision != ReviewDecision::Approve {
                let reason = match decision {
                    ReviewDecision::Reject => "rejected by user",
                    _ => "aborted",
                };
                self.emit(EventMsg::ToolCallEnd {
                    call_id: call_id.clone(),
                    ok: false,
                    duration_ms: 0,
                    result: reason.to_string(),
                })
                .await;
                return ResponseItem::function_output(
                    call_id,
                    format!("tool call {name} was not executed: {reason}"),
                );
            }
        }

        let response = self
            .session
            .tools()
            .execute(ToolExecutionRequest {
                tool_name: name.clone(),
                parameters: args,
                session_id: self.session.session_id().to_string(),
                turn_id: self.sub_id.clone(),
                timeout: Some(Duration::from_millis(self.session.tool_timeout_ms())),
            })
            .await;

        let result_text = if response.success {
            response
                .data
                .as_ref()
                .map(|d| serde_json::to_string(d).unwrap_or_default())
                .unwrap_or_default()
        } else {
            response
                .error
                .as_ref()
                .map(|e| serde_json::to_string(e).unwrap_or_else(|_| e.message.clone()))
                .unwrap_or_else(|| "tool failed".into())
        };

        self.emit(EventMsg::ToolCallEnd {
            call_id: call_id.clone(),
            ok: response.success,
            duration_ms: response.duration_ms,
            result: result_text.clone(),
        })
        .await;

        ResponseItem::function_output(call_id, result_text)
    }

    async fn emit(&self, msg: EventMsg) {
        self.session.record_and_emit(&self.sub_id, msg).await;
    }
}

/// Whether the user must confirm before this tool call runs.
pub(crate) fn approval_required(policy: AskForApproval, tool_requires: bool) -> bool {
    match policy {
        AskForApproval::Never | AskForApproval::OnFailure => false,
        AskForApproval::UnlessTrusted => true,
        AskForApproval::OnRequest => tool_requires,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_and_on_failure_skip_approval() {
        assert!(!approval_required(AskForApproval::Never, true));
        assert!(!approval_required(AskForApproval::OnFailure, true));
    }

    #[test]
    fn unless_trusted_always_asks() {
        assert!(approval_required(AskForApproval::UnlessTrusted, false));
        assert!(approval_required(AskForApproval::UnlessTrusted, true));
    }

    #[test]
    fn on_request_follows_tool_flag() {
        assert!(approval_required(AskForApproval::OnRequest, true));
        assert!(!approval_required(AskForApproval::OnRequest, false));
    }
}
