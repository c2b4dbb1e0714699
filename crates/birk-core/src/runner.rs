// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use birk_protocol::{EventMsg, ResponseItem, TokenUsage};

use crate::context::TurnContext;
use crate::session::Session;
use crate::tasks::{input_items_to_response_items, TaskError, TaskOutcome};
use crate::turn::{TurnError, TurnManager};

/// Drives the turn loop of one task: run a turn, feed tool outputs back,
/// repeat until the model stops calling tools.
pub struct TaskRunner {
    session: Arc<Session>,
    ctx: Arc<TurnContext>,
    sub_id: String,
    cancel: CancellationToken,
}

impl TaskRunner {
    pub fn new(
        session: Arc<Session>,
        ctx: Arc<TurnContext>,
        sub_id: String,
        cancel: CancellationToken,
    ) -> Self {
        Self { session, ctx, sub_id, cancel }
    }

    pub async fn run_loop(&self, initial: Vec<ResponseItem>) -> Result<TaskOutcome, TaskError> {
        self.session.record_conversation_items(&initial).await;

        let mut turn_count = 0u32;
        let mut total_usage = TokenUsage::default();
        let mut stream_retries = 0u32;
        // Set after an inline compaction; a turn that is still over the
        // limit with this set cannot be helped by compacting again.
        let mut compacted_for_overflow = false;

        loop {
            if self.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }

            // Input injected mid-task lands at the start of the next
            // turn, never inside one already in flight.
            let injected = self.session.take_pending_input().await;
            if !injected.is_empty() {
                debug!(count = injected.len(), "draining injected input into next turn");
                self.session
                    .record_conversation_items(&input_items_to_response_items(injected))
                    .await;
            }

            let turn = TurnManager::new(
                Arc::clone(&self.session),
                Arc::clone(&self.ctx),
                self.sub_id.clone(),
                self.cancel.clone(),
            );
            let outcome = match turn.run_turn().await {
                Ok(outcome) => outcome,
                Err(TurnError::Cancelled) => return Err(TaskError::Cancelled),
                Err(TurnError::Stream(e)) => {
                    if e.retryable && stream_retries < self.session.request_max_retries() {
                        stream_retries += 1;
                        self.session
                            .record_and_emit(
                                &self.sub_id,
                                EventMsg::StreamError {
                                    message: e.message.clone(),
                                    retryable: true,
                                },
                            )
                            .await;
                        let delay = backoff(stream_retries);
                        warn!(
                            retries = stream_retries,
                            delay_ms = delay.as_millis() as u64,
                            "model stream failed; retrying turn"
                        );
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => return Err(TaskError::Cancelled),
                            _ = tokio::time::sleep(delay) => {}
                        }
                        continue;
                    }
                    self.session
                        .record_and_emit(
                            &self.sub_id,
                            EventMsg::StreamError {
                                message: e.message.clone(),
                                retryable: false,
                            },
                        )
                        .await;
                    return Err(TaskError::Fatal(e.message));
                }
            };

            stream_retries = 0;
            turn_count += 1;
            if let Some(usage) = outcome.token_usage {
                total_usage.add(&usage);
            }

            // Auto-compaction: when the turn ends over the configured
            // threshold, summarize in place and keep going.  A second
            // overflow right after compacting means the context cannot
            // be reduced any further.
            if let Some(limit) = self.session.auto_compact_token_limit() {
                let in_window = outcome
                    .token_usage
                    .map(|u| u.tokens_in_context_window())
                    .unwrap_or(0);
                if in_window > limit {
                    if compacted_for_overflow {
                        let msg = "context cannot be reduced".to_string();
                        self.session
                            .record_and_emit(
                                &self.sub_id,
                                EventMsg::Error { message: msg.clone() },
                            )
                            .await;
                        return Err(TaskError::Fatal(msg));
                    }
                    compacted_for_overflow = true;
                    self.session
                        .compact(&self.sub_id, &self.ctx)
                        .await
                        .map_err(|e| TaskError::Fatal(format!("auto-compaction failed: {e}")))?;
                } else {
                    compacted_for_overflow = false;
                }
            }

            if !outcome.had_tool_calls {
                break;
            }
        }

        Ok(TaskOutcome {
            last_agent_message: None,
            turn_count,
            token_usage: total_usage,
        })
    }
}

fn backoff(retry: u32) -> Duration {
    let exp = 1000u64.saturating_mul(2u64.saturating_pow(retry.saturating_sub(1)));
    Duration::from_millis(exp.min(30_000))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(2), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
        assert_eq!(backoff(20), Duration::from_millis(30_000));
    }
}
