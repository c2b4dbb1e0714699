// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use birk_protocol::{ResponseItem, TokenUsage};

use crate::client::ModelClient;
use crate::error::StreamError;
use crate::prompt::Prompt;
use crate::types::{ResponseEvent, ResponseStream};

/// A pre-scripted model client.  Each `stream()` call pops the next
/// script from the front of the queue, so tests can specify exact event
/// sequences — including tool calls and mid-stream errors — without
/// network access.
pub struct ScriptedMockClient {
    scripts: Mutex<Vec<Vec<Result<ResponseEvent, StreamError>>>>,
    /// The last `Prompt` seen by this client, for request inspection.
    pub last_prompt: Arc<Mutex<Option<Prompt>>>,
}

impl ScriptedMockClient {
    /// Build a client from an ordered list of event scripts.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(
                scripts
                    .into_iter()
                    .map(|s| s.into_iter().map(Ok).collect())
                    .collect(),
            ),
            last_prompt: Arc::new(Mutex::new(None)),
        }
    }

    /// Like [`Self::new`] but scripts may contain errors.
    pub fn with_results(scripts: Vec<Vec<Result<ResponseEvent, StreamError>>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            last_prompt: Arc::new(Mutex::new(None)),
        }
    }

    /// One complete text turn: deltas for each chunk, the terminal
    /// message item, then `Completed`.
    pub fn text_turn(chunks: &[&str], usage: Option<TokenUsage>) -> Vec<ResponseEvent> {
        let mut events: Vec<ResponseEvent> = chunks
            .iter()
            .map(|c| ResponseEvent::OutputTextDelta((*c).to_string()))
            .collect();
        let full: String = chunks.concat();
        events.push(ResponseEvent::OutputItemDone(ResponseItem::assistant_text(full)));
        events.push(ResponseEvent::Completed {
            response_id: "resp_mock".into(),
            token_usage: usage,
        });
        events
    }

    /// One turn where the model requests a single tool call.
    pub fn tool_call_turn(call_id: &str, name: &str, arguments: &str) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::OutputItemDone(ResponseItem::FunctionCall {
                id: None,
                call_id: call_id.into(),
                name: name.into(),
                arguments: arguments.into(),
            }),
            ResponseEvent::Completed { response_id: "resp_mock".into(), token_usage: None },
        ]
    }

    /// Convenience: a client that answers every call with one text reply.
    pub fn always_text(reply: &str) -> Self {
        Self::new(vec![Self::text_turn(&[reply], None)])
    }

    /// How many scripts remain unconsumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelClient for ScriptedMockClient {
    async fn stream(&self, prompt: &Prompt) -> Result<ResponseStream, StreamError> {
        *self.last_prompt.lock().unwrap() = Some(prompt.clone());
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                // Fallback when all scripts are consumed: an empty
                // completed response so loops terminate.
                vec![Ok(ResponseEvent::Completed {
                    response_id: "resp_exhausted".into(),
                    token_usage: None,
                })]
            } else {
                scripts.remove(0)
            }
        };
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn scripted_text_turn_streams_deltas_then_item() {
        let client = ScriptedMockClient::new(vec![ScriptedMockClient::text_turn(
            &["Hel", "lo"],
            None,
        )]);
        let mut stream = client.stream(&Prompt::default()).await.unwrap();
        let mut events = Vec::new();
        while let Some(ev) = stream.next().await {
            events.push(ev.unwrap());
        }
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], ResponseEvent::OutputTextDelta("Hel".into()));
        assert_eq!(events[1], ResponseEvent::OutputTextDelta("lo".into()));
        match &events[2] {
            ResponseEvent::OutputItemDone(item) => {
                assert_eq!(birk_protocol::response_item_text(item), "Hello");
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(events[3], ResponseEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn scripts_are_consumed_in_order() {
        let client = ScriptedMockClient::new(vec![
            ScriptedMockClient::tool_call_turn("c1", "dom_query", "{}"),
            ScriptedMockClient::text_turn(&["done"], None),
        ]);
        assert_eq!(client.remaining(), 2);
        let _ = client.stream(&Prompt::default()).await.unwrap();
        assert_eq!(client.remaining(), 1);
    }

    #[tokio::test]
    async fn last_prompt_records_request() {
        let client = ScriptedMockClient::always_text("hi");
        let prompt = Prompt {
            input: vec![ResponseItem::user_text("question")],
            ..Default::default()
        };
        let _ = client.stream(&prompt).await.unwrap();
        let seen = client.last_prompt.lock().unwrap();
        assert_eq!(seen.as_ref().unwrap().input.len(), 1);
    }

    #[tokio::test]
    async fn exhausted_scripts_yield_empty_completed() {
        let client = ScriptedMockClient::new(vec![]);
        let mut stream = client.stream(&Prompt::default()).await.unwrap();
        let ev = stream.next().await.unwrap().unwrap();
        assert!(matches!(ev, ResponseEvent::Completed { .. }));
    }

    #[tokio::test]
    async fn scripted_error_is_yielded() {
        let client = ScriptedMockClient::with_results(vec![vec![
            Ok(ResponseEvent::OutputTextDelta("par".into())),
            Err(StreamError::retryable("connection reset")),
        ]]);
        let mut stream = client.stream(&Prompt::default()).await.unwrap();
        let _ = stream.next().await.unwrap().unwrap();
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.retryable);
    }
}
