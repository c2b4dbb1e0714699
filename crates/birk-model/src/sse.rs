// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! SSE parsing for the Responses API event stream.
//!
//! The provider answers with `data: {json}` records separated by blank
//! lines.  A single record can be split across any number of TCP packets
//! (assistant messages routinely exceed 1 MB), so parsing is driven by a
//! persistent line buffer: only complete `\n`-terminated lines are ever
//! handed to the JSON layer.

use serde_json::Value;
use tracing::trace;

use birk_protocol::{ResponseItem, TokenUsage};

use crate::error::StreamError;
use crate::types::{RateLimitSnapshot, ResponseEvent};

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so the next TCP chunk
/// can extend it.
pub(crate) fn drain_complete_sse_lines(
    buf: &mut String,
) -> Vec<Result<ResponseEvent, StreamError>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        // Strip the optional Windows-style \r before \n.
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comments, `event:`/`id:` framing
/// lines, and event types this runtime does not consume.
pub fn parse_sse_data_line(line: &str) -> Option<Result<ResponseEvent, StreamError>> {
    let data = line.strip_prefix("data:")?.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            trace!(error = %e, "dropping unparseable SSE data line");
            return None;
        }
    };
    let kind = v["type"].as_str()?;
    match kind {
        "response.created" | "response.in_progress" => Some(Ok(ResponseEvent::Created)),

        "response.output_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("").to_string();
            Some(Ok(ResponseEvent::OutputTextDelta(delta)))
        }

        "response.reasoning_summary_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("").to_string();
            Some(Ok(ResponseEvent::ReasoningSummaryDelta(delta)))
        }

        "response.reasoning_text.delta" => {
            let delta = v["delta"].as_str().unwrap_or("").to_string();
            Some(Ok(ResponseEvent::ReasoningContentDelta(delta)))
        }

        "response.output_item.done" => {
            match serde_json::from_value::<ResponseItem>(v["item"].clone()) {
                Ok(item) => Some(Ok(ResponseEvent::OutputItemDone(item))),
                Err(e) => {
                    // Item kinds the runtime does not consume (e.g.
                    // web_search_call bodies) are not an error.
                    trace!(error = %e, "dropping unknown output item");
                    None
                }
            }
        }

        "response.output_item.added" => {
            let item = &v["item"];
            if item["type"].as_str() == Some("web_search_call") {
                let call_id = item["id"].as_str().unwrap_or("").to_string();
                Some(Ok(ResponseEvent::WebSearchCallBegin { call_id }))
            } else {
                None
            }
        }

        "response.completed" => {
            let response = &v["response"];
            let response_id = response["id"].as_str().unwrap_or("").to_string();
            let token_usage = response.get("usage").and_then(parse_usage);
            Some(Ok(ResponseEvent::Completed { response_id, token_usage }))
        }

        "response.failed" => {
            let message = v["response"]["error"]["message"]
                .as_str()
                .unwrap_or("response.failed")
                .to_string();
            Some(Err(StreamError::fatal(message)))
        }

        "rate_limits.updated" => {
            let snapshot = serde_json::from_value::<RateLimitSnapshot>(v["snapshot"].clone())
                .unwrap_or_default();
            Some(Ok(ResponseEvent::RateLimits(snapshot)))
        }

        other => {
            trace!(event_type = other, "dropping unknown SSE event type");
            None
        }
    }
}

fn parse_usage(usage: &Value) -> Option<TokenUsage> {
    if usage.is_null() {
        return None;
    }
    let input_tokens = usage["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = usage["output_tokens"].as_u64().unwrap_or(0);
    Some(TokenUsage {
        input_tokens,
        cached_input_tokens: usage["input_tokens_details"]["cached_tokens"]
            .as_u64()
            .unwrap_or(0),
        output_tokens,
        total_tokens: usage["total_tokens"]
            .as_u64()
            .unwrap_or(input_tokens + output_tokens),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
