// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::pin::Pin;

use futures::Stream;
use serde::{Deserialize, Serialize};

use birk_protocol::{ResponseItem, TokenUsage};

use crate::error::StreamError;

/// A lazy, single-pass, cancellable sequence of model events.  Consumers
/// must not assume restartability; dropping the stream cancels the
/// underlying HTTP body.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, StreamError>> + Send>>;

/// Provider rate-limit headroom reported mid-stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    #[serde(default)]
    pub used_percent: f64,
    #[serde(default)]
    pub window_seconds: u64,
    #[serde(default)]
    pub resets_in_seconds: u64,
}

/// A single streamed event from the Responses API.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEvent {
    /// The provider accepted the request and opened the response.
    Created,
    /// One chunk of assistant output text.
    OutputTextDelta(String),
    /// One chunk of the reasoning summary.
    ReasoningSummaryDelta(String),
    /// One chunk of raw reasoning content.
    ReasoningContentDelta(String),
    /// A complete output item (message, reasoning or function call).
    OutputItemDone(ResponseItem),
    /// The model started a built-in web search.
    WebSearchCallBegin { call_id: String },
    /// The response finished; carries the final usage numbers.
    Completed {
        response_id: String,
        token_usage: Option<TokenUsage>,
    },
    /// Rate-limit headroom update; informational only.
    RateLimits(RateLimitSnapshot),
}
