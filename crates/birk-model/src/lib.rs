// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming model client for the birk agent runtime.
//!
//! The agent talks to the provider's Responses API: one HTTP POST per
//! turn, answered with an SSE stream of [`ResponseEvent`]s.  This crate
//! owns the request shape ([`ResponsesApiRequest`]), the SSE parser, the
//! retry/backoff transport, and a scripted mock used by tests.

mod client;
mod error;
mod mock;
mod prompt;
mod sse;
mod types;

pub use client::{AuthManager, ModelClient, ResponsesClient};
pub use error::{StreamAttemptError, StreamError};
pub use mock::ScriptedMockClient;
pub use prompt::{Prompt, ReasoningParam, ResponsesApiRequest, TextParam, ToolSpec};
pub use sse::parse_sse_data_line;
pub use types::{RateLimitSnapshot, ResponseEvent, ResponseStream};
