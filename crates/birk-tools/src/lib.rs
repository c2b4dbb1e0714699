// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry for the birk agent runtime.
//!
//! Tools themselves (DOM inspection, tab management, storage, network
//! interception) live outside this crate; the registry only guarantees
//! the execution contract: parameter validation against the tool's JSON
//! schema, a bounded execution time, and a structured response the turn
//! manager can fold back into the conversation.

mod registry;
mod tool;
mod validate;

pub use registry::ToolRegistry;
pub use tool::{
    Tool, ToolDefinition, ToolError, ToolErrorCode, ToolExecutionRequest, ToolExecutionResponse,
};
pub use validate::validate_parameters;
