// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use bosun_model::Message;
use bosun_tools::ToolResult;

/// Events published by the turn loop on a single async channel.
/// Consumers (renderers, drivers) subscribe and filter; back-pressure
/// blocks the loop rather than dropping events, so a consumer never
/// misses a `MessageEnd`.
///
/// Ordering contract: `MessageStart` precedes every `MessageUpdate` /
/// `MessageEnd` for the same logical id; `ToolExecutionStart`,
/// `ToolExecutionUpdate*`, `ToolExecutionEnd` are strictly ordered per
/// `tool_call_id`.  Concurrent tool triples appear only under the batch
/// tool or parallel task tool.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A run has begun.
    AgentStart,
    /// The run is over; no further events follow.
    AgentEnd,
    /// An assistant turn is starting.
    TurnStart,
    /// The final assistant turn finished; carries the last assistant message.
    TurnEnd(Message),
    /// A new assistant message exists (stub, before streaming).
    MessageStart(Message),
    /// Streaming snapshot of an assistant message under construction.
    MessageUpdate(Message),
    /// The final version of an assistant message.
    MessageEnd(Message),
    ToolExecutionStart {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    ToolExecutionUpdate {
        tool_call_id: String,
        tool_name: String,
        partial: ToolResult,
    },
    ToolExecutionEnd {
        tool_call_id: String,
        tool_name: String,
        result: ToolResult,
        is_error: bool,
    },
}
