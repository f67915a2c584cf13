// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Typed `details` payloads carried by tool results.
//!
//! The turn loop treats these as opaque data riding alongside the textual
//! content; renderers reconstruct them by tag name.  Keeping them as a
//! tagged enum (rather than a bare JSON value) lets the session journal
//! round-trip them losslessly.

use serde::{Deserialize, Serialize};

/// A structured todo item managed by the todo_write tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// Outcome of one invocation inside a batch tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchCallResult {
    pub tool: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one sub-agent task run by the task tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAgentResult {
    pub id: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub task: String,
    /// 0 on success, non-zero on failure (mirrors process conventions).
    pub exit_code: i32,
    /// Final text output, or the validated structured payload serialised to
    /// JSON when the agent definition carries an output schema.
    pub output: String,
    pub truncated: bool,
    pub duration_ms: u64,
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub aborted: bool,
    /// Child journal path, when a sessions directory is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_file: Option<String>,
}

/// Tool-specific structured payload attached to a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ToolResultDetails {
    Todos(Vec<TodoItem>),
    Batch(Vec<BatchCallResult>),
    Tasks(Vec<SubAgentResult>),
    Custom(serde_json::Value),
}
