// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use bosun_model::{ToolContent, ToolDefinition, ToolResultDetails};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Opaque identifier from the model (forwarded verbatim).
    pub tool_call_id: String,
    pub tool_name: String,
    /// Parsed JSON arguments.
    pub arguments: Value,
}

/// The result of executing a tool: ordered content blocks, an optional
/// typed details payload for renderers, and an error flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    pub details: Option<ToolResultDetails>,
    pub is_error: bool,
}

impl ToolResult {
    /// Successful plain-text result.
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            details: None,
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(msg)],
            details: None,
            is_error: true,
        }
    }

    pub fn with_details(mut self, details: ToolResultDetails) -> Self {
        self.details = Some(details);
        self
    }

    /// Concatenated text of all content blocks.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A progress update emitted while a tool is still running.
#[derive(Debug, Clone)]
pub struct ToolProgress {
    pub tool_call_id: String,
    pub tool_name: String,
    pub partial: ToolResult,
}

/// Bound progress channel handed to a tool for the duration of one call.
/// Sends are best-effort; a closed or absent receiver never fails the tool.
#[derive(Clone)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ToolProgress>>,
    tool_call_id: String,
    tool_name: String,
}

impl ProgressSink {
    pub fn new(
        tx: mpsc::Sender<ToolProgress>,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self {
            tx: Some(tx),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
        }
    }

    /// A sink that discards every update.
    pub fn disabled() -> Self {
        Self {
            tx: None,
            tool_call_id: String::new(),
            tool_name: String::new(),
        }
    }

    pub async fn send(&self, partial: ToolResult) {
        if let Some(tx) = &self.tx {
            let _ = tx
                .send(ToolProgress {
                    tool_call_id: self.tool_call_id.clone(),
                    tool_name: self.tool_name.clone(),
                    partial,
                })
                .await;
        }
    }
}

/// Per-call execution context: the call id, a progress sink, and the
/// cancellation token the tool must observe at its own suspension points.
#[derive(Clone)]
pub struct ToolContext {
    pub tool_call_id: String,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
}

impl ToolContext {
    /// Context with no progress consumer and a fresh token — test helper.
    pub fn detached(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            progress: ProgressSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }
}

/// Trait every tool implements: a capability set, not an inheritance tree.
///
/// Argument validation happens in the dispatcher before `execute` is
/// entered, so implementations may assume the declared required fields are
/// present with the declared primitive types.  Returned errors are
/// translated to error results by the dispatcher; they never abort the
/// conversation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable display label.
    fn label(&self) -> &str;

    /// Name, description, and JSON-Schema parameters as shown to the model.
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool.  Must be cancellable via `ctx.cancel`.
    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
