// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use bosun_model::ToolDefinition;

use crate::args::check_against_schema;
use crate::tool::{ProgressSink, Tool, ToolContext, ToolInvocation, ToolResult};

/// Central registry holding all available tools.
///
/// Dispatch enforces the uniform failure policy: unknown tools, invalid
/// arguments, execution errors, and cancellation all come back as an error
/// [`ToolResult`] — the conversation continues, the model sees the message.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools
            .insert(tool.definition().name, Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.definition().name, tool);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Definitions for all registered tools, sorted by name so the order
    /// sent to the provider is stable.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// A copy of this registry with the named tool removed.  Used when
    /// building sub-agent registries (the task tool never hands itself down).
    pub fn without(&self, name: &str) -> Self {
        let mut tools = self.tools.clone();
        tools.remove(name);
        Self { tools }
    }

    /// A copy restricted to the given tool names.  Names that do not exist
    /// are ignored with a warning.
    pub fn restricted_to(&self, allowed: &[String]) -> Self {
        let mut tools = HashMap::new();
        for name in allowed {
            match self.tools.get(name) {
                Some(t) => {
                    tools.insert(name.clone(), Arc::clone(t));
                }
                None => warn!(tool = %name, "allowed tool is not registered — ignoring"),
            }
        }
        Self { tools }
    }

    /// Dispatch one invocation: argument validation, execution, and error
    /// translation.  Always returns a result — never propagates.
    pub async fn dispatch(&self, inv: &ToolInvocation, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.lookup(&inv.tool_name) else {
            return ToolResult::error(format!("unknown tool: {}", inv.tool_name));
        };

        if let Err(e) = check_against_schema(&tool.definition().parameters, &inv.arguments) {
            return ToolResult::error(format!("invalid arguments for {}: {e}", inv.tool_name));
        }

        // Race execution against the cancellation token so a tool that
        // ignores its token still terminates promptly on abort.
        tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                ToolResult::error(format!("{} aborted", inv.tool_name))
            }
            outcome = tool.execute(ctx, &inv.arguments) => match outcome {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %inv.tool_name, error = %e, "tool execution failed");
                    ToolResult::error(format!("{} failed: {e}", inv.tool_name))
                }
            }
        }
    }

    /// Dispatch with a freshly bound context — convenience for callers that
    /// do not stream progress.
    pub async fn dispatch_detached(
        &self,
        inv: &ToolInvocation,
        cancel: tokio_util::sync::CancellationToken,
    ) -> ToolResult {
        let ctx = ToolContext {
            tool_call_id: inv.tool_call_id.clone(),
            progress: ProgressSink::disabled(),
            cancel,
        };
        self.dispatch(inv, &ctx).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
