// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use bosun_model::{new_short_id, BatchCallResult, ToolContent, ToolDefinition, ToolResultDetails};

use crate::registry::ToolRegistry;
use crate::tool::{Tool, ToolContext, ToolInvocation, ToolResult};

const MAX_INVOCATIONS: usize = 25;

/// Tools that may never appear inside a batch: `batch` itself (recursive
/// fan-out) and `task` (uncontrolled sub-agent explosion).
const FORBIDDEN: &[&str] = &["batch", "task"];

/// Parallel fan-out over independent tool calls.
///
/// Holds the registry of *dispatchable* tools — built before `batch` and
/// `task` are registered, so the forbidden tools are structurally absent as
/// well as rejected by name.
pub struct BatchTool {
    inner: Arc<ToolRegistry>,
}

impl BatchTool {
    pub fn new(inner: Arc<ToolRegistry>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Tool for BatchTool {
    fn label(&self) -> &str {
        "batch"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "batch".into(),
            description: format!(
                "Run up to {MAX_INVOCATIONS} independent tool calls concurrently and \
                 return their results in declared order. Each invocation names a tool \
                 and its input object. The tools 'batch' and 'task' are not allowed \
                 inside a batch. A failing invocation does not affect the others."
            ),
            parameters: json!({
                "type": "object",
                "properties": {
                    "invocations": {
                        "type": "array",
                        "description": "Tool calls to run concurrently",
                        "items": {
                            "type": "object",
                            "properties": {
                                "tool": { "type": "string" },
                                "input": { "type": "object" }
                            },
                            "required": ["tool", "input"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["invocations"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult> {
        // Validation failures return immediately; nothing is spawned.
        let invocations = match parse_invocations(&self.inner, args) {
            Ok(i) => i,
            Err(msg) => return Ok(ToolResult::error(msg)),
        };

        debug!(count = invocations.len(), "batch dispatch");

        // All invocations run concurrently; each task owns a clone of the
        // registry handle and observes the caller's cancellation token.
        let mut handles = Vec::with_capacity(invocations.len());
        for (tool, input) in invocations.clone() {
            let registry = Arc::clone(&self.inner);
            let cancel = ctx.cancel.clone();
            handles.push(tokio::spawn(async move {
                let inv = ToolInvocation {
                    tool_call_id: new_short_id(),
                    tool_name: tool,
                    arguments: input,
                };
                registry.dispatch_detached(&inv, cancel).await
            }));
        }

        // Await in declared order; a panic in one task is captured as that
        // invocation's failure and the rest keep their own outcomes.
        let mut results = Vec::with_capacity(handles.len());
        for (handle, (tool, _)) in handles.into_iter().zip(invocations.iter()) {
            let result = match handle.await {
                Ok(r) => BatchCallResult {
                    tool: tool.clone(),
                    success: !r.is_error,
                    output: r.text(),
                    error: r.is_error.then(|| r.text()),
                },
                Err(e) => BatchCallResult {
                    tool: tool.clone(),
                    success: false,
                    output: String::new(),
                    error: Some(format!("invocation panicked: {e}")),
                },
            };
            results.push(result);
        }

        Ok(summarize(results))
    }
}

fn parse_invocations(
    registry: &ToolRegistry,
    args: &Value,
) -> Result<Vec<(String, Value)>, String> {
    let list = args
        .get("invocations")
        .and_then(Value::as_array)
        .ok_or("missing 'invocations' array")?;
    if list.is_empty() {
        return Err("batch requires at least one invocation".into());
    }
    if list.len() > MAX_INVOCATIONS {
        return Err(format!(
            "batch supports at most {MAX_INVOCATIONS} invocations, got {}",
            list.len()
        ));
    }

    let mut parsed = Vec::with_capacity(list.len());
    for (i, entry) in list.iter().enumerate() {
        let tool = entry
            .get("tool")
            .and_then(Value::as_str)
            .ok_or_else(|| format!("invocation {i} is missing 'tool'"))?;
        let input = entry
            .get("input")
            .filter(|v| v.is_object())
            .ok_or_else(|| format!("invocation {i} is missing an 'input' object"))?;
        if FORBIDDEN.contains(&tool) {
            return Err(format!("tool '{tool}' is not allowed inside a batch"));
        }
        if registry.lookup(tool).is_none() {
            return Err(format!("unknown tool in batch: {tool}"));
        }
        parsed.push((tool.to_string(), input.clone()));
    }
    Ok(parsed)
}

fn summarize(results: Vec<BatchCallResult>) -> ToolResult {
    let total = results.len();
    let succeeded = results.iter().filter(|r| r.success).count();
    let failed = total - succeeded;

    let mut lines = vec![format!("{succeeded}/{total} succeeded, {failed} failed")];
    for r in &results {
        let status = if r.success { "ok" } else { "failed" };
        let detail = if r.success {
            first_line(&r.output)
        } else {
            first_line(r.error.as_deref().unwrap_or(""))
        };
        lines.push(format!("- {} [{status}] {detail}", r.tool));
    }

    ToolResult {
        content: vec![ToolContent::text(lines.join("\n"))],
        details: Some(ToolResultDetails::Batch(results)),
        is_error: false,
    }
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    /// Reads from an in-memory "filesystem": fails on paths containing "nope".
    struct FakeReadTool;

    #[async_trait]
    impl Tool for FakeReadTool {
        fn label(&self) -> &str {
            "read"
        }
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "read".into(),
                description: "reads a file".into(),
                parameters: json!({
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"]
                }),
            }
        }
        async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult> {
            let path = args["path"].as_str().unwrap_or("");
            if path.contains("nope") {
                anyhow::bail!("no such file: {path}")
            }
            Ok(ToolResult::ok(format!("contents of {path}")))
        }
    }

    fn batch_tool() -> BatchTool {
        let mut inner = ToolRegistry::new();
        inner.register(FakeReadTool);
        BatchTool::new(Arc::new(inner))
    }

    fn run_args(invocations: Value) -> Value {
        json!({ "invocations": invocations })
    }

    #[tokio::test]
    async fn partial_failure_isolates_invocations() {
        let tool = batch_tool();
        let out = tool
            .execute(
                &ToolContext::detached("b1"),
                &run_args(json!([
                    { "tool": "read", "input": { "path": "exists.txt" } },
                    { "tool": "read", "input": { "path": "nope.txt" } }
                ])),
            )
            .await
            .unwrap();

        assert!(!out.is_error);
        assert!(out.text().contains("1/2 succeeded, 1 failed"), "{}", out.text());
        match out.details {
            Some(ToolResultDetails::Batch(results)) => {
                assert_eq!(results.len(), 2);
                assert!(results[0].success);
                assert!(!results[1].success);
                assert!(results[1].error.as_deref().unwrap().contains("no such file"));
            }
            other => panic!("expected batch details, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn results_keep_declared_order() {
        let tool = batch_tool();
        let out = tool
            .execute(
                &ToolContext::detached("b1"),
                &run_args(json!([
                    { "tool": "read", "input": { "path": "a.txt" } },
                    { "tool": "read", "input": { "path": "b.txt" } },
                    { "tool": "read", "input": { "path": "c.txt" } }
                ])),
            )
            .await
            .unwrap();
        match out.details {
            Some(ToolResultDetails::Batch(results)) => {
                let outputs: Vec<_> = results.iter().map(|r| r.output.as_str()).collect();
                assert_eq!(
                    outputs,
                    vec!["contents of a.txt", "contents of b.txt", "contents of c.txt"]
                );
            }
            other => panic!("expected batch details, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_list_rejected() {
        let tool = batch_tool();
        let out = tool
            .execute(&ToolContext::detached("b1"), &run_args(json!([])))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text().contains("at least one"));
    }

    #[tokio::test]
    async fn over_limit_rejected() {
        let tool = batch_tool();
        let invocations: Vec<Value> = (0..26)
            .map(|i| json!({ "tool": "read", "input": { "path": format!("{i}.txt") } }))
            .collect();
        let out = tool
            .execute(&ToolContext::detached("b1"), &run_args(json!(invocations)))
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text().contains("at most 25"));
    }

    #[tokio::test]
    async fn forbidden_tools_rejected() {
        let tool = batch_tool();
        for forbidden in ["batch", "task"] {
            let out = tool
                .execute(
                    &ToolContext::detached("b1"),
                    &run_args(json!([{ "tool": forbidden, "input": {} }])),
                )
                .await
                .unwrap();
            assert!(out.is_error);
            assert!(out.text().contains("not allowed"), "{}", out.text());
        }
    }

    #[tokio::test]
    async fn unknown_tool_rejected_before_spawn() {
        let tool = batch_tool();
        let out = tool
            .execute(
                &ToolContext::detached("b1"),
                &run_args(json!([
                    { "tool": "read", "input": { "path": "a.txt" } },
                    { "tool": "ghost", "input": {} }
                ])),
            )
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text().contains("unknown tool in batch: ghost"));
        // validation failure → no details list at all
        assert!(out.details.is_none());
    }
}
