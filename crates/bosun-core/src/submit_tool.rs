// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use bosun_model::ToolDefinition;
use bosun_schema::{jtd_to_json_schema, SchemaError};
use bosun_tools::{Tool, ToolContext, ToolResult};

/// Final status a sub-agent reports through `submit_result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    Success,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SubmittedResult {
    pub payload: Value,
    pub status: SubmitStatus,
    pub error: Option<String>,
}

/// Shared slot the submit tool writes into and the owning turn loop polls
/// after each tool phase.  A set slot terminates the sub-agent run.
#[derive(Clone, Default)]
pub struct SubmitSlot {
    inner: Arc<Mutex<Option<SubmittedResult>>>,
}

impl SubmitSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, result: SubmittedResult) {
        *self.inner.lock().expect("submit slot poisoned") = Some(result);
    }

    pub fn take(&self) -> Option<SubmittedResult> {
        self.inner.lock().expect("submit slot poisoned").take()
    }

    pub fn is_set(&self) -> bool {
        self.inner.lock().expect("submit slot poisoned").is_some()
    }
}

/// Terminal tool offered to sub-agents only.
///
/// When the agent definition carries a JTD output schema, a `success`
/// submission is validated against it; a failing payload comes back as an
/// error result listing every violation, and the task stays open until the
/// model submits a valid result (or aborts).
pub struct SubmitResultTool {
    /// JSON Schema converted from the definition's JTD contract, when any.
    schema: Option<Value>,
    slot: SubmitSlot,
}

impl SubmitResultTool {
    /// Build the tool, converting the JTD contract up front so a broken
    /// schema surfaces at construction rather than mid-run.
    pub fn new(output_jtd: Option<&Value>, slot: SubmitSlot) -> Result<Self, SchemaError> {
        let schema = match output_jtd {
            Some(jtd) => Some(jtd_to_json_schema(jtd)?),
            None => None,
        };
        Ok(Self { schema, slot })
    }
}

#[async_trait]
impl Tool for SubmitResultTool {
    fn label(&self) -> &str {
        "submit_result"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "submit_result".into(),
            description: "Submit the final result of your task. Call this exactly once \
                 when the task is complete (status=success) or cannot be completed \
                 (status=aborted). If the result fails schema validation you will \
                 receive the validation errors and must call submit_result again \
                 with a corrected payload."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "result": {
                        "description": "The final result payload (any JSON value)"
                    },
                    "status": {
                        "type": "string",
                        "enum": ["success", "aborted"]
                    },
                    "error": {
                        "type": "string",
                        "description": "What prevented completion (status=aborted)"
                    }
                },
                "required": ["status"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult> {
        let status = match bosun_tools::args::required_str(args, "status")? {
            "success" => SubmitStatus::Success,
            "aborted" => SubmitStatus::Aborted,
            other => {
                return Ok(ToolResult::error(format!(
                    "invalid status '{other}': expected 'success' or 'aborted'"
                )))
            }
        };
        let payload = args.get("result").cloned().unwrap_or(Value::Null);
        let error = bosun_tools::args::optional_str(args, "error").map(str::to_string);

        if status == SubmitStatus::Success {
            if let Some(schema) = &self.schema {
                if let Err(errors) = bosun_schema::validate(schema, &payload) {
                    // Task stays open: the slot is not written.
                    let listing: Vec<String> =
                        errors.iter().map(|e| format!("- {e}")).collect();
                    return Ok(ToolResult::error(format!(
                        "result does not match the required output schema:\n{}\n\
                         Fix the payload and call submit_result again.",
                        listing.join("\n")
                    )));
                }
            }
        }

        debug!(?status, "sub-agent submitted result");
        self.slot.set(SubmittedResult {
            payload,
            status,
            error,
        });
        Ok(ToolResult::ok("result accepted"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_with_schema() -> (SubmitResultTool, SubmitSlot) {
        let slot = SubmitSlot::new();
        let jtd = json!({
            "properties": {
                "verdict": { "enum": ["approve", "reject"] },
                "notes": { "type": "string" }
            }
        });
        let tool = SubmitResultTool::new(Some(&jtd), slot.clone()).unwrap();
        (tool, slot)
    }

    #[tokio::test]
    async fn valid_success_fills_slot() {
        let (tool, slot) = tool_with_schema();
        let out = tool
            .execute(
                &ToolContext::detached("s1"),
                &json!({
                    "status": "success",
                    "result": { "verdict": "approve", "notes": "fine" }
                }),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        let submitted = slot.take().expect("slot must be set");
        assert_eq!(submitted.status, SubmitStatus::Success);
        assert_eq!(submitted.payload["verdict"], "approve");
    }

    #[tokio::test]
    async fn invalid_payload_keeps_task_open() {
        let (tool, slot) = tool_with_schema();
        let out = tool
            .execute(
                &ToolContext::detached("s1"),
                &json!({
                    "status": "success",
                    "result": { "verdict": "maybe", "notes": "?" }
                }),
            )
            .await
            .unwrap();
        assert!(out.is_error);
        assert!(out.text().contains("does not match"));
        assert!(out.text().contains("call submit_result again"));
        assert!(!slot.is_set(), "invalid submission must not set the slot");
    }

    #[tokio::test]
    async fn aborted_skips_validation() {
        let (tool, slot) = tool_with_schema();
        let out = tool
            .execute(
                &ToolContext::detached("s1"),
                &json!({ "status": "aborted", "error": "blocked on missing file" }),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        let submitted = slot.take().unwrap();
        assert_eq!(submitted.status, SubmitStatus::Aborted);
        assert_eq!(submitted.error.as_deref(), Some("blocked on missing file"));
    }

    #[tokio::test]
    async fn no_schema_accepts_any_payload() {
        let slot = SubmitSlot::new();
        let tool = SubmitResultTool::new(None, slot.clone()).unwrap();
        let out = tool
            .execute(
                &ToolContext::detached("s1"),
                &json!({ "status": "success", "result": [1, 2, 3] }),
            )
            .await
            .unwrap();
        assert!(!out.is_error);
        assert_eq!(slot.take().unwrap().payload, json!([1, 2, 3]));
    }

    #[test]
    fn broken_jtd_fails_at_construction() {
        let slot = SubmitSlot::new();
        let jtd = json!({ "type": "quaternion" });
        assert!(SubmitResultTool::new(Some(&jtd), slot).is_err());
    }
}
