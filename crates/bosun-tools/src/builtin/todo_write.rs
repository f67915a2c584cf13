// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use bosun_model::{TodoItem, ToolDefinition, ToolResultDetails};

use crate::todo::TodoState;
use crate::tool::{Tool, ToolContext, ToolResult};

pub struct TodoWriteTool {
    todos: TodoState,
}

impl TodoWriteTool {
    pub fn new(todos: TodoState) -> Self {
        Self { todos }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn label(&self) -> &str {
        "todo_write"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "todo_write".into(),
            description: "Create and manage a structured task list for the current session.\n\n\
                 ## Task Statuses\n\
                 - pending: Not yet started\n\
                 - in_progress: Currently being worked on (only ONE at a time)\n\
                 - completed: Finished successfully\n\
                 - cancelled: No longer relevant\n\n\
                 Calling todo_write replaces the entire list (not a merge/patch). \
                 Each item requires a unique id, content, and status. \
                 Mark items complete immediately after finishing them."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "description": "Array of todo items to set (replaces existing list)",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "content": { "type": "string" },
                                "status": {
                                    "type": "string",
                                    "enum": ["pending", "in_progress", "completed", "cancelled"]
                                }
                            },
                            "required": ["id", "content", "status"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["todos"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult> {
        let todos_value = crate::args::required_array(args, "todos")?;

        let mut items: Vec<TodoItem> = Vec::with_capacity(todos_value.len());
        for item in todos_value {
            let id = item
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("todo item missing 'id'"))?
                .to_string();
            let content = item
                .get("content")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("todo '{id}' missing 'content'"))?
                .to_string();
            let status = item
                .get("status")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("todo '{id}' missing 'status'"))?
                .to_string();
            if !["pending", "in_progress", "completed", "cancelled"].contains(&status.as_str()) {
                return Ok(ToolResult::error(format!(
                    "invalid status '{status}' for todo '{id}'"
                )));
            }
            items.push(TodoItem {
                id,
                content,
                status,
            });
        }

        let in_progress_count = items.iter().filter(|t| t.status == "in_progress").count();
        if in_progress_count > 1 {
            return Ok(ToolResult::error(
                "at most one todo can be 'in_progress' at a time",
            ));
        }

        debug!(count = items.len(), "todo_write tool");
        self.todos.replace(items.clone());

        let summary = format_todos(&items);
        Ok(ToolResult {
            content: vec![bosun_model::ToolContent::text(summary)],
            details: Some(ToolResultDetails::Todos(items)),
            is_error: false,
        })
    }
}

fn format_todos(items: &[TodoItem]) -> String {
    if items.is_empty() {
        return "Todo list cleared.".to_string();
    }
    let lines: Vec<String> = items
        .iter()
        .map(|t| {
            let icon = match t.status.as_str() {
                "completed" => "✓",
                "in_progress" => "→",
                "cancelled" => "✗",
                _ => "○",
            };
            format!("{icon} [{}] {}", t.id, t.content)
        })
        .collect();
    format!("Todos updated:\n{}", lines.join("\n"))
}
