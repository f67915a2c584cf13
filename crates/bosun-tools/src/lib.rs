// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod args;
pub mod builtin;
pub mod registry;
pub mod todo;
pub mod tool;

pub use registry::ToolRegistry;
pub use todo::TodoState;
pub use tool::{ProgressSink, Tool, ToolContext, ToolInvocation, ToolProgress, ToolResult};

pub use builtin::batch::BatchTool;
pub use builtin::todo_write::TodoWriteTool;
