// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod details;
mod mock;
mod provider;
mod types;

pub use details::{BatchCallResult, SubAgentResult, TodoItem, ToolResultDetails};
pub use mock::{EchoProvider, ScriptedProvider};
pub use provider::{ModelProvider, ResponseStream};
pub use types::{
    new_short_id, Attachment, CompletionRequest, ContentBlock, CostBreakdown, Message,
    MessageBody, ResponseEvent, Role, StopReason, StreamOptions, ThinkingLevel, ToolContent,
    ToolDefinition, Usage,
};
