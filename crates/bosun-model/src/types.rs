use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::details::ToolResultDetails;

/// Generate a short random identifier: the first 12 hex characters of a
/// v4 UUID.  Used for message ids, journal entry ids, and tool-call ids
/// synthesised by the core.
pub fn new_short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

// ─── Stop reasons, usage, thinking ───────────────────────────────────────────

/// Why an assistant turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Natural end of the response.
    Stop,
    /// The model requested one or more tool calls.
    ToolUse,
    /// The provider cut the response at its output-token limit.
    Length,
    /// The stream errored mid-turn; see `error_message` on the message.
    Error,
    /// The run was cancelled by the caller.
    Aborted,
}

/// Dollar cost of one turn, split by token class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub cache_read: f64,
    pub cache_write: f64,
}

impl CostBreakdown {
    pub fn total(&self) -> f64 {
        self.input + self.output + self.cache_read + self.cache_write
    }
}

/// Token usage reported by the provider for one turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Tokens served from the provider's prompt cache (read hit).
    pub cache_read_tokens: u64,
    /// Tokens written into the provider's prompt cache (write/creation).
    pub cache_write_tokens: u64,
    /// Provider-reported total.  Authoritative when non-zero; otherwise the
    /// total is the sum of the four components.
    pub total_tokens: u64,
    #[serde(default)]
    pub cost: CostBreakdown,
}

impl Usage {
    /// The authoritative total: the provider's figure when it reported one,
    /// the component sum otherwise.
    pub fn total(&self) -> u64 {
        if self.total_tokens > 0 {
            self.total_tokens
        } else {
            self.input_tokens
                + self.output_tokens
                + self.cache_read_tokens
                + self.cache_write_tokens
        }
    }
}

/// Provider-agnostic reasoning-effort setting.  Interpretation is up to the
/// provider; the surface is stable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Off,
    Minimal,
    Low,
    #[default]
    Medium,
    High,
    Xhigh,
}

// ─── Content blocks ──────────────────────────────────────────────────────────

/// One ordered block inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        /// Parsed JSON argument object.
        arguments: serde_json::Value,
    },
}

/// One content item in a tool result.  The core is text-only; richer media
/// is a renderer concern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ToolContent {
    Text { text: String },
}

impl ToolContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn as_text(&self) -> &str {
        match self {
            Self::Text { text } => text,
        }
    }
}

/// A file or snippet attached to a user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Inline content (text, or a data URL for binary payloads).
    pub content: String,
}

// ─── Messages ────────────────────────────────────────────────────────────────

/// Role tag of a message, used for turn-boundary detection and display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    Custom,
    BashExecution,
    BranchSummary,
    CompactionSummary,
}

/// A single message in the conversation.  Every message carries a stable
/// logical id and a wall-clock timestamp; the variant payload lives in
/// [`MessageBody`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub body: MessageBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "camelCase")]
pub enum MessageBody {
    User {
        text: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        attachments: Vec<Attachment>,
    },
    #[serde(rename_all = "camelCase")]
    Assistant {
        blocks: Vec<ContentBlock>,
        stop_reason: StopReason,
        usage: Usage,
        provider: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: Vec<ToolContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<ToolResultDetails>,
        is_error: bool,
    },
    /// Auxiliary free-form entry replayed from the journal.
    Custom {
        tag: String,
        text: String,
    },
    /// A shell command the user ran directly, recorded for context.
    #[serde(rename_all = "camelCase")]
    BashExecution {
        command: String,
        output: String,
        exit_code: i32,
    },
    /// Summary of an abandoned branch, inserted when the user forks history.
    BranchSummary {
        summary: String,
    },
    /// Synthetic message standing in for compacted-away history.
    #[serde(rename_all = "camelCase")]
    CompactionSummary {
        summary: String,
        tokens_before: u64,
    },
}

impl Message {
    fn stamp(body: MessageBody) -> Self {
        Self {
            id: new_short_id(),
            timestamp: Utc::now(),
            body,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::stamp(MessageBody::User {
            text: text.into(),
            attachments: Vec::new(),
        })
    }

    pub fn user_with_attachments(text: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self::stamp(MessageBody::User {
            text: text.into(),
            attachments,
        })
    }

    pub fn assistant(
        blocks: Vec<ContentBlock>,
        stop_reason: StopReason,
        usage: Usage,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self::stamp(MessageBody::Assistant {
            blocks,
            stop_reason,
            usage,
            provider: provider.into(),
            model: model.into(),
            error_message: None,
        })
    }

    /// Plain-text assistant message, used by tests and synthetic turns.
    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::assistant(
            vec![ContentBlock::Text { text: text.into() }],
            StopReason::Stop,
            Usage::default(),
            "",
            "",
        )
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: Vec<ToolContent>,
        details: Option<ToolResultDetails>,
        is_error: bool,
    ) -> Self {
        Self::stamp(MessageBody::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content,
            details,
            is_error,
        })
    }

    /// Synthetic result recorded for a tool call that was cancelled before
    /// it produced one, keeping call/result pairing intact after an abort.
    pub fn aborted_tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
    ) -> Self {
        Self::tool_result(
            tool_call_id,
            tool_name,
            vec![ToolContent::text("[aborted]")],
            None,
            true,
        )
    }

    pub fn bash_execution(
        command: impl Into<String>,
        output: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self::stamp(MessageBody::BashExecution {
            command: command.into(),
            output: output.into(),
            exit_code,
        })
    }

    pub fn branch_summary(summary: impl Into<String>) -> Self {
        Self::stamp(MessageBody::BranchSummary {
            summary: summary.into(),
        })
    }

    pub fn compaction_summary(summary: impl Into<String>, tokens_before: u64) -> Self {
        Self::stamp(MessageBody::CompactionSummary {
            summary: summary.into(),
            tokens_before,
        })
    }

    pub fn custom(tag: impl Into<String>, text: impl Into<String>) -> Self {
        Self::stamp(MessageBody::Custom {
            tag: tag.into(),
            text: text.into(),
        })
    }

    pub fn role(&self) -> Role {
        match &self.body {
            MessageBody::User { .. } => Role::User,
            MessageBody::Assistant { .. } => Role::Assistant,
            MessageBody::ToolResult { .. } => Role::ToolResult,
            MessageBody::Custom { .. } => Role::Custom,
            MessageBody::BashExecution { .. } => Role::BashExecution,
            MessageBody::BranchSummary { .. } => Role::BranchSummary,
            MessageBody::CompactionSummary { .. } => Role::CompactionSummary,
        }
    }

    /// A message safe to cut *at* during compaction: cutting here can never
    /// separate an assistant tool call from its paired result.
    pub fn is_turn_boundary(&self) -> bool {
        matches!(
            self.role(),
            Role::User | Role::BashExecution | Role::BranchSummary
        )
    }

    /// Tool-call blocks of an assistant message, in emission order.
    /// Empty for every other variant.
    pub fn tool_calls(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        match &self.body {
            MessageBody::Assistant { blocks, .. } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some((id.as_str(), name.as_str(), arguments)),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Concatenated visible text of the message (reasoning excluded).
    pub fn text(&self) -> String {
        match &self.body {
            MessageBody::User { text, .. } => text.clone(),
            MessageBody::Assistant { blocks, .. } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            MessageBody::ToolResult { content, .. } => content
                .iter()
                .map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("\n"),
            MessageBody::Custom { text, .. } => text.clone(),
            MessageBody::BashExecution {
                command, output, ..
            } => format!("$ {command}\n{output}"),
            MessageBody::BranchSummary { summary } => summary.clone(),
            MessageBody::CompactionSummary { summary, .. } => summary.clone(),
        }
    }

    /// Character count feeding the `chars / 4` token estimate: text content
    /// plus tool-call argument strings.
    pub fn estimated_chars(&self) -> usize {
        let arg_chars: usize = self
            .tool_calls()
            .iter()
            .map(|(_, name, args)| name.len() + args.to_string().len())
            .sum();
        let reasoning_chars: usize = match &self.body {
            MessageBody::Assistant { blocks, .. } => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Reasoning { text } => Some(text.len()),
                    _ => None,
                })
                .sum(),
            _ => 0,
        };
        self.text().len() + arg_chars + reasoning_chars
    }

    /// Approximate token count used for context management (4 chars/token).
    pub fn approx_tokens(&self) -> u64 {
        ((self.estimated_chars() / 4).max(1)) as u64
    }
}

// ─── Provider request/response ───────────────────────────────────────────────

/// A tool definition provided to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Provider-agnostic stream options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamOptions {
    pub thinking: ThinkingLevel,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    /// System prompt preamble.  Kept out of the message list: it is
    /// assembled per request and never journaled.
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub options: StreamOptions,
}

/// A single streamed event from the model.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the model.
    TextDelta(String),
    /// A reasoning delta from the model (extended thinking API).
    ReasoningDelta(String),
    /// Partial tool-call data.  Providers interleave chunks for different
    /// parallel calls by `index`; `id`/`name` arrive once, `arguments`
    /// accumulates across deltas.
    ToolCallDelta {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics for the turn.
    Usage(Usage),
    /// The provider's stop reason for the turn.
    Stop(StopReason),
    /// The stream finished normally.
    Done,
    /// The stream failed mid-turn; the message finalises with
    /// [`StopReason::Error`].
    Error(String),
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
