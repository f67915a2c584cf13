// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;

use crate::{
    provider::ResponseStream, CompletionRequest, MessageBody, ModelProvider, ResponseEvent,
    StopReason, Usage,
};

const DEFAULT_CONTEXT_WINDOW: usize = 128_000;

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct EchoProvider;

#[async_trait]
impl ModelProvider for EchoProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }
    fn context_window(&self) -> usize {
        DEFAULT_CONTEXT_WINDOW
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find_map(|m| match &m.body {
                MessageBody::User { text, .. } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "[no input]".to_string());

        let events: Vec<anyhow::Result<ResponseEvent>> = vec![
            Ok(ResponseEvent::TextDelta(format!("MOCK: {reply}"))),
            Ok(ResponseEvent::Usage(Usage {
                input_tokens: 10,
                output_tokens: 10,
                ..Default::default()
            })),
            Ok(ResponseEvent::Stop(StopReason::Stop)),
            Ok(ResponseEvent::Done),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// A pre-scripted mock provider.  Each call to `stream` pops the next
/// response script from the front of the queue.  This lets tests specify
/// exact event sequences – including tool calls and mid-stream errors –
/// without network access.
pub struct ScriptedProvider {
    scripts: Arc<Mutex<Vec<Vec<ResponseEvent>>>>,
    context_window: usize,
    /// When true, `stream` returns a never-yielding stream once the scripts
    /// are exhausted — used to exercise abort-while-streaming paths.
    stall_when_exhausted: bool,
    /// The last `CompletionRequest` seen by this provider.
    /// Written on each `stream()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<CompletionRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from a list of response scripts.
    /// The outer `Vec` is the ordered list of calls; the inner `Vec` is the
    /// sequence of [`ResponseEvent`]s emitted for that call.
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            context_window: DEFAULT_CONTEXT_WINDOW,
            stall_when_exhausted: false,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the advertised context window (for compaction tests).
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = tokens;
        self
    }

    /// After the scripts run out, hang forever instead of replying.
    pub fn stall_when_exhausted(mut self) -> Self {
        self.stall_when_exhausted = true;
        self
    }

    /// Convenience: provider that always returns a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        Self::new(vec![Self::text_script(reply)])
    }

    /// Convenience: provider that returns a tool call followed by a text reply.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            Self::tool_call_script(tool_id, tool_name, args_json),
            Self::text_script(final_text),
        ])
    }

    /// One text-only turn ending with `Stop`.
    pub fn text_script(reply: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(reply.into()),
            ResponseEvent::Usage(Usage {
                input_tokens: 5,
                output_tokens: 5,
                ..Default::default()
            }),
            ResponseEvent::Stop(StopReason::Stop),
            ResponseEvent::Done,
        ]
    }

    /// One turn requesting a single tool call.
    pub fn tool_call_script(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
    ) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::ToolCallDelta {
                index: 0,
                id: tool_id.into(),
                name: tool_name.into(),
                arguments: args_json.into(),
            },
            ResponseEvent::Stop(StopReason::ToolUse),
            ResponseEvent::Done,
        ]
    }

    /// One turn that fails mid-stream after a partial text delta.
    pub fn error_script(partial: impl Into<String>, message: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(partial.into()),
            ResponseEvent::Error(message.into()),
        ]
    }

    /// One turn cut off at the provider's output-token limit.
    pub fn length_script(partial: impl Into<String>) -> Vec<ResponseEvent> {
        vec![
            ResponseEvent::TextDelta(partial.into()),
            ResponseEvent::Stop(StopReason::Length),
            ResponseEvent::Done,
        ]
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock-model"
    }
    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn stream(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        *self.last_request.lock().unwrap() = Some(req);
        let events = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                if self.stall_when_exhausted {
                    return Ok(Box::pin(stream::pending()));
                }
                // Default fallback when all scripts are consumed
                vec![
                    ResponseEvent::TextDelta("[no more scripts]".into()),
                    ResponseEvent::Stop(StopReason::Stop),
                    ResponseEvent::Done,
                ]
            } else {
                scripts.remove(0)
            }
        };
        let wrapped: Vec<anyhow::Result<ResponseEvent>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(wrapped)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
