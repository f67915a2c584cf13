// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bosun_config::Config;
use bosun_model::{
    new_short_id, CompletionRequest, ContentBlock, Message, MessageBody, ModelProvider,
    ResponseEvent, StopReason, StreamOptions, ThinkingLevel, Usage,
};
use bosun_tools::{ProgressSink, ToolContext, ToolInvocation, ToolRegistry, ToolResult};

use crate::compact::{
    build_summary_prompt, context_tokens, prune_tool_results, select_cut_index, should_compact,
};
use crate::events::AgentEvent;
use crate::journal::Journal;
use crate::session::Session;
use crate::submit_tool::{SubmitSlot, SubmittedResult};

/// Everything an [`Agent`] needs to run.  Sub-agents are built from the same
/// options with a deeper `depth`, their own journal, and a submit slot.
pub struct AgentOptions {
    pub config: Arc<Config>,
    pub provider: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    /// System prompt preamble (instructions + agent prompt), already
    /// assembled by [`crate::prompts::system_preamble`].
    pub system_prompt: Option<String>,
    pub thinking: ThinkingLevel,
    pub journal: Option<Journal>,
    /// Sub-agent nesting depth.  0 for the top-level agent.
    pub depth: usize,
    /// Present for sub-agents whose run terminates through `submit_result`.
    pub submit_slot: Option<SubmitSlot>,
}

/// How a run ended.
#[derive(Debug)]
pub struct RunOutcome {
    pub stop_reason: StopReason,
    /// Visible text of the final assistant message.
    pub final_text: String,
    /// Set when the run was terminated by a `submit_result` call.
    pub submitted: Option<SubmittedResult>,
    /// Sum of per-turn usage totals over the run.
    pub tokens_used: u64,
    pub turns: u32,
}

/// One finished assistant turn, before tool dispatch.
struct TurnResult {
    message: Message,
    stop_reason: StopReason,
    tool_calls: Vec<ToolInvocation>,
    usage_total: u64,
}

/// The core agent: owns a session and drives the model ↔ tool loop.
///
/// State machine per run: `Idle → Turn → (ToolPhase → Turn)* → Terminal`.
/// Every suspension point observes the run's cancellation token; tool
/// dispatch within a turn is sequential — concurrency enters only through
/// the batch tool and the parallel task tool.
pub struct Agent {
    session: Session,
    config: Arc<Config>,
    provider: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    system_prompt: Option<String>,
    thinking: ThinkingLevel,
    journal: Option<Journal>,
    depth: usize,
    submit_slot: Option<SubmitSlot>,
    /// User messages that arrived mid-run.  Strict queueing: drained only at
    /// the tool-phase → turn transition, never interleaved into a turn.
    follow_ups: VecDeque<Message>,
}

impl Agent {
    pub fn new(options: AgentOptions) -> Self {
        Self {
            session: Session::new(),
            config: options.config,
            provider: options.provider,
            tools: options.tools,
            system_prompt: options.system_prompt,
            thinking: options.thinking,
            journal: options.journal,
            depth: options.depth,
            submit_slot: options.submit_slot,
            follow_ups: VecDeque::new(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable session access for history seeding and replay.
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Queue a user message that arrived while a run is in progress.  It is
    /// delivered at the next turn transition.
    pub fn enqueue_follow_up(&mut self, text: impl Into<String>) {
        self.follow_ups.push_back(Message::user(text));
    }

    /// Switch the model provider for subsequent turns.  The change is
    /// recorded in the journal so resumed conversations replay with the
    /// right model.  Session history is preserved.
    pub fn set_model(
        &mut self,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<(), crate::journal::JournalError> {
        if let Some(journal) = &mut self.journal {
            journal.append(crate::journal::EntryPayload::ModelChange {
                provider: provider.name().to_string(),
                model: provider.model_name().to_string(),
            })?;
        }
        self.provider = provider;
        Ok(())
    }

    /// Change the reasoning-effort level for subsequent turns, recording the
    /// change in the journal.
    pub fn set_thinking(
        &mut self,
        level: ThinkingLevel,
    ) -> Result<(), crate::journal::JournalError> {
        if let Some(journal) = &mut self.journal {
            journal.append(crate::journal::EntryPayload::ThinkingLevelChange { level })?;
        }
        self.thinking = level;
        Ok(())
    }

    /// Rebuild the session from this agent's journal (resume).
    ///
    /// Replaces the in-memory history with the replayed context and applies
    /// a recorded thinking level.  Returns the last recorded model
    /// descriptor, if any, so the host can resolve a matching provider and
    /// call [`Agent::set_model`].
    pub fn load_history(&mut self) -> Result<Option<(String, String)>, crate::journal::JournalError> {
        let Some(journal) = &self.journal else {
            return Ok(None);
        };
        let replayed = journal.replay()?;
        self.session.replace(replayed.messages);
        if let Some(level) = replayed.thinking_level {
            self.thinking = level;
        }
        Ok(replayed.model)
    }

    /// Fork the conversation at `message_id`: history after that message is
    /// dropped, a branch marker is journaled, and an optional summary of the
    /// abandoned line is kept as context.  Replay follows the new branch
    /// (newest leaf wins).
    pub fn rewind(
        &mut self,
        message_id: &str,
        summary: Option<String>,
    ) -> Result<(), crate::journal::JournalError> {
        let Some(pos) = self.session.messages.iter().position(|m| m.id == message_id) else {
            return Ok(());
        };
        self.session.messages.truncate(pos + 1);

        let branch_id = match &mut self.journal {
            Some(journal) => journal.branch_from(message_id, summary.clone())?,
            None => bosun_model::new_short_id(),
        };
        if let Some(summary) = summary {
            // Reuse the branch entry id so replay and memory agree.
            self.session.push(Message {
                id: branch_id,
                timestamp: chrono::Utc::now(),
                body: MessageBody::BranchSummary { summary },
            });
        }
        Ok(())
    }

    /// Run the agent on one user prompt, streaming events through `tx`.
    pub async fn run(
        &mut self,
        user_text: &str,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        self.run_message(Message::user(user_text), tx, cancel).await
    }

    /// Like [`run`], for a caller-constructed user message (attachments).
    ///
    /// A journal failure here is fatal: the run refuses to start until the
    /// caller resolves it.
    pub async fn run_message(
        &mut self,
        user: Message,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> anyhow::Result<RunOutcome> {
        self.journal_message(&user)?;
        self.session.push(user);

        let _ = tx.send(AgentEvent::AgentStart).await;

        let mut tokens_used = 0u64;
        let mut turns = 0u32;
        let mut submitted: Option<SubmittedResult> = None;

        let (last_message, stop_reason) = loop {
            turns += 1;
            let _ = tx.send(AgentEvent::TurnStart).await;

            let turn = self.stream_one_turn(&tx, &cancel).await?;
            tokens_used += turn.usage_total;

            match turn.stop_reason {
                StopReason::ToolUse if !turn.tool_calls.is_empty() => {
                    let aborted = self.tool_phase(&tx, &cancel, &turn.tool_calls).await?;
                    if aborted {
                        break (turn.message, StopReason::Aborted);
                    }
                    if let Some(slot) = &self.submit_slot {
                        if slot.is_set() {
                            submitted = slot.take();
                            break (turn.message, StopReason::Stop);
                        }
                    }
                    if turns >= self.config.tasks.max_turns {
                        debug!(turns, "turn cap reached; ending run");
                        break (turn.message, StopReason::ToolUse);
                    }
                    self.maybe_compact().await?;
                    self.drain_follow_ups()?;
                }
                // A tool-use stop without any dispatchable calls cannot
                // continue the cycle; treat it as a normal stop.
                StopReason::ToolUse => break (turn.message, StopReason::Stop),
                other => break (turn.message, other),
            }
        };

        let final_text = last_message.text();
        let _ = tx.send(AgentEvent::TurnEnd(last_message)).await;
        // End-of-run compactor consult (same entry point as the mid-run
        // one).  A run that errored or was aborted is left alone.
        if !matches!(stop_reason, StopReason::Error | StopReason::Aborted) {
            self.maybe_compact().await?;
        }
        let _ = tx.send(AgentEvent::AgentEnd).await;

        Ok(RunOutcome {
            stop_reason,
            final_text,
            submitted,
            tokens_used,
            turns,
        })
    }

    // ── One streamed turn ─────────────────────────────────────────────────────

    async fn stream_one_turn(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> anyhow::Result<TurnResult> {
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            messages: self.session.snapshot(),
            tools: self.tools.definitions(),
            options: StreamOptions {
                thinking: self.thinking,
            },
        };

        // The message id and timestamp are fixed at the stub so every
        // update and the final version share one logical identity.
        let msg_id = new_short_id();
        let started_at = chrono::Utc::now();
        let _ = tx
            .send(AgentEvent::MessageStart(self.assistant_snapshot(
                &msg_id,
                started_at,
                "",
                "",
                &HashMap::new(),
                StopReason::Stop,
                Usage::default(),
                None,
            )))
            .await;

        let mut text = String::new();
        let mut reasoning = String::new();
        let mut pending: HashMap<u32, PendingToolCall> = HashMap::new();
        let mut usage = Usage::default();
        let mut stop: Option<StopReason> = None;
        let mut error_message: Option<String> = None;
        let mut aborted = cancel.is_cancelled();

        if !aborted {
            match self.provider.stream(request).await {
                Ok(mut stream) => loop {
                    let event = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            aborted = true;
                            break;
                        }
                        ev = stream.next() => ev,
                    };
                    match event {
                        None => break,
                        Some(Err(e)) => {
                            warn!(error = %e, "model stream failed mid-turn");
                            error_message = Some(e.to_string());
                            break;
                        }
                        Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                            text.push_str(&delta);
                            let _ = tx
                                .send(AgentEvent::MessageUpdate(self.assistant_snapshot(
                                    &msg_id,
                                    started_at,
                                    &text,
                                    &reasoning,
                                    &pending,
                                    StopReason::Stop,
                                    usage,
                                    None,
                                )))
                                .await;
                        }
                        Some(Ok(ResponseEvent::ReasoningDelta(delta))) => {
                            reasoning.push_str(&delta);
                            let _ = tx
                                .send(AgentEvent::MessageUpdate(self.assistant_snapshot(
                                    &msg_id,
                                    started_at,
                                    &text,
                                    &reasoning,
                                    &pending,
                                    StopReason::Stop,
                                    usage,
                                    None,
                                )))
                                .await;
                        }
                        Some(Ok(ResponseEvent::ToolCallDelta {
                            index,
                            id,
                            name,
                            arguments,
                        })) => {
                            let ptc = pending.entry(index).or_default();
                            if !id.is_empty() {
                                ptc.id = id;
                            }
                            if !name.is_empty() {
                                ptc.name = name;
                            }
                            ptc.args_buf.push_str(&arguments);
                        }
                        Some(Ok(ResponseEvent::Usage(u))) => usage = u,
                        Some(Ok(ResponseEvent::Stop(reason))) => stop = Some(reason),
                        Some(Ok(ResponseEvent::Error(msg))) => {
                            warn!(error = %msg, "provider reported a stream error");
                            error_message = Some(msg);
                            break;
                        }
                        Some(Ok(ResponseEvent::Done)) => break,
                        Some(Ok(ResponseEvent::TextDelta(_))) => {}
                    }
                },
                Err(e) => {
                    warn!(error = %e, "model request failed");
                    error_message = Some(e.to_string());
                }
            }
        }

        // Flush accumulated parallel tool calls, ordered by provider index.
        // Calls with an empty name cannot be dispatched and are dropped; an
        // empty id gets a synthetic fallback so pairing survives.
        let mut sorted: Vec<(u32, PendingToolCall)> = pending.drain().collect();
        sorted.sort_by_key(|(idx, _)| *idx);
        let mut tool_calls = Vec::new();
        for (i, (_, ptc)) in sorted.iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(tool_call_id = %ptc.id, "dropping tool call with empty name");
                continue;
            }
            let mut call = ptc.finish();
            if call.tool_call_id.is_empty() {
                call.tool_call_id = format!("tc-{}-{i}", new_short_id());
                warn!(
                    tool_name = %call.tool_name,
                    tool_call_id = %call.tool_call_id,
                    "tool call had empty id; generated synthetic id"
                );
            }
            tool_calls.push(call);
        }

        let stop_reason = if aborted {
            StopReason::Aborted
        } else if error_message.is_some() {
            StopReason::Error
        } else if !tool_calls.is_empty() {
            StopReason::ToolUse
        } else {
            stop.unwrap_or(StopReason::Stop)
        };

        // A turn that errored or was aborted dispatches nothing.
        if stop_reason != StopReason::ToolUse {
            tool_calls.clear();
        }

        // The final message is built from the repaired invocations so the
        // recorded tool-call ids always match the dispatched (and therefore
        // journaled) results.
        let mut blocks = Vec::new();
        if !reasoning.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text: reasoning.clone(),
            });
        }
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text: text.clone() });
        }
        for call in &tool_calls {
            blocks.push(ContentBlock::ToolCall {
                id: call.tool_call_id.clone(),
                name: call.tool_name.clone(),
                arguments: call.arguments.clone(),
            });
        }
        let message = Message {
            id: msg_id,
            timestamp: started_at,
            body: MessageBody::Assistant {
                blocks,
                stop_reason,
                usage,
                provider: self.provider.name().to_string(),
                model: self.provider.model_name().to_string(),
                error_message,
            },
        };

        self.journal_message(&message)?;
        self.session.push(message.clone());
        let _ = tx.send(AgentEvent::MessageEnd(message.clone())).await;

        Ok(TurnResult {
            message,
            stop_reason,
            tool_calls,
            usage_total: usage.total(),
        })
    }

    /// Build an assistant message from the current streaming state.
    #[allow(clippy::too_many_arguments)]
    fn assistant_snapshot(
        &self,
        id: &str,
        timestamp: chrono::DateTime<chrono::Utc>,
        text: &str,
        reasoning: &str,
        pending: &HashMap<u32, PendingToolCall>,
        stop_reason: StopReason,
        usage: Usage,
        error_message: Option<String>,
    ) -> Message {
        let mut blocks = Vec::new();
        if !reasoning.is_empty() {
            blocks.push(ContentBlock::Reasoning {
                text: reasoning.to_string(),
            });
        }
        if !text.is_empty() {
            blocks.push(ContentBlock::Text {
                text: text.to_string(),
            });
        }
        let mut sorted: Vec<(&u32, &PendingToolCall)> = pending.iter().collect();
        sorted.sort_by_key(|(idx, _)| **idx);
        for (_, ptc) in sorted {
            if ptc.name.is_empty() {
                continue;
            }
            let call = ptc.finish();
            blocks.push(ContentBlock::ToolCall {
                id: call.tool_call_id,
                name: call.tool_name,
                arguments: call.arguments,
            });
        }
        Message {
            id: id.to_string(),
            timestamp,
            body: MessageBody::Assistant {
                blocks,
                stop_reason,
                usage,
                provider: self.provider.name().to_string(),
                model: self.provider.model_name().to_string(),
                error_message,
            },
        }
    }

    // ── Tool phase ────────────────────────────────────────────────────────────

    /// Dispatch the turn's tool calls in block order.  Returns `true` when
    /// the run was aborted mid-phase; every outstanding call still receives
    /// a (synthetic) result and a matching `ToolExecutionEnd` event.
    async fn tool_phase(
        &mut self,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
        calls: &[ToolInvocation],
    ) -> anyhow::Result<bool> {
        let mut aborted = false;

        for call in calls {
            let _ = tx
                .send(AgentEvent::ToolExecutionStart {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            if aborted || cancel.is_cancelled() {
                aborted = true;
                let result = ToolResult::error(format!("{} aborted", call.tool_name));
                let _ = tx
                    .send(AgentEvent::ToolExecutionEnd {
                        tool_call_id: call.tool_call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        result,
                        is_error: true,
                    })
                    .await;
                let msg = Message::aborted_tool_result(&call.tool_call_id, &call.tool_name);
                self.journal_message(&msg)?;
                self.session.push(msg);
                continue;
            }

            let (progress_tx, mut progress_rx) = mpsc::channel(16);
            let ctx = ToolContext {
                tool_call_id: call.tool_call_id.clone(),
                progress: ProgressSink::new(progress_tx, &call.tool_call_id, &call.tool_name),
                cancel: cancel.child_token(),
            };

            // Forward progress while the tool runs so every update precedes
            // the matching end event.
            let tools = Arc::clone(&self.tools);
            let result = {
                let dispatch = tools.dispatch(call, &ctx);
                tokio::pin!(dispatch);
                loop {
                    tokio::select! {
                        r = &mut dispatch => break r,
                        Some(p) = progress_rx.recv() => {
                            let _ = tx
                                .send(AgentEvent::ToolExecutionUpdate {
                                    tool_call_id: p.tool_call_id,
                                    tool_name: p.tool_name,
                                    partial: p.partial,
                                })
                                .await;
                        }
                    }
                }
            };
            while let Ok(p) = progress_rx.try_recv() {
                let _ = tx
                    .send(AgentEvent::ToolExecutionUpdate {
                        tool_call_id: p.tool_call_id,
                        tool_name: p.tool_name,
                        partial: p.partial,
                    })
                    .await;
            }

            if cancel.is_cancelled() {
                aborted = true;
            }

            let _ = tx
                .send(AgentEvent::ToolExecutionEnd {
                    tool_call_id: call.tool_call_id.clone(),
                    tool_name: call.tool_name.clone(),
                    result: result.clone(),
                    is_error: result.is_error,
                })
                .await;

            let msg = Message::tool_result(
                &call.tool_call_id,
                &call.tool_name,
                result.content,
                result.details,
                result.is_error,
            );
            self.journal_message(&msg)?;
            self.session.push(msg);
        }

        Ok(aborted)
    }

    // ── Compaction ────────────────────────────────────────────────────────────

    /// The single compaction entry point, consulted after assistant turns.
    /// Pruning runs whenever enabled; summarising compaction only past the
    /// trigger threshold.
    async fn maybe_compact(&mut self) -> anyhow::Result<()> {
        let cc = self.config.compaction.clone();
        if cc.prune {
            let pruned = prune_tool_results(&mut self.session.messages, cc.keep_recent_tokens);
            if pruned > 0 {
                debug!(pruned, "pruned oversized tool results");
            }
        }
        if !cc.enabled {
            return Ok(());
        }
        let tokens = context_tokens(&self.session.messages);
        if !should_compact(tokens, self.provider.context_window(), cc.reserve_tokens) {
            return Ok(());
        }
        self.compact_now().await?;
        Ok(())
    }

    /// Explicit compaction command; shares the whole pipeline with the
    /// automatic trigger but skips the threshold check.
    pub async fn compact(&mut self) -> anyhow::Result<bool> {
        self.compact_now().await
    }

    async fn compact_now(&mut self) -> anyhow::Result<bool> {
        let keep = self.config.compaction.keep_recent_tokens;
        let cut = select_cut_index(&self.session.messages, keep);
        if cut == 0 {
            debug!("nothing to compact before the cut point");
            return Ok(false);
        }

        let tokens_before = context_tokens(&self.session.messages);
        let prompt = build_summary_prompt(&self.session.messages[..cut]);
        // A failed or empty summary falls back to the emergency notice:
        // lossy, but recovery from an over-full context never depends on the
        // provider being healthy.
        let summary = match self.run_summary_request(prompt).await {
            Ok(s) if !s.trim().is_empty() => s,
            Ok(_) => {
                warn!("compaction summary came back empty; dropping history behind a notice");
                crate::compact::EMERGENCY_SUMMARY.to_string()
            }
            Err(e) => {
                warn!(error = %e, "compaction model call failed; dropping history behind a notice");
                crate::compact::EMERGENCY_SUMMARY.to_string()
            }
        };

        let first_kept_id = self.session.messages[cut].id.clone();
        let summary_msg = Message::compaction_summary(summary.clone(), tokens_before);
        if let Some(journal) = &mut self.journal {
            journal.append_compaction(&summary_msg.id, &summary, &first_kept_id, tokens_before)?;
        }

        let mut new_list = Vec::with_capacity(self.session.messages.len() - cut + 1);
        new_list.push(summary_msg);
        new_list.extend_from_slice(&self.session.messages[cut..]);
        self.session.replace(new_list);

        debug!(
            tokens_before,
            tokens_after = context_tokens(&self.session.messages),
            "compacted session history"
        );
        Ok(true)
    }

    /// The summary request is an ordinary user turn against the provider,
    /// with no tools offered.
    async fn run_summary_request(&self, prompt: String) -> anyhow::Result<String> {
        let req = CompletionRequest {
            system: None,
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            options: StreamOptions {
                thinking: ThinkingLevel::Off,
            },
        };
        let mut stream = self.provider.stream(req).await?;
        let mut summary = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => summary.push_str(&delta),
                ResponseEvent::Error(msg) => anyhow::bail!("summary stream error: {msg}"),
                ResponseEvent::Done => break,
                _ => {}
            }
        }
        Ok(summary)
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn drain_follow_ups(&mut self) -> anyhow::Result<()> {
        while let Some(msg) = self.follow_ups.pop_front() {
            self.journal_message(&msg)?;
            self.session.push(msg);
        }
        Ok(())
    }

    fn journal_message(&mut self, msg: &Message) -> Result<(), crate::journal::JournalError> {
        if let Some(journal) = &mut self.journal {
            journal.append_message(msg)?;
        }
        Ok(())
    }
}

// ─── Pending tool calls ──────────────────────────────────────────────────────

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl PendingToolCall {
    /// Resolve to an invocation.  Arguments always become a JSON object:
    /// empty or unparseable buffers are replaced with `{}` so the next
    /// request never carries invalid tool input.
    fn finish(&self) -> ToolInvocation {
        let arguments = if self.args_buf.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            match serde_json::from_str(&self.args_buf) {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        tool_name = %self.name,
                        tool_call_id = %self.id,
                        error = %e,
                        "model sent invalid JSON tool arguments; substituting {{}}"
                    );
                    serde_json::Value::Object(Default::default())
                }
            }
        };
        ToolInvocation {
            tool_call_id: self.id.clone(),
            tool_name: self.name.clone(),
            arguments,
        }
    }
}
