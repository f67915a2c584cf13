// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context compaction: token accounting, cut-point selection, summary
//! prompt construction, and tool-result pruning.
//!
//! Everything here is deterministic and model-free; the turn loop drives
//! the actual summary request through the provider and applies the result.

use bosun_model::{Message, MessageBody, StopReason, ToolContent};

// ─── Compaction prompt ───────────────────────────────────────────────────────

const SUMMARY_PROMPT: &str = "\
You are compacting the conversation history of a coding agent to free up \
context space. Summarise everything above this instruction into a structured \
checkpoint with EXACTLY the following Markdown sections. Be information-dense: \
preserve file paths, commands, error messages, and decisions verbatim where \
they matter.

## Goals
What the user is ultimately trying to achieve.

## Instructions
Standing instructions, constraints, and preferences the user has given.

## Discoveries
Key facts learned about the codebase or environment.

## Accomplishments
What has been completed so far, in order.

## Relevant Files
Every file that was read, modified, or created, with a one-line note.";

/// Summary substituted when the model cannot be reached for a real one.
/// Dropping history behind this notice is lossy but always succeeds, so a
/// broken provider can never wedge the session above its context ceiling.
pub const EMERGENCY_SUMMARY: &str = "[Earlier history was dropped to prevent a context-window \
     overflow; a summary could not be generated. Details of prior work may be \
     missing. Ask the user to restate anything essential.]";

// ─── Token accounting ────────────────────────────────────────────────────────

/// Estimated context size for a message list.
///
/// The last assistant message with a non-error stop reason is the anchor:
/// its `Usage` total is authoritative for everything up to and including it.
/// Messages after the anchor (or all messages when there is no anchor) are
/// estimated at four characters per token.
pub fn context_tokens(messages: &[Message]) -> u64 {
    let anchor = messages.iter().rposition(|m| match &m.body {
        MessageBody::Assistant {
            stop_reason, usage, ..
        } => *stop_reason != StopReason::Error && usage.total() > 0,
        _ => false,
    });

    match anchor {
        Some(idx) => {
            let authoritative = match &messages[idx].body {
                MessageBody::Assistant { usage, .. } => usage.total(),
                _ => unreachable!("anchor is an assistant message"),
            };
            let trailing: u64 = messages[idx + 1..].iter().map(|m| m.approx_tokens()).sum();
            authoritative + trailing
        }
        None => messages.iter().map(|m| m.approx_tokens()).sum(),
    }
}

/// Whether compaction should run for the current estimate.
pub fn should_compact(tokens: u64, context_window: usize, reserve_tokens: usize) -> bool {
    tokens > context_window.saturating_sub(reserve_tokens) as u64
}

// ─── Cut-point selection ─────────────────────────────────────────────────────

/// Pick the index history is truncated at: everything before it is
/// summarised, everything from it on is kept verbatim.
///
/// Walk backward from the tail accumulating estimated tokens until the next
/// message would exceed `keep_recent_tokens`; then walk further back to the
/// nearest turn boundary (user / bash-execution / branch-summary message) so
/// an assistant message is never separated from its paired tool results.
/// Returns 0 when the whole list fits the recent budget — nothing to compact.
pub fn select_cut_index(messages: &[Message], keep_recent_tokens: usize) -> usize {
    let mut budget = keep_recent_tokens as u64;
    let mut first_kept = messages.len();
    for (i, msg) in messages.iter().enumerate().rev() {
        let cost = msg.approx_tokens();
        if cost > budget {
            break;
        }
        budget -= cost;
        first_kept = i;
    }

    // Back off to the nearest turn boundary at or before first_kept.
    let mut cut = first_kept;
    while cut > 0 {
        if messages.get(cut).is_some_and(|m| m.is_turn_boundary()) {
            break;
        }
        cut -= 1;
    }
    if messages.get(cut).is_some_and(|m| m.is_turn_boundary()) {
        cut
    } else {
        first_kept
    }
}

// ─── Summary prompt ──────────────────────────────────────────────────────────

/// The user-turn prompt asking the model to summarise `messages`.
pub fn build_summary_prompt(messages: &[Message]) -> String {
    format!("{}\n\n---\n\n{}", serialize_history(messages), SUMMARY_PROMPT)
}

/// Serialise a message list into plain text for the compaction prompt.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let (role, text) = match &m.body {
                MessageBody::User { text, .. } => ("User", text.clone()),
                MessageBody::Assistant { blocks, .. } => {
                    let parts: Vec<String> = blocks
                        .iter()
                        .map(|b| match b {
                            bosun_model::ContentBlock::Text { text } => text.clone(),
                            bosun_model::ContentBlock::Reasoning { .. } => "[reasoning]".into(),
                            bosun_model::ContentBlock::ToolCall {
                                name, arguments, ..
                            } => format!("[tool_call: {name}({arguments})]"),
                        })
                        .collect();
                    ("Assistant", parts.join("\n"))
                }
                MessageBody::ToolResult {
                    tool_name, content, ..
                } => (
                    "Tool",
                    format!(
                        "[{tool_name}] {}",
                        content
                            .iter()
                            .map(|c| c.as_text())
                            .collect::<Vec<_>>()
                            .join("\n")
                    ),
                ),
                MessageBody::Custom { text, .. } => ("Note", text.clone()),
                MessageBody::BashExecution {
                    command, output, ..
                } => ("Shell", format!("$ {command}\n{output}")),
                MessageBody::BranchSummary { summary } => ("Branch", summary.clone()),
                MessageBody::CompactionSummary { summary, .. } => ("Summary", summary.clone()),
            };
            format!("{role}: {text}")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Pruning ─────────────────────────────────────────────────────────────────

const PRUNE_THRESHOLD_CHARS: usize = 500;
const PRUNE_KEEP_CHARS: usize = 200;

/// Rewrite oversized tool results outside the protected recent suffix to a
/// short prefix plus a truncation marker.  Lossy but bounded; the journal
/// keeps the originals.  Returns the number of results pruned.
pub fn prune_tool_results(messages: &mut [Message], keep_recent_tokens: usize) -> usize {
    // The protected suffix mirrors cut-point accumulation: walk backward
    // until the recent-token budget is spent.
    let mut budget = keep_recent_tokens as u64;
    let mut protected_from = messages.len();
    for (i, msg) in messages.iter().enumerate().rev() {
        let cost = msg.approx_tokens();
        if cost > budget {
            break;
        }
        budget -= cost;
        protected_from = i;
    }

    let mut pruned = 0;
    for msg in &mut messages[..protected_from] {
        if let MessageBody::ToolResult { content, .. } = &mut msg.body {
            for block in content.iter_mut() {
                let ToolContent::Text { text } = block;
                if text.len() > PRUNE_THRESHOLD_CHARS {
                    let keep_to = floor_char_boundary(text, PRUNE_KEEP_CHARS);
                    let omitted = text.len() - keep_to;
                    let mut replacement = text[..keep_to].to_string();
                    replacement.push_str(&format!("\n[pruned: {omitted} bytes omitted]"));
                    *text = replacement;
                    pruned += 1;
                }
            }
        }
    }
    pruned
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bosun_model::{ContentBlock, Usage};

    fn assistant_with_usage(text: &str, total: u64) -> Message {
        Message::assistant(
            vec![ContentBlock::Text { text: text.into() }],
            StopReason::Stop,
            Usage {
                total_tokens: total,
                ..Default::default()
            },
            "mock",
            "mock-1",
        )
    }

    fn chars(n: usize) -> String {
        "x".repeat(n)
    }

    // ── Token accounting ──────────────────────────────────────────────────────

    #[test]
    fn estimate_without_anchor_uses_chars_over_four() {
        let msgs = vec![Message::user(chars(40)), Message::user(chars(80))];
        assert_eq!(context_tokens(&msgs), 10 + 20);
    }

    #[test]
    fn anchor_usage_is_authoritative() {
        let msgs = vec![
            Message::user(chars(4000)),
            assistant_with_usage("ok", 1500),
        ];
        assert_eq!(context_tokens(&msgs), 1500);
    }

    #[test]
    fn trailing_messages_estimated_after_anchor() {
        let msgs = vec![
            Message::user(chars(4000)),
            assistant_with_usage("ok", 1500),
            Message::user(chars(400)), // 100 estimated
        ];
        assert_eq!(context_tokens(&msgs), 1600);
    }

    #[test]
    fn errored_assistant_is_not_an_anchor() {
        let mut errored = assistant_with_usage("partial", 9999);
        if let MessageBody::Assistant { stop_reason, .. } = &mut errored.body {
            *stop_reason = StopReason::Error;
        }
        let msgs = vec![Message::user(chars(40)), errored];
        // both estimated: 10 + ("partial" 7 chars → 1)
        assert_eq!(context_tokens(&msgs), 11);
    }

    #[test]
    fn trigger_threshold() {
        assert!(!should_compact(900, 1000, 100));
        assert!(should_compact(901, 1000, 100));
    }

    // ── Cut-point selection ───────────────────────────────────────────────────

    #[test]
    fn cut_is_zero_when_everything_fits() {
        let msgs = vec![Message::user("short"), Message::assistant_text("reply")];
        assert_eq!(select_cut_index(&msgs, 10_000), 0);
    }

    #[test]
    fn cut_lands_on_turn_boundary() {
        let msgs = vec![
            Message::user(chars(400)),           // 0: 100 tokens
            Message::assistant_text(&chars(400)), // 1
            Message::user(chars(400)),           // 2  ← boundary
            Message::assistant_text(&chars(400)), // 3
            Message::user(chars(400)),           // 4
        ];
        // keep_recent=250 admits messages 4 and 3 (first_kept=3), then backs
        // off to the boundary at 2.
        let cut = select_cut_index(&msgs, 250);
        assert_eq!(cut, 2);
        assert!(msgs[cut].is_turn_boundary());
    }

    #[test]
    fn cut_never_splits_tool_pairs() {
        let tool_call = Message::assistant(
            vec![ContentBlock::ToolCall {
                id: "c1".into(),
                name: "read".into(),
                arguments: serde_json::json!({"path": chars(380)}),
            }],
            StopReason::ToolUse,
            Usage::default(),
            "p",
            "m",
        );
        let msgs = vec![
            Message::user(chars(400)), // 0
            tool_call,                 // 1
            Message::tool_result(
                "c1",
                "read",
                vec![ToolContent::text(chars(400))],
                None,
                false,
            ), // 2
            Message::assistant_text(&chars(400)), // 3
        ];
        // Budget admits only the tail; the boundary walk must reach index 0,
        // keeping the call/result pair together.
        let cut = select_cut_index(&msgs, 250);
        assert_eq!(cut, 0);
    }

    #[test]
    fn cut_falls_back_to_first_kept_without_boundary() {
        let msgs = vec![
            Message::assistant_text(&chars(400)),
            Message::assistant_text(&chars(400)),
            Message::assistant_text(&chars(400)),
        ];
        let cut = select_cut_index(&msgs, 150);
        assert_eq!(cut, 2);
    }

    // ── Summary prompt ────────────────────────────────────────────────────────

    #[test]
    fn summary_prompt_contains_transcript_and_sections() {
        let msgs = vec![
            Message::user("please fix the parser"),
            Message::assistant_text("looking at parser.rs"),
        ];
        let prompt = build_summary_prompt(&msgs);
        assert!(prompt.contains("User: please fix the parser"));
        assert!(prompt.contains("Assistant: looking at parser.rs"));
        assert!(prompt.contains("## Goals"));
        assert!(prompt.contains("## Relevant Files"));
    }

    #[test]
    fn summary_prompt_linearises_tool_traffic() {
        let msgs = vec![
            Message::assistant(
                vec![ContentBlock::ToolCall {
                    id: "c".into(),
                    name: "grep".into(),
                    arguments: serde_json::json!({"pattern": "fn main"}),
                }],
                StopReason::ToolUse,
                Usage::default(),
                "p",
                "m",
            ),
            Message::tool_result(
                "c",
                "grep",
                vec![ToolContent::text("src/main.rs:1")],
                None,
                false,
            ),
        ];
        let prompt = build_summary_prompt(&msgs);
        assert!(prompt.contains("[tool_call: grep("));
        assert!(prompt.contains("[grep] src/main.rs:1"));
    }

    // ── Pruning ───────────────────────────────────────────────────────────────

    #[test]
    fn prune_rewrites_old_oversized_results() {
        let mut msgs = vec![
            Message::tool_result(
                "c1",
                "read",
                vec![ToolContent::text(chars(600))],
                None,
                false,
            ),
            Message::user(chars(400)),
        ];
        let pruned = prune_tool_results(&mut msgs, 150);
        assert_eq!(pruned, 1);
        let text = msgs[0].text();
        assert!(text.len() < 300);
        assert!(text.contains("[pruned: 400 bytes omitted]"), "{text}");
    }

    #[test]
    fn prune_spares_protected_suffix_and_small_results() {
        let mut msgs = vec![
            Message::tool_result(
                "c1",
                "read",
                vec![ToolContent::text(chars(450))], // under threshold
                None,
                false,
            ),
            Message::tool_result(
                "c2",
                "read",
                vec![ToolContent::text(chars(600))], // protected (recent)
                None,
                false,
            ),
        ];
        let pruned = prune_tool_results(&mut msgs, 10_000);
        assert_eq!(pruned, 0);
        assert_eq!(msgs[1].text().len(), 600);
    }

    // ── Compaction monotonicity ───────────────────────────────────────────────

    #[test]
    fn applying_compaction_shrinks_context_and_keeps_suffix() {
        let msgs: Vec<Message> = (0..10)
            .flat_map(|i| {
                vec![
                    Message::user(format!("question {i} {}", chars(400))),
                    Message::assistant_text(&format!("answer {i} {}", chars(400))),
                ]
            })
            .collect();
        let before = context_tokens(&msgs);
        let cut = select_cut_index(&msgs, 300);
        assert!(cut > 0);

        let suffix: Vec<Message> = msgs[cut..].to_vec();
        let mut compacted = vec![Message::compaction_summary("short summary", before)];
        compacted.extend(suffix.clone());

        assert!(context_tokens(&compacted) <= before);
        assert_eq!(&compacted[1..], &suffix[..]);
    }
}
