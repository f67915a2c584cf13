// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only session journal.
//!
//! One JSON record per line, each carrying `(id, parentId, timestamp, type,
//! payload)`.  The parent pointer forms a DAG: the main line chains each
//! entry to the previous one, and a branch diverges by referencing an older
//! parent.  Replay reconstructs the conversation deterministically — the
//! journal, not the in-memory list, is the source of truth.
//!
//! The journal is single-writer by construction: every session (and every
//! sub-agent) owns its own file and its own `Journal` value.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bosun_model::{new_short_id, Message, MessageBody, ThinkingLevel};

/// Journal failures are fatal: the turn loop refuses to run until the
/// caller resolves them.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("journal I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed journal record at line {line}: {source}")]
    Malformed {
        line: usize,
        source: serde_json::Error,
    },
}

/// One append-only record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: String,
    pub parent_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EntryPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum EntryPayload {
    Message(Message),
    #[serde(rename_all = "camelCase")]
    ModelChange { provider: String, model: String },
    #[serde(rename_all = "camelCase")]
    ThinkingLevelChange { level: ThinkingLevel },
    #[serde(rename_all = "camelCase")]
    Compaction {
        summary: String,
        first_kept_entry_id: String,
        tokens_before: u64,
    },
    #[serde(rename_all = "camelCase")]
    Branch { summary: Option<String> },
}

const KNOWN_TYPES: &[&str] = &[
    "message",
    "modelChange",
    "thinkingLevelChange",
    "compaction",
    "branch",
];

/// Result of replaying a journal file.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedContext {
    pub messages: Vec<Message>,
    /// Last `(provider, model)` change on the selected line, if any.
    pub model: Option<(String, String)>,
    pub thinking_level: Option<ThinkingLevel>,
}

/// Deterministic child journal name for a sub-agent task.
pub fn child_journal_filename(parent_session_id: &str, task_id: &str) -> String {
    format!("subagent-{parent_session_id}-{task_id}.jsonl")
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
    leaf_id: Option<String>,
}

impl Journal {
    /// Open (or create) a journal file for appending.  An existing file is
    /// scanned so new entries chain onto its last record.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let leaf_id = if path.exists() {
            last_entry_id(&path)?
        } else {
            None
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            leaf_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Id of the last appended entry — the parent for the next one.
    pub fn leaf_id(&self) -> Option<&str> {
        self.leaf_id.as_deref()
    }

    /// Append a payload on the main line (parent = current leaf).
    pub fn append(&mut self, payload: EntryPayload) -> Result<String, JournalError> {
        let parent = self.leaf_id.clone();
        self.append_entry(new_short_id(), parent, payload)
    }

    /// Append a message entry.  The entry id equals the message id, so
    /// compaction markers can reference kept messages directly.
    pub fn append_message(&mut self, msg: &Message) -> Result<String, JournalError> {
        let parent = self.leaf_id.clone();
        self.append_entry(msg.id.clone(), parent, EntryPayload::Message(msg.clone()))
    }

    /// Record a compaction.  The entry id is supplied by the caller so the
    /// in-memory compaction-summary message and the journal entry share one
    /// id, keeping replay deterministic.
    pub fn append_compaction(
        &mut self,
        entry_id: impl Into<String>,
        summary: impl Into<String>,
        first_kept_entry_id: impl Into<String>,
        tokens_before: u64,
    ) -> Result<String, JournalError> {
        let parent = self.leaf_id.clone();
        self.append_entry(
            entry_id.into(),
            parent,
            EntryPayload::Compaction {
                summary: summary.into(),
                first_kept_entry_id: first_kept_entry_id.into(),
                tokens_before,
            },
        )
    }

    /// Create a branch: the new entry's parent is `parent_id` instead of the
    /// current leaf.  Subsequent appends chain onto the branch.
    pub fn branch_from(
        &mut self,
        parent_id: impl Into<String>,
        summary: Option<String>,
    ) -> Result<String, JournalError> {
        self.append_entry(
            new_short_id(),
            Some(parent_id.into()),
            EntryPayload::Branch { summary },
        )
    }

    fn append_entry(
        &mut self,
        id: String,
        parent_id: Option<String>,
        payload: EntryPayload,
    ) -> Result<String, JournalError> {
        let entry = JournalEntry {
            id: id.clone(),
            parent_id,
            timestamp: Utc::now(),
            payload,
        };
        let mut line = serde_json::to_string(&entry).expect("journal entries always serialize");
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        self.file.sync_data()?;
        self.leaf_id = Some(id.clone());
        Ok(id)
    }

    /// All decodable entries in file order.  Unknown record types are
    /// skipped (forward compatibility); malformed records are fatal.
    pub fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        read_entries(&self.path)
    }

    /// Replay the journal into `(messages, model, thinking_level)`.
    ///
    /// The newest leaf (by timestamp, then file order) selects the line to
    /// replay.  The newest compaction marker on that line replaces the
    /// history before its `firstKeptEntryId` with a synthetic
    /// compaction-summary message.  Replays are deterministic: the same
    /// file always yields the same context.
    pub fn replay(&self) -> Result<ReplayedContext, JournalError> {
        let entries = self.entries()?;
        Ok(replay_entries(&entries))
    }
}

fn last_entry_id(path: &Path) -> Result<Option<String>, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut last = None;
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|source| JournalError::Malformed {
                line: i + 1,
                source,
            })?;
        if let Some(id) = value.get("id").and_then(serde_json::Value::as_str) {
            last = Some(id.to_string());
        }
    }
    Ok(last)
}

fn read_entries(path: &Path) -> Result<Vec<JournalEntry>, JournalError> {
    let reader = BufReader::new(File::open(path)?);
    let mut entries = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(&line).map_err(|source| JournalError::Malformed {
                line: i + 1,
                source,
            })?;
        let record_type = value.get("type").and_then(serde_json::Value::as_str);
        match record_type {
            Some(t) if KNOWN_TYPES.contains(&t) => {
                let entry: JournalEntry = serde_json::from_value(value).map_err(|source| {
                    JournalError::Malformed {
                        line: i + 1,
                        source,
                    }
                })?;
                entries.push(entry);
            }
            Some(t) => {
                debug!(record_type = t, line = i + 1, "skipping unknown journal record type");
            }
            None => {
                // A record without a type cannot be interpreted at all.
                return Err(JournalError::Malformed {
                    line: i + 1,
                    source: serde::de::Error::custom("missing 'type' field"),
                });
            }
        }
    }
    Ok(entries)
}

/// Select the newest leaf and walk its parent chain back to the root.
fn select_chain(entries: &[JournalEntry]) -> Vec<&JournalEntry> {
    if entries.is_empty() {
        return Vec::new();
    }

    let referenced: std::collections::HashSet<&str> = entries
        .iter()
        .filter_map(|e| e.parent_id.as_deref())
        .collect();

    // Newest leaf by timestamp; ties resolved by file order (later wins).
    let leaf = entries
        .iter()
        .filter(|e| !referenced.contains(e.id.as_str()))
        .max_by_key(|e| e.timestamp)
        .unwrap_or_else(|| entries.last().expect("entries is non-empty"));

    let by_id: std::collections::HashMap<&str, &JournalEntry> =
        entries.iter().map(|e| (e.id.as_str(), e)).collect();

    let mut chain = Vec::new();
    let mut cursor = Some(leaf);
    while let Some(entry) = cursor {
        chain.push(entry);
        cursor = entry.parent_id.as_deref().and_then(|p| by_id.get(p).copied());
    }
    chain.reverse();
    chain
}

fn replay_entries(entries: &[JournalEntry]) -> ReplayedContext {
    let chain = select_chain(entries);

    let mut model = None;
    let mut thinking_level = None;
    // (entry id, message) pairs in chain order.
    let mut messages: Vec<(String, Message)> = Vec::new();
    // (entry, summary, first kept id, tokens before, messages seen so far)
    let mut compaction: Option<(&JournalEntry, String, String, u64, usize)> = None;

    for entry in &chain {
        match &entry.payload {
            EntryPayload::Message(msg) => {
                messages.push((entry.id.clone(), msg.clone()));
            }
            EntryPayload::ModelChange {
                provider,
                model: m,
            } => model = Some((provider.clone(), m.clone())),
            EntryPayload::ThinkingLevelChange { level } => thinking_level = Some(*level),
            EntryPayload::Compaction {
                summary,
                first_kept_entry_id,
                tokens_before,
            } => {
                compaction = Some((
                    *entry,
                    summary.clone(),
                    first_kept_entry_id.clone(),
                    *tokens_before,
                    messages.len(),
                ));
            }
            EntryPayload::Branch { summary } => {
                if let Some(s) = summary {
                    // Deterministic id/timestamp so repeated replays agree.
                    messages.push((
                        entry.id.clone(),
                        Message {
                            id: entry.id.clone(),
                            timestamp: entry.timestamp,
                            body: MessageBody::BranchSummary { summary: s.clone() },
                        },
                    ));
                }
            }
        }
    }

    let messages = match compaction {
        Some((entry, summary, first_kept, tokens_before, seen_at_marker)) => {
            // When the referenced entry is missing (already compacted away by
            // an older marker), keep everything after the marker itself.
            let kept_from = messages
                .iter()
                .position(|(id, _)| *id == first_kept)
                .unwrap_or(seen_at_marker);
            let synthetic = Message {
                id: entry.id.clone(),
                timestamp: entry.timestamp,
                body: MessageBody::CompactionSummary {
                    summary,
                    tokens_before,
                },
            };
            std::iter::once(synthetic)
                .chain(messages.into_iter().skip(kept_from).map(|(_, m)| m))
                .collect()
        }
        None => messages.into_iter().map(|(_, m)| m).collect(),
    };

    ReplayedContext {
        messages,
        model,
        thinking_level,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
