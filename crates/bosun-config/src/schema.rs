// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

fn default_reserve_tokens() -> usize {
    16_384
}

fn default_keep_recent_tokens() -> usize {
    20_000
}

fn default_max_depth() -> usize {
    2
}

fn default_max_turns() -> u32 {
    50
}

fn default_task_timeout_secs() -> u64 {
    600
}

/// Top-level configuration for the agent core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub instructions: InstructionConfig,
}

/// Context-window management settings.
///
/// The compactor fires when the estimated context size exceeds
/// `context_window - reserve_tokens`.  The most recent `keep_recent_tokens`
/// worth of messages are always preserved verbatim; everything older is
/// replaced by a model-generated summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionConfig {
    /// Master switch for automatic compaction.  Explicit compaction
    /// requested by the caller runs regardless.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Safety margin below the model's context window.  Compaction triggers
    /// once the estimate crosses `context_window - reserve_tokens`.
    #[serde(default = "default_reserve_tokens")]
    pub reserve_tokens: usize,
    /// Token budget for the verbatim tail kept after compaction.  Also the
    /// size of the suffix protected from tool-result pruning.
    #[serde(default = "default_keep_recent_tokens")]
    pub keep_recent_tokens: usize,
    /// Rewrite old oversized tool results to a short prefix plus a
    /// truncation marker.  Lossy but bounded; off by default.
    #[serde(default)]
    pub prune: bool,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reserve_tokens: default_reserve_tokens(),
            keep_recent_tokens: default_keep_recent_tokens(),
            prune: false,
        }
    }
}

/// Sub-agent orchestration limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Maximum sub-agent nesting depth.  A task tool invocation at
    /// `depth >= max_depth` is rejected before anything is spawned.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Soft cap on assistant turns per agent run.  On hit the run ends
    /// with the current assistant message rather than erroring.
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Wall-clock budget for a single sub-agent task, in seconds.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_turns: default_max_turns(),
            task_timeout_secs: default_task_timeout_secs(),
        }
    }
}

/// Session journal persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory for session journal files.  `~` and `$VAR` are expanded.
    /// When unset, sessions are kept in memory only and sub-agents do not
    /// write child journals.
    #[serde(default)]
    pub dir: Option<String>,
}

impl SessionConfig {
    /// Sessions directory with `~` and environment variables expanded.
    pub fn expanded_dir(&self) -> Option<std::path::PathBuf> {
        self.dir
            .as_deref()
            .map(|d| std::path::PathBuf::from(shellexpand::tilde(d).into_owned()))
    }
}

/// Instruction-file discovery settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstructionConfig {
    /// Additional glob patterns for instruction files, applied after the
    /// standard project and user-dir locations.
    #[serde(default)]
    pub globs: Vec<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
