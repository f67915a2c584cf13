// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Instruction-file discovery and aggregation.
//!
//! Projects and users drop markdown instruction files in conventional
//! locations; the core concatenates them into the system prompt preamble
//! without interpreting their contents.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File names recognised in the project tree, checked in this order at each
/// directory level.
const PROJECT_FILE_NAMES: &[&str] = &["AGENTS.md", "AGENT47.md", "CLAUDE.md"];

/// Discover instruction files, in priority order:
///
/// 1. Project tree — walk upward from `cwd` to the first git root, checking
///    each level for `AGENTS.md`, `AGENT47.md`, `CLAUDE.md` (nearest first).
/// 2. Global user config dir — `AGENTS.md`.
/// 3. Legacy claude dir — `~/.claude/CLAUDE.md`.
/// 4. Explicit glob patterns from settings.
///
/// Results are de-duplicated by absolute path, preserving that order.
pub fn discover_instruction_files(cwd: &Path, globs: &[String]) -> Vec<PathBuf> {
    let user_dir = dirs::config_dir().map(|d| d.join("bosun"));
    let legacy_dir = dirs::home_dir().map(|d| d.join(".claude"));
    discover_in(cwd, user_dir.as_deref(), legacy_dir.as_deref(), globs)
}

/// Discovery with explicit user/legacy directories (injectable for tests).
fn discover_in(
    cwd: &Path,
    user_dir: Option<&Path>,
    legacy_dir: Option<&Path>,
    globs: &[String],
) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = Vec::new();

    // 1. Project tree, nearest directory first, stop after the git root.
    let mut dir = Some(cwd);
    while let Some(d) = dir {
        for name in PROJECT_FILE_NAMES {
            let candidate = d.join(name);
            if candidate.is_file() {
                found.push(candidate);
            }
        }
        if d.join(".git").exists() {
            break;
        }
        dir = d.parent();
    }

    // 2. Global user config dir.
    if let Some(dir) = user_dir {
        let candidate = dir.join("AGENTS.md");
        if candidate.is_file() {
            found.push(candidate);
        }
    }

    // 3. Legacy claude dir.
    if let Some(dir) = legacy_dir {
        let candidate = dir.join("CLAUDE.md");
        if candidate.is_file() {
            found.push(candidate);
        }
    }

    // 4. Explicit glob patterns.
    for pattern in globs {
        match glob::glob(pattern) {
            Ok(paths) => {
                let mut matched: Vec<PathBuf> =
                    paths.filter_map(|p| p.ok()).filter(|p| p.is_file()).collect();
                matched.sort();
                found.extend(matched);
            }
            Err(e) => warn!(pattern, error = %e, "invalid instruction glob — skipping"),
        }
    }

    dedup_by_absolute_path(found)
}

fn dedup_by_absolute_path(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(paths.len());
    for p in paths {
        let key = p.canonicalize().unwrap_or_else(|_| p.clone());
        if seen.insert(key) {
            out.push(p);
        }
    }
    out
}

/// Concatenate instruction files into one preamble block.  Files that fail
/// to read are skipped with a warning; no markdown interpretation happens
/// beyond joining the contents.
pub fn concat_instructions(files: &[PathBuf]) -> String {
    let mut sections = Vec::with_capacity(files.len());
    for path in files {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                debug!(path = %path.display(), "loaded instruction file");
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    sections.push(trimmed.to_string());
                }
            }
            Err(e) => warn!(path = %path.display(), error = %e, "failed to read instruction file"),
        }
    }
    sections.join("\n\n")
}

/// Discover and concatenate in one step.
pub fn instruction_preamble(cwd: &Path, globs: &[String]) -> String {
    let files = discover_instruction_files(cwd, globs);
    concat_instructions(&files)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_nearest_project_file_first() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::create_dir_all(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("AGENTS.md"), "root instructions").unwrap();
        fs::write(tmp.path().join("sub/AGENTS.md"), "sub instructions").unwrap();

        let files = discover_in(&tmp.path().join("sub"), None, None, &[]);
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("sub/AGENTS.md"));
        assert!(files[1].ends_with("AGENTS.md"));
    }

    #[test]
    fn stops_at_git_root() {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("repo");
        fs::create_dir_all(repo.join(".git")).unwrap();
        fs::write(tmp.path().join("AGENTS.md"), "outside the repo").unwrap();
        fs::write(repo.join("AGENTS.md"), "inside").unwrap();

        let files = discover_in(&repo, None, None, &[]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("repo/AGENTS.md"));
    }

    #[test]
    fn name_order_within_one_directory() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("CLAUDE.md"), "c").unwrap();
        fs::write(tmp.path().join("AGENTS.md"), "a").unwrap();
        fs::write(tmp.path().join("AGENT47.md"), "b").unwrap();

        let files = discover_in(tmp.path(), None, None, &[]);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["AGENTS.md", "AGENT47.md", "CLAUDE.md"]);
    }

    #[test]
    fn user_and_legacy_files_come_after_project() {
        let project = TempDir::new().unwrap();
        fs::create_dir_all(project.path().join(".git")).unwrap();
        fs::write(project.path().join("AGENTS.md"), "project").unwrap();

        let user = TempDir::new().unwrap();
        fs::write(user.path().join("AGENTS.md"), "user").unwrap();
        let legacy = TempDir::new().unwrap();
        fs::write(legacy.path().join("CLAUDE.md"), "legacy").unwrap();

        let files = discover_in(
            project.path(),
            Some(user.path()),
            Some(legacy.path()),
            &[],
        );
        assert_eq!(files.len(), 3);
        assert!(files[1].starts_with(user.path()));
        assert!(files[2].starts_with(legacy.path()));
    }

    #[test]
    fn glob_patterns_are_appended_and_deduped() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join(".git")).unwrap();
        fs::write(tmp.path().join("AGENTS.md"), "a").unwrap();
        fs::write(tmp.path().join("extra.md"), "extra").unwrap();

        // The glob matches both files; AGENTS.md is already discovered and
        // must not appear twice.
        let pattern = format!("{}/*.md", tmp.path().display());
        let files = discover_in(tmp.path(), None, None, &[pattern]);
        assert_eq!(files.len(), 2);
        assert!(files.iter().any(|p| p.ends_with("extra.md")));
    }

    #[test]
    fn concat_joins_in_discovery_order() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.md");
        let b = tmp.path().join("b.md");
        fs::write(&a, "first\n").unwrap();
        fs::write(&b, "second\n").unwrap();

        let text = concat_instructions(&[a, b]);
        assert_eq!(text, "first\n\nsecond");
    }

    #[test]
    fn concat_skips_unreadable_and_empty_files() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.md");
        fs::write(&a, "   \n").unwrap();
        let missing = tmp.path().join("missing.md");

        let text = concat_instructions(&[a, missing]);
        assert!(text.is_empty());
    }
}
