// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sub-agent definition discovery.
//!
//! Sub-agents are specialized assistants defined as markdown files with YAML
//! frontmatter; the body is the system prompt.  The task tool looks them up
//! by name when the model delegates work.
//!
//! ## File locations
//!
//! Three sources are scanned in order; on a name collision the earlier
//! source wins (a project definition shadows a user one, which shadows a
//! bundled one):
//!
//! ```text
//! <project>/.bosun/agents/*.md     ← project
//! ~/.config/bosun/agents/*.md     ← user
//! (compiled-in defaults)           ← bundled
//! ```
//!
//! ## File format
//!
//! ```markdown
//! ---
//! name: code-reviewer
//! description: Reviews a diff for correctness problems.
//! allowedTools: [read, grep]
//! output:
//!   properties:
//!     verdict: { enum: [approve, reject] }
//! model: fast
//! ---
//!
//! You are a meticulous code reviewer.
//! ```
//!
//! | Field          | Required | Description                                       |
//! |:---------------|:---------|:--------------------------------------------------|
//! | `name`         | No       | Unique identifier. Defaults to the filename stem. |
//! | `description`  | Yes      | When to delegate to this agent.                   |
//! | `allowedTools` | No       | Tool names the agent may use (default: all).      |
//! | `output`       | No       | JTD schema its final result must satisfy.         |
//! | `model`        | No       | Model preference forwarded to the provider layer. |

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::warn;

const MAX_AGENT_FILE_BYTES: u64 = 256 * 1024;

// ── Public types ──────────────────────────────────────────────────────────────

/// Where a sub-agent definition was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSource {
    Project,
    User,
    Bundled,
}

/// A discovered sub-agent definition.
#[derive(Debug, Clone)]
pub struct SubAgentDefinition {
    /// Unique name used by task-tool invocations.
    pub name: String,
    /// Human-readable description that guides delegation.
    pub description: String,
    pub source: AgentSource,
    /// System prompt body (everything after the closing `---` fence).
    pub system_prompt: String,
    /// Tool names this agent may use.  `None` means the full parent set
    /// (minus the task tool itself).
    pub allowed_tools: Option<Vec<String>>,
    /// JTD schema the agent's final submitted result must satisfy.
    pub output: Option<serde_json::Value>,
    /// Model preference; `None` inherits the parent session model.
    pub model: Option<String>,
}

/// Name-indexed collection of sub-agent definitions.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, SubAgentDefinition>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<SubAgentDefinition>) -> Self {
        let mut map = HashMap::new();
        for a in agents {
            // First source wins; discovery emits project → user → bundled.
            map.entry(a.name.clone()).or_insert(a);
        }
        Self { agents: map }
    }

    pub fn lookup(&self, name: &str) -> Option<&SubAgentDefinition> {
        self.agents.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

// ── Frontmatter schema ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AgentFrontmatter {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "allowedTools")]
    allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    output: Option<serde_yaml::Value>,
    #[serde(default)]
    model: Option<String>,
}

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse a raw agent markdown file into a [`SubAgentDefinition`].
fn parse_agent_file(raw: &str, stem: &str, source: AgentSource) -> Option<SubAgentDefinition> {
    let rest = raw.trim_start_matches('\n');
    let after_open = rest.strip_prefix("---")?;
    let close = after_open.find("\n---")?;
    let yaml_block = &after_open[..close];
    let body = after_open[close + 4..].trim_start_matches('\n').to_string();

    let fm: AgentFrontmatter = match serde_yaml::from_str(yaml_block) {
        Ok(f) => f,
        Err(e) => {
            warn!(stem, error = %e, "failed to parse agent frontmatter — skipping");
            return None;
        }
    };

    let description = fm.description.filter(|d| !d.trim().is_empty())?;

    let name = fm
        .name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    // The output contract is written as YAML but consumed as JSON (JTD).
    let output = match fm.output {
        Some(y) => match serde_json::to_value(&y) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(stem, error = %e, "agent output schema is not JSON-mappable — skipping");
                return None;
            }
        },
        None => None,
    };

    Some(SubAgentDefinition {
        name,
        description,
        source,
        system_prompt: body,
        allowed_tools: fm.allowed_tools,
        output,
        model: fm.model,
    })
}

fn try_load_agent(path: &Path, source: AgentSource) -> Option<SubAgentDefinition> {
    let size = path.metadata().map(|m| m.len()).unwrap_or(0);
    if size > MAX_AGENT_FILE_BYTES {
        warn!(
            path = %path.display(),
            size,
            max = MAX_AGENT_FILE_BYTES,
            "skipping oversized agent file"
        );
        return None;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("agent");

    let raw = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read agent file");
            return None;
        }
    };

    if raw.trim().is_empty() {
        return None;
    }

    parse_agent_file(&raw, stem, source)
}

fn scan_agents_dir(dir: &Path, source: AgentSource) -> Vec<SubAgentDefinition> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("md"))
        .collect();
    paths.sort();
    for path in paths {
        if let Some(agent) = try_load_agent(&path, source) {
            found.push(agent);
        }
    }
    found
}

// ── Public API ────────────────────────────────────────────────────────────────

/// The compiled-in default agents, always available as the lowest-precedence
/// source.
pub fn bundled_agents() -> Vec<SubAgentDefinition> {
    vec![SubAgentDefinition {
        name: "general".into(),
        description: "General-purpose worker for self-contained research or \
                      implementation tasks delegated by the main agent."
            .into(),
        source: AgentSource::Bundled,
        system_prompt: "You are a focused sub-agent. Complete the assigned task \
                        using the available tools, then report your findings \
                        concisely. Do not ask the user questions; make reasonable \
                        assumptions and state them."
            .into(),
        allowed_tools: None,
        output: None,
        model: None,
    }]
}

/// Discover sub-agent definitions from the project dir, the user config dir,
/// and the bundled defaults, in that precedence order.
#[must_use]
pub fn discover_agents(project_root: Option<&Path>) -> AgentRegistry {
    let user_dir = dirs::config_dir().map(|d| d.join("bosun").join("agents"));
    discover_agents_in(project_root, user_dir.as_deref())
}

/// Discovery with explicit directories (injectable for tests).
fn discover_agents_in(project_root: Option<&Path>, user_dir: Option<&Path>) -> AgentRegistry {
    let mut all = Vec::new();

    if let Some(root) = project_root {
        all.extend(scan_agents_dir(
            &root.join(".bosun").join("agents"),
            AgentSource::Project,
        ));
    }
    if let Some(dir) = user_dir {
        all.extend(scan_agents_dir(dir, AgentSource::User));
    }
    all.extend(bundled_agents());

    AgentRegistry::new(all)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_agent(dir: &Path, file: &str, frontmatter: &str, body: &str) {
        fs::create_dir_all(dir).unwrap();
        let content = format!("---\n{frontmatter}---\n\n{body}");
        fs::write(dir.join(format!("{file}.md")), content).unwrap();
    }

    #[test]
    fn parse_agent_file_valid() {
        let raw = "---\ndescription: A test agent.\n---\n\nYou are a test assistant.";
        let def = parse_agent_file(raw, "test-agent", AgentSource::Project).expect("should parse");
        assert_eq!(def.name, "test-agent");
        assert_eq!(def.description.trim(), "A test agent.");
        assert_eq!(def.system_prompt.trim(), "You are a test assistant.");
        assert!(def.allowed_tools.is_none());
        assert!(def.output.is_none());
    }

    #[test]
    fn parse_agent_file_with_tools_and_output() {
        let raw = "---\nname: reviewer\ndescription: Reviews code.\nallowedTools: [read, grep]\noutput:\n  properties:\n    verdict: { enum: [approve, reject] }\n---\n\nReview body.";
        let def = parse_agent_file(raw, "reviewer", AgentSource::User).expect("should parse");
        assert_eq!(def.name, "reviewer");
        assert_eq!(
            def.allowed_tools.as_deref(),
            Some(["read".to_string(), "grep".to_string()].as_slice())
        );
        let output = def.output.unwrap();
        assert!(output["properties"]["verdict"]["enum"].is_array());
    }

    #[test]
    fn parse_agent_file_missing_description_is_skipped() {
        let raw = "---\nname: nameless\n---\n\nBody only.";
        assert!(parse_agent_file(raw, "nameless", AgentSource::Project).is_none());
    }

    #[test]
    fn parse_agent_file_no_frontmatter_is_skipped() {
        assert!(parse_agent_file("just a prompt", "x", AgentSource::Project).is_none());
    }

    #[test]
    fn discover_empty_dirs_leaves_bundled_only() {
        let tmp = TempDir::new().unwrap();
        let reg = discover_agents_in(Some(tmp.path()), None);
        assert_eq!(reg.names(), vec!["general"]);
        assert_eq!(reg.lookup("general").unwrap().source, AgentSource::Bundled);
    }

    #[test]
    fn project_agent_discovered() {
        let tmp = TempDir::new().unwrap();
        write_agent(
            &tmp.path().join(".bosun").join("agents"),
            "verifier",
            "description: Validates completed work.\n",
            "You verify things.",
        );
        let reg = discover_agents_in(Some(tmp.path()), None);
        let def = reg.lookup("verifier").expect("discovered");
        assert_eq!(def.source, AgentSource::Project);
        assert!(def.description.contains("Validates"));
    }

    #[test]
    fn project_shadows_user_on_name_collision() {
        let project = TempDir::new().unwrap();
        let user = TempDir::new().unwrap();
        write_agent(
            &project.path().join(".bosun").join("agents"),
            "verifier",
            "description: Project version.\n",
            "",
        );
        write_agent(user.path(), "verifier", "description: User version.\n", "");

        let reg = discover_agents_in(Some(project.path()), Some(user.path()));
        assert_eq!(reg.len(), 2); // verifier + bundled general
        assert!(reg
            .lookup("verifier")
            .unwrap()
            .description
            .contains("Project version."));
    }

    #[test]
    fn user_agent_shadows_bundled() {
        let user = TempDir::new().unwrap();
        write_agent(user.path(), "general", "description: My general.\n", "Custom.");
        let reg = discover_agents_in(None, Some(user.path()));
        let def = reg.lookup("general").unwrap();
        assert_eq!(def.source, AgentSource::User);
    }

    #[test]
    fn oversized_agent_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join(".bosun").join("agents");
        fs::create_dir_all(&dir).unwrap();
        let big = format!(
            "---\ndescription: Oversized.\n---\n\n{}",
            "x".repeat(260 * 1024)
        );
        fs::write(dir.join("big.md"), big).unwrap();
        let reg = discover_agents_in(Some(tmp.path()), None);
        assert!(reg.lookup("big").is_none());
    }
}
