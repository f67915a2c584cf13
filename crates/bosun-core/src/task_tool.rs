use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bosun_config::Config;
use bosun_model::{
    ModelProvider, StopReason, SubAgentResult, ThinkingLevel, ToolContent, ToolDefinition,
    ToolResultDetails,
};
use bosun_runtime::{AgentRegistry, SubAgentDefinition};
use bosun_tools::{Tool, ToolContext, ToolRegistry, ToolResult};

use crate::agent::{Agent, AgentOptions};
use crate::journal::{child_journal_filename, Journal};
use crate::submit_tool::{SubmitResultTool, SubmitSlot, SubmitStatus};

const MAX_OUTPUT_BYTES: usize = 16 * 1024;

fn task_id_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new("^[a-zA-Z0-9_-]{1,32}$").expect("valid pattern"))
}

/// Recursive sub-agent orchestration.
///
/// Each task runs through its own turn-loop instance over the parent's tool
/// set minus `task` itself, bounded by the configured turn cap and a
/// per-task wall-clock budget.  Sequential mode runs tasks in declared
/// order; parallel mode runs them concurrently with partial-failure
/// isolation — one task's failure or abort never cancels its siblings,
/// while cancelling the whole call cancels every child.
pub struct TaskTool {
    runner: TaskRunner,
    agents: Arc<AgentRegistry>,
    /// Depth of the agent that owns this tool instance.
    depth: usize,
}

impl TaskTool {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        config: Arc<Config>,
        agents: Arc<AgentRegistry>,
        base_tools: Arc<ToolRegistry>,
        thinking: ThinkingLevel,
        depth: usize,
        parent_session_id: impl Into<String>,
        sessions_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            runner: TaskRunner {
                provider,
                config,
                base_tools,
                thinking,
                parent_session_id: parent_session_id.into(),
                sessions_dir,
            },
            agents,
            depth,
        }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn label(&self) -> &str {
        "task"
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "task".into(),
            description: "Delegate one or more focused tasks to a named sub-agent and \
                 return each task's result. Tasks run sequentially by default; set \
                 parallel=true when they are independent. Sub-agents have the standard \
                 tool set but cannot spawn further task tools beyond the depth limit."
                .into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "agent": {
                        "type": "string",
                        "description": "Name of the sub-agent definition to run"
                    },
                    "context": {
                        "type": "string",
                        "description": "Shared context prepended to every task"
                    },
                    "schema": {
                        "type": "object",
                        "description": "JTD schema overriding the agent's output contract"
                    },
                    "parallel": {
                        "type": "boolean",
                        "description": "Run tasks concurrently (default false)"
                    },
                    "tasks": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": { "type": "string" },
                                "description": { "type": "string" },
                                "assignment": { "type": "string" }
                            },
                            "required": ["id", "assignment"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["agent", "tasks"],
                "additionalProperties": false
            }),
        }
    }

    async fn execute(&self, ctx: &ToolContext, args: &Value) -> anyhow::Result<ToolResult> {
        // Pre-validation; on any failure nothing is spawned and the result
        // carries an empty details list.
        let reject = |msg: String| {
            Ok(ToolResult::error(msg).with_details(ToolResultDetails::Tasks(Vec::new())))
        };

        let max_depth = self.runner.config.tasks.max_depth;
        if self.depth >= max_depth {
            return reject(format!(
                "Maximum recursion depth ({max_depth}) reached; refusing to spawn sub-agents"
            ));
        }

        let agent_name = bosun_tools::args::required_str(args, "agent")?;
        let Some(definition) = self.agents.lookup(agent_name) else {
            return reject(format!(
                "unknown sub-agent '{agent_name}'; available: {}",
                self.agents.names().join(", ")
            ));
        };

        let raw_tasks = bosun_tools::args::required_array(args, "tasks")?;
        if raw_tasks.is_empty() {
            return reject("'tasks' must contain at least one task".into());
        }
        let mut specs = Vec::with_capacity(raw_tasks.len());
        let mut seen_ids = std::collections::HashSet::new();
        for (index, raw) in raw_tasks.iter().enumerate() {
            let id = raw
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("task {index} is missing 'id'"))?;
            if !task_id_pattern().is_match(id) {
                return reject(format!(
                    "task id '{id}' is invalid: ids match ^[a-zA-Z0-9_-]{{1,32}}$"
                ));
            }
            if !seen_ids.insert(id.to_string()) {
                return reject(format!("duplicate task id '{id}'"));
            }
            let assignment = raw
                .get("assignment")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("task '{id}' is missing 'assignment'"))?;
            specs.push(TaskSpec {
                index,
                id: id.to_string(),
                description: raw
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                assignment: assignment.to_string(),
            });
        }

        let parallel = bosun_tools::args::optional_bool(args, "parallel").unwrap_or(false);
        let context = bosun_tools::args::optional_str(args, "context").map(str::to_string);
        let output_schema = args
            .get("schema")
            .filter(|v| v.is_object())
            .cloned()
            .or_else(|| definition.output.clone());

        let system_prompt = sub_agent_prompt(definition, context.as_deref(), output_schema.is_some());
        let plan = TaskPlan {
            definition: definition.clone(),
            system_prompt,
            output_schema,
            child_depth: self.depth + 1,
        };

        debug!(
            agent = agent_name,
            tasks = specs.len(),
            parallel,
            depth = plan.child_depth,
            "spawning sub-agents"
        );

        let results = if parallel {
            self.runner.run_parallel(&plan, specs, ctx).await
        } else {
            self.runner.run_sequential(&plan, specs, ctx).await
        };

        Ok(summarize(results))
    }
}

struct TaskSpec {
    index: usize,
    id: String,
    description: Option<String>,
    assignment: String,
}

struct TaskPlan {
    definition: SubAgentDefinition,
    system_prompt: String,
    output_schema: Option<Value>,
    child_depth: usize,
}

/// The cloneable slice of state each task run needs, so parallel tasks can
/// move a copy into their spawned futures.
#[derive(Clone)]
struct TaskRunner {
    provider: Arc<dyn ModelProvider>,
    config: Arc<Config>,
    base_tools: Arc<ToolRegistry>,
    thinking: ThinkingLevel,
    parent_session_id: String,
    sessions_dir: Option<PathBuf>,
}

impl TaskRunner {
    async fn run_sequential(
        &self,
        plan: &TaskPlan,
        specs: Vec<TaskSpec>,
        ctx: &ToolContext,
    ) -> Vec<SubAgentResult> {
        let total = specs.len();
        let mut completed = Vec::with_capacity(total);
        for spec in specs {
            let result = self.run_one(plan, &spec, ctx.cancel.child_token()).await;
            completed.push(result);
            ctx.progress
                .send(ToolResult::ok(progress_text(&completed, total, &BTreeMap::new())))
                .await;
        }
        completed
    }

    async fn run_parallel(
        &self,
        plan: &TaskPlan,
        specs: Vec<TaskSpec>,
        ctx: &ToolContext,
    ) -> Vec<SubAgentResult> {
        let total = specs.len();
        // One mutex over (completed, active-by-index); progress consumers
        // get immutable snapshots, never deltas.
        let board: Arc<Mutex<Board>> = Arc::new(Mutex::new(Board {
            completed: (0..total).map(|_| None).collect(),
            active: BTreeMap::new(),
        }));

        let mut handles = Vec::with_capacity(total);
        for spec in specs {
            let runner = self.clone();
            let board = Arc::clone(&board);
            let progress = ctx.progress.clone();
            let cancel = ctx.cancel.child_token();
            let plan = TaskPlan {
                definition: plan.definition.clone(),
                system_prompt: plan.system_prompt.clone(),
                output_schema: plan.output_schema.clone(),
                child_depth: plan.child_depth,
            };
            handles.push(tokio::spawn(async move {
                let index = spec.index;
                {
                    let mut b = board.lock().expect("task board poisoned");
                    b.active.insert(index, spec.id.clone());
                }
                let result = runner.run_one(&plan, &spec, cancel).await;
                let snapshot_text = {
                    let mut b = board.lock().expect("task board poisoned");
                    b.active.remove(&index);
                    b.completed[index] = Some(result.clone());
                    let done: Vec<SubAgentResult> =
                        b.completed.iter().flatten().cloned().collect();
                    progress_text(&done, total, &b.active)
                };
                progress.send(ToolResult::ok(snapshot_text)).await;
                (index, result)
            }));
        }

        let mut results: Vec<Option<SubAgentResult>> = (0..total).map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => warn!(error = %e, "parallel task panicked"),
            }
        }
        results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.unwrap_or_else(|| SubAgentResult {
                    id: format!("task-{i}"),
                    agent: plan.definition.name.clone(),
                    description: None,
                    task: String::new(),
                    exit_code: 1,
                    output: String::new(),
                    truncated: false,
                    duration_ms: 0,
                    tokens: 0,
                    error: Some("task panicked".into()),
                    aborted: false,
                    session_file: None,
                })
            })
            .collect()
    }

    /// Run one sub-agent task to completion under its wall-clock budget.
    async fn run_one(
        &self,
        plan: &TaskPlan,
        spec: &TaskSpec,
        cancel: CancellationToken,
    ) -> SubAgentResult {
        let started = std::time::Instant::now();
        let mut result = SubAgentResult {
            id: spec.id.clone(),
            agent: plan.definition.name.clone(),
            description: spec.description.clone(),
            task: spec.assignment.clone(),
            exit_code: 0,
            output: String::new(),
            truncated: false,
            duration_ms: 0,
            tokens: 0,
            error: None,
            aborted: false,
            session_file: None,
        };

        // Tool set: the parent registry (already excluding `task`), narrowed
        // to the definition's allow-list, plus `submit_result` when an
        // output contract applies.
        let mut registry = match &plan.definition.allowed_tools {
            Some(allowed) => self.base_tools.restricted_to(allowed),
            None => (*self.base_tools).clone(),
        };
        let slot = SubmitSlot::new();
        if let Some(schema) = &plan.output_schema {
            match SubmitResultTool::new(Some(schema), slot.clone()) {
                Ok(tool) => registry.register(tool),
                Err(e) => {
                    result.exit_code = 1;
                    result.error = Some(format!("invalid output schema: {e}"));
                    return result;
                }
            }
        }

        let journal = match &self.sessions_dir {
            Some(dir) => {
                let path = dir.join(child_journal_filename(&self.parent_session_id, &spec.id));
                match Journal::open(&path) {
                    Ok(j) => {
                        result.session_file = Some(path.display().to_string());
                        Some(j)
                    }
                    Err(e) => {
                        result.exit_code = 1;
                        result.error = Some(format!("failed to open child journal: {e}"));
                        return result;
                    }
                }
            }
            None => None,
        };

        let mut agent = Agent::new(AgentOptions {
            config: Arc::clone(&self.config),
            provider: Arc::clone(&self.provider),
            tools: Arc::new(registry),
            system_prompt: Some(plan.system_prompt.clone()),
            thinking: self.thinking,
            journal,
            depth: plan.child_depth,
            submit_slot: Some(slot),
        });

        // Sub-agent events have no subscriber here; drain them so the loop
        // never blocks on a full channel.
        let (etx, mut erx) = mpsc::channel(256);
        let drainer = tokio::spawn(async move { while erx.recv().await.is_some() {} });

        let budget = Duration::from_secs(self.config.tasks.task_timeout_secs);
        let run = tokio::time::timeout(budget, agent.run(&spec.assignment, etx, cancel)).await;
        let _ = drainer.await;

        result.duration_ms = started.elapsed().as_millis() as u64;
        match run {
            Err(_) => {
                result.exit_code = 1;
                result.error = Some(format!(
                    "task exceeded its time budget ({}s)",
                    budget.as_secs()
                ));
            }
            Ok(Err(e)) => {
                result.exit_code = 1;
                result.error = Some(e.to_string());
            }
            Ok(Ok(outcome)) => {
                result.tokens = outcome.tokens_used;
                match outcome.submitted {
                    Some(sub) => {
                        result.aborted = sub.status == SubmitStatus::Aborted;
                        result.error = sub.error;
                        if sub.status == SubmitStatus::Success {
                            result.output = serde_json::to_string(&sub.payload)
                                .unwrap_or_else(|_| sub.payload.to_string());
                        }
                    }
                    None => {
                        result.aborted = outcome.stop_reason == StopReason::Aborted;
                        result.output = outcome.final_text;
                        if outcome.stop_reason == StopReason::Error {
                            result.error = Some("sub-agent run ended in a provider error".into());
                        }
                    }
                }
                if result.aborted || result.error.is_some() {
                    result.exit_code = 1;
                }
            }
        }

        if result.output.len() > MAX_OUTPUT_BYTES {
            let cut = floor_char_boundary(&result.output, MAX_OUTPUT_BYTES);
            result.output.truncate(cut);
            result.truncated = true;
        }
        result
    }
}

struct Board {
    completed: Vec<Option<SubAgentResult>>,
    active: BTreeMap<usize, String>,
}

fn sub_agent_prompt(
    definition: &SubAgentDefinition,
    context: Option<&str>,
    has_schema: bool,
) -> String {
    let mut prompt = definition.system_prompt.trim().to_string();
    if let Some(ctx) = context {
        let ctx = ctx.trim();
        if !ctx.is_empty() {
            prompt.push_str("\n\n# Shared context\n");
            prompt.push_str(ctx);
        }
    }
    if has_schema {
        prompt.push_str(
            "\n\nWhen the task is complete, call submit_result with your final \
             result. The payload must satisfy the declared output schema.",
        );
    }
    prompt
}

fn progress_text(
    completed: &[SubAgentResult],
    total: usize,
    active: &BTreeMap<usize, String>,
) -> String {
    let mut lines = vec![format!("{}/{} tasks complete", completed.len(), total)];
    for r in completed {
        lines.push(format!("- {} [{}]", r.id, status_word(r)));
    }
    for id in active.values() {
        lines.push(format!("- {id} [running]"));
    }
    lines.join("\n")
}

fn status_word(r: &SubAgentResult) -> &'static str {
    if r.aborted {
        "aborted"
    } else if r.error.is_some() {
        "failed"
    } else {
        "ok"
    }
}

fn summarize(results: Vec<SubAgentResult>) -> ToolResult {
    let mut lines = Vec::with_capacity(results.len() * 2);
    for r in &results {
        lines.push(format!(
            "task {} [{}] {}ms, {} tokens",
            r.id,
            status_word(r),
            r.duration_ms,
            r.tokens
        ));
        if let Some(e) = &r.error {
            lines.push(format!("  error: {e}"));
        }
        if !r.output.is_empty() {
            lines.push(r.output.clone());
        }
    }
    ToolResult {
        content: vec![ToolContent::text(lines.join("\n"))],
        details: Some(ToolResultDetails::Tasks(results)),
        is_error: false,
    }
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
