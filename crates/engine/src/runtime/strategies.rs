//! Built-in agent strategies.
//!
//! - `echo` replies with the user input.
//! - `phased` turns the input into a [`TaskModeMeta`] and drives it batch by
//!   batch, running each batch of parallel phases concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;

use tk_domain::error::Result;
use tk_domain::plan::PhaseStatus;
use tk_domain::tool::ToolCall;

use super::dispatcher::{AgentStrategy, ToolRun, TurnRun};
use super::plan::{TaskModeMeta, TaskPhase};
use super::recorder::ExecutionEvent;

pub struct EchoStrategy;

#[async_trait]
impl AgentStrategy for EchoStrategy {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, run: &TurnRun) -> Result<()> {
        run.say(run.input.clone()).await?;
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phase runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Does the actual work behind a [`PhasedStrategy`].
#[async_trait]
pub trait PhaseRunner: Send + Sync {
    /// Break the turn input into a plan.
    fn plan(&self, input: &str) -> TaskModeMeta;

    /// The tool call a phase needs before it can run, if any.
    fn tool_for(&self, _phase: &TaskPhase) -> Option<ToolCall> {
        None
    }

    /// Execute an approved tool call.
    async fn execute_tool(&self, call: ToolCall) -> std::result::Result<String, String> {
        Ok(format!("{} ok", call.tool_name))
    }

    /// Do the phase's work.  `Err` fails the phase.
    async fn run_phase(&self, phase: &TaskPhase) -> std::result::Result<String, String>;
}

/// Plans from a step script: steps separated by `;` or newlines, a leading
/// `&` marks a step parallel, and a `!name` token asks for tool `name`.
///
/// `& lint ; & test ; deploy !exec` gives two parallel phases followed by a
/// gated deploy.
pub struct ScriptRunner;

struct ScriptStep {
    title: String,
    parallel: bool,
    tool: Option<String>,
}

fn parse_step(raw: &str) -> Option<ScriptStep> {
    let mut text = raw.trim();
    let parallel = text.starts_with('&');
    if parallel {
        text = text[1..].trim_start();
    }
    let mut tool = None;
    let mut words = Vec::new();
    for word in text.split_whitespace() {
        match word.strip_prefix('!') {
            Some(name) if !name.is_empty() => tool = Some(name.to_owned()),
            _ => words.push(word),
        }
    }
    if words.is_empty() {
        return None;
    }
    Some(ScriptStep {
        title: words.join(" "),
        parallel,
        tool,
    })
}

fn script_steps(input: &str) -> Vec<ScriptStep> {
    input
        .split(|c| c == ';' || c == '\n')
        .filter_map(parse_step)
        .collect()
}

#[async_trait]
impl PhaseRunner for ScriptRunner {
    fn plan(&self, input: &str) -> TaskModeMeta {
        let phases = script_steps(input)
            .into_iter()
            .enumerate()
            .map(|(i, step)| {
                let mut phase = TaskPhase::new(&format!("p{}", i + 1), &step.title, i as u32);
                if let Some(tool) = step.tool {
                    phase = phase.with_description(&format!("tool:{tool}"));
                }
                if step.parallel {
                    phase = phase.parallel();
                }
                phase
            })
            .collect();
        TaskModeMeta::new(input.trim(), phases)
    }

    fn tool_for(&self, phase: &TaskPhase) -> Option<ToolCall> {
        let tool = phase.description.strip_prefix("tool:")?;
        Some(ToolCall::new(tool).arg("phase", phase.title.clone()))
    }

    async fn run_phase(&self, phase: &TaskPhase) -> std::result::Result<String, String> {
        Ok(format!("{} done", phase.title))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Phased strategy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PhasedStrategy {
    runner: Arc<dyn PhaseRunner>,
}

impl PhasedStrategy {
    pub fn new(runner: Arc<dyn PhaseRunner>) -> Self {
        Self { runner }
    }

    /// Run one phase to DONE or FAILED.  A phase someone else already
    /// started is skipped.
    async fn drive_phase(&self, run: &TurnRun, plan: &TaskModeMeta, phase: &TaskPhase) -> Result<()> {
        if phase.start().is_err() {
            tracing::debug!(phase_id = %phase.id, "phase already taken");
            return Ok(());
        }
        plan.set_current(&phase.id)?;
        run.record(ExecutionEvent::Thought {
            content: format!("phase {}: {}", phase.index + 1, phase.title),
        })
        .await?;

        if let Some(call) = self.runner.tool_for(phase) {
            let runner = self.runner.clone();
            match run.run_tool(call, |c| async move { runner.execute_tool(c).await }).await? {
                ToolRun::Completed { is_error: false, .. } => {}
                ToolRun::Completed { content, .. } => {
                    return self.fail_phase(run, plan, phase, &content).await;
                }
                ToolRun::Refused(outcome) => {
                    let reason = format!("tool {}", outcome.as_str());
                    return self.fail_phase(run, plan, phase, &reason).await;
                }
            }
        }

        match self.runner.run_phase(phase).await {
            Ok(text) => {
                phase.complete()?;
                run.say(text).await?;
                Ok(())
            }
            Err(message) => self.fail_phase(run, plan, phase, &message).await,
        }
    }

    async fn fail_phase(
        &self,
        run: &TurnRun,
        plan: &TaskModeMeta,
        phase: &TaskPhase,
        reason: &str,
    ) -> Result<()> {
        phase.fail()?;
        tracing::warn!(phase_id = %phase.id, attempts = phase.attempts(), reason, "phase failed");
        run.record(ExecutionEvent::System {
            text: format!("phase {} failed: {reason}", phase.title),
        })
        .await?;
        if plan.retry(&phase.id).is_ok() {
            tracing::info!(phase_id = %phase.id, "phase queued for retry");
        }
        Ok(())
    }
}

#[async_trait]
impl AgentStrategy for PhasedStrategy {
    fn name(&self) -> &str {
        "phased"
    }

    async fn execute(&self, run: &TurnRun) -> Result<()> {
        let plan = run.attach_plan(self.runner.plan(&run.input));
        run.record(ExecutionEvent::System {
            text: format!("plan: {} ({} phases)", plan.goal, plan.phases().len()),
        })
        .await?;

        loop {
            let batch = plan.next_batch();
            if batch.is_empty() {
                break;
            }
            tracing::debug!(
                phases = ?batch.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
                "running phase batch"
            );
            let results = join_all(batch.into_iter().map(|p| self.drive_phase(run, &plan, p))).await;
            for r in results {
                r?;
            }
        }

        if plan.is_finished() {
            run.say(format!("goal complete: {}", plan.goal)).await?;
        } else {
            let failed: Vec<&str> = plan
                .ordered_phases()
                .into_iter()
                .filter(|p| p.status() == PhaseStatus::Failed)
                .map(|p| p.title.as_str())
                .collect();
            run.say(format!("goal stopped, failed phases: {}", failed.join(", ")))
                .await?;
        }
        Ok(())
    }
}
