//! Agent strategy dispatcher.
//!
//! Strategies are registered once at startup through
//! [`StrategyRegistry::builder`]; the built registry has no mutation path and
//! is shared freely across tasks.  Lookup trims the requested name and then
//! matches exactly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use tk_domain::error::{Error, Result};
use tk_domain::message::AgentMessage;
use tk_domain::tool::ToolCall;

use super::approval::{ApprovalContext, ApprovalOutcome, ApprovalRequest, ToolApprovalGate};
use super::context::ContextEntry;
use super::plan::TaskModeMeta;
use super::recorder::{ExecutionEvent, MessageRecorder};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Strategy contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision loop driving one turn.
///
/// `execute` returning `Ok` signals the turn is done and may be completed.
/// Denied or timed-out tool calls are outcomes to branch on, not errors.
#[async_trait]
pub trait AgentStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, run: &TurnRun) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct StrategyRegistryBuilder {
    strategies: HashMap<String, Arc<dyn AgentStrategy>>,
}

impl StrategyRegistryBuilder {
    pub fn register(mut self, strategy: Arc<dyn AgentStrategy>) -> Self {
        let name = strategy.name().to_owned();
        if self.strategies.insert(name.clone(), strategy).is_some() {
            tracing::warn!(strategy = %name, "strategy registered twice, keeping the last one");
        } else {
            tracing::debug!(strategy = %name, "registered agent strategy");
        }
        self
    }

    pub fn build(self) -> StrategyRegistry {
        StrategyRegistry {
            strategies: self.strategies,
        }
    }
}

/// Read-only name → strategy mapping.
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn AgentStrategy>>,
}

impl StrategyRegistry {
    pub fn builder() -> StrategyRegistryBuilder {
        StrategyRegistryBuilder::default()
    }

    /// Look up a strategy.  Surrounding whitespace in `name` is ignored.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn AgentStrategy>> {
        let trimmed = name.trim();
        self.strategies
            .get(trimmed)
            .cloned()
            .ok_or_else(|| Error::StrategyNotFound(trimmed.to_owned()))
    }

    /// Registered names (sorted).
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.strategies.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnRun — what a strategy sees while it drives a turn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of pushing a tool call through the gate.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolRun {
    /// The call was approved and executed.
    Completed { content: String, is_error: bool },
    /// The call never ran.
    Refused(ApprovalOutcome),
}

pub struct TurnRun {
    pub session_id: String,
    pub turn_id: String,
    pub strategy: String,
    pub input: String,
    /// Context inherited from earlier turns, oldest first.
    pub context: Vec<ContextEntry>,
    recorder: MessageRecorder,
    gate: Arc<dyn ToolApprovalGate>,
    plan: Mutex<Option<Arc<TaskModeMeta>>>,
    max_phase_retries: u32,
}

impl TurnRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: &str,
        turn_id: &str,
        strategy: &str,
        input: &str,
        context: Vec<ContextEntry>,
        recorder: MessageRecorder,
        gate: Arc<dyn ToolApprovalGate>,
        max_phase_retries: u32,
    ) -> Self {
        Self {
            session_id: session_id.to_owned(),
            turn_id: turn_id.to_owned(),
            strategy: strategy.to_owned(),
            input: input.to_owned(),
            context,
            recorder,
            gate,
            plan: Mutex::new(None),
            max_phase_retries,
        }
    }

    pub async fn record(&self, event: ExecutionEvent) -> Result<AgentMessage> {
        self.recorder.record(&event).await
    }

    /// Record an agent reply.
    pub async fn say(&self, text: impl Into<String>) -> Result<AgentMessage> {
        self.record(ExecutionEvent::AgentText { text: text.into() }).await
    }

    pub fn trace_id(&self) -> &str {
        self.recorder.trace_id()
    }

    /// Record a tool call, pass it through the approval gate and record the
    /// outcome.  Suspends until a decision, a timeout, or session end.
    pub async fn request_tool(&self, call: &ToolCall) -> Result<ApprovalOutcome> {
        self.record(ExecutionEvent::ToolCall {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: serde_json::to_value(&call.arguments)?,
        })
        .await?;

        let outcome = self
            .gate
            .review(ApprovalRequest {
                session_id: self.session_id.clone(),
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                tool_args: call.arguments.clone(),
                context: ApprovalContext {
                    turn_id: self.turn_id.clone(),
                    strategy: self.strategy.clone(),
                    trace_id: self.trace_id().to_owned(),
                },
                created_at: Utc::now(),
            })
            .await;

        self.record(ExecutionEvent::Approval {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            outcome: outcome.clone(),
        })
        .await?;
        Ok(outcome)
    }

    /// Gate a tool call and, once approved, execute it with `exec` and
    /// record its result.
    pub async fn run_tool<F, Fut>(&self, call: ToolCall, exec: F) -> Result<ToolRun>
    where
        F: FnOnce(ToolCall) -> Fut + Send,
        Fut: std::future::Future<Output = std::result::Result<String, String>> + Send,
    {
        let outcome = self.request_tool(&call).await?;
        if outcome.is_denial() {
            tracing::info!(
                tool_call_id = %call.call_id,
                tool_name = %call.tool_name,
                outcome = outcome.as_str(),
                "tool call refused"
            );
            return Ok(ToolRun::Refused(outcome));
        }

        let call_id = call.call_id.clone();
        let tool_name = call.tool_name.clone();
        let (content, is_error) = match exec(call).await {
            Ok(content) => (content, false),
            Err(message) => (message, true),
        };
        self.record(ExecutionEvent::ToolResult {
            call_id,
            tool_name,
            content: content.clone(),
            is_error,
        })
        .await?;
        Ok(ToolRun::Completed { content, is_error })
    }

    /// Attach a task plan to this turn.  It is snapshotted onto the turn
    /// record at completion.
    pub fn attach_plan(&self, plan: TaskModeMeta) -> Arc<TaskModeMeta> {
        let plan = Arc::new(plan.with_max_retries(self.max_phase_retries));
        *self.plan.lock() = Some(plan.clone());
        plan
    }

    pub fn plan(&self) -> Option<Arc<TaskModeMeta>> {
        self.plan.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl std::fmt::Debug for dyn AgentStrategy {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_tuple("AgentStrategy").field(&self.name()).finish()
        }
    }

    #[async_trait]
    impl AgentStrategy for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn execute(&self, _run: &TurnRun) -> Result<()> {
            Ok(())
        }
    }

    fn registry() -> StrategyRegistry {
        StrategyRegistry::builder()
            .register(Arc::new(Named("foo")))
            .register(Arc::new(Named("planner")))
            .build()
    }

    #[test]
    fn resolve_trims_then_matches_exactly() {
        let reg = registry();
        assert_eq!(reg.resolve("foo").unwrap().name(), "foo");
        assert_eq!(reg.resolve("  foo \n").unwrap().name(), "foo");
        assert!(reg.resolve("Foo").is_err());
    }

    #[test]
    fn unknown_names_fail_with_the_same_kind() {
        let reg = registry();
        for name in ["bar", " bar ", "", "   "] {
            match reg.resolve(name) {
                Err(Error::StrategyNotFound(n)) => assert_eq!(n, name.trim()),
                Err(other) => panic!("unexpected error: {other}"),
                Ok(_) => panic!("{name:?} should not resolve"),
            }
        }
        assert!(reg.resolve("bar").unwrap_err().is_configuration());
    }

    #[test]
    fn names_are_sorted() {
        let reg = registry();
        assert_eq!(reg.names(), vec!["foo", "planner"]);
        assert_eq!(reg.len(), 2);
        assert!(!reg.is_empty());
    }

    #[test]
    fn later_registration_wins() {
        struct Other;
        #[async_trait]
        impl AgentStrategy for Other {
            fn name(&self) -> &str {
                "foo"
            }
            async fn execute(&self, run: &TurnRun) -> Result<()> {
                run.say("other").await.map(|_| ())
            }
        }
        let reg = StrategyRegistry::builder()
            .register(Arc::new(Named("foo")))
            .register(Arc::new(Other))
            .build();
        assert_eq!(reg.len(), 1);
    }
}
