//! `turnkeep demo` — a scripted session against the in-memory store.
//!
//! Shows inherited context, a phased plan with a gated tool call, turn
//! compaction and the command gateway in one run.  With a state dir the
//! store is loaded from and flushed back to `<dir>/turnkeep.json`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

use tk_domain::config::Config;
use tk_domain::turn::Turn;
use tk_store::{MemoryStore, Storage};

use crate::bootstrap::EngineBuilder;
use crate::commands::{ArgKind, ArgSpec, CommandHandler, CommandInvocation, CommandRequest, CommandSpec, GrantSet};
use crate::runtime::approval::{ApprovalDecision, BroadcastNotifier};
use crate::runtime::{self, AdvanceRequest};
use crate::state::EngineState;

const DEMO_USER: &str = "demo";

/// Approval timeout cap when nobody answers, so the demo still finishes.
const UNANSWERED_TIMEOUT_SECS: u64 = 3;

/// How the demo operator answers approval requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorMode {
    Approve,
    Deny,
    Ignore,
}

/// Lists a session's turns.
struct TurnsCommand {
    storage: Arc<dyn Storage>,
}

#[async_trait]
impl CommandHandler for TurnsCommand {
    async fn handle(
        &self,
        invocation: &CommandInvocation,
    ) -> std::result::Result<serde_json::Value, String> {
        let session_id = invocation.args.str("session").unwrap_or_default();
        let limit = invocation.args.int("limit").unwrap_or(i64::MAX).max(0) as usize;
        let turns = self
            .storage
            .list_turns(session_id)
            .await
            .map_err(|e| e.to_string())?;
        Ok(json!(turns
            .iter()
            .take(limit)
            .map(|t| json!({ "id": t.id, "state": t.state, "resume": t.resume }))
            .collect::<Vec<_>>()))
    }
}

/// Apply the demo's overrides to the loaded config.
fn demo_config(mut config: Config, operator: OperatorMode) -> Config {
    if operator == OperatorMode::Ignore {
        config.approval.timeout_secs = config.approval.timeout_secs.min(UNANSWERED_TIMEOUT_SECS);
    }
    config
}

pub async fn run(
    config: Config,
    operator: OperatorMode,
    state_dir: Option<&Path>,
) -> anyhow::Result<()> {
    let config = demo_config(config, operator);
    let store = Arc::new(match state_dir {
        Some(dir) => MemoryStore::open(dir)?,
        None => MemoryStore::new(),
    });
    let storage: Arc<dyn Storage> = store.clone();
    let notifier = Arc::new(BroadcastNotifier::new(16));
    let mut requests = notifier.subscribe();

    let state = EngineBuilder::new(config)
        .with_builtin_strategies()
        .storage(storage.clone())
        .notifier(notifier)
        .permissions(Arc::new(GrantSet::default().grant(DEMO_USER, "turns.read")))
        .command(
            CommandSpec::new("turns", Arc::new(TurnsCommand { storage }))
                .describe("List the turns of a session")
                .arg(ArgSpec::required("session", ArgKind::String))
                .option(ArgSpec::optional("limit", ArgKind::Integer))
                .permission("turns.read"),
        )
        .build()?;

    // Stand-in for a human operator answering approval prompts.
    let operator_state = state.clone();
    tokio::spawn(async move {
        loop {
            match requests.recv().await {
                Ok(request) => {
                    let decision = match operator {
                        OperatorMode::Approve => ApprovalDecision::Approved,
                        OperatorMode::Deny => ApprovalDecision::Denied {
                            reason: Some("operator declined".into()),
                        },
                        OperatorMode::Ignore => continue,
                    };
                    println!("  [operator] {} {}", decision_label(&decision), request.tool_name);
                    runtime::resolve_approval(&operator_state, &request.tool_call_id, decision);
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    let session = runtime::open_session(
        &state,
        DEMO_USER,
        HashMap::from([("source".to_string(), json!("demo"))]),
    )
    .await?;
    println!("session {} (compaction: {})", session.id, state.config.compaction.mode);

    let script = [
        ("echo", "hello"),
        (
            "phased",
            "gather requirements; & write code; & write tests; deploy !exec",
        ),
        ("echo", "what is next?"),
    ];
    for (strategy, input) in script {
        let turn = runtime::advance(&state, AdvanceRequest::new(&session.id, strategy, input)).await?;
        print_turn(&state, strategy, &turn).await?;
    }

    println!("\ncommands:");
    for line in [
        format!("turns {} --limit 2", session.id),
        "deploy prod".to_string(),
        "turns".to_string(),
    ] {
        match state
            .commands
            .execute(CommandRequest::parse(DEMO_USER, &line))
            .await
        {
            Ok(resp) => println!("  $ {line}\n    {}", resp.output),
            Err(e) => println!("  $ {line}\n    error: {e}"),
        }
    }
    for entry in state.commands.history().list(10).iter().rev() {
        println!(
            "  history: {} stage={} ok={}",
            entry.command, entry.stage, entry.succeeded
        );
    }

    let ended = runtime::end_session(&state, &session.id, Some("demo finished".into())).await?;
    println!("\nsession ended: {:?}", ended.state);

    if let Some(dir) = state_dir {
        store.flush_async().await?;
        println!("state saved to {} ({} sessions)", dir.display(), store.session_count());
    }
    Ok(())
}

fn decision_label(decision: &ApprovalDecision) -> &'static str {
    match decision {
        ApprovalDecision::Approved => "approve",
        ApprovalDecision::Denied { .. } => "deny",
    }
}

async fn print_turn(state: &EngineState, strategy: &str, turn: &Turn) -> anyhow::Result<()> {
    println!("\nturn {} [{strategy}] {:?}", turn.id, turn.state);
    for m in state.storage.list_messages_by_turn(&turn.id).await? {
        println!("  {:>7}: {}", m.kind.label(), m.payload);
    }
    if let Some(plan) = &turn.plan {
        for phase in &plan.phases {
            let mark = if phase.is_parallel { "&" } else { " " };
            println!("  phase {mark}{} {} ({})", phase.index + 1, phase.title, phase.status);
        }
    }
    match turn.resume.as_deref() {
        Some(resume) => println!("  resume: {resume:?}"),
        None => println!("  resume: <none>"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unanswered_approvals_get_a_short_timeout() {
        let config = demo_config(Config::default(), OperatorMode::Ignore);
        assert_eq!(config.approval.timeout_secs, UNANSWERED_TIMEOUT_SECS);

        let mut short = Config::default();
        short.approval.timeout_secs = 1;
        assert_eq!(demo_config(short, OperatorMode::Ignore).approval.timeout_secs, 1);

        let config = demo_config(Config::default(), OperatorMode::Approve);
        assert_eq!(config.approval.timeout_secs, 300);
    }

    #[tokio::test]
    async fn state_dir_keeps_sessions_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        run(Config::default(), OperatorMode::Approve, Some(dir.path()))
            .await
            .unwrap();
        run(Config::default(), OperatorMode::Approve, Some(dir.path()))
            .await
            .unwrap();

        let store = MemoryStore::open(dir.path()).unwrap();
        assert_eq!(store.session_count(), 2);
    }
}
