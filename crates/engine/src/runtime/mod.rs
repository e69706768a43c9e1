//! Core runtime — ties sessions, strategies, turns, approvals and
//! compaction into one request-driven loop.
//!
//! Entry point: [`advance`] resolves a strategy, opens a turn, lets the
//! strategy drive it and completes the turn with a resume summary the next
//! turn inherits.

pub mod approval;
pub mod compact;
pub mod context;
pub mod dispatcher;
pub mod plan;
pub mod recorder;
pub mod strategies;
pub mod turn;

use std::collections::HashMap;

use tracing::Instrument;

use tk_domain::error::{Error, Result};
use tk_domain::session::Session;
use tk_domain::trace::TraceEvent;
use tk_domain::turn::Turn;

use crate::state::EngineState;

use self::approval::ApprovalDecision;
use self::dispatcher::TurnRun;
use self::recorder::{ExecutionEvent, MessageRecorder};

/// Truncate to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_owned(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn open_session(
    state: &EngineState,
    user_id: &str,
    metadata: HashMap<String, serde_json::Value>,
) -> Result<Session> {
    let session = state
        .storage
        .create_session(Session::new(user_id, metadata))
        .await?;
    TraceEvent::SessionOpened {
        session_id: session.id.clone(),
        user_id: session.user_id.clone(),
    }
    .emit();
    Ok(session)
}

/// End a session.  Tool calls it still has waiting for approval resolve as
/// denied.
pub async fn end_session(
    state: &EngineState,
    session_id: &str,
    summary: Option<String>,
) -> Result<Session> {
    let session = state.storage.end_session(session_id, summary).await?;
    let cancelled = state.gate.cancel_session(session_id);
    if cancelled > 0 {
        tracing::info!(session_id, cancelled, "pending approvals cancelled");
    }
    TraceEvent::SessionEnded {
        session_id: session_id.to_owned(),
        cancelled_approvals: cancelled,
    }
    .emit();
    Ok(session)
}

pub async fn update_session_metadata(
    state: &EngineState,
    session_id: &str,
    patch: HashMap<String, serde_json::Value>,
) -> Result<Session> {
    state.storage.merge_session_metadata(session_id, patch).await
}

/// Inbound approval decision from the transport layer.  Returns `false`
/// when nothing was pending under `tool_call_id`.
pub fn resolve_approval(state: &EngineState, tool_call_id: &str, decision: ApprovalDecision) -> bool {
    let resolved = state.gate.resolve(tool_call_id, decision);
    if !resolved {
        tracing::debug!(tool_call_id, "no pending approval to resolve");
    }
    resolved
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// advance — one turn end to end
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to a single turn.
#[derive(Debug, Clone)]
pub struct AdvanceRequest {
    pub session_id: String,
    pub strategy: String,
    pub input: String,
    /// Caller-chosen turn id; generated when absent.
    pub turn_id: Option<String>,
    pub parent_turn_id: Option<String>,
}

impl AdvanceRequest {
    pub fn new(session_id: &str, strategy: &str, input: &str) -> Self {
        Self {
            session_id: session_id.to_owned(),
            strategy: strategy.to_owned(),
            input: input.to_owned(),
            turn_id: None,
            parent_turn_id: None,
        }
    }

    pub fn with_turn_id(mut self, turn_id: &str) -> Self {
        self.turn_id = Some(turn_id.to_owned());
        self
    }

    pub fn child_of(mut self, parent_turn_id: &str) -> Self {
        self.parent_turn_id = Some(parent_turn_id.to_owned());
        self
    }
}

/// Run one turn: resolve the strategy, open the turn, replay inherited
/// context, let the strategy drive it, then complete it.
///
/// An unknown strategy fails before anything is written.  If the strategy
/// itself fails, the failure is recorded on the turn and the turn is left
/// OPEN.
pub async fn advance(state: &EngineState, request: AdvanceRequest) -> Result<Turn> {
    let strategy = state.strategies.resolve(&request.strategy)?;
    let turn_id = request
        .turn_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = tracing::info_span!(
        "turn",
        session_id = %request.session_id,
        turn_id = %turn_id,
        strategy = %strategy.name(),
    );

    async move {
        let context = state
            .replay
            .build(state.storage.as_ref(), &request.session_id)
            .await?;

        state
            .turns
            .start_turn(&turn_id, request.parent_turn_id.as_deref(), &request.session_id)
            .await?;

        let recorder = MessageRecorder::new(state.storage.clone(), &request.session_id, &turn_id);
        recorder
            .record(&ExecutionEvent::UserInput {
                text: request.input.clone(),
            })
            .await?;

        let run = TurnRun::new(
            &request.session_id,
            &turn_id,
            strategy.name(),
            &request.input,
            context,
            recorder,
            state.gate.clone(),
            state.config.tasks.clamped().max_phase_retries,
        );
        tracing::debug!(inherited = run.context.len(), "turn started");

        if let Err(e) = strategy.execute(&run).await {
            tracing::warn!(error = %e, "strategy failed, turn left open");
            run.record(ExecutionEvent::System {
                text: format!("strategy failed: {e}"),
            })
            .await?;
            return Err(e);
        }

        let plan = run.plan().map(|p| p.snapshot());
        let turn = state.turns.complete_turn_with_plan(&turn_id, plan).await?;
        tracing::debug!("turn completed");
        Ok(turn)
    }
    .instrument(span)
    .await
}

/// Complete a turn that was left open, e.g. after a strategy failure.
pub async fn complete_turn(state: &EngineState, turn_id: &str) -> Result<Turn> {
    state.turns.complete_turn(turn_id).await
}

/// The session's turns, oldest first.
pub async fn session_turns(state: &EngineState, session_id: &str) -> Result<Vec<Turn>> {
    if state.storage.get_session(session_id).await?.is_none() {
        return Err(Error::SessionNotFound(session_id.to_owned()));
    }
    state.storage.list_turns(session_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello", 5), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
        assert_eq!(truncate_str("héllo wörld", 2), "hé...");
        assert_eq!(truncate_str("", 0), "");
    }
}
