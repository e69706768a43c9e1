use serde::Serialize;

/// Structured trace events emitted across all Turnkeep crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionOpened {
        session_id: String,
        user_id: String,
    },
    SessionEnded {
        session_id: String,
        cancelled_approvals: usize,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
        parent_turn_id: Option<String>,
    },
    TurnCompleted {
        session_id: String,
        turn_id: String,
        mode: String,
        resume_chars: usize,
        messages: usize,
    },
    MessageRecorded {
        turn_id: String,
        kind: String,
        seq: u64,
    },
    ApprovalRequested {
        session_id: String,
        tool_call_id: String,
        tool_name: String,
    },
    ApprovalResolved {
        tool_call_id: String,
        outcome: String,
    },
    CommandExecuted {
        command: String,
        user_id: String,
        stage: String,
        succeeded: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "tk_event");
    }
}
