/// Shared error type used across all Turnkeep crates.
///
/// Approval outcomes (denied, timed out) are deliberately absent: they are
/// business results the orchestrating strategy branches on, not faults.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    // ── Configuration ────────────────────────────────────────────────
    #[error("strategy not found: {0}")]
    StrategyNotFound(String),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("config: {0}")]
    Config(String),

    // ── Consistency ──────────────────────────────────────────────────
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} has ended")]
    SessionEnded(String),

    #[error("turn not found: {0}")]
    TurnNotFound(String),

    #[error("turn {0} is completed and accepts no new messages")]
    TurnClosed(String),

    #[error("turn {turn_id} gained messages after seq {compacted_through} while compacting")]
    StaleCompaction {
        turn_id: String,
        compacted_through: u64,
    },

    #[error("invalid turn id {0:?}")]
    InvalidTurnId(String),

    #[error("duplicate turn: {0}")]
    DuplicateTurn(String),

    #[error("invalid turn hierarchy for {turn_id}: {reason}")]
    InvalidTurnHierarchy { turn_id: String, reason: String },

    // ── Task plan ────────────────────────────────────────────────────
    #[error("phase not found: {0}")]
    PhaseNotFound(String),

    #[error("phase {phase_id}: cannot move from {from} to {to}")]
    InvalidPhaseTransition {
        phase_id: String,
        from: String,
        to: String,
    },

    // ── Permission / validation ──────────────────────────────────────
    #[error("permission denied: user {user_id} may not run {command}")]
    PermissionDenied { command: String, user_id: String },

    #[error("invalid arguments for {command}: {}", failures.join("; "))]
    InvalidArguments {
        command: String,
        failures: Vec<String>,
    },

    #[error("command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    // ── Compaction ───────────────────────────────────────────────────
    #[error("compaction: {0}")]
    Compaction(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Configuration errors are surfaced verbatim and never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::StrategyNotFound(_) | Self::UnknownCommand(_) | Self::Config(_)
        )
    }

    /// Consistency errors fail a single operation; callers must not assume
    /// partial success.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Self::SessionNotFound(_)
                | Self::SessionEnded(_)
                | Self::TurnNotFound(_)
                | Self::TurnClosed(_)
                | Self::StaleCompaction { .. }
                | Self::InvalidTurnId(_)
                | Self::DuplicateTurn(_)
                | Self::InvalidTurnHierarchy { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_lists_every_failure() {
        let err = Error::InvalidArguments {
            command: "deploy".into(),
            failures: vec!["missing <target>".into(), "--replicas: not an integer".into()],
        };
        assert_eq!(
            err.to_string(),
            "invalid arguments for deploy: missing <target>; --replicas: not an integer"
        );
    }

    #[test]
    fn taxonomy_helpers() {
        assert!(Error::StrategyNotFound("x".into()).is_configuration());
        assert!(Error::DuplicateTurn("t1".into()).is_consistency());
        assert!(Error::InvalidTurnId(" ".into()).is_consistency());
        assert!(!Error::Compaction("boom".into()).is_consistency());
    }
}
