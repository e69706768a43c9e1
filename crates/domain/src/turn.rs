use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::plan::TaskPlanSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Open,
    Completed,
}

/// One bounded unit of agent work inside a session.
///
/// `ended_at` is set iff `state == Completed`; completed turns are never
/// mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_turn_id: Option<String>,
    pub state: TurnState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    /// Task plan as it stood when the turn completed, if one was attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<TaskPlanSnapshot>,
}

impl Turn {
    pub fn open(id: &str, parent_turn_id: Option<&str>, session_id: &str) -> Self {
        Self {
            id: id.to_owned(),
            session_id: session_id.to_owned(),
            parent_turn_id: parent_turn_id.map(str::to_owned),
            state: TurnState::Open,
            started_at: Utc::now(),
            ended_at: None,
            resume: None,
            plan: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == TurnState::Completed
    }
}

/// Everything the store needs to flip a turn from OPEN to COMPLETED.
#[derive(Debug, Clone)]
pub struct TurnCompletion {
    pub resume: Option<String>,
    pub ended_at: DateTime<Utc>,
    pub plan: Option<TaskPlanSnapshot>,
    /// Highest message `seq` the resume was built from (0 for no messages).
    /// The store refuses the completion if the turn holds anything newer.
    pub compacted_through: u64,
}
