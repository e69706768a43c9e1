use std::fmt;

use serde::{Deserialize, Serialize};

/// Status of one task phase.  Transitions are monotonic:
/// `Todo → Running → {Done, Failed}`; `Failed → Todo` only on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Todo,
    Running,
    Done,
    Failed,
}

impl PhaseStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Todo => "TODO",
            Self::Running => "RUNNING",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Serializable view of a task phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPhaseSnapshot {
    pub id: String,
    pub title: String,
    pub description: String,
    pub index: u32,
    pub is_parallel: bool,
    pub status: PhaseStatus,
    pub attempts: u32,
}

/// Serializable view of a whole task plan, stored on the turn at completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPlanSnapshot {
    pub goal: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_task_id: Option<String>,
    pub phases: Vec<TaskPhaseSnapshot>,
}
