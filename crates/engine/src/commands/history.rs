//! Command history — a bounded in-memory audit ring.
//!
//! Every gateway request lands here, successful or not, together with the
//! pipeline stage it reached.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// The pipeline stage a request stopped at (or `Completed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStage {
    Existence,
    Permission,
    Validation,
    Dispatch,
    Completed,
}

impl fmt::Display for CommandStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Existence => "existence",
            Self::Permission => "permission",
            Self::Validation => "validation",
            Self::Dispatch => "dispatch",
            Self::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub id: String,
    pub user_id: String,
    pub command: String,
    pub args: Vec<String>,
    pub stage: CommandStage,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub at: DateTime<Utc>,
    pub duration_ms: u64,
}

pub struct CommandHistory {
    limit: usize,
    inner: RwLock<VecDeque<HistoryEntry>>,
}

impl CommandHistory {
    /// `limit` of 0 is treated as 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            inner: RwLock::new(VecDeque::new()),
        }
    }

    pub fn push(&self, entry: HistoryEntry) {
        let mut inner = self.inner.write();
        inner.push_back(entry);
        while inner.len() > self.limit {
            inner.pop_front();
        }
    }

    /// Most recent first.
    pub fn list(&self, limit: usize) -> Vec<HistoryEntry> {
        self.inner.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(command: &str) -> HistoryEntry {
        HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: "alice".into(),
            command: command.into(),
            args: vec![],
            stage: CommandStage::Completed,
            succeeded: true,
            error: None,
            at: Utc::now(),
            duration_ms: 0,
        }
    }

    #[test]
    fn ring_drops_oldest() {
        let history = CommandHistory::new(2);
        history.push(entry("a"));
        history.push(entry("b"));
        history.push(entry("c"));
        let names: Vec<_> = history.list(10).into_iter().map(|e| e.command).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert_eq!(history.list(1).len(), 1);
    }

    #[test]
    fn zero_limit_keeps_one() {
        let history = CommandHistory::new(0);
        history.push(entry("a"));
        history.push(entry("b"));
        assert_eq!(history.len(), 1);
    }
}
