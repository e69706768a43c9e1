use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a conversation container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Ended,
}

/// A long-lived conversation owned by one user.
///
/// An ended session accepts no new turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub state: SessionState,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_summary: Option<String>,
}

impl Session {
    pub fn new(user_id: &str, metadata: HashMap<String, serde_json::Value>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            state: SessionState::Active,
            metadata,
            created_at: Utc::now(),
            ended_at: None,
            end_summary: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Mark the session ended. No-op when already ended.
    pub fn end(&mut self, summary: Option<String>) {
        if !self.is_active() {
            return;
        }
        self.state = SessionState::Ended;
        self.ended_at = Some(Utc::now());
        self.end_summary = summary;
    }
}
