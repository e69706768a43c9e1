use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Role of a recorded execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Agent,
    Thought,
    Tool,
    System,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::Thought => "thought",
            Self::Tool => "tool",
            Self::System => "system",
        }
    }

    /// Label used when rendering a transcript for humans or summarizers.
    pub fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Agent => "Agent",
            Self::Thought => "Thought",
            Self::Tool => "Tool",
            Self::System => "System",
        }
    }
}

/// One persisted step of execution. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub session_id: String,
    pub turn_id: String,
    pub kind: MessageKind,
    pub payload: String,
    pub started_at: DateTime<Utc>,
    /// Insertion sequence assigned by the store; tie-break for equal
    /// `started_at` values.
    pub seq: u64,
    pub trace_id: String,
    pub span_id: String,
}

/// A message before the store has assigned its sequence number.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub session_id: String,
    pub turn_id: String,
    pub kind: MessageKind,
    pub payload: String,
    pub started_at: DateTime<Utc>,
    pub trace_id: String,
    pub span_id: String,
}

impl NewMessage {
    pub fn into_message(self, seq: u64) -> AgentMessage {
        AgentMessage {
            id: self.id,
            session_id: self.session_id,
            turn_id: self.turn_id,
            kind: self.kind,
            payload: self.payload,
            started_at: self.started_at,
            seq,
            trace_id: self.trace_id,
            span_id: self.span_id,
        }
    }
}

/// Sort messages into display order: start time, then insertion sequence.
pub fn sort_for_display(messages: &mut [AgentMessage]) {
    messages.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.seq.cmp(&b.seq))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(seq: u64, at: DateTime<Utc>, payload: &str) -> AgentMessage {
        AgentMessage {
            id: format!("m{seq}"),
            session_id: "s".into(),
            turn_id: "t".into(),
            kind: MessageKind::Agent,
            payload: payload.into(),
            started_at: at,
            seq,
            trace_id: "tr".into(),
            span_id: "sp".into(),
        }
    }

    #[test]
    fn equal_timestamps_keep_insertion_order() {
        let now = Utc::now();
        let mut list = vec![msg(3, now, "c"), msg(1, now, "a"), msg(2, now, "b")];
        sort_for_display(&mut list);
        let order: Vec<_> = list.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn earlier_start_sorts_first_regardless_of_seq() {
        let now = Utc::now();
        let earlier = now - chrono::Duration::seconds(5);
        let mut list = vec![msg(1, now, "late"), msg(2, earlier, "early")];
        sort_for_display(&mut list);
        assert_eq!(list[0].payload, "early");
    }
}
