//! Message recorder — turns raw execution events into persisted
//! [`AgentMessage`]s bound to a session and a turn.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use tk_domain::message::{AgentMessage, MessageKind, NewMessage};
use tk_domain::Result;
use tk_store::Storage;

use super::approval::ApprovalOutcome;
use super::truncate_str;

/// Tool arguments are previewed, not stored whole, in the message payload.
const ARGS_PREVIEW_CHARS: usize = 500;

/// Something that happened while a strategy drove a turn.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    UserInput {
        text: String,
    },
    AgentText {
        text: String,
    },
    Thought {
        content: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
    Approval {
        call_id: String,
        tool_name: String,
        outcome: ApprovalOutcome,
    },
    System {
        text: String,
    },
}

impl ExecutionEvent {
    fn kind(&self) -> MessageKind {
        match self {
            Self::UserInput { .. } => MessageKind::User,
            Self::AgentText { .. } => MessageKind::Agent,
            Self::Thought { .. } => MessageKind::Thought,
            Self::ToolCall { .. } | Self::ToolResult { .. } => MessageKind::Tool,
            Self::Approval { .. } | Self::System { .. } => MessageKind::System,
        }
    }

    fn payload(&self) -> String {
        match self {
            Self::UserInput { text } | Self::AgentText { text } | Self::System { text } => {
                text.clone()
            }
            Self::Thought { content } => content.clone(),
            Self::ToolCall {
                tool_name,
                arguments,
                ..
            } => {
                let args = serde_json::to_string(arguments).unwrap_or_default();
                format!("{tool_name}({})", truncate_str(&args, ARGS_PREVIEW_CHARS))
            }
            Self::ToolResult {
                tool_name,
                content,
                is_error,
                ..
            } => {
                if *is_error {
                    format!("{tool_name} error: {content}")
                } else {
                    format!("{tool_name}: {content}")
                }
            }
            Self::Approval {
                tool_name, outcome, ..
            } => match outcome {
                ApprovalOutcome::Denied {
                    reason: Some(reason),
                } => format!("approval for {tool_name}: denied ({reason})"),
                other => format!("approval for {tool_name}: {}", other.as_str()),
            },
        }
    }
}

/// Records events for one turn.  Every message shares the turn's trace id
/// and gets its own span id.
#[derive(Clone)]
pub struct MessageRecorder {
    storage: Arc<dyn Storage>,
    session_id: String,
    turn_id: String,
    trace_id: String,
}

impl MessageRecorder {
    pub fn new(storage: Arc<dyn Storage>, session_id: &str, turn_id: &str) -> Self {
        Self {
            storage,
            session_id: session_id.to_owned(),
            turn_id: turn_id.to_owned(),
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub async fn record(&self, event: &ExecutionEvent) -> Result<AgentMessage> {
        let message = NewMessage {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            turn_id: self.turn_id.clone(),
            kind: event.kind(),
            payload: event.payload(),
            started_at: Utc::now(),
            trace_id: self.trace_id.clone(),
            span_id: span_id(),
        };
        self.storage.append_message(message).await
    }
}

fn span_id() -> String {
    let simple = uuid::Uuid::new_v4().simple().to_string();
    simple[..16].to_owned()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tk_domain::session::Session;
    use tk_domain::turn::Turn;
    use tk_store::MemoryStore;

    use super::*;

    async fn recorder() -> (Arc<MemoryStore>, MessageRecorder) {
        let store = Arc::new(MemoryStore::new());
        let s = store
            .create_session(Session::new("u1", HashMap::new()))
            .await
            .unwrap();
        store.create_turn(Turn::open("t1", None, &s.id)).await.unwrap();
        let rec = MessageRecorder::new(store.clone(), &s.id, "t1");
        (store, rec)
    }

    #[tokio::test]
    async fn events_map_to_kinds_and_payloads() {
        let (store, rec) = recorder().await;
        rec.record(&ExecutionEvent::UserInput { text: "hi".into() })
            .await
            .unwrap();
        rec.record(&ExecutionEvent::ToolCall {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            arguments: serde_json::json!({"command": "ls"}),
        })
        .await
        .unwrap();
        rec.record(&ExecutionEvent::Approval {
            call_id: "c1".into(),
            tool_name: "exec".into(),
            outcome: ApprovalOutcome::TimedOut,
        })
        .await
        .unwrap();

        let msgs = store.list_messages_by_turn("t1").await.unwrap();
        let got: Vec<_> = msgs.iter().map(|m| (m.kind, m.payload.as_str())).collect();
        assert_eq!(
            got,
            vec![
                (MessageKind::User, "hi"),
                (MessageKind::Tool, r#"exec({"command":"ls"})"#),
                (MessageKind::System, "approval for exec: timed_out"),
            ]
        );
    }

    #[tokio::test]
    async fn messages_share_trace_but_not_span() {
        let (_store, rec) = recorder().await;
        let a = rec
            .record(&ExecutionEvent::AgentText { text: "a".into() })
            .await
            .unwrap();
        let b = rec
            .record(&ExecutionEvent::AgentText { text: "b".into() })
            .await
            .unwrap();
        assert_eq!(a.trace_id, rec.trace_id());
        assert_eq!(a.trace_id, b.trace_id);
        assert_ne!(a.span_id, b.span_id);
        assert_eq!(a.span_id.len(), 16);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn denied_payload_includes_reason() {
        let ev = ExecutionEvent::Approval {
            call_id: "c".into(),
            tool_name: "exec".into(),
            outcome: ApprovalOutcome::Denied {
                reason: Some("nope".into()),
            },
        };
        assert_eq!(ev.payload(), "approval for exec: denied (nope)");
    }
}
