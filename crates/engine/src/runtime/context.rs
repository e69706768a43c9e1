//! Context replay — decides which earlier turns a new turn inherits.
//!
//! Under `zip` / `crazy_zip` a new turn sees the resume summaries of the most
//! recent completed turns.  Under `disabled` it sees nothing, or the raw
//! messages of those turns when `replay_raw_when_disabled` is set.

use serde::Serialize;

use tk_domain::config::{CompactionConfig, ContextZipMode};
use tk_domain::message::MessageKind;
use tk_domain::Result;
use tk_store::Storage;

/// One piece of inherited context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextEntry {
    Resume {
        turn_id: String,
        summary: String,
    },
    Message {
        turn_id: String,
        kind: MessageKind,
        payload: String,
    },
}

#[derive(Debug, Clone)]
pub struct ContextReplay {
    mode: ContextZipMode,
    replay_raw_when_disabled: bool,
    replay_turns: usize,
}

impl ContextReplay {
    pub fn new(config: &CompactionConfig) -> Self {
        Self {
            mode: config.mode,
            replay_raw_when_disabled: config.replay_raw_when_disabled,
            replay_turns: config.replay_turns,
        }
    }

    /// Build the inherited context for a new turn of `session_id`, oldest
    /// first.
    pub async fn build(&self, storage: &dyn Storage, session_id: &str) -> Result<Vec<ContextEntry>> {
        if self.mode == ContextZipMode::Disabled && !self.replay_raw_when_disabled {
            return Ok(Vec::new());
        }

        let completed: Vec<_> = storage
            .list_turns(session_id)
            .await?
            .into_iter()
            .filter(|t| t.is_completed())
            .collect();
        let skip = completed.len().saturating_sub(self.replay_turns);
        let recent = &completed[skip..];

        let mut entries = Vec::new();
        if self.mode == ContextZipMode::Disabled {
            for turn in recent {
                for m in storage.list_messages_by_turn(&turn.id).await? {
                    entries.push(ContextEntry::Message {
                        turn_id: turn.id.clone(),
                        kind: m.kind,
                        payload: m.payload,
                    });
                }
            }
        } else {
            for turn in recent {
                match turn.resume.as_deref() {
                    Some(summary) if !summary.is_empty() => entries.push(ContextEntry::Resume {
                        turn_id: turn.id.clone(),
                        summary: summary.to_owned(),
                    }),
                    _ => {}
                }
            }
        }

        tracing::debug!(
            session_id,
            mode = %self.mode,
            turns = recent.len(),
            entries = entries.len(),
            "context replay built"
        );
        Ok(entries)
    }
}

/// Render inherited context as plain text for a strategy's prompt.
pub fn render_context(entries: &[ContextEntry]) -> String {
    let mut buf = String::new();
    for entry in entries {
        match entry {
            ContextEntry::Resume { summary, .. } => {
                buf.push_str("Previously: ");
                buf.push_str(summary);
            }
            ContextEntry::Message { kind, payload, .. } => {
                buf.push_str(kind.label());
                buf.push_str(": ");
                buf.push_str(payload);
            }
        }
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tk_domain::message::NewMessage;
    use tk_domain::session::Session;
    use tk_domain::turn::{Turn, TurnCompletion};
    use tk_store::MemoryStore;

    use super::*;

    async fn seeded() -> (MemoryStore, String) {
        let store = MemoryStore::new();
        let s = store
            .create_session(Session::new("u1", HashMap::new()))
            .await
            .unwrap();
        for (i, resume) in ["first", "", "third"].iter().enumerate() {
            let id = format!("t{i}");
            store.create_turn(Turn::open(&id, None, &s.id)).await.unwrap();
            let last = store
                .append_message(NewMessage {
                    id: format!("m{i}"),
                    session_id: s.id.clone(),
                    turn_id: id.clone(),
                    kind: MessageKind::Agent,
                    payload: format!("raw {i}"),
                    started_at: Utc::now(),
                    trace_id: "tr".into(),
                    span_id: "sp".into(),
                })
                .await
                .unwrap();
            store
                .complete_turn(
                    &id,
                    TurnCompletion {
                        resume: Some(resume.to_string()),
                        ended_at: Utc::now(),
                        plan: None,
                        compacted_through: last.seq,
                    },
                )
                .await
                .unwrap();
        }
        // An open turn never contributes context.
        store.create_turn(Turn::open("open", None, &s.id)).await.unwrap();
        (store, s.id)
    }

    fn replay(mode: ContextZipMode, raw: bool, turns: usize) -> ContextReplay {
        ContextReplay::new(&CompactionConfig {
            mode,
            replay_raw_when_disabled: raw,
            replay_turns: turns,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn zip_replays_non_empty_summaries() {
        let (store, sid) = seeded().await;
        let entries = replay(ContextZipMode::Zip, false, 8)
            .build(&store, &sid)
            .await
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(render_context(&entries), "Previously: first\nPreviously: third\n");
    }

    #[tokio::test]
    async fn replay_window_keeps_most_recent_turns() {
        let (store, sid) = seeded().await;
        let entries = replay(ContextZipMode::Zip, false, 1)
            .build(&store, &sid)
            .await
            .unwrap();
        assert_eq!(
            entries,
            vec![ContextEntry::Resume {
                turn_id: "t2".into(),
                summary: "third".into()
            }]
        );
    }

    #[tokio::test]
    async fn disabled_without_raw_replay_is_empty() {
        let (store, sid) = seeded().await;
        let entries = replay(ContextZipMode::Disabled, false, 8)
            .build(&store, &sid)
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn disabled_with_raw_replay_returns_messages() {
        let (store, sid) = seeded().await;
        let entries = replay(ContextZipMode::Disabled, true, 2)
            .build(&store, &sid)
            .await
            .unwrap();
        assert_eq!(render_context(&entries), "Agent: raw 1\nAgent: raw 2\n");
    }
}
