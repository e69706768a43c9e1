//! In-memory [`Storage`] backed by a single lock, with optional JSON
//! snapshot persistence.
//!
//! All state lives behind one `RwLock`, so each contract operation is atomic
//! with respect to every other.  `flush` writes the whole state to
//! `<dir>/turnkeep.json`; `open` reloads it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use tk_domain::error::{Error, Result};
use tk_domain::message::{sort_for_display, AgentMessage, NewMessage};
use tk_domain::session::Session;
use tk_domain::trace::TraceEvent;
use tk_domain::turn::{Turn, TurnCompletion, TurnState};

use crate::storage::Storage;

const SNAPSHOT_FILE: &str = "turnkeep.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    sessions: HashMap<String, Session>,
    turns: HashMap<String, Turn>,
    /// turn id → messages in insertion order.
    messages: HashMap<String, Vec<AgentMessage>>,
    next_seq: u64,
}

/// Process-local store.  Suitable for a single instance, tests and the CLI
/// demo; multi-instance deployments plug a database-backed [`Storage`].
pub struct MemoryStore {
    snapshot_path: Option<PathBuf>,
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// An empty store that never touches disk.
    pub fn new() -> Self {
        Self {
            snapshot_path: None,
            state: RwLock::new(State::default()),
        }
    }

    /// Load or create a store persisted under `state_dir/turnkeep.json`.
    pub fn open(state_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_dir).map_err(Error::Io)?;

        let path = state_dir.join(SNAPSHOT_FILE);
        let state = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw)?
        } else {
            State::default()
        };

        tracing::info!(
            sessions = state.sessions.len(),
            turns = state.turns.len(),
            path = %path.display(),
            "store loaded"
        );

        Ok(Self {
            snapshot_path: Some(path),
            state: RwLock::new(state),
        })
    }

    /// Persist the current state to disk.  No-op for a purely in-memory store.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let json = {
            let state = self.state.read();
            serde_json::to_string_pretty(&*state)
                .map_err(|e| Error::Other(format!("serializing store: {e}")))?
        };
        std::fs::write(path, json).map_err(Error::Io)?;
        Ok(())
    }

    /// Persist the current state without blocking the tokio runtime.
    pub async fn flush_async(&self) -> Result<()> {
        let Some(path) = self.snapshot_path.clone() else {
            return Ok(());
        };
        let json = {
            let state = self.state.read();
            serde_json::to_string_pretty(&*state)
                .map_err(|e| Error::Other(format!("serializing store: {e}")))?
        };
        tokio::task::spawn_blocking(move || std::fs::write(&path, json).map_err(Error::Io))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;
        Ok(())
    }

    /// Number of sessions currently held.
    pub fn session_count(&self) -> usize {
        self.state.read().sessions.len()
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_session(&self, session: Session) -> Result<Session> {
        let mut state = self.state.write();
        if state.sessions.contains_key(&session.id) {
            return Err(Error::Storage(format!("session {} already exists", session.id)));
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        Ok(self.state.read().sessions.get(session_id).cloned())
    }

    async fn end_session(&self, session_id: &str, summary: Option<String>) -> Result<Session> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
        session.end(summary);
        Ok(session.clone())
    }

    async fn merge_session_metadata(
        &self,
        session_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> Result<Session> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_owned()))?;
        session.metadata.extend(patch);
        Ok(session.clone())
    }

    async fn create_turn(&self, turn: Turn) -> Result<Turn> {
        let mut state = self.state.write();

        match state.sessions.get(&turn.session_id) {
            None => return Err(Error::SessionNotFound(turn.session_id.clone())),
            Some(s) if !s.is_active() => return Err(Error::SessionEnded(turn.session_id.clone())),
            Some(_) => {}
        }

        // Primary-key uniqueness: the check and the insert share one lock.
        if state.turns.contains_key(&turn.id) {
            return Err(Error::DuplicateTurn(turn.id.clone()));
        }

        state.turns.insert(turn.id.clone(), turn.clone());
        Ok(turn)
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
        Ok(self.state.read().turns.get(turn_id).cloned())
    }

    async fn list_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
        let state = self.state.read();
        let mut turns: Vec<Turn> = state
            .turns
            .values()
            .filter(|t| t.session_id == session_id)
            .cloned()
            .collect();
        turns.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        Ok(turns)
    }

    async fn complete_turn(&self, turn_id: &str, completion: TurnCompletion) -> Result<Turn> {
        let mut state = self.state.write();
        match state.turns.get(turn_id) {
            None => return Err(Error::TurnNotFound(turn_id.to_owned())),
            Some(turn) if turn.state == TurnState::Completed => return Ok(turn.clone()),
            Some(_) => {}
        }

        // The check shares the write lock with `append_message`, so nothing
        // can land between it and the swap.
        let newest = state
            .messages
            .get(turn_id)
            .and_then(|ms| ms.iter().map(|m| m.seq).max())
            .unwrap_or(0);
        if newest > completion.compacted_through {
            return Err(Error::StaleCompaction {
                turn_id: turn_id.to_owned(),
                compacted_through: completion.compacted_through,
            });
        }

        let turn = state
            .turns
            .get_mut(turn_id)
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_owned()))?;
        // Resume, plan and state land together under the write lock, so no
        // reader sees COMPLETED without its summary.
        turn.resume = completion.resume;
        turn.plan = completion.plan;
        turn.ended_at = Some(completion.ended_at);
        turn.state = TurnState::Completed;
        Ok(turn.clone())
    }

    async fn append_message(&self, message: NewMessage) -> Result<AgentMessage> {
        let mut state = self.state.write();

        let turn = state
            .turns
            .get(&message.turn_id)
            .ok_or_else(|| Error::TurnNotFound(message.turn_id.clone()))?;
        if turn.session_id != message.session_id {
            return Err(Error::Storage(format!(
                "turn {} does not belong to session {}",
                message.turn_id, message.session_id
            )));
        }
        if turn.is_completed() {
            return Err(Error::TurnClosed(message.turn_id.clone()));
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let stored = message.into_message(seq);
        state
            .messages
            .entry(stored.turn_id.clone())
            .or_default()
            .push(stored.clone());

        TraceEvent::MessageRecorded {
            turn_id: stored.turn_id.clone(),
            kind: stored.kind.as_str().to_owned(),
            seq,
        }
        .emit();

        Ok(stored)
    }

    async fn list_messages_by_session(&self, session_id: &str) -> Result<Vec<AgentMessage>> {
        let state = self.state.read();
        let mut out: Vec<AgentMessage> = state
            .messages
            .values()
            .flatten()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        sort_for_display(&mut out);
        Ok(out)
    }

    async fn list_messages_by_turn(&self, turn_id: &str) -> Result<Vec<AgentMessage>> {
        let state = self.state.read();
        let mut out = state.messages.get(turn_id).cloned().unwrap_or_default();
        sort_for_display(&mut out);
        Ok(out)
    }
}
