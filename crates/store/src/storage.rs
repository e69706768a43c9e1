//! The persistence contract the orchestration core calls into.
//!
//! Implementations must make every write atomic and durable, and must back
//! the exactly-once guarantees of the turn lifecycle: `create_turn` rejects a
//! second record with the same id, and `complete_turn` flips OPEN to
//! COMPLETED at most once.

use std::collections::HashMap;

use async_trait::async_trait;

use tk_domain::message::{AgentMessage, NewMessage};
use tk_domain::session::Session;
use tk_domain::turn::{Turn, TurnCompletion};
use tk_domain::Result;

#[async_trait]
pub trait Storage: Send + Sync {
    // ── Sessions ─────────────────────────────────────────────────────

    async fn create_session(&self, session: Session) -> Result<Session>;

    async fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// End a session.  Ending an already-ended session returns it unchanged.
    async fn end_session(&self, session_id: &str, summary: Option<String>) -> Result<Session>;

    /// Shallow-merge `patch` into the session's metadata.
    async fn merge_session_metadata(
        &self,
        session_id: &str,
        patch: HashMap<String, serde_json::Value>,
    ) -> Result<Session>;

    // ── Turns ────────────────────────────────────────────────────────

    /// Persist a new OPEN turn.
    ///
    /// Fails with `SessionNotFound` / `SessionEnded` when the owning session
    /// cannot accept turns, and with `DuplicateTurn` when the id is taken.
    async fn create_turn(&self, turn: Turn) -> Result<Turn>;

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>>;

    /// All turns of a session, oldest first.
    async fn list_turns(&self, session_id: &str) -> Result<Vec<Turn>>;

    /// Compare-and-set OPEN → COMPLETED.
    ///
    /// When the turn is already completed the stored record is returned
    /// unchanged and `completion` is discarded.  When the turn holds a
    /// message newer than `completion.compacted_through` the swap is refused
    /// with `StaleCompaction` and the turn stays OPEN.
    async fn complete_turn(&self, turn_id: &str, completion: TurnCompletion) -> Result<Turn>;

    // ── Messages ─────────────────────────────────────────────────────

    /// Append a message to an OPEN turn, assigning its sequence number.
    async fn append_message(&self, message: NewMessage) -> Result<AgentMessage>;

    /// Messages of a session in display order (start time, then sequence).
    async fn list_messages_by_session(&self, session_id: &str) -> Result<Vec<AgentMessage>>;

    /// Messages of a turn in display order (start time, then sequence).
    async fn list_messages_by_turn(&self, turn_id: &str) -> Result<Vec<AgentMessage>>;
}
