//! Turn lifecycle — opens, tracks and closes turns.
//!
//! A turn moves `OPEN → COMPLETED` exactly once.  Completion compacts the
//! turn's messages into a resume summary and stores summary, end timestamp
//! and state in one atomic store write.  Completing an already-completed
//! turn returns the stored record unchanged.  A message that lands while the
//! summary is being built makes the store refuse the write, and compaction
//! runs again over the longer history.

use std::sync::Arc;

use chrono::Utc;

use tk_domain::error::{Error, Result};
use tk_domain::plan::TaskPlanSnapshot;
use tk_domain::trace::TraceEvent;
use tk_domain::turn::{Turn, TurnCompletion};
use tk_store::Storage;

use super::compact::CompactionPolicy;

/// Compaction passes attempted before a turn that keeps growing is reported
/// as stale.
const MAX_COMPACTION_ATTEMPTS: usize = 3;

pub struct TurnManager {
    storage: Arc<dyn Storage>,
    policy: Arc<CompactionPolicy>,
}

impl TurnManager {
    pub fn new(storage: Arc<dyn Storage>, policy: Arc<CompactionPolicy>) -> Self {
        Self { storage, policy }
    }

    pub fn policy(&self) -> &CompactionPolicy {
        &self.policy
    }

    /// Create and persist an OPEN turn.
    ///
    /// A parent, when given, must be an existing turn of the same session.
    /// Concurrent calls with the same `turn_id` yield one success and
    /// [`Error::DuplicateTurn`] for the rest.
    pub async fn start_turn(
        &self,
        turn_id: &str,
        parent_turn_id: Option<&str>,
        session_id: &str,
    ) -> Result<Turn> {
        if turn_id.trim().is_empty() {
            return Err(Error::InvalidTurnId(turn_id.to_owned()));
        }

        if let Some(parent_id) = parent_turn_id {
            self.check_parent(turn_id, parent_id, session_id).await?;
        }

        let turn = self
            .storage
            .create_turn(Turn::open(turn_id, parent_turn_id, session_id))
            .await?;

        TraceEvent::TurnStarted {
            session_id: session_id.to_owned(),
            turn_id: turn_id.to_owned(),
            parent_turn_id: parent_turn_id.map(str::to_owned),
        }
        .emit();

        Ok(turn)
    }

    async fn check_parent(&self, turn_id: &str, parent_id: &str, session_id: &str) -> Result<()> {
        let invalid = |reason: String| Error::InvalidTurnHierarchy {
            turn_id: turn_id.to_owned(),
            reason,
        };

        if parent_id == turn_id {
            return Err(invalid("a turn cannot be its own parent".into()));
        }
        let parent = self
            .storage
            .get_turn(parent_id)
            .await?
            .ok_or_else(|| invalid(format!("parent turn {parent_id} does not exist")))?;
        if parent.session_id != session_id {
            return Err(invalid(format!(
                "parent turn {parent_id} belongs to session {}",
                parent.session_id
            )));
        }
        Ok(())
    }

    /// Complete a turn, producing its resume summary.
    pub async fn complete_turn(&self, turn_id: &str) -> Result<Turn> {
        self.complete_turn_with_plan(turn_id, None).await
    }

    /// Complete a turn and keep a snapshot of its task plan on the record.
    ///
    /// If compaction fails the turn stays OPEN and the error is returned.
    pub async fn complete_turn_with_plan(
        &self,
        turn_id: &str,
        plan: Option<TaskPlanSnapshot>,
    ) -> Result<Turn> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.try_complete(turn_id, plan.clone()).await {
                Err(Error::StaleCompaction {
                    compacted_through, ..
                }) if attempt < MAX_COMPACTION_ATTEMPTS => {
                    tracing::debug!(
                        turn_id,
                        compacted_through,
                        attempt,
                        "turn grew while compacting, compacting again"
                    );
                }
                other => return other,
            }
        }
    }

    async fn try_complete(&self, turn_id: &str, plan: Option<TaskPlanSnapshot>) -> Result<Turn> {
        let turn = self
            .storage
            .get_turn(turn_id)
            .await?
            .ok_or_else(|| Error::TurnNotFound(turn_id.to_owned()))?;
        if turn.is_completed() {
            tracing::debug!(turn_id, "turn already completed");
            return Ok(turn);
        }

        let messages = self.storage.list_messages_by_turn(turn_id).await?;
        let compacted_through = messages.iter().map(|m| m.seq).max().unwrap_or(0);
        let resume = match self.policy.compact(&messages).await {
            Ok(resume) => resume,
            Err(e) => {
                tracing::warn!(turn_id, error = %e, "compaction failed, turn left open");
                return Err(e);
            }
        };

        let completed = self
            .storage
            .complete_turn(
                turn_id,
                TurnCompletion {
                    resume,
                    ended_at: Utc::now(),
                    plan,
                    compacted_through,
                },
            )
            .await?;

        TraceEvent::TurnCompleted {
            session_id: completed.session_id.clone(),
            turn_id: turn_id.to_owned(),
            mode: self.policy.mode().to_string(),
            resume_chars: completed.resume.as_deref().map_or(0, |r| r.chars().count()),
            messages: messages.len(),
        }
        .emit();

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tk_domain::config::{CompactionConfig, ContextZipMode};
    use tk_domain::message::{AgentMessage, NewMessage};
    use tk_domain::session::Session;
    use tk_domain::turn::TurnState;
    use tk_store::MemoryStore;

    use super::super::compact::Summarizer;
    use super::super::recorder::{ExecutionEvent, MessageRecorder};
    use super::*;

    async fn setup(mode: ContextZipMode) -> (Arc<MemoryStore>, TurnManager, String) {
        let store = Arc::new(MemoryStore::new());
        let session = store
            .create_session(Session::new("u1", HashMap::new()))
            .await
            .unwrap();
        let policy = CompactionPolicy::new(&CompactionConfig {
            mode,
            ..Default::default()
        });
        let manager = TurnManager::new(store.clone(), Arc::new(policy));
        (store, manager, session.id)
    }

    async fn say(store: &Arc<MemoryStore>, sid: &str, turn: &str, texts: &[&str]) {
        let rec = MessageRecorder::new(store.clone(), sid, turn);
        for t in texts {
            rec.record(&ExecutionEvent::AgentText {
                text: (*t).to_owned(),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn zip_scenario_stores_last_message() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        say(&store, &sid, "t1", &["hello", "plan step 1", "plan step 2"]).await;

        let turn = mgr.complete_turn("t1").await.unwrap();
        assert_eq!(turn.state, TurnState::Completed);
        assert_eq!(turn.resume.as_deref(), Some("plan step 2"));
        assert!(turn.ended_at.is_some());
    }

    #[tokio::test]
    async fn open_turn_has_no_end_timestamp() {
        let (_store, mgr, sid) = setup(ContextZipMode::Zip).await;
        let turn = mgr.start_turn("t1", None, &sid).await.unwrap();
        assert_eq!(turn.state, TurnState::Open);
        assert!(turn.ended_at.is_none());
        assert!(turn.resume.is_none());
    }

    #[tokio::test]
    async fn completing_twice_returns_the_same_record() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        say(&store, &sid, "t1", &["only"]).await;

        let first = mgr.complete_turn("t1").await.unwrap();
        let second = mgr.complete_turn("t1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn concurrent_completion_agrees_on_one_summary() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        say(&store, &sid, "t1", &["a", "b"]).await;

        let mgr = Arc::new(mgr);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let mgr = mgr.clone();
                tokio::spawn(async move { mgr.complete_turn("t1").await.unwrap() })
            })
            .collect();
        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }
        assert!(results.windows(2).all(|w| w[0] == w[1]));
    }

    #[tokio::test]
    async fn disabled_mode_completes_without_summary() {
        let (store, mgr, sid) = setup(ContextZipMode::Disabled).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        say(&store, &sid, "t1", &["x"]).await;
        let turn = mgr.complete_turn("t1").await.unwrap();
        assert!(turn.is_completed());
        assert!(turn.resume.is_none());
    }

    #[tokio::test]
    async fn empty_turn_completes_with_empty_resume() {
        let (_store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        let turn = mgr.complete_turn("t1").await.unwrap();
        assert_eq!(turn.resume.as_deref(), Some(""));
    }

    struct BrokenSummarizer;

    #[async_trait]
    impl Summarizer for BrokenSummarizer {
        async fn summarize(&self, _transcript: &str) -> Result<String> {
            Err(Error::Other("quota exceeded".into()))
        }
    }

    #[tokio::test]
    async fn compaction_failure_leaves_turn_open() {
        let store = Arc::new(MemoryStore::new());
        let s = store
            .create_session(Session::new("u1", HashMap::new()))
            .await
            .unwrap();
        let policy = CompactionPolicy::new(&CompactionConfig {
            mode: ContextZipMode::CrazyZip,
            ..Default::default()
        })
        .with_summarizer(Arc::new(BrokenSummarizer));
        let mgr = TurnManager::new(store.clone(), Arc::new(policy));

        mgr.start_turn("t1", None, &s.id).await.unwrap();
        say(&store, &s.id, "t1", &["work"]).await;

        let err = mgr.complete_turn("t1").await.unwrap_err();
        assert!(matches!(err, Error::Compaction(_)));

        let turn = store.get_turn("t1").await.unwrap().unwrap();
        assert_eq!(turn.state, TurnState::Open);
        assert!(turn.ended_at.is_none());
        assert!(turn.resume.is_none());
    }

    #[tokio::test]
    async fn child_turn_needs_parent_in_same_session() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("parent", None, &sid).await.unwrap();
        let child = mgr.start_turn("child", Some("parent"), &sid).await.unwrap();
        assert_eq!(child.parent_turn_id.as_deref(), Some("parent"));

        let missing = mgr.start_turn("orphan", Some("ghost"), &sid).await.unwrap_err();
        assert!(matches!(missing, Error::InvalidTurnHierarchy { .. }));

        let own = mgr.start_turn("loop", Some("loop"), &sid).await.unwrap_err();
        assert!(matches!(own, Error::InvalidTurnHierarchy { .. }));

        let other = store
            .create_session(Session::new("u2", HashMap::new()))
            .await
            .unwrap();
        let cross = mgr
            .start_turn("cross", Some("parent"), &other.id)
            .await
            .unwrap_err();
        assert!(matches!(cross, Error::InvalidTurnHierarchy { .. }));
        assert!(store.get_turn("cross").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_start_has_one_winner() {
        let (_store, mgr, sid) = setup(ContextZipMode::Zip).await;
        let mgr = Arc::new(mgr);
        let a = {
            let (mgr, sid) = (mgr.clone(), sid.clone());
            tokio::spawn(async move { mgr.start_turn("same", None, &sid).await })
        };
        let b = {
            let (mgr, sid) = (mgr.clone(), sid.clone());
            tokio::spawn(async move { mgr.start_turn("same", None, &sid).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(Error::DuplicateTurn(id)) if id == "same")));
    }

    #[tokio::test]
    async fn ended_session_rejects_new_turns() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        store.end_session(&sid, None).await.unwrap();
        let err = mgr.start_turn("t1", None, &sid).await.unwrap_err();
        assert!(matches!(err, Error::SessionEnded(_)));
    }

    #[tokio::test]
    async fn unknown_turn_cannot_complete() {
        let (_store, mgr, _sid) = setup(ContextZipMode::Zip).await;
        assert!(matches!(
            mgr.complete_turn("nope").await,
            Err(Error::TurnNotFound(_))
        ));
    }

    #[tokio::test]
    async fn plan_snapshot_is_kept() {
        let (_store, mgr, sid) = setup(ContextZipMode::Zip).await;
        mgr.start_turn("t1", None, &sid).await.unwrap();
        let snapshot = TaskPlanSnapshot {
            goal: "g".into(),
            current_task_id: None,
            phases: vec![],
        };
        let turn = mgr
            .complete_turn_with_plan("t1", Some(snapshot.clone()))
            .await
            .unwrap();
        assert_eq!(turn.plan, Some(snapshot));
    }

    #[tokio::test]
    async fn blank_turn_id_is_rejected() {
        let (store, mgr, sid) = setup(ContextZipMode::Zip).await;
        let err = mgr.start_turn("  ", None, &sid).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTurnId(_)));
        assert!(err.is_consistency());
        assert!(store.list_turns(&sid).await.unwrap().is_empty());
    }

    /// Appends a message to the turn right after the first `pushes` listings,
    /// the way a still-running strategy would.
    struct LateWriter {
        inner: Arc<MemoryStore>,
        pushes: usize,
        listed: AtomicUsize,
    }

    #[async_trait]
    impl Storage for LateWriter {
        async fn create_session(&self, session: Session) -> Result<Session> {
            self.inner.create_session(session).await
        }
        async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
            self.inner.get_session(session_id).await
        }
        async fn end_session(&self, session_id: &str, summary: Option<String>) -> Result<Session> {
            self.inner.end_session(session_id, summary).await
        }
        async fn merge_session_metadata(
            &self,
            session_id: &str,
            patch: HashMap<String, serde_json::Value>,
        ) -> Result<Session> {
            self.inner.merge_session_metadata(session_id, patch).await
        }
        async fn create_turn(&self, turn: Turn) -> Result<Turn> {
            self.inner.create_turn(turn).await
        }
        async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>> {
            self.inner.get_turn(turn_id).await
        }
        async fn list_turns(&self, session_id: &str) -> Result<Vec<Turn>> {
            self.inner.list_turns(session_id).await
        }
        async fn complete_turn(&self, turn_id: &str, completion: TurnCompletion) -> Result<Turn> {
            self.inner.complete_turn(turn_id, completion).await
        }
        async fn append_message(&self, message: NewMessage) -> Result<AgentMessage> {
            self.inner.append_message(message).await
        }
        async fn list_messages_by_session(&self, session_id: &str) -> Result<Vec<AgentMessage>> {
            self.inner.list_messages_by_session(session_id).await
        }
        async fn list_messages_by_turn(&self, turn_id: &str) -> Result<Vec<AgentMessage>> {
            let listed = self.inner.list_messages_by_turn(turn_id).await?;
            let n = self.listed.fetch_add(1, Ordering::SeqCst);
            if n < self.pushes {
                let session_id = listed.first().map(|m| m.session_id.clone()).unwrap_or_default();
                let late = format!("late answer {n}");
                say(&self.inner, &session_id, turn_id, &[late.as_str()]).await;
            }
            Ok(listed)
        }
    }

    async fn late_writer_setup(pushes: usize) -> (Arc<MemoryStore>, TurnManager, String) {
        let inner = Arc::new(MemoryStore::new());
        let session = inner
            .create_session(Session::new("u1", HashMap::new()))
            .await
            .unwrap();
        let store = Arc::new(LateWriter {
            inner: inner.clone(),
            pushes,
            listed: AtomicUsize::new(0),
        });
        let policy = CompactionPolicy::new(&CompactionConfig::default());
        let mgr = TurnManager::new(store, Arc::new(policy));
        mgr.start_turn("t1", None, &session.id).await.unwrap();
        say(&inner, &session.id, "t1", &["early"]).await;
        (inner, mgr, session.id)
    }

    #[tokio::test]
    async fn message_landing_during_compaction_is_in_the_resume() {
        let (store, mgr, _sid) = late_writer_setup(1).await;

        let turn = mgr.complete_turn("t1").await.unwrap();

        let payloads: Vec<_> = store
            .list_messages_by_turn("t1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(payloads, vec!["early", "late answer 0"]);
        assert_eq!(turn.resume.as_deref(), Some("late answer 0"));
    }

    #[tokio::test]
    async fn turn_that_keeps_growing_stays_open() {
        let (store, mgr, _sid) = late_writer_setup(usize::MAX).await;

        let err = mgr.complete_turn("t1").await.unwrap_err();
        assert!(matches!(err, Error::StaleCompaction { .. }));

        let turn = store.get_turn("t1").await.unwrap().unwrap();
        assert_eq!(turn.state, TurnState::Open);
        assert!(turn.resume.is_none());
    }
}
