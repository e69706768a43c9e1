//! Tool approval gate — holds a tool call back until a human decides.
//!
//! A gated call is parked in a pending table keyed by tool-call id and the
//! approval channel is notified (fire-and-forget).  The waiting strategy
//! awaits a oneshot receiver, so no worker thread is pinned; the decision
//! arrives later through [`ToolApprovalGate::resolve`].  A timeout resolves
//! the call to [`ApprovalOutcome::TimedOut`].  Ending the session denies
//! everything it still has pending, and the gate remembers the session so
//! later calls from it are denied without waiting.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{broadcast, oneshot};

use tk_domain::config::ApprovalConfig;
use tk_domain::trace::TraceEvent;

pub const SESSION_ENDED_REASON: &str = "session has ended";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The decision made by a human reviewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Denied { reason: Option<String> },
}

/// Terminal state of a gated call, as seen by the strategy.
///
/// These are business outcomes, not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApprovalOutcome {
    Approved,
    Denied { reason: Option<String> },
    TimedOut,
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Denials and timeouts both stop the call.
    pub fn is_denial(&self) -> bool {
        !self.is_approved()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Denied { .. } => "denied",
            Self::TimedOut => "timed_out",
        }
    }
}

impl From<ApprovalDecision> for ApprovalOutcome {
    fn from(d: ApprovalDecision) -> Self {
        match d {
            ApprovalDecision::Approved => Self::Approved,
            ApprovalDecision::Denied { reason } => Self::Denied { reason },
        }
    }
}

/// Where a gated call came from.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalContext {
    pub turn_id: String,
    pub strategy: String,
    pub trace_id: String,
}

/// A tool call waiting for a decision.  Holds everything needed to resume
/// the call once the decision arrives.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRequest {
    pub session_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_args: HashMap<String, serde_json::Value>,
    pub context: ApprovalContext,
    pub created_at: DateTime<Utc>,
}

struct PendingApproval {
    request: ApprovalRequest,
    respond: oneshot::Sender<ApprovalDecision>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Approval channel
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outbound notification sink (UI, operator console).  Must not block.
pub trait ApprovalNotifier: Send + Sync {
    fn notify(&self, request: &ApprovalRequest);
}

/// Writes each request to the log.
pub struct LogNotifier;

impl ApprovalNotifier for LogNotifier {
    fn notify(&self, request: &ApprovalRequest) {
        tracing::info!(
            session_id = %request.session_id,
            tool_call_id = %request.tool_call_id,
            tool_name = %request.tool_name,
            "tool call awaiting approval"
        );
    }
}

/// Fans requests out to any number of subscribers.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<ApprovalRequest>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalRequest> {
        self.tx.subscribe()
    }
}

impl ApprovalNotifier for BroadcastNotifier {
    fn notify(&self, request: &ApprovalRequest) {
        // No subscribers is fine: the request stays pending until timeout.
        let _ = self.tx.send(request.clone());
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Gate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait]
pub trait ToolApprovalGate: Send + Sync {
    /// Wait until the call may proceed or is refused.
    async fn review(&self, request: ApprovalRequest) -> ApprovalOutcome;

    /// Deliver an external decision.  Returns `true` if the call was pending.
    fn resolve(&self, _tool_call_id: &str, _decision: ApprovalDecision) -> bool {
        false
    }

    /// Deny every call the session still has pending, and any it makes
    /// later.  Returns how many were pending.
    fn cancel_session(&self, _session_id: &str) -> usize {
        0
    }

    fn list_pending(&self) -> Vec<ApprovalRequest> {
        Vec::new()
    }
}

/// Approves everything immediately.
pub struct NoopGate;

#[async_trait]
impl ToolApprovalGate for NoopGate {
    async fn review(&self, _request: ApprovalRequest) -> ApprovalOutcome {
        ApprovalOutcome::Approved
    }
}

/// Gate backed by a pending-request table.
///
/// Lock order: `pending` before `ended_sessions`.
pub struct ApprovalGate {
    config: ApprovalConfig,
    pending: RwLock<HashMap<String, PendingApproval>>,
    ended_sessions: RwLock<HashSet<String>>,
    notifier: Arc<dyn ApprovalNotifier>,
}

impl ApprovalGate {
    pub fn new(config: ApprovalConfig, notifier: Arc<dyn ApprovalNotifier>) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            ended_sessions: RwLock::new(HashSet::new()),
            notifier,
        }
    }

    /// The configured approval timeout duration.
    pub fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    /// Park a request and notify the approval channel.  Does not wait.
    pub fn request_approval(&self, request: ApprovalRequest) -> oneshot::Receiver<ApprovalDecision> {
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.write();
        if self.ended_sessions.read().contains(&request.session_id) {
            tracing::debug!(
                session_id = %request.session_id,
                tool_call_id = %request.tool_call_id,
                "tool call from ended session"
            );
            let _ = tx.send(ApprovalDecision::Denied {
                reason: Some(SESSION_ENDED_REASON.into()),
            });
            return rx;
        }
        if pending.contains_key(&request.tool_call_id) {
            tracing::warn!(tool_call_id = %request.tool_call_id, "duplicate pending tool call id");
            let _ = tx.send(ApprovalDecision::Denied {
                reason: Some("duplicate tool call id".into()),
            });
            return rx;
        }

        TraceEvent::ApprovalRequested {
            session_id: request.session_id.clone(),
            tool_call_id: request.tool_call_id.clone(),
            tool_name: request.tool_name.clone(),
        }
        .emit();

        self.notifier.notify(&request);
        pending.insert(
            request.tool_call_id.clone(),
            PendingApproval {
                request,
                respond: tx,
            },
        );
        rx
    }

    fn remove_expired(&self, tool_call_id: &str) {
        self.pending.write().remove(tool_call_id);
    }

    fn session_ended(&self, session_id: &str) -> bool {
        self.ended_sessions.read().contains(session_id)
    }
}

#[async_trait]
impl ToolApprovalGate for ApprovalGate {
    async fn review(&self, request: ApprovalRequest) -> ApprovalOutcome {
        // Pre-authorized tools are refused too once the session is over.
        if self.session_ended(&request.session_id) {
            return ApprovalOutcome::Denied {
                reason: Some(SESSION_ENDED_REASON.into()),
            };
        }
        if !self.config.requires_approval(&request.tool_name) {
            tracing::debug!(tool_name = %request.tool_name, mode = %self.config.mode, "tool call not gated");
            return ApprovalOutcome::Approved;
        }

        let tool_call_id = request.tool_call_id.clone();
        let rx = self.request_approval(request);
        let timeout = self.timeout();

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(decision)) => decision.into(),
            Ok(Err(_)) => {
                // Sender dropped without a decision.
                self.remove_expired(&tool_call_id);
                ApprovalOutcome::Denied {
                    reason: Some("approval channel closed".into()),
                }
            }
            Err(_) => {
                self.remove_expired(&tool_call_id);
                tracing::warn!(
                    tool_call_id = %tool_call_id,
                    timeout_secs = timeout.as_secs(),
                    "tool approval timed out"
                );
                ApprovalOutcome::TimedOut
            }
        };

        TraceEvent::ApprovalResolved {
            tool_call_id,
            outcome: outcome.as_str().to_owned(),
        }
        .emit();
        outcome
    }

    fn resolve(&self, tool_call_id: &str, decision: ApprovalDecision) -> bool {
        if let Some(pending) = self.pending.write().remove(tool_call_id) {
            let _ = pending.respond.send(decision);
            return true;
        }
        false
    }

    fn cancel_session(&self, session_id: &str) -> usize {
        let mut pending = self.pending.write();
        self.ended_sessions.write().insert(session_id.to_owned());
        let ids: Vec<String> = pending
            .values()
            .filter(|p| p.request.session_id == session_id)
            .map(|p| p.request.tool_call_id.clone())
            .collect();
        for id in &ids {
            if let Some(p) = pending.remove(id) {
                let _ = p.respond.send(ApprovalDecision::Denied {
                    reason: Some(SESSION_ENDED_REASON.into()),
                });
            }
        }
        ids.len()
    }

    fn list_pending(&self) -> Vec<ApprovalRequest> {
        self.pending
            .read()
            .values()
            .map(|p| p.request.clone())
            .collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use tk_domain::config::ApprovalMode;

    use super::*;

    fn make_gate(mode: ApprovalMode, timeout_secs: u64) -> Arc<ApprovalGate> {
        let config = ApprovalConfig {
            mode,
            timeout_secs,
            pre_authorized_tools: vec!["read_file".into()],
        };
        Arc::new(ApprovalGate::new(config, Arc::new(LogNotifier)))
    }

    fn make_request(session_id: &str, call_id: &str, tool: &str) -> ApprovalRequest {
        ApprovalRequest {
            session_id: session_id.into(),
            tool_call_id: call_id.into(),
            tool_name: tool.into(),
            tool_args: HashMap::from([("command".to_string(), serde_json::json!("rm -rf /tmp/x"))]),
            context: ApprovalContext {
                turn_id: "t1".into(),
                strategy: "test".into(),
                trace_id: "trace".into(),
            },
            created_at: Utc::now(),
        }
    }

    async fn wait_for_pending(gate: &ApprovalGate, n: usize) {
        while gate.list_pending().len() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn noop_gate_approves() {
        let outcome = NoopGate.review(make_request("s", "c", "exec")).await;
        assert_eq!(outcome, ApprovalOutcome::Approved);
        assert!(!NoopGate.resolve("c", ApprovalDecision::Approved));
    }

    #[tokio::test]
    async fn pre_authorized_tool_skips_gate_in_auto() {
        let gate = make_gate(ApprovalMode::Auto, 60);
        let outcome = gate.review(make_request("s", "c1", "read_file")).await;
        assert!(outcome.is_approved());
        assert!(gate.list_pending().is_empty());
    }

    #[tokio::test]
    async fn disabled_mode_never_waits() {
        let gate = make_gate(ApprovalMode::Disabled, 60);
        let outcome = gate.review(make_request("s", "c1", "exec")).await;
        assert!(outcome.is_approved());
    }

    #[tokio::test]
    async fn approve_resumes_waiting_call() {
        let gate = make_gate(ApprovalMode::RequireApproval, 300);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.review(make_request("s", "c1", "read_file")).await })
        };

        wait_for_pending(&gate, 1).await;
        let pending = gate.list_pending();
        assert_eq!(pending[0].tool_call_id, "c1");
        assert_eq!(pending[0].tool_args["command"], "rm -rf /tmp/x");

        assert!(gate.resolve("c1", ApprovalDecision::Approved));
        assert_eq!(waiter.await.unwrap(), ApprovalOutcome::Approved);
        assert!(gate.list_pending().is_empty());
    }

    #[tokio::test]
    async fn deny_carries_reason() {
        let gate = make_gate(ApprovalMode::Auto, 300);
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.review(make_request("s", "c1", "exec")).await })
        };

        wait_for_pending(&gate, 1).await;
        assert!(gate.resolve(
            "c1",
            ApprovalDecision::Denied {
                reason: Some("too dangerous".into())
            }
        ));
        let outcome = waiter.await.unwrap();
        assert!(outcome.is_denial());
        assert_eq!(
            outcome,
            ApprovalOutcome::Denied {
                reason: Some("too dangerous".into())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_decision_times_out() {
        let gate = make_gate(ApprovalMode::RequireApproval, 5);
        let outcome = gate.review(make_request("s", "c1", "exec")).await;
        assert_eq!(outcome, ApprovalOutcome::TimedOut);
        assert!(outcome.is_denial());
        assert!(gate.list_pending().is_empty());
        // A late decision finds nothing to resolve.
        assert!(!gate.resolve("c1", ApprovalDecision::Approved));
    }

    #[tokio::test]
    async fn ending_session_denies_only_its_calls() {
        let gate = make_gate(ApprovalMode::RequireApproval, 300);
        let a = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.review(make_request("s1", "a", "exec")).await })
        };
        let b = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.review(make_request("s2", "b", "exec")).await })
        };
        wait_for_pending(&gate, 2).await;

        assert_eq!(gate.cancel_session("s1"), 1);
        assert_eq!(
            a.await.unwrap(),
            ApprovalOutcome::Denied {
                reason: Some(SESSION_ENDED_REASON.into())
            }
        );

        let left = gate.list_pending();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].session_id, "s2");
        gate.resolve("b", ApprovalDecision::Approved);
        assert!(b.await.unwrap().is_approved());
    }

    #[tokio::test(start_paused = true)]
    async fn ended_session_denies_later_calls_at_once() {
        let gate = make_gate(ApprovalMode::Auto, 300);
        assert_eq!(gate.cancel_session("s1"), 0);

        let started = tokio::time::Instant::now();
        let outcome = gate.review(make_request("s1", "late", "exec")).await;
        assert_eq!(
            outcome,
            ApprovalOutcome::Denied {
                reason: Some(SESSION_ENDED_REASON.into())
            }
        );
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(gate.list_pending().is_empty());

        let pre_authorized = gate.review(make_request("s1", "read", "read_file")).await;
        assert!(pre_authorized.is_denial());

        // Other sessions still wait for a decision.
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.review(make_request("s2", "other", "exec")).await })
        };
        wait_for_pending(&gate, 1).await;
        assert!(gate.resolve("other", ApprovalDecision::Approved));
        assert!(waiter.await.unwrap().is_approved());
    }

    #[tokio::test]
    async fn duplicate_call_id_is_denied() {
        let gate = make_gate(ApprovalMode::RequireApproval, 300);
        let _first = gate.request_approval(make_request("s", "dup", "exec"));
        let second = gate.request_approval(make_request("s", "dup", "exec"));
        let decision = second.await.unwrap();
        assert!(matches!(decision, ApprovalDecision::Denied { .. }));
        assert_eq!(gate.list_pending().len(), 1);
    }

    #[tokio::test]
    async fn broadcast_notifier_delivers_requests() {
        let notifier = Arc::new(BroadcastNotifier::new(8));
        let mut rx = notifier.subscribe();
        let gate = ApprovalGate::new(
            ApprovalConfig {
                mode: ApprovalMode::RequireApproval,
                ..Default::default()
            },
            notifier.clone(),
        );
        let _rx = gate.request_approval(make_request("s", "c1", "exec"));
        let seen = rx.recv().await.unwrap();
        assert_eq!(seen.tool_call_id, "c1");
    }

    #[test]
    fn resolve_nonexistent_returns_false() {
        let gate = make_gate(ApprovalMode::RequireApproval, 300);
        assert!(!gate.resolve("missing", ApprovalDecision::Approved));
    }
}
