// manager.rs — The approval gate manager.
//
// Bridges REQUIRE_APPROVAL decisions to human/system action. A caller
// whose phase has a configured gate receives a PendingApproval ticket and
// awaits its outcome; the outcome arrives from `resolve_approval`, from
// the gate's timeout timer, or from `destroy()`. The timeout default is
// fail-closed: silence means denial unless the gate explicitly opts in to
// `auto_approve_on_timeout`.
//
// Concurrency model: one std::sync::Mutex guards the pending map and the
// audit list. Critical sections only mutate in-memory state and capture a
// snapshot; the snapshot is persisted to disk after the lock is released,
// so a slow disk never blocks a resolver. Each pending request owns
// exactly one tokio timer task, whose handle is aborted on resolution,
// cancellation, and destroy.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use loki_policy::GateConfig;

use crate::request::{ApprovalOutcome, ApprovalRequest, Resolution};
use crate::store::{ApprovalState, ApprovalStateStore};
use crate::webhook;

/// A ticket for one in-flight approval. Await [`PendingApproval::outcome`]
/// to suspend until resolution or timeout. Dropping the ticket without
/// awaiting it cancels the request: the pending entry is removed and its
/// timer aborted.
pub struct PendingApproval {
    id: String,
    rx: oneshot::Receiver<ApprovalOutcome>,
    manager: Option<Weak<ManagerInner>>,
}

impl PendingApproval {
    /// The request id — hand this to the external resolver.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Suspend until the request is resolved, times out, or the manager
    /// shuts down. Always yields an outcome; never an error.
    pub async fn outcome(mut self) -> ApprovalOutcome {
        let outcome = (&mut self.rx)
            .await
            .unwrap_or_else(|_| ApprovalOutcome::shutdown());
        // The request is settled; Drop must not treat this as cancellation.
        self.manager = None;
        outcome
    }
}

impl Drop for PendingApproval {
    fn drop(&mut self) {
        if let Some(inner) = self.manager.take().and_then(|weak| weak.upgrade()) {
            inner.cancel(&self.id);
        }
    }
}

/// The approval gate manager — one instance per project directory.
pub struct ApprovalGateManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    gates: Vec<GateConfig>,
    state: Mutex<ManagerState>,
    store: ApprovalStateStore,
    client: Option<reqwest::Client>,
    destroyed: AtomicBool,
}

#[derive(Default)]
struct ManagerState {
    pending: HashMap<String, PendingEntry>,
    audit: Vec<ApprovalRequest>,
}

struct PendingEntry {
    request: ApprovalRequest,
    auto_approve_on_timeout: bool,
    sender: oneshot::Sender<ApprovalOutcome>,
    /// Attached right after insertion; `None` only in that window.
    timer: Option<JoinHandle<()>>,
}

impl PendingEntry {
    fn cancel_timer(&self) {
        if let Some(timer) = &self.timer {
            timer.abort();
        }
    }
}

impl ApprovalGateManager {
    /// Create a manager for a project, seeded with the gate configuration
    /// from the policy engine.
    ///
    /// Requests left pending by a previous process are folded into the
    /// audit trail as timeouts — they cannot be resumed, and fail-closed
    /// means they must not look approved.
    pub fn new(project_dir: impl AsRef<Path>, gates: Vec<GateConfig>) -> Self {
        let store = ApprovalStateStore::new(&project_dir);
        let mut persisted = store.load();

        let mut audit = std::mem::take(&mut persisted.audit);
        let orphaned = !persisted.pending.is_empty();
        for mut request in persisted.pending {
            request.resolution = Some(Resolution::Timeout);
            request.resolved_at = Some(Utc::now());
            request.reason = Some("unresolved at shutdown".to_string());
            audit.push(request);
        }

        let inner = Arc::new(ManagerInner {
            gates,
            state: Mutex::new(ManagerState {
                pending: HashMap::new(),
                audit,
            }),
            store,
            client: webhook::build_client(),
            destroyed: AtomicBool::new(false),
        });

        if orphaned {
            inner.persist();
        }

        Self { inner }
    }

    /// True iff a gate is configured for the phase.
    pub fn has_gate(&self, phase: &str) -> bool {
        self.find_gate(phase).is_some()
    }

    /// The first gate configured for the phase, if any.
    pub fn find_gate(&self, phase: &str) -> Option<&GateConfig> {
        self.inner.gates.iter().find(|gate| gate.phase == phase)
    }

    /// Request approval for a phase.
    ///
    /// With no gate configured, the ticket resolves immediately with
    /// `{approved: true, method: "auto"}`. Otherwise the request is
    /// persisted, the webhook (if any) fires asynchronously, and a timer
    /// with the gate's `timeout_minutes` starts.
    ///
    /// Must be called within a tokio runtime — the timer and webhook are
    /// spawned tasks.
    pub fn request_approval(&self, phase: &str, context: Value) -> PendingApproval {
        let Some(gate) = self.find_gate(phase) else {
            return resolved_ticket(ApprovalOutcome::auto());
        };
        if self.inner.destroyed.load(Ordering::SeqCst) {
            tracing::warn!(phase, "request_approval after destroy, failing closed");
            return resolved_ticket(ApprovalOutcome::shutdown());
        }

        let request = ApprovalRequest::new(phase, &gate.name, context);
        let id = request.id.clone();
        let (tx, rx) = oneshot::channel();

        if let (Some(client), Some(url)) = (self.inner.client.clone(), gate.webhook.clone()) {
            let payload = json!({
                "id": request.id,
                "phase": request.phase,
                "gate": request.gate_name,
                "created_at": request.created_at,
                "context": request.context,
            });
            tokio::spawn(async move {
                webhook::deliver(&client, &url, &payload).await;
            });
        }

        tracing::info!(id = %id, phase, gate = %gate.name, "approval requested");

        {
            let mut state = self.inner.lock_state();
            state.pending.insert(
                id.clone(),
                PendingEntry {
                    request,
                    auto_approve_on_timeout: gate.auto_approve_on_timeout,
                    sender: tx,
                    timer: None,
                },
            );
        }

        // Validators guarantee a non-negative number, but a programmatic
        // GateConfig might not have been validated; clamp instead of
        // letting from_secs_f64 panic.
        let minutes = if gate.timeout_minutes.is_finite() {
            gate.timeout_minutes.max(0.0)
        } else {
            0.0
        };
        let timeout = Duration::from_secs_f64(minutes * 60.0);
        // The timer starts only after the entry is in the map — a zero
        // timeout must find something to expire.
        let timer = {
            let weak = Arc::downgrade(&self.inner);
            let id = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = weak.upgrade() {
                    inner.expire(&id);
                }
            })
        };
        {
            let mut state = self.inner.lock_state();
            match state.pending.get_mut(&id) {
                Some(entry) => entry.timer = Some(timer),
                // Already expired, resolved, or cancelled in the window.
                None => timer.abort(),
            }
        }
        self.inner.persist();

        PendingApproval {
            id,
            rx,
            manager: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Resolve a pending request. Returns true exactly once per id;
    /// unknown and already-resolved ids return false without touching
    /// audit state.
    pub fn resolve_approval(&self, id: &str, approved: bool, reason: Option<String>) -> bool {
        let entry = {
            let mut state = self.inner.lock_state();
            let Some(mut entry) = state.pending.remove(id) else {
                return false;
            };
            entry.cancel_timer();
            entry.request.resolution = Some(if approved {
                Resolution::Allow
            } else {
                Resolution::Deny
            });
            entry.request.resolved_at = Some(Utc::now());
            entry.request.reason = reason.clone();
            state.audit.push(entry.request.clone());
            entry
        };

        tracing::info!(id, approved, "approval resolved manually");
        let _ = entry.sender.send(ApprovalOutcome::manual(approved, reason));
        self.inner.persist();
        true
    }

    /// Requests currently awaiting resolution, oldest first.
    pub fn get_pending_requests(&self) -> Vec<ApprovalRequest> {
        let state = self.inner.lock_state();
        let mut pending: Vec<ApprovalRequest> = state
            .pending
            .values()
            .map(|entry| entry.request.clone())
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    /// Resolved requests in chronological resolution order.
    pub fn get_audit_trail(&self) -> Vec<ApprovalRequest> {
        self.inner.lock_state().audit.clone()
    }

    /// Cancel every pending timer and complete every outstanding future
    /// with the fail-closed shutdown outcome. No waiter is left stranded.
    /// Idempotent; also runs on drop.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<PendingEntry> = {
            let mut state = self.inner.lock_state();
            let entries: Vec<PendingEntry> = state
                .pending
                .drain()
                .map(|(_, mut entry)| {
                    entry.request.resolution = Some(Resolution::Timeout);
                    entry.request.resolved_at = Some(Utc::now());
                    entry.request.reason = Some("shutdown".to_string());
                    entry
                })
                .collect();
            for entry in &entries {
                state.audit.push(entry.request.clone());
            }
            entries
        };

        for entry in entries {
            entry.cancel_timer();
            let _ = entry.sender.send(ApprovalOutcome::shutdown());
        }
        self.inner.persist();
    }
}

impl Drop for ApprovalGateManager {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl ManagerInner {
    fn lock_state(&self) -> MutexGuard<'_, ManagerState> {
        // A poisoned lock means a panic elsewhere; the state itself is
        // still coherent, so recover it rather than cascading the panic
        // into resolvers and timers.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Timer expiry: fail closed unless the gate opted in to auto-approval.
    fn expire(&self, id: &str) {
        let entry = {
            let mut state = self.lock_state();
            let Some(mut entry) = state.pending.remove(id) else {
                // Already resolved or cancelled; the race is benign.
                return;
            };
            entry.request.resolution = Some(Resolution::Timeout);
            entry.request.resolved_at = Some(Utc::now());
            state.audit.push(entry.request.clone());
            entry
        };

        let approved = entry.auto_approve_on_timeout;
        tracing::info!(id, approved, "approval timed out");
        let _ = entry.sender.send(ApprovalOutcome::timeout(approved));
        self.persist();
    }

    /// Caller cancellation: remove the pending entry and abort its timer.
    /// The request is withdrawn, not resolved, so it does not enter the
    /// audit trail.
    fn cancel(&self, id: &str) {
        let entry = {
            let mut state = self.lock_state();
            state.pending.remove(id)
        };
        if let Some(entry) = entry {
            entry.cancel_timer();
            tracing::debug!(id, "approval request cancelled by caller");
            self.persist();
        }
    }

    /// Persist a snapshot of the current state. I/O happens here, outside
    /// any lock held by the caller's critical section; failures are
    /// logged because the in-memory state stays authoritative.
    fn persist(&self) {
        let snapshot = {
            let state = self.lock_state();
            ApprovalState {
                pending: state
                    .pending
                    .values()
                    .map(|entry| entry.request.clone())
                    .collect(),
                audit: state.audit.clone(),
            }
        };
        if let Err(err) = self.store.save(&snapshot) {
            tracing::warn!(error = %err, "failed to persist approval state");
        }
    }
}

/// A ticket whose outcome is already decided (auto-approval, or a request
/// made after shutdown).
fn resolved_ticket(outcome: ApprovalOutcome) -> PendingApproval {
    let (tx, rx) = oneshot::channel();
    let _ = tx.send(outcome);
    PendingApproval {
        id: crate::request::new_request_id(),
        rx,
        manager: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ApprovalMethod;
    use serde_json::json;
    use tempfile::tempdir;

    fn gate(phase: &str, timeout_minutes: f64) -> GateConfig {
        GateConfig {
            name: format!("{}-gate", phase),
            phase: phase.to_string(),
            timeout_minutes,
            auto_approve_on_timeout: false,
            webhook: None,
        }
    }

    #[tokio::test]
    async fn no_gate_resolves_immediately_as_auto() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![]);

        let outcome = manager.request_approval("deploy", json!({})).outcome().await;
        assert!(outcome.approved);
        assert_eq!(outcome.method, ApprovalMethod::Auto);
        assert!(manager.get_pending_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fails_closed_by_default() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 0.01)]);

        let outcome = manager.request_approval("deploy", json!({})).outcome().await;
        assert!(!outcome.approved);
        assert_eq!(outcome.method, ApprovalMethod::Timeout);

        let audit = manager.get_audit_trail();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].resolution, Some(Resolution::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_approve_on_timeout_inverts_the_outcome() {
        let dir = tempdir().unwrap();
        let mut g = gate("deploy", 0.01);
        g.auto_approve_on_timeout = true;
        let manager = ApprovalGateManager::new(dir.path(), vec![g]);

        let outcome = manager.request_approval("deploy", json!({})).outcome().await;
        assert!(outcome.approved);
        assert_eq!(outcome.method, ApprovalMethod::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_expires_immediately_and_fails_closed() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 0.0)]);

        let outcome = manager.request_approval("deploy", json!({})).outcome().await;
        assert!(!outcome.approved);
        assert_eq!(outcome.method, ApprovalMethod::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_resolution_beats_timeout() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("release", 30.0)]);

        let ticket = manager.request_approval("release", json!({"version": "1.0.0"}));
        let id = ticket.id().to_string();

        assert!(manager.resolve_approval(&id, true, Some("LGTM".to_string())));

        let outcome = ticket.outcome().await;
        assert!(outcome.approved);
        assert_eq!(outcome.method, ApprovalMethod::Manual);
        assert_eq!(outcome.reason.as_deref(), Some("LGTM"));

        // With the timer cancelled, advancing past the deadline changes
        // nothing: the audit trail still shows one manual resolution.
        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        let audit = manager.get_audit_trail();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].resolution, Some(Resolution::Allow));
    }

    #[tokio::test(start_paused = true)]
    async fn double_resolve_returns_false_and_leaves_audit_alone() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("release", 30.0)]);

        let ticket = manager.request_approval("release", json!({}));
        let id = ticket.id().to_string();

        assert!(manager.resolve_approval(&id, false, Some("nope".to_string())));
        assert!(!manager.resolve_approval(&id, true, Some("changed my mind".to_string())));
        assert!(!manager.resolve_approval("apr-doesnotexist", true, None));

        let outcome = ticket.outcome().await;
        assert!(!outcome.approved);

        let audit = manager.get_audit_trail();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].resolution, Some(Resolution::Deny));
        assert_eq!(audit[0].reason.as_deref(), Some("nope"));
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_releases_every_waiter() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(
            dir.path(),
            vec![gate("deploy", 30.0), gate("release", 30.0)],
        );

        let first = manager.request_approval("deploy", json!({}));
        let second = manager.request_approval("release", json!({}));

        manager.destroy();

        for ticket in [first, second] {
            let outcome = ticket.outcome().await;
            assert!(!outcome.approved);
            assert_eq!(outcome.method, ApprovalMethod::Timeout);
            assert_eq!(outcome.reason.as_deref(), Some("shutdown"));
        }
        assert!(manager.get_pending_requests().is_empty());
        assert_eq!(manager.get_audit_trail().len(), 2);

        // destroy is idempotent.
        manager.destroy();
        assert_eq!(manager.get_audit_trail().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_ticket_cancels_the_request() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 30.0)]);

        let ticket = manager.request_approval("deploy", json!({}));
        let id = ticket.id().to_string();
        assert_eq!(manager.get_pending_requests().len(), 1);

        drop(ticket);

        assert!(manager.get_pending_requests().is_empty());
        // A withdrawn request was never resolved, so it is not audited
        // and cannot be resolved later.
        assert!(manager.get_audit_trail().is_empty());
        assert!(!manager.resolve_approval(&id, true, None));
    }

    #[tokio::test(start_paused = true)]
    async fn audit_trail_survives_restart_and_orphans_fail_closed() {
        let dir = tempdir().unwrap();

        {
            let manager = ApprovalGateManager::new(dir.path(), vec![gate("release", 30.0)]);
            let ticket = manager.request_approval("release", json!({}));
            let id = ticket.id().to_string();
            manager.resolve_approval(&id, true, Some("ok".to_string()));
            ticket.outcome().await;

            // Leave a second request pending across the "crash": forget
            // the ticket so Drop does not cancel it, then drop the
            // manager without destroy() folding it into the audit.
            let orphan = manager.request_approval("release", json!({}));
            std::mem::forget(orphan);
            std::mem::forget(manager);
        }

        let manager = ApprovalGateManager::new(dir.path(), vec![gate("release", 30.0)]);
        let audit = manager.get_audit_trail();
        assert_eq!(audit.len(), 2);
        // The previously-resolved entry keeps its place and resolution.
        assert_eq!(audit[0].resolution, Some(Resolution::Allow));
        assert_eq!(audit[0].reason.as_deref(), Some("ok"));
        // The orphan became a fail-closed timeout.
        assert_eq!(audit[1].resolution, Some(Resolution::Timeout));
        assert_eq!(audit[1].reason.as_deref(), Some("unresolved at shutdown"));
        assert!(manager.get_pending_requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_destroy_fails_closed() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 30.0)]);
        manager.destroy();

        let outcome = manager.request_approval("deploy", json!({})).outcome().await;
        assert!(!outcome.approved);
        assert_eq!(outcome.reason.as_deref(), Some("shutdown"));
    }

    #[tokio::test]
    async fn find_gate_and_has_gate() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 5.0)]);
        assert!(manager.has_gate("deploy"));
        assert!(!manager.has_gate("release"));
        assert_eq!(manager.find_gate("deploy").unwrap().name, "deploy-gate");
        assert!(manager.find_gate("release").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn state_file_reflects_transitions() {
        let dir = tempdir().unwrap();
        let manager = ApprovalGateManager::new(dir.path(), vec![gate("deploy", 30.0)]);

        let ticket = manager.request_approval("deploy", json!({}));
        let state_path = dir.path().join(".loki/state/approvals.json");
        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
        assert_eq!(on_disk["pending"].as_array().unwrap().len(), 1);

        manager.resolve_approval(&ticket.id().to_string(), true, None);
        ticket.outcome().await;

        let on_disk: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&state_path).unwrap()).unwrap();
        assert_eq!(on_disk["pending"].as_array().unwrap().len(), 0);
        assert_eq!(on_disk["audit"].as_array().unwrap().len(), 1);
    }
}
