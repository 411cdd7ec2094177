use mcpr_core::{generate_id, now_ms, EventSink, IdKind, Result, RouterError, UiEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::request::{ApprovalRequest, ApprovalStatus};

/// How long a request stays answerable (5 minutes).
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// How long a settled request stays queryable before the sweep drops it.
const SETTLED_RETENTION_MS: i64 = 60_000;

#[derive(Debug, Clone)]
pub struct NewApproval {
    pub client_id: String,
    pub server_id: String,
    pub tool_name: String,
    pub tool_arguments: Value,
    pub policy_rule_id: Option<String>,
    /// Override for tests; `None` uses [`DEFAULT_APPROVAL_TIMEOUT`].
    pub timeout: Option<Duration>,
}

/// The single-shot outcome every waiter receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub status: ApprovalStatus,
    pub reason: Option<String>,
}

impl Decision {
    pub fn approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }
}

struct Entry {
    request: ApprovalRequest,
    tx: watch::Sender<Option<Decision>>,
}

/// In-memory approval queue. Restart discards everything pending.
pub struct ApprovalQueue {
    entries: Mutex<HashMap<String, Entry>>,
    events: Arc<dyn EventSink>,
}

impl ApprovalQueue {
    pub fn new(events: Arc<dyn EventSink>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Register a pending request and announce it to subscribers.
    pub fn create(&self, input: NewApproval) -> ApprovalRequest {
        let now = now_ms();
        let timeout = input.timeout.unwrap_or(DEFAULT_APPROVAL_TIMEOUT);
        let request = ApprovalRequest {
            id: generate_id(IdKind::Approval),
            client_id: input.client_id,
            server_id: input.server_id,
            tool_name: input.tool_name,
            tool_arguments: input.tool_arguments,
            policy_rule_id: input.policy_rule_id,
            status: ApprovalStatus::Pending,
            requested_at: now,
            expires_at: now + timeout.as_millis() as i64,
            responded_at: None,
            responded_by: None,
            response_note: None,
        };

        let (tx, _rx) = watch::channel(None);
        self.lock().insert(
            request.id.clone(),
            Entry {
                request: request.clone(),
                tx,
            },
        );

        self.events.emit(UiEvent::ApprovalNew {
            approval_id: request.id.clone(),
        });
        request
    }

    /// Wait for the decision on `id`.
    ///
    /// Multiple concurrent waiters multiplex onto the same decision; a
    /// waiter arriving after settlement gets the cached result. The wait
    /// budget is the shorter of `timeout` and the request's remaining
    /// lifetime; its expiry settles the request as `Expired`.
    pub async fn wait_for(&self, id: &str, timeout: Option<Duration>) -> Result<Decision> {
        let (mut rx, deadline) = {
            let entries = self.lock();
            let entry = entries
                .get(id)
                .ok_or_else(|| RouterError::not_found("approval", id))?;

            if let Some(decision) = entry.tx.borrow().clone() {
                return Ok(decision);
            }

            let remaining = entry.request.expires_at.saturating_sub(now_ms()).max(0) as u64;
            let budget = match timeout {
                Some(t) => t.min(Duration::from_millis(remaining)),
                None => Duration::from_millis(remaining),
            };
            (entry.tx.subscribe(), budget)
        };

        let waited = tokio::time::timeout(deadline, async {
            loop {
                if let Some(decision) = rx.borrow_and_update().clone() {
                    return Ok::<_, RouterError>(decision);
                }
                rx.changed()
                    .await
                    .map_err(|_| RouterError::internal("approval channel closed"))?;
            }
        })
        .await;

        match waited {
            Ok(decision) => decision,
            // The wait budget lapsed: settle as expired (first settler
            // wins; a concurrent respond may have beaten us).
            Err(_) => match self.expire(id) {
                Some(decision) => Ok(decision),
                None => self.cached_decision(id),
            },
        }
    }

    /// Record the human decision. Only a pending request can be answered;
    /// anything else is a conflict.
    pub fn respond(
        &self,
        id: &str,
        approved: bool,
        responded_by: &str,
        note: Option<String>,
    ) -> Result<ApprovalRequest> {
        let mut entries = self.lock();
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| RouterError::not_found("approval", id))?;

        if entry.request.status.is_settled() {
            return Err(RouterError::conflict(format!(
                "approval '{id}' already {}",
                entry.request.status
            )));
        }

        entry.request.status = if approved {
            ApprovalStatus::Approved
        } else {
            ApprovalStatus::Rejected
        };
        entry.request.responded_at = Some(now_ms());
        entry.request.responded_by = Some(responded_by.to_string());
        entry.request.response_note = note.clone();

        let _ = entry.tx.send(Some(Decision {
            status: entry.request.status,
            reason: note,
        }));
        let settled = entry.request.clone();
        drop(entries);

        self.events.emit(UiEvent::ApprovalResolved {
            approval_id: id.to_string(),
            approved,
        });
        Ok(settled)
    }

    /// Cancel a request (client disconnect, pipeline deadline). Settled
    /// requests are left as they are.
    pub fn cancel(&self, id: &str) -> Result<()> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(id) else {
            return Ok(());
        };
        if entry.request.status.is_settled() {
            return Ok(());
        }

        entry.request.status = ApprovalStatus::Cancelled;
        entry.request.responded_at = Some(now_ms());
        let _ = entry.tx.send(Some(Decision {
            status: ApprovalStatus::Cancelled,
            reason: None,
        }));
        drop(entries);

        self.events.emit(UiEvent::ApprovalResolved {
            approval_id: id.to_string(),
            approved: false,
        });
        Ok(())
    }

    /// All currently pending requests.
    pub fn list(&self) -> Vec<ApprovalRequest> {
        let mut pending: Vec<ApprovalRequest> = self
            .lock()
            .values()
            .filter(|entry| entry.request.status == ApprovalStatus::Pending)
            .map(|entry| entry.request.clone())
            .collect();
        pending.sort_by_key(|request| request.requested_at);
        pending
    }

    pub fn get(&self, id: &str) -> Option<ApprovalRequest> {
        self.lock().get(id).map(|entry| entry.request.clone())
    }

    /// Expire overdue pending requests and drop old settled entries.
    /// Returns the ids that expired this pass.
    pub fn sweep_expired(&self) -> Vec<String> {
        let now = now_ms();
        let overdue: Vec<String> = {
            let entries = self.lock();
            entries
                .values()
                .filter(|entry| {
                    entry.request.status == ApprovalStatus::Pending
                        && entry.request.expires_at < now
                })
                .map(|entry| entry.request.id.clone())
                .collect()
        };

        let mut expired = Vec::new();
        for id in overdue {
            if self.expire(&id).is_some() {
                expired.push(id);
            }
        }

        self.lock().retain(|_, entry| {
            !(entry.request.status.is_settled()
                && entry
                    .request
                    .responded_at
                    .unwrap_or(entry.request.expires_at)
                    + SETTLED_RETENTION_MS
                    < now)
        });

        expired
    }

    /// Settle a pending request as expired. `None` when it was already
    /// settled by someone else.
    fn expire(&self, id: &str) -> Option<Decision> {
        let mut entries = self.lock();
        let entry = entries.get_mut(id)?;
        if entry.request.status.is_settled() {
            return None;
        }

        entry.request.status = ApprovalStatus::Expired;
        entry.request.responded_at = Some(now_ms());
        let decision = Decision {
            status: ApprovalStatus::Expired,
            reason: Some("approval window lapsed".to_string()),
        };
        let _ = entry.tx.send(Some(decision.clone()));
        drop(entries);

        self.events.emit(UiEvent::ApprovalExpired {
            approval_id: id.to_string(),
        });
        Some(decision)
    }

    fn cached_decision(&self, id: &str) -> Result<Decision> {
        let entries = self.lock();
        let entry = entries
            .get(id)
            .ok_or_else(|| RouterError::not_found("approval", id))?;
        entry
            .tx
            .borrow()
            .clone()
            .ok_or_else(|| RouterError::internal("approval settled without decision"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalQueue")
            .field("entries", &self.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpr_core::NoopSink;
    use std::sync::Mutex as StdMutex;

    struct RecordingSink {
        events: StdMutex<Vec<String>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: StdMutex::new(Vec::new()),
            })
        }

        fn names(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: UiEvent) {
            let name = match event {
                UiEvent::ApprovalNew { .. } => "approval.new",
                UiEvent::ApprovalResolved { .. } => "approval.resolved",
                UiEvent::ApprovalExpired { .. } => "approval.expired",
                UiEvent::ServerStatusChanged { .. } => "server.status-changed",
            };
            self.events.lock().unwrap().push(name.to_string());
        }
    }

    fn new_input(timeout: Option<Duration>) -> NewApproval {
        NewApproval {
            client_id: "alice".to_string(),
            server_id: "server-1".to_string(),
            tool_name: "write_file".to_string(),
            tool_arguments: serde_json::json!({"path": "/tmp/x"}),
            policy_rule_id: Some("policy-1".to_string()),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_create_then_respond_wakes_waiter() {
        let queue = Arc::new(ApprovalQueue::new(Arc::new(NoopSink)));
        let request = queue.create(new_input(None));
        assert_eq!(request.status, ApprovalStatus::Pending);

        let waiter = {
            let queue = Arc::clone(&queue);
            let id = request.id.clone();
            tokio::spawn(async move { queue.wait_for(&id, None).await })
        };

        tokio::task::yield_now().await;
        queue
            .respond(&request.id, true, "ops", Some("looks fine".to_string()))
            .unwrap();

        let decision = waiter.await.unwrap().unwrap();
        assert!(decision.approved());
        assert_eq!(decision.reason.as_deref(), Some("looks fine"));
    }

    #[tokio::test]
    async fn test_multiple_waiters_fan_in() {
        let queue = Arc::new(ApprovalQueue::new(Arc::new(NoopSink)));
        let request = queue.create(new_input(None));

        let mut waiters = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            let id = request.id.clone();
            waiters.push(tokio::spawn(async move { queue.wait_for(&id, None).await }));
        }

        tokio::task::yield_now().await;
        queue.respond(&request.id, false, "ops", None).unwrap();

        for waiter in waiters {
            let decision = waiter.await.unwrap().unwrap();
            assert_eq!(decision.status, ApprovalStatus::Rejected);
        }
    }

    #[tokio::test]
    async fn test_late_waiter_gets_cached_decision() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let request = queue.create(new_input(None));
        queue.respond(&request.id, true, "ops", None).unwrap();

        let decision = queue.wait_for(&request.id, None).await.unwrap();
        assert!(decision.approved());
    }

    #[tokio::test]
    async fn test_second_respond_is_conflict() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let request = queue.create(new_input(None));
        queue.respond(&request.id, true, "ops", None).unwrap();

        let err = queue.respond(&request.id, false, "ops2", None).unwrap_err();
        assert_eq!(err.kind(), mcpr_core::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_wait_timeout_expires_request() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let request = queue.create(new_input(Some(Duration::from_millis(20))));

        let decision = queue.wait_for(&request.id, None).await.unwrap();
        assert_eq!(decision.status, ApprovalStatus::Expired);
        assert_eq!(
            queue.get(&request.id).unwrap().status,
            ApprovalStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_explicit_wait_budget_shorter_than_request() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let request = queue.create(new_input(None));

        let started = std::time::Instant::now();
        let decision = queue
            .wait_for(&request.id, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(decision.status, ApprovalStatus::Expired);
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters_with_cancelled() {
        let queue = Arc::new(ApprovalQueue::new(Arc::new(NoopSink)));
        let request = queue.create(new_input(None));

        let waiter = {
            let queue = Arc::clone(&queue);
            let id = request.id.clone();
            tokio::spawn(async move { queue.wait_for(&id, None).await })
        };

        tokio::task::yield_now().await;
        queue.cancel(&request.id).unwrap();

        let decision = waiter.await.unwrap().unwrap();
        assert_eq!(decision.status, ApprovalStatus::Cancelled);

        // respond after cancel is a conflict
        assert!(queue.respond(&request.id, true, "ops", None).is_err());
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent_and_tolerates_missing() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let request = queue.create(new_input(None));
        queue.cancel(&request.id).unwrap();
        queue.cancel(&request.id).unwrap();
        queue.cancel("approval-missing").unwrap();
    }

    #[tokio::test]
    async fn test_list_returns_only_pending() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let keep = queue.create(new_input(None));
        let settle = queue.create(new_input(None));
        queue.respond(&settle.id, true, "ops", None).unwrap();

        let pending = queue.list();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, keep.id);
    }

    #[tokio::test]
    async fn test_sweep_expires_overdue_requests() {
        let sink = RecordingSink::new();
        let queue = ApprovalQueue::new(sink.clone());
        let request = queue.create(new_input(Some(Duration::from_millis(0))));

        tokio::time::sleep(Duration::from_millis(5)).await;
        let expired = queue.sweep_expired();
        assert_eq!(expired, vec![request.id.clone()]);

        let names = sink.names();
        assert_eq!(names, vec!["approval.new", "approval.expired"]);
    }

    #[tokio::test]
    async fn test_events_for_full_flow() {
        let sink = RecordingSink::new();
        let queue = ApprovalQueue::new(sink.clone());
        let request = queue.create(new_input(None));
        queue.respond(&request.id, true, "ops", None).unwrap();

        assert_eq!(sink.names(), vec!["approval.new", "approval.resolved"]);
    }

    #[tokio::test]
    async fn test_wait_for_unknown_id_is_not_found() {
        let queue = ApprovalQueue::new(Arc::new(NoopSink));
        let err = queue.wait_for("approval-ghost", None).await.unwrap_err();
        assert_eq!(err.kind(), mcpr_core::ErrorKind::NotFound);
    }
}
