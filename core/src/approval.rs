//! Pending-approval bookkeeping for commands that need human sign-off.
//!
//! Requests are keyed by the agent-assigned approval id, never by queue
//! position, so resolutions may arrive in any order. Each request carries
//! its own timeout timer; whichever of user decision and timeout fires
//! first wins, and the loser finds nothing left to resolve.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use indexmap::IndexMap;
use opstream_protocol::ApprovalDecision;
use opstream_protocol::ApprovalId;
use opstream_protocol::ApprovalRequest;
use opstream_protocol::ApprovalResolution;
use opstream_protocol::ApprovalStatus;
use opstream_protocol::FrameMetadata;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

const TIMEOUT_REASON: &str = "no decision arrived before the approval timeout";

#[derive(Debug)]
struct PendingApproval {
    request: ApprovalRequest,
    timer: JoinHandle<()>,
}

#[derive(Debug)]
struct CoordinatorInner {
    timeout: Duration,
    pending: Mutex<IndexMap<ApprovalId, PendingApproval>>,
    resolutions: mpsc::UnboundedSender<ApprovalResolution>,
}

/// Tracks every in-flight approval request for one session.
///
/// Resolutions (user decisions, timeouts, shutdown expiry) are pushed onto
/// the channel returned by [`ApprovalCoordinator::new`]. Exactly one
/// resolution is emitted per request.
#[derive(Debug, Clone)]
pub struct ApprovalCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ApprovalCoordinator {
    pub fn new(config: &EngineConfig) -> (Self, mpsc::UnboundedReceiver<ApprovalResolution>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Self {
            inner: Arc::new(CoordinatorInner {
                timeout: config.approval_timeout,
                pending: Mutex::new(IndexMap::new()),
                resolutions: tx,
            }),
        };
        (coordinator, rx)
    }

    /// Register a request and arm its timeout timer.
    ///
    /// Must be called from within a tokio runtime. A duplicate id is dropped
    /// with a warning; the original request and its timer stay in place.
    pub fn begin(&self, request: ApprovalRequest) {
        let id = request.approval_id.clone();
        let timer = {
            let inner = Arc::downgrade(&self.inner);
            let id = id.clone();
            let timeout = self.inner.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = inner.upgrade() {
                    CoordinatorInner::resolve_if_pending(
                        &inner,
                        &id,
                        ApprovalStatus::Expired,
                        Some(TIMEOUT_REASON.to_string()),
                    );
                }
            })
        };

        let mut pending = lock_pending(&self.inner);
        if pending.contains_key(&id) {
            tracing::warn!(approval_id = %id, "duplicate approval request ignored");
            timer.abort();
            return;
        }
        tracing::info!(approval_id = %id, command = %request.command, "approval requested");
        pending.insert(id, PendingApproval { request, timer });
    }

    /// Apply a user decision. Returns false when the id is unknown or the
    /// request was already resolved (e.g. lost the race against its timer).
    pub fn resolve(&self, id: &ApprovalId, decision: ApprovalDecision) -> bool {
        CoordinatorInner::resolve_if_pending(&self.inner, id, decision.into(), None)
    }

    /// Snapshot of requests still awaiting a decision, in arrival order.
    pub fn outstanding(&self) -> Vec<ApprovalRequest> {
        lock_pending(&self.inner)
            .values()
            .map(|entry| entry.request.clone())
            .collect()
    }

    pub fn is_pending(&self, id: &ApprovalId) -> bool {
        lock_pending(&self.inner).contains_key(id)
    }

    /// Expire everything still pending, e.g. when the session terminates
    /// with requests unanswered. Each one still gets its single resolution.
    pub fn expire_all(&self, reason: &str) {
        let ids: Vec<ApprovalId> = lock_pending(&self.inner).keys().cloned().collect();
        for id in ids {
            CoordinatorInner::resolve_if_pending(
                &self.inner,
                &id,
                ApprovalStatus::Expired,
                Some(reason.to_string()),
            );
        }
    }
}

impl CoordinatorInner {
    fn resolve_if_pending(
        inner: &Arc<CoordinatorInner>,
        id: &ApprovalId,
        status: ApprovalStatus,
        reason: Option<String>,
    ) -> bool {
        // Removal under the lock is the race arbiter: the first caller takes
        // the entry, every later caller no-ops.
        let Some(entry) = lock_pending(inner).shift_remove(id) else {
            return false;
        };
        entry.timer.abort();
        tracing::info!(approval_id = %id, status = %status, "approval resolved");
        let _ = inner.resolutions.send(ApprovalResolution {
            approval_id: id.clone(),
            status,
            reason,
        });
        true
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        let pending = self
            .pending
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for entry in pending.values() {
            entry.timer.abort();
        }
    }
}

fn lock_pending(
    inner: &CoordinatorInner,
) -> std::sync::MutexGuard<'_, IndexMap<ApprovalId, PendingApproval>> {
    inner.pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Build an [`ApprovalRequest`] out of approval-request frame metadata.
pub fn request_from_metadata(
    content: &str,
    metadata: Option<&FrameMetadata>,
) -> Option<ApprovalRequest> {
    let metadata = metadata?;
    let approval_id = ApprovalId::new(metadata.approval_id.clone()?);
    let command = metadata
        .command
        .clone()
        .unwrap_or_else(|| content.to_string());
    let mut request = ApprovalRequest::new(approval_id, command);
    request.tool = metadata.tool.clone();
    request.host_info = metadata.host_info.clone();
    Some(request)
}

/// Index of resolutions by id, for callers that need per-request lookup
/// after draining the channel.
pub fn index_resolutions(
    resolutions: Vec<ApprovalResolution>,
) -> HashMap<ApprovalId, ApprovalResolution> {
    resolutions
        .into_iter()
        .map(|resolution| (resolution.approval_id.clone(), resolution))
        .collect()
}

#[cfg(test)]
#[expect(clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(id: &str) -> ApprovalRequest {
        ApprovalRequest::new(ApprovalId::new(id), "kubectl delete pod web-0")
    }

    #[tokio::test(start_paused = true)]
    async fn pending_request_expires_at_the_timeout() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));
        assert!(coordinator.is_pending(&ApprovalId::new("appr-1")));

        tokio::time::advance(config.approval_timeout + Duration::from_millis(1)).await;
        let resolution = rx.recv().await.expect("expiry resolution");
        assert_eq!(resolution.status, ApprovalStatus::Expired);
        assert!(!coordinator.is_pending(&ApprovalId::new("appr-1")));
    }

    #[tokio::test(start_paused = true)]
    async fn decision_before_timeout_wins_and_timer_is_cancelled() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));

        assert!(coordinator.resolve(&ApprovalId::new("appr-1"), ApprovalDecision::Approved));
        let resolution = rx.recv().await.expect("decision resolution");
        assert_eq!(resolution.status, ApprovalStatus::Approved);

        // Pushing past the timeout must not produce a second resolution.
        tokio::time::advance(config.approval_timeout * 2).await;
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_decision_after_expiry_is_a_no_op() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));

        tokio::time::advance(config.approval_timeout + Duration::from_millis(1)).await;
        assert_eq!(
            rx.recv().await.expect("expiry").status,
            ApprovalStatus::Expired
        );
        assert!(!coordinator.resolve(&ApprovalId::new("appr-1"), ApprovalDecision::Approved));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn resolutions_may_arrive_out_of_order() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));
        coordinator.begin(request("appr-2"));

        assert!(coordinator.resolve(&ApprovalId::new("appr-2"), ApprovalDecision::Rejected));
        assert!(coordinator.resolve(&ApprovalId::new("appr-1"), ApprovalDecision::Approved));

        let first = rx.recv().await.expect("first resolution");
        let second = rx.recv().await.expect("second resolution");
        assert_eq!(first.approval_id, ApprovalId::new("appr-2"));
        assert_eq!(first.status, ApprovalStatus::Rejected);
        assert_eq!(second.approval_id, ApprovalId::new("appr-1"));
        assert_eq!(second.status, ApprovalStatus::Approved);
        assert!(coordinator.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_id_resolves_nothing() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));
        assert!(!coordinator.resolve(&ApprovalId::new("appr-9"), ApprovalDecision::Approved));
        assert!(rx.try_recv().is_err());
        assert_eq!(coordinator.outstanding().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_all_resolves_every_outstanding_request() {
        let config = EngineConfig::default();
        let (coordinator, mut rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));
        coordinator.begin(request("appr-2"));

        coordinator.expire_all("session finished");
        let first = rx.recv().await.expect("first expiry");
        let second = rx.recv().await.expect("second expiry");
        assert_eq!(first.status, ApprovalStatus::Expired);
        assert_eq!(second.status, ApprovalStatus::Expired);
        assert_eq!(first.reason.as_deref(), Some("session finished"));
        assert!(coordinator.outstanding().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_request_id_is_ignored() {
        let config = EngineConfig::default();
        let (coordinator, _rx) = ApprovalCoordinator::new(&config);
        coordinator.begin(request("appr-1"));
        let mut duplicate = request("appr-1");
        duplicate.command = "something else".to_string();
        coordinator.begin(duplicate);

        let outstanding = coordinator.outstanding();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].command, "kubectl delete pod web-0");
    }
}
