//! Request/response correlation across the isolation boundary.
//!
//! Every outbound request gets a fresh [`CorrelationId`] and an entry in the
//! [`Correlator`]'s pending table. A tagged response resolves the matching
//! entry; anything that does not match an entry is dropped. Entries whose
//! deadline passes are removed and rejected with
//! [`RuntimeError::RequestTimeout`].
//!
//! ```text
//!  register ──▶ pending[id] ──┬── resolve(reply)     ──▶ Ok / Err(remote)
//!                             ├── expire(now)        ──▶ Err(RequestTimeout)
//!                             └── reject_all(reason) ──▶ Err(Disposed)
//! ```
//!
//! The correlator is a plain state machine with no timers of its own. Its
//! owner sleeps until [`Correlator::next_deadline`] and calls
//! [`Correlator::expire`].

use std::collections::BTreeMap;
use std::time::Duration;

use blockframe_protocol::{CorrelationId, Reply, RequestKind};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{Result, RuntimeError};

/// Timeout classes for outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestCategory {
    /// Brokered provider reads.
    Data,
    /// Key/value get/set/delete.
    Storage,
    /// Content and metadata writes. These wait on a human.
    Mutation,
}

impl RequestCategory {
    pub fn of(kind: RequestKind) -> Self {
        match kind {
            RequestKind::GithubData => RequestCategory::Data,
            RequestKind::StoreGet | RequestKind::StoreSet | RequestKind::StoreDelete => {
                RequestCategory::Storage
            }
            RequestKind::UpdateMetadata | RequestKind::UpdateFile => RequestCategory::Mutation,
        }
    }
}

/// One timeout per [`RequestCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub data: Duration,
    pub storage: Duration,
    pub mutation: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            data: Duration::from_secs(10),
            storage: Duration::from_secs(10),
            mutation: Duration::from_secs(5 * 60),
        }
    }
}

impl TimeoutPolicy {
    pub fn for_category(&self, category: RequestCategory) -> Duration {
        match category {
            RequestCategory::Data => self.data,
            RequestCategory::Storage => self.storage,
            RequestCategory::Mutation => self.mutation,
        }
    }
}

/// Where a settled request's outcome is delivered.
pub type ReplySender = oneshot::Sender<Result<Value>>;

/// An outstanding request.
#[derive(Debug)]
pub struct PendingRequest {
    pub id: CorrelationId,
    pub kind: RequestKind,
    pub category: RequestCategory,
    pub created_at: Instant,
    pub deadline: Instant,
    reply: ReplySender,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value>) {
        // The caller may have stopped waiting; that is not an error here.
        let _ = self.reply.send(outcome);
    }
}

/// Outcome of feeding a response into the correlator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The pending request was settled.
    Settled,
    /// No request is pending under that id: late, duplicate or foreign.
    Unknown,
    /// A request is pending under that id but for a different kind.
    KindMismatch,
}

/// The pending-request table.
#[derive(Debug)]
pub struct Correlator {
    next_id: u64,
    policy: TimeoutPolicy,
    pending: BTreeMap<CorrelationId, PendingRequest>,
}

impl Correlator {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            next_id: 1,
            policy,
            pending: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Allocate an id and record a pending request for it.
    ///
    /// Ids increase monotonically and are never reused.
    pub fn register(&mut self, kind: RequestKind, reply: ReplySender) -> CorrelationId {
        let id = CorrelationId::new(self.next_id);
        self.next_id += 1;

        let category = RequestCategory::of(kind);
        let created_at = Instant::now();
        let deadline = created_at + self.policy.for_category(category);
        self.pending.insert(
            id,
            PendingRequest {
                id,
                kind,
                category,
                created_at,
                deadline,
                reply,
            },
        );
        id
    }

    /// Settle the request a response belongs to.
    pub fn resolve(&mut self, kind: RequestKind, reply: Reply) -> Resolution {
        let id = reply.request_id;
        match self.pending.get(&id) {
            None => {
                tracing::warn!(request_id = %id, ?kind, "dropping response with no pending request");
                return Resolution::Unknown;
            }
            Some(pending) if pending.kind != kind => {
                tracing::warn!(
                    request_id = %id,
                    expected = ?pending.kind,
                    got = ?kind,
                    "dropping response of the wrong kind"
                );
                return Resolution::KindMismatch;
            }
            Some(_) => {}
        }

        if let Some(pending) = self.pending.remove(&id) {
            pending.settle(reply.into_result().map_err(RuntimeError::from));
        }
        Resolution::Settled
    }

    /// Reject one pending request. Returns whether it existed.
    pub fn reject(&mut self, id: CorrelationId, error: RuntimeError) -> bool {
        match self.pending.remove(&id) {
            Some(pending) => {
                pending.settle(Err(error));
                true
            }
            None => false,
        }
    }

    /// Remove and reject every request whose deadline is at or before `now`.
    pub fn expire(&mut self, now: Instant) -> Vec<CorrelationId> {
        let expired: Vec<CorrelationId> = self
            .pending
            .values()
            .filter(|pending| pending.deadline <= now)
            .map(|pending| pending.id)
            .collect();

        for id in &expired {
            if let Some(pending) = self.pending.remove(id) {
                tracing::debug!(request_id = %id, kind = ?pending.kind, "request timed out");
                let after = pending.deadline - pending.created_at;
                pending.settle(Err(RuntimeError::RequestTimeout { id: *id, after }));
            }
        }
        expired
    }

    /// Reject everything still pending, e.g. when the channel closes.
    pub fn reject_all(&mut self, reason: impl Fn() -> RuntimeError) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for (_, request) in pending {
            request.settle(Err(reason()));
        }
        count
    }

    /// Earliest deadline among pending requests.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|pending| pending.deadline).min()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn get(&self, id: CorrelationId) -> Option<&PendingRequest> {
        self.pending.get(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new(TimeoutPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blockframe_protocol::{ErrorKind, RemoteError};
    use serde_json::json;
    use std::collections::HashSet;

    fn register(
        correlator: &mut Correlator,
        kind: RequestKind,
    ) -> (CorrelationId, oneshot::Receiver<Result<Value>>) {
        let (tx, rx) = oneshot::channel();
        (correlator.register(kind, tx), rx)
    }

    #[tokio::test]
    async fn ids_are_unique_and_monotonic() {
        let mut correlator = Correlator::default();
        let mut seen = HashSet::new();
        let mut last = 0;
        for _ in 0..100 {
            let (id, _rx) = register(&mut correlator, RequestKind::StoreGet);
            assert!(seen.insert(id));
            assert!(id.value() > last);
            last = id.value();
        }
        assert_eq!(correlator.len(), 100);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_settling() {
        let mut correlator = Correlator::default();
        let (first, _rx) = register(&mut correlator, RequestKind::StoreGet);
        correlator.resolve(RequestKind::StoreGet, Reply::ok(first, json!(1)));
        let (second, _rx) = register(&mut correlator, RequestKind::StoreGet);
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn response_resolves_exactly_once() {
        let mut correlator = Correlator::default();
        let (id, rx) = register(&mut correlator, RequestKind::GithubData);

        let reply = Reply::ok(id, json!({"stars": 3}));
        assert_eq!(
            correlator.resolve(RequestKind::GithubData, reply.clone()),
            Resolution::Settled
        );
        assert_eq!(rx.await.unwrap().unwrap(), json!({"stars": 3}));

        assert_eq!(
            correlator.resolve(RequestKind::GithubData, reply),
            Resolution::Unknown
        );
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn error_field_rejects_with_kind() {
        let mut correlator = Correlator::default();
        let (id, rx) = register(&mut correlator, RequestKind::UpdateFile);
        let remote = RemoteError::new(ErrorKind::StaleBaseRevision, "sha mismatch");
        correlator.resolve(RequestKind::UpdateFile, Reply::err(id, remote));

        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StaleBaseRevision);
        assert_eq!(err.to_string(), "sha mismatch");
    }

    #[tokio::test]
    async fn wrong_kind_leaves_request_pending() {
        let mut correlator = Correlator::default();
        let (id, _rx) = register(&mut correlator, RequestKind::StoreGet);
        assert_eq!(
            correlator.resolve(RequestKind::StoreSet, Reply::ok(id, Value::Null)),
            Resolution::KindMismatch
        );
        assert!(correlator.contains(id));
    }

    #[tokio::test]
    async fn out_of_order_responses_match_by_id() {
        let mut correlator = Correlator::default();
        let (slow, slow_rx) = register(&mut correlator, RequestKind::GithubData);
        let (fast, fast_rx) = register(&mut correlator, RequestKind::StoreGet);

        correlator.resolve(RequestKind::StoreGet, Reply::ok(fast, json!("fast")));
        correlator.resolve(RequestKind::GithubData, Reply::ok(slow, json!("slow")));

        assert_eq!(fast_rx.await.unwrap().unwrap(), json!("fast"));
        assert_eq!(slow_rx.await.unwrap().unwrap(), json!("slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_entry_and_rejects() {
        let mut correlator = Correlator::default();
        let (data, data_rx) = register(&mut correlator, RequestKind::GithubData);
        let (mutation, _mutation_rx) = register(&mut correlator, RequestKind::UpdateFile);

        assert_eq!(
            correlator.next_deadline(),
            Some(correlator.get(data).unwrap().deadline)
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(correlator.expire(Instant::now()), vec![data]);
        assert!(!correlator.contains(data));
        assert!(correlator.contains(mutation));

        let err = data_rx.await.unwrap().unwrap_err();
        assert!(matches!(err, RuntimeError::RequestTimeout { id, .. } if id == data));

        // A late response is dropped.
        assert_eq!(
            correlator.resolve(RequestKind::GithubData, Reply::ok(data, json!(1))),
            Resolution::Unknown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn categories_use_their_own_windows() {
        let mut correlator = Correlator::default();
        let (_, _a) = register(&mut correlator, RequestKind::StoreSet);
        let (mutation, _b) = register(&mut correlator, RequestKind::UpdateMetadata);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(correlator.expire(Instant::now()).len(), 1);
        assert!(correlator.contains(mutation));

        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        assert_eq!(correlator.expire(Instant::now()), vec![mutation]);
        assert!(correlator.is_empty());
    }

    #[tokio::test]
    async fn reject_all_settles_everything() {
        let mut correlator = Correlator::default();
        let (_, a) = register(&mut correlator, RequestKind::StoreGet);
        let (_, b) = register(&mut correlator, RequestKind::UpdateFile);

        assert_eq!(correlator.reject_all(|| RuntimeError::Disposed), 2);
        assert!(correlator.is_empty());
        assert!(matches!(a.await.unwrap(), Err(RuntimeError::Disposed)));
        assert!(matches!(b.await.unwrap(), Err(RuntimeError::Disposed)));
    }

    #[test]
    fn category_mapping() {
        assert_eq!(
            RequestCategory::of(RequestKind::StoreDelete),
            RequestCategory::Storage
        );
        assert_eq!(
            RequestCategory::of(RequestKind::UpdateFile),
            RequestCategory::Mutation
        );
        assert_eq!(
            TimeoutPolicy::default().for_category(RequestCategory::Mutation),
            Duration::from_secs(300)
        );
    }
}
