use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::record::{JobRecord, SessionId};

/// Logical record namespace within the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Queue {
    /// Primary cracking jobs.
    Jobs,
    /// Speed-check probe jobs.
    SpeedCheck,
}

/// Record store failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An unexpired lease is already held by another session.
    #[error("lease for {queue:?} already held by {owner}")]
    LeaseHeld {
        /// Queue the lease guards.
        queue: Queue,
        /// Current lease owner.
        owner: SessionId,
    },
    /// Payload could not be encoded or decoded.
    #[error("record serialization: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Underlying backend failure.
    #[error("store backend: {0}")]
    Backend(String),
}

/// An explicit activity lease: who currently runs GPU-bound work on a
/// queue, and until when.
///
/// Replaces inferring activity from broker registry membership; the
/// single-active-job invariant is testable against this record alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Session holding the lease.
    pub owner: SessionId,
    /// Instant after which the lease no longer counts as active.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Whether the lease is still active at `now`.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Narrow interface to the shared mutable record store.
///
/// Reads and writes are not atomic with respect to other writers; callers
/// rely on idempotent merges and last-writer-wins per field. Keeping the
/// surface this small lets a transactional backend be substituted without
/// touching the state machine.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record by session id, `None` when absent.
    async fn fetch(&self, queue: Queue, id: &SessionId) -> Result<Option<JobRecord>, StoreError>;

    /// Write a record back, replacing any previous value.
    async fn save(&self, queue: Queue, record: &JobRecord) -> Result<(), StoreError>;

    /// Remove a record outright. Only the derived speed-check record is
    /// ever deleted by the core; primary deletion is a control state.
    async fn delete(&self, queue: Queue, id: &SessionId) -> Result<(), StoreError>;

    /// Claim the activity lease for a queue.
    async fn acquire_lease(
        &self,
        queue: Queue,
        owner: &SessionId,
        ttl: Duration,
    ) -> Result<Lease, StoreError>;

    /// Release the lease if `owner` still holds it.
    async fn release_lease(&self, queue: Queue, owner: &SessionId) -> Result<(), StoreError>;

    /// The currently active (unexpired) lease for a queue, if any.
    async fn active_lease(&self, queue: Queue) -> Result<Option<Lease>, StoreError>;
}

#[derive(Default)]
struct MemoryInner {
    records: HashMap<(Queue, String), JobRecord>,
    leases: HashMap<Queue, Lease>,
}

/// In-process store used by tests and single-node deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn fetch(&self, queue: Queue, id: &SessionId) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .lock()
            .records
            .get(&(queue, id.as_str().to_string()))
            .cloned())
    }

    async fn save(&self, queue: Queue, record: &JobRecord) -> Result<(), StoreError> {
        self.lock().records.insert(
            (queue, record.session_id.as_str().to_string()),
            record.clone(),
        );
        Ok(())
    }

    async fn delete(&self, queue: Queue, id: &SessionId) -> Result<(), StoreError> {
        self.lock().records.remove(&(queue, id.as_str().to_string()));
        Ok(())
    }

    async fn acquire_lease(
        &self,
        queue: Queue,
        owner: &SessionId,
        ttl: Duration,
    ) -> Result<Lease, StoreError> {
        let now = Utc::now();
        let mut inner = self.lock();
        if let Some(held) = inner.leases.get(&queue) {
            if held.owner != *owner && held.is_active(now) {
                return Err(StoreError::LeaseHeld {
                    queue,
                    owner: held.owner.clone(),
                });
            }
        }
        let lease = Lease {
            owner: owner.clone(),
            expires_at: now
                + chrono::Duration::from_std(ttl)
                    .map_err(|err| StoreError::Backend(err.to_string()))?,
        };
        inner.leases.insert(queue, lease.clone());
        Ok(lease)
    }

    async fn release_lease(&self, queue: Queue, owner: &SessionId) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner
            .leases
            .get(&queue)
            .is_some_and(|lease| lease.owner == *owner)
        {
            inner.leases.remove(&queue);
        }
        Ok(())
    }

    async fn active_lease(&self, queue: Queue) -> Result<Option<Lease>, StoreError> {
        let now = Utc::now();
        Ok(self
            .lock()
            .leases
            .get(&queue)
            .filter(|lease| lease.is_active(now))
            .cloned())
    }
}
