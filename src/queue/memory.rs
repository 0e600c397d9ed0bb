//! In-process queue backend.
//!
//! Items live in memory for the lifetime of the `MemoryQueue` value and are
//! lost with it. Meant for work that is queued and processed inside the same
//! process, where a broker would be overkill.

use super::{DEFAULT_LEASE, LeasePolicy, QueueStore, validate_lease};
use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::model::{Item, ItemId, Lease};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// A queue held entirely in memory.
///
/// One mutex guards the item map and the id counter, so every operation is
/// a single critical section. Claiming is a linear scan in id order, which
/// is fine for the small, short-lived queues this backend is for.
pub struct MemoryQueue<T> {
    name: String,
    clock: Arc<dyn Clock>,
    default_lease: Duration,
    policy: LeasePolicy,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    // Ids are handed out in increasing order, so key order is insertion order.
    items: BTreeMap<ItemId, Item<T>>,
    next_id: u64,
    epoch: u64,
}

impl<T> Inner<T> {
    /// Look up the live item a handle refers to.
    fn resolve_mut(&mut self, handle: &Item<T>) -> Option<&mut Item<T>> {
        if handle.epoch != self.epoch {
            return None;
        }
        self.items.get_mut(&handle.id)
    }

    /// Like `resolve_mut`, but only for the holder of the latest claim. A
    /// handle whose lease was taken over by a later claim no longer owns it.
    fn resolve_lease_mut(&mut self, handle: &Item<T>) -> Option<&mut Item<T>> {
        self.resolve_mut(handle).filter(|live| live.claims == handle.claims)
    }
}

impl<T> MemoryQueue<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clock: Arc::new(SystemClock),
            default_lease: DEFAULT_LEASE,
            policy: LeasePolicy::default(),
            inner: Mutex::new(Inner {
                items: BTreeMap::new(),
                next_id: 0,
                epoch: 0,
            }),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_default_lease(mut self, lease: Duration) -> Self {
        self.default_lease = lease;
        self
    }

    pub fn with_policy(mut self, policy: LeasePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> LeasePolicy {
        self.policy
    }

    /// Current epoch. Starts at 0 and moves on with every `delete_queue`.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    // Every mutation completes before the guard drops, so the state behind a
    // poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }

    fn is_eligible(&self, item: &Item<T>, now: chrono::DateTime<chrono::Utc>) -> bool {
        match self.policy {
            LeasePolicy::ReclaimExpired => !item.is_leased_at(now),
            LeasePolicy::HoldUntilReleased => item.lease.is_unclaimed(),
        }
    }
}

impl<T> std::fmt::Debug for MemoryQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryQueue")
            .field("name", &self.name)
            .field("default_lease", &self.default_lease)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<T> QueueStore<T> for MemoryQueue<T>
where
    T: Clone + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn default_lease(&self) -> Duration {
        self.default_lease
    }

    fn create_item(&self, payload: T) -> Result<ItemId> {
        let mut inner = self.lock();
        let id = ItemId(inner.next_id);
        inner.next_id += 1;
        let item = Item {
            id,
            payload,
            created_at: self.clock.now(),
            lease: Lease::Unclaimed,
            epoch: inner.epoch,
            claims: 0,
        };
        inner.items.insert(id, item);
        drop(inner);

        debug!(queue = %self.name, %id, "item created");
        self.record("create");
        Ok(id)
    }

    fn number_of_items(&self) -> Result<usize> {
        Ok(self.lock().items.len())
    }

    fn claim_item(&self, lease: Duration) -> Result<Option<Item<T>>> {
        let lease = validate_lease(lease)?;
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| Error::InvalidLease(format!("lease out of range: {e}")))?;

        let mut inner = self.lock();
        let now = self.clock.now();
        let expires_at = now
            .checked_add_signed(lease)
            .ok_or_else(|| Error::InvalidLease("lease expiry out of range".to_string()))?;

        let claimed = inner
            .items
            .values_mut()
            .find(|item| self.is_eligible(item, now))
            .map(|item| {
                item.lease = Lease::Leased { expires_at };
                item.claims += 1;
                item.clone()
            });
        drop(inner);

        match claimed {
            Some(ref item) => {
                debug!(
                    queue = %self.name,
                    id = %item.id,
                    claims = item.claims,
                    %expires_at,
                    "item claimed"
                );
                self.record("claim");
            }
            None => self.record("claim_empty"),
        }
        Ok(claimed)
    }

    fn release_item(&self, item: &Item<T>) -> Result<bool> {
        let mut inner = self.lock();
        let released = match inner.resolve_lease_mut(item) {
            Some(live) if !live.lease.is_unclaimed() => {
                live.lease = Lease::Unclaimed;
                true
            }
            _ => false,
        };
        drop(inner);

        debug!(queue = %self.name, id = %item.id, released, "item release");
        self.record("release");
        Ok(released)
    }

    fn delete_item(&self, item: &Item<T>) -> Result<bool> {
        let mut inner = self.lock();
        let deleted = inner.epoch == item.epoch && inner.items.remove(&item.id).is_some();
        drop(inner);

        debug!(queue = %self.name, id = %item.id, deleted, "item delete");
        self.record("delete");
        Ok(deleted)
    }

    fn create_queue(&self) -> Result<()> {
        // Construction already set up empty state.
        self.record("create_queue");
        Ok(())
    }

    fn delete_queue(&self) -> Result<()> {
        let mut inner = self.lock();
        let dropped = inner.items.len();
        inner.items.clear();
        inner.next_id = 0;
        inner.epoch += 1;
        let epoch = inner.epoch;
        drop(inner);

        debug!(queue = %self.name, dropped, epoch, "queue deleted");
        self.record("delete_queue");
        Ok(())
    }
}
