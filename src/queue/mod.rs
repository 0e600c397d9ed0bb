//! The queue store contract and its backends.
//!
//! Callers are written against [`QueueStore`] and never need to know which
//! backend holds the items. Delivery is at-least-once: a claimed item stays
//! in the queue until someone deletes it.

pub mod factory;
pub mod memory;

pub use factory::{QueueFactory, QueueSettings};
pub use memory::MemoryQueue;

use crate::error::{Error, Result};
use crate::model::{Item, ItemId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lease applied by [`QueueStore::claim_default`] unless configured otherwise.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Operations every queue backend provides.
///
/// Implementations do their own locking: every method takes `&self` and
/// must be safe to call from many workers at once. In particular the
/// find-and-lease step of [`claim_item`](QueueStore::claim_item) hands a
/// given item to at most one caller per lease.
pub trait QueueStore<T>: Send + Sync {
    /// Name the queue was opened under.
    fn name(&self) -> &str;

    /// Lease used by [`claim_default`](QueueStore::claim_default).
    fn default_lease(&self) -> Duration {
        DEFAULT_LEASE
    }

    /// Add an item and return its id. Payloads are not validated or
    /// deduplicated.
    fn create_item(&self, payload: T) -> Result<ItemId>;

    /// Items currently held, claimed or not.
    fn number_of_items(&self) -> Result<usize>;

    /// Reserve the first eligible item for `lease`.
    ///
    /// `Ok(None)` means nothing is eligible right now; it is not a failure.
    fn claim_item(&self, lease: Duration) -> Result<Option<Item<T>>>;

    /// Claim with the queue's default lease.
    fn claim_default(&self) -> Result<Option<Item<T>>> {
        self.claim_item(self.default_lease())
    }

    /// Give a claimed item back so another worker can take it.
    ///
    /// `Ok(false)` if the item is gone, was not leased, or has been claimed
    /// again since `item` was handed out.
    fn release_item(&self, item: &Item<T>) -> Result<bool>;

    /// Remove an item whatever its lease state.
    ///
    /// `Ok(false)` if there was nothing to remove.
    fn delete_item(&self, item: &Item<T>) -> Result<bool>;

    /// Provision whatever backing structure the store needs.
    fn create_queue(&self) -> Result<()>;

    /// Drop every item and restart id numbering in a new epoch.
    fn delete_queue(&self) -> Result<()>;
}

/// Which leases `claim_item` may take over.
///
/// Expiry is only ever checked lazily, during a claim scan. There is no
/// reaper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeasePolicy {
    /// Unclaimed items and items whose lease has run out are eligible, so a
    /// crashed worker's item comes back once its lease lapses.
    #[default]
    ReclaimExpired,
    /// Only unclaimed items are eligible. An item whose worker died stays
    /// claimed until someone releases or deletes it. Fine for work queued
    /// and drained within one process lifetime; not for long-running use.
    HoldUntilReleased,
}

impl std::fmt::Display for LeasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LeasePolicy::ReclaimExpired => "reclaim_expired",
            LeasePolicy::HoldUntilReleased => "hold_until_released",
        };
        write!(f, "{s}")
    }
}

/// Reject leases that could never hold an item.
pub fn validate_lease(lease: Duration) -> Result<Duration> {
    if lease.is_zero() {
        return Err(Error::InvalidLease("lease must be longer than zero".to_string()));
    }
    Ok(lease)
}

/// Convert a signed second count (from env or CLI) into a lease.
pub fn lease_from_secs(secs: i64) -> Result<Duration> {
    if secs <= 0 {
        return Err(Error::InvalidLease(format!(
            "lease must be a positive number of seconds, got {secs}"
        )));
    }
    Ok(Duration::from_secs(secs as u64))
}
