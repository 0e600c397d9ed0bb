//! Core data model.
//!
//! An item is one unit of work: an opaque payload the queue never looks at,
//! an identity, and a lease that says who (if anyone) is working on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// A unit of work held by a queue.
///
/// Returned by value from `claim_item`; the copy doubles as the handle passed
/// back to `release_item` and `delete_item`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item<T> {
    /// Sequential within one queue epoch. Never reused inside that epoch.
    pub id: ItemId,

    /// Caller data. The queue stores it and hands it back, nothing more.
    pub payload: T,

    pub created_at: DateTime<Utc>,

    pub lease: Lease,

    /// Epoch of the queue this item was created in. Handles from an older
    /// epoch never match, even when the numeric id has been handed out again.
    pub epoch: u64,

    /// How many times the item has been claimed.
    pub claims: u32,
}

impl<T> Item<T> {
    /// Is the item currently reserved by someone as of `now`?
    pub fn is_leased_at(&self, now: DateTime<Utc>) -> bool {
        match self.lease {
            Lease::Unclaimed => false,
            Lease::Leased { expires_at } => expires_at > now,
        }
    }
}

/// Newtype for item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Reservation state of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Lease {
    /// Never claimed, or explicitly released.
    Unclaimed,
    /// Claimed; void once `expires_at` has passed.
    Leased { expires_at: DateTime<Utc> },
}

impl Lease {
    pub fn is_unclaimed(self) -> bool {
        matches!(self, Lease::Unclaimed)
    }

    pub fn expires_at(self) -> Option<DateTime<Utc>> {
        match self {
            Lease::Unclaimed => None,
            Lease::Leased { expires_at } => Some(expires_at),
        }
    }
}

impl std::fmt::Display for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lease::Unclaimed => write!(f, "unclaimed"),
            Lease::Leased { expires_at } => write!(f, "leased until {expires_at}"),
        }
    }
}
