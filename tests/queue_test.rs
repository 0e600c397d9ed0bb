//! Integration tests for the in-memory queue.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use workq::clock::{Clock, ManualClock};
use workq::error::Error;
use workq::model::{ItemId, Lease};
use workq::queue::{LeasePolicy, MemoryQueue, QueueStore};

const LEASE: Duration = Duration::from_secs(30);

fn test_queue() -> MemoryQueue<String> {
    MemoryQueue::new("test")
}

fn queue_with_clock(policy: LeasePolicy) -> (MemoryQueue<String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::default());
    let queue = MemoryQueue::new("clocked")
        .with_clock(clock.clone())
        .with_policy(policy);
    (queue, clock)
}

// ---------------------------------------------------------------------------
// Creation and counting
// ---------------------------------------------------------------------------

#[test]
fn ids_are_sequential_from_zero() {
    let queue = test_queue();

    let ids: Vec<ItemId> = (0..5)
        .map(|n| queue.create_item(format!("item-{n}")).unwrap())
        .collect();

    assert_eq!(ids, (0..5).map(ItemId).collect::<Vec<_>>());
}

#[test]
fn ids_are_not_reused_after_delete() {
    let queue = test_queue();
    queue.create_item("a".into()).unwrap();
    let item = queue.claim_item(LEASE).unwrap().unwrap();
    assert!(queue.delete_item(&item).unwrap());

    let next = queue.create_item("b".into()).unwrap();
    assert_eq!(next, ItemId(1));
}

#[test]
fn count_includes_claimed_items() {
    let queue = test_queue();
    for n in 0..4 {
        queue.create_item(n.to_string()).unwrap();
    }
    assert_eq!(queue.number_of_items().unwrap(), 4);

    queue.claim_item(LEASE).unwrap().unwrap();
    queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(queue.number_of_items().unwrap(), 4);
}

#[test]
fn duplicate_payloads_are_separate_items() {
    let queue = test_queue();
    let a = queue.create_item("same".into()).unwrap();
    let b = queue.create_item("same".into()).unwrap();
    assert_ne!(a, b);
    assert_eq!(queue.number_of_items().unwrap(), 2);
}

// ---------------------------------------------------------------------------
// Claiming
// ---------------------------------------------------------------------------

#[test]
fn claim_on_empty_queue_returns_none() {
    let queue = test_queue();
    assert!(queue.claim_item(LEASE).unwrap().is_none());
}

#[test]
fn claim_sets_lease_from_clock() {
    let (queue, clock) = queue_with_clock(LeasePolicy::ReclaimExpired);
    let created = clock.now();
    queue.create_item("payload".into()).unwrap();

    let item = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(item.payload, "payload");
    assert_eq!(item.created_at, created);
    assert_eq!(
        item.lease,
        Lease::Leased {
            expires_at: created + chrono::Duration::seconds(30)
        }
    );
    assert_eq!(item.claims, 1);
}

#[test]
fn claimed_item_is_not_handed_out_twice() {
    let queue = test_queue();
    queue.create_item("only".into()).unwrap();

    assert!(queue.claim_item(LEASE).unwrap().is_some());
    assert!(queue.claim_item(LEASE).unwrap().is_none());
}

#[test]
fn claim_default_uses_configured_lease() {
    let clock = Arc::new(ManualClock::default());
    let queue: MemoryQueue<String> = MemoryQueue::new("short")
        .with_clock(clock.clone())
        .with_default_lease(Duration::from_secs(5));
    queue.create_item("x".into()).unwrap();

    let item = queue.claim_default().unwrap().unwrap();
    assert_eq!(
        item.lease.expires_at(),
        Some(clock.now() + chrono::Duration::seconds(5))
    );
}

#[test]
fn zero_lease_is_rejected() {
    let queue = test_queue();
    queue.create_item("x".into()).unwrap();

    let result = queue.claim_item(Duration::ZERO);
    assert!(matches!(result, Err(Error::InvalidLease(_))));
    // Nothing was leased by the failed call.
    assert!(queue.claim_item(LEASE).unwrap().is_some());
}

#[test]
fn concurrent_claimers_get_one_item_once() {
    const CLAIMERS: usize = 16;
    let queue = Arc::new(test_queue());
    queue.create_item("contended".into()).unwrap();
    let barrier = Arc::new(Barrier::new(CLAIMERS));

    let handles: Vec<_> = (0..CLAIMERS)
        .map(|_| {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                queue.claim_item(LEASE).unwrap()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    assert_eq!(results.iter().filter(|r| r.is_none()).count(), CLAIMERS - 1);
}

#[test]
fn concurrent_claimers_split_many_items_without_overlap() {
    let queue = Arc::new(test_queue());
    for n in 0..200 {
        queue.create_item(n.to_string()).unwrap();
    }

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(item) = queue.claim_item(LEASE).unwrap() {
                    mine.push(item.id);
                }
                mine
            })
        })
        .collect();

    let mut all: Vec<ItemId> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    all.sort();
    assert_eq!(all, (0..200).map(ItemId).collect::<Vec<_>>());
}

// ---------------------------------------------------------------------------
// Release and delete
// ---------------------------------------------------------------------------

#[test]
fn release_then_claim_returns_same_item() {
    let queue = test_queue();
    queue.create_item("a".into()).unwrap();
    queue.create_item("b".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    assert!(queue.release_item(&first).unwrap());

    let again = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(again.id, first.id);
    assert_eq!(again.payload, "a");
}

#[test]
fn release_of_unclaimed_item_reports_false() {
    let queue = test_queue();
    queue.create_item("a".into()).unwrap();
    let item = queue.claim_item(LEASE).unwrap().unwrap();

    assert!(queue.release_item(&item).unwrap());
    assert!(!queue.release_item(&item).unwrap());
}

#[test]
fn operations_after_delete_report_not_found() {
    let queue = test_queue();
    queue.create_item("a".into()).unwrap();
    let item = queue.claim_item(LEASE).unwrap().unwrap();

    assert!(queue.delete_item(&item).unwrap());
    assert!(!queue.release_item(&item).unwrap());
    assert!(!queue.delete_item(&item).unwrap());
    assert_eq!(queue.number_of_items().unwrap(), 0);
}

#[test]
fn delete_ignores_lease_state() {
    let queue = test_queue();
    queue.create_item("leased".into()).unwrap();
    queue.create_item("idle".into()).unwrap();
    let leased = queue.claim_item(LEASE).unwrap().unwrap();
    let mut idle = leased.clone();
    idle.id = ItemId(1);

    assert!(queue.delete_item(&leased).unwrap());
    assert!(queue.delete_item(&idle).unwrap());
    assert_eq!(queue.number_of_items().unwrap(), 0);
}

#[test]
fn released_item_keeps_its_original_slot() {
    let queue = test_queue();
    let a = queue.create_item("A".into()).unwrap();
    let b = queue.create_item("B".into()).unwrap();
    let c = queue.create_item("C".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(first.id, a);
    assert!(queue.release_item(&first).unwrap());

    let again = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(again.id, a);

    let mut handle_b = again.clone();
    handle_b.id = b;
    assert!(queue.delete_item(&handle_b).unwrap());
    assert_eq!(queue.number_of_items().unwrap(), 2);

    let next = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(next.id, c);
}

// ---------------------------------------------------------------------------
// Lease expiry
// ---------------------------------------------------------------------------

#[test]
fn expired_lease_is_reclaimed_by_default() {
    let (queue, clock) = queue_with_clock(LeasePolicy::ReclaimExpired);
    queue.create_item("crashy".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    clock.advance(Duration::from_secs(29));
    assert!(queue.claim_item(LEASE).unwrap().is_none());

    clock.advance(Duration::from_secs(1));
    let second = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.claims, 2);
}

#[test]
fn expired_lease_is_held_under_hold_policy() {
    let (queue, clock) = queue_with_clock(LeasePolicy::HoldUntilReleased);
    queue.create_item("stuck".into()).unwrap();

    let item = queue.claim_item(LEASE).unwrap().unwrap();
    clock.advance(Duration::from_secs(3600));
    assert!(queue.claim_item(LEASE).unwrap().is_none());

    assert!(queue.release_item(&item).unwrap());
    assert!(queue.claim_item(LEASE).unwrap().is_some());
}

#[test]
fn release_clears_an_expired_lease_too() {
    let (queue, clock) = queue_with_clock(LeasePolicy::HoldUntilReleased);
    queue.create_item("late".into()).unwrap();
    let item = queue.claim_item(LEASE).unwrap().unwrap();

    clock.advance(Duration::from_secs(60));
    assert!(queue.release_item(&item).unwrap());
}

#[test]
fn stale_holder_cannot_release_after_takeover() {
    let (queue, clock) = queue_with_clock(LeasePolicy::ReclaimExpired);
    queue.create_item("contested".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    clock.advance(Duration::from_secs(31));
    let second = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.claims, 2);

    // The first holder's lease is gone; its release must not free the item.
    assert!(!queue.release_item(&first).unwrap());
    assert!(queue.claim_item(LEASE).unwrap().is_none());

    assert!(queue.release_item(&second).unwrap());
    assert!(queue.claim_item(LEASE).unwrap().is_some());
}

#[test]
fn stale_holder_cannot_release_after_reclaim_under_hold_policy() {
    let (queue, _clock) = queue_with_clock(LeasePolicy::HoldUntilReleased);
    queue.create_item("handed-on".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    assert!(queue.release_item(&first).unwrap());
    let second = queue.claim_item(LEASE).unwrap().unwrap();
    assert_eq!(second.claims, 2);

    assert!(!queue.release_item(&first).unwrap());
    assert!(queue.claim_item(LEASE).unwrap().is_none());
    assert!(queue.release_item(&second).unwrap());
}

#[test]
fn stale_holder_can_still_delete_after_takeover() {
    // Delete removes by id whatever the lease state: the first holder may
    // well have finished the work before the lease ran out.
    let (queue, clock) = queue_with_clock(LeasePolicy::ReclaimExpired);
    queue.create_item("finished-late".into()).unwrap();

    let first = queue.claim_item(LEASE).unwrap().unwrap();
    clock.advance(Duration::from_secs(31));
    let second = queue.claim_item(LEASE).unwrap().unwrap();

    assert!(queue.delete_item(&first).unwrap());
    assert_eq!(queue.number_of_items().unwrap(), 0);
    assert!(!queue.release_item(&second).unwrap());
    assert!(!queue.delete_item(&second).unwrap());
}

// ---------------------------------------------------------------------------
// Queue lifecycle
// ---------------------------------------------------------------------------

#[test]
fn create_queue_is_a_no_op() {
    let queue = test_queue();
    queue.create_item("kept".into()).unwrap();
    queue.create_queue().unwrap();
    assert_eq!(queue.number_of_items().unwrap(), 1);
}

#[test]
fn delete_queue_empties_and_restarts_ids() {
    let queue = test_queue();
    for n in 0..3 {
        queue.create_item(n.to_string()).unwrap();
    }
    let epoch = queue.epoch();

    queue.delete_queue().unwrap();
    assert_eq!(queue.number_of_items().unwrap(), 0);
    assert!(queue.claim_item(LEASE).unwrap().is_none());
    assert_eq!(queue.epoch(), epoch + 1);

    assert_eq!(queue.create_item("fresh".into()).unwrap(), ItemId(0));
}

#[test]
fn handles_from_before_delete_queue_are_stale() {
    let queue = test_queue();
    queue.create_item("old".into()).unwrap();
    let old = queue.claim_item(LEASE).unwrap().unwrap();

    queue.delete_queue().unwrap();
    queue.create_item("new".into()).unwrap();

    assert!(!queue.delete_item(&old).unwrap());
    assert_eq!(queue.number_of_items().unwrap(), 1);
}

// ---------------------------------------------------------------------------
// Contract usable through a trait object
// ---------------------------------------------------------------------------

#[test]
fn store_works_behind_dyn_trait() {
    let store: Arc<dyn QueueStore<String>> = Arc::new(test_queue());
    assert_eq!(store.name(), "test");

    let id = store.create_item("via dyn".into()).unwrap();
    let item = store.claim_default().unwrap().unwrap();
    assert_eq!(item.id, id);
    assert!(store.delete_item(&item).unwrap());
    assert_eq!(store.number_of_items().unwrap(), 0);
}
