//! The domain lock manager.
//!
//! Six read-write locks guard the store's data domains. Locks must always
//! be acquired in increasing ordinal order; [`DomainLocks::acquire`] asserts
//! this at runtime using a per-thread high-water mark, so an out-of-order
//! acquisition (even across nested lock sets) panics immediately instead of
//! deadlocking some day in production.

use std::cell::Cell;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// One of the six data domains guarded by a lock.
///
/// The discriminants are the fixed global acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Domain {
    /// Contact records.
    Contacts = 0,
    /// Message contents.
    Messages = 1,
    /// Per-contact message status: outstanding batches, acks owed, the
    /// received-bundle ledger.
    MessageStatus = 2,
    /// Per-author trust ratings.
    Ratings = 3,
    /// Local and per-contact subscriptions.
    Subscriptions = 4,
    /// Local and per-contact transport configuration.
    Transports = 5,
}

impl Domain {
    const COUNT: usize = 6;

    fn ordinal(self) -> i8 {
        self as i8
    }
}

/// Whether a domain is being inspected or mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock; may proceed concurrently with other readers.
    Read,
    /// Exclusive lock.
    Write,
}

thread_local! {
    /// Highest ordinal currently locked by this thread, -1 if none.
    static MAX_HELD: Cell<i8> = const { Cell::new(-1) };
}

enum Guard<'a> {
    Read(RwLockReadGuard<'a, ()>),
    Write(RwLockWriteGuard<'a, ()>),
}

/// A set of domain locks released together on drop.
///
/// Lock sets must be released in reverse acquisition order (which scoped
/// guards give for free); releasing an outer set while an inner one is
/// still held is checked in debug builds.
pub struct LockSet<'a> {
    #[allow(dead_code)] // Held purely for its drop behaviour
    guards: Vec<Guard<'a>>,
    prev_max: i8,
    last: i8,
}

impl Drop for LockSet<'_> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            debug_assert_eq!(
                MAX_HELD.with(Cell::get),
                self.last,
                "lock sets released out of order"
            );
        }
        MAX_HELD.with(|max| max.set(self.prev_max));
    }
}

/// The six domain locks.
#[derive(Default)]
pub struct DomainLocks {
    locks: [RwLock<()>; Domain::COUNT],
}

impl DomainLocks {
    /// Create a fresh set of unlocked domains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the requested domains, in order, as one scoped guard.
    ///
    /// # Panics
    ///
    /// Panics if the requests are not in strictly increasing ordinal order,
    /// or if any requested ordinal is not greater than every domain this
    /// thread already holds. Both are programming errors that would make
    /// the fixed global acquisition order unsound.
    pub fn acquire(&self, requests: &[(Domain, LockMode)]) -> LockSet<'_> {
        assert!(!requests.is_empty(), "empty lock request");
        let prev_max = MAX_HELD.with(Cell::get);
        let mut last = prev_max;
        let mut guards = Vec::with_capacity(requests.len());
        for &(domain, mode) in requests {
            let ordinal = domain.ordinal();
            assert!(
                ordinal > last,
                "lock order violation: {domain:?} (ordinal {ordinal}) acquired \
                 while holding ordinal {last}"
            );
            let lock = &self.locks[ordinal as usize];
            let guard = match mode {
                LockMode::Read => {
                    Guard::Read(lock.read().unwrap_or_else(|e| e.into_inner()))
                }
                LockMode::Write => {
                    Guard::Write(lock.write().unwrap_or_else(|e| e.into_inner()))
                }
            };
            guards.push(guard);
            last = ordinal;
        }
        MAX_HELD.with(|max| max.set(last));
        LockSet {
            guards,
            prev_max,
            last,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn in_order_acquisition_succeeds() {
        let locks = DomainLocks::new();
        let _set = locks.acquire(&[
            (Domain::Contacts, LockMode::Read),
            (Domain::Messages, LockMode::Write),
            (Domain::Transports, LockMode::Read),
        ]);
    }

    #[test]
    fn nested_acquisition_of_higher_ordinals_succeeds() {
        let locks = DomainLocks::new();
        let _outer = locks.acquire(&[
            (Domain::Contacts, LockMode::Read),
            (Domain::Messages, LockMode::Read),
        ]);
        let inner = locks.acquire(&[(Domain::MessageStatus, LockMode::Write)]);
        drop(inner);
        // After the inner set is released, MessageStatus may be retaken
        let _again = locks.acquire(&[(Domain::MessageStatus, LockMode::Read)]);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn out_of_order_acquisition_panics() {
        let locks = DomainLocks::new();
        let _set = locks.acquire(&[
            (Domain::Messages, LockMode::Read),
            (Domain::Contacts, LockMode::Read),
        ]);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn nested_lower_ordinal_panics() {
        let locks = DomainLocks::new();
        let _outer = locks.acquire(&[(Domain::Subscriptions, LockMode::Read)]);
        let _inner = locks.acquire(&[(Domain::Contacts, LockMode::Read)]);
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "lock sets released out of order")]
    fn out_of_order_release_is_detected() {
        let locks = DomainLocks::new();
        let outer = locks.acquire(&[(Domain::Contacts, LockMode::Read)]);
        let _inner = locks.acquire(&[(Domain::Messages, LockMode::Read)]);
        drop(outer);
    }

    #[test]
    fn high_water_mark_is_per_thread() {
        let locks = Arc::new(DomainLocks::new());
        let _set = locks.acquire(&[(Domain::Transports, LockMode::Read)]);
        let locks2 = Arc::clone(&locks);
        // Another thread starts from a clean slate
        thread::spawn(move || {
            let _set = locks2.acquire(&[(Domain::Contacts, LockMode::Read)]);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn readers_do_not_exclude_each_other() {
        let locks = Arc::new(DomainLocks::new());
        let _set = locks.acquire(&[(Domain::Messages, LockMode::Read)]);
        let locks2 = Arc::clone(&locks);
        thread::spawn(move || {
            let _set = locks2.acquire(&[(Domain::Messages, LockMode::Read)]);
        })
        .join()
        .unwrap();
    }
}
