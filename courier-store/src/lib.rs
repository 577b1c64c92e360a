//! # courier-store
//!
//! The synchronization store: the transactional, lock-guarded component
//! owning contacts, subscriptions, ratings, transports and messages.
//!
//! ## Concurrency model
//!
//! Multiple threads (typically one per active connection) call into
//! [`SyncStore`] concurrently. Six coarse domain locks guard the data
//! categories; they are always acquired in one fixed global order, which is
//! the sole deadlock-avoidance mechanism (see [`DomainLocks`]). No lock is
//! held across network I/O, only across in-memory transaction execution.
//!
//! All mutation is transaction-scoped through the [`Database`] trait; an
//! abort leaves every domain exactly as before the transaction began.
//! Multi-transaction operations ([`SyncStore::generate_bundle`],
//! [`SyncStore::receive_bundle`]) are resumable rather than atomic: a
//! failure aborts only the current transaction, and already-committed steps
//! stay committed, relying on the idempotence of message storage and
//! ack/batch bookkeeping.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod db;
mod error;
mod event;
mod gate;
mod locks;
mod memory;
mod store;

pub use db::{Database, Transaction};
pub use error::{DbError, StoreError};
pub use event::{StoreEvent, StoreListener};
pub use gate::WriteGate;
pub use locks::{Domain, DomainLocks, LockMode, LockSet};
pub use memory::MemoryDatabase;
pub use store::SyncStore;
