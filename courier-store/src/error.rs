//! Error types for the synchronization store.

use courier_types::{ContactId, MessageId};
use thiserror::Error;

/// Errors from the underlying transactional storage layer.
///
/// A `DbError` always aborts the enclosing transaction.
#[derive(Debug, Error)]
pub enum DbError {
    /// A message referenced by id is not in the store.
    #[error("no such message: {0}")]
    NoSuchMessage(MessageId),

    /// The storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),
}

/// Errors reported by [`SyncStore`](crate::SyncStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The contact was removed, possibly concurrently with the operation.
    ///
    /// Contact existence is re-checked before every phase of a multi-phase
    /// operation, since locks are released between phases.
    #[error("no such contact: {0}")]
    NoSuchContact(ContactId),

    /// The underlying transaction layer failed; the current transaction was
    /// aborted and any previously committed steps remain committed.
    #[error("storage failure")]
    Storage(#[from] DbError),
}
