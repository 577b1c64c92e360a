//! The transactional storage abstraction consumed by the store.
//!
//! The store treats storage as a transactional key-value layer; on-disk
//! schema and indexing are the backend's business. Every operation below
//! is called with the appropriate domain locks already held by
//! [`SyncStore`](crate::SyncStore) - see the lock sets documented there.

use std::collections::BTreeSet;

use courier_types::{
    AuthorId, BatchId, BundleId, ContactId, GroupId, Message, MessageId, Rating, TransportMap,
};

use crate::error::DbError;

/// A transactional storage backend.
pub trait Database: Send + Sync {
    /// One open transaction.
    type Txn<'a>: Transaction
    where
        Self: 'a;

    /// Begin a transaction.
    ///
    /// Dropping the returned transaction without calling
    /// [`commit`](Transaction::commit) aborts it, leaving all domains
    /// exactly as they were.
    fn begin(&self) -> Result<Self::Txn<'_>, DbError>;
}

/// Operations available inside a transaction.
///
/// All effects become visible atomically on [`commit`](Transaction::commit)
/// and are discarded on drop.
pub trait Transaction {
    /// Commit the transaction.
    fn commit(self) -> Result<(), DbError>
    where
        Self: Sized;

    // Contacts

    /// Add a contact with its initial transport configuration, returning
    /// the assigned id.
    fn add_contact(&mut self, transports: TransportMap) -> Result<ContactId, DbError>;

    /// Whether the contact exists.
    fn contains_contact(&mut self, contact: ContactId) -> Result<bool, DbError>;

    /// All contacts.
    fn get_contacts(&mut self) -> Result<BTreeSet<ContactId>, DbError>;

    /// Remove a contact, cascading to its subscriptions, transports,
    /// outstanding batches, acks owed and received-bundle ledger.
    fn remove_contact(&mut self, contact: ContactId) -> Result<(), DbError>;

    // Subscriptions

    /// Subscribe the local instance to a group.
    fn add_subscription(&mut self, group: GroupId) -> Result<(), DbError>;

    /// Unsubscribe the local instance from a group.
    fn remove_subscription(&mut self, group: GroupId) -> Result<(), DbError>;

    /// Whether the local instance is subscribed to a group.
    fn contains_subscription(&mut self, group: GroupId) -> Result<bool, DbError>;

    /// The local instance's full subscription set.
    fn get_subscriptions(&mut self) -> Result<BTreeSet<GroupId>, DbError>;

    /// Replace the recorded subscription set of a contact.
    fn set_contact_subscriptions(
        &mut self,
        contact: ContactId,
        subs: BTreeSet<GroupId>,
    ) -> Result<(), DbError>;

    // Transports

    /// The local transport configuration.
    fn get_local_transports(&mut self) -> Result<TransportMap, DbError>;

    /// Replace the local transport configuration.
    fn set_local_transports(&mut self, transports: TransportMap) -> Result<(), DbError>;

    /// A contact's recorded transport configuration.
    fn get_contact_transports(&mut self, contact: ContactId) -> Result<TransportMap, DbError>;

    /// Replace a contact's recorded transport configuration.
    fn set_contact_transports(
        &mut self,
        contact: ContactId,
        transports: TransportMap,
    ) -> Result<(), DbError>;

    // Ratings

    /// The rating of an author ([`Rating::Unknown`] if never set).
    fn get_rating(&mut self, author: AuthorId) -> Result<Rating, DbError>;

    /// Set the rating of an author, returning the previous rating.
    fn set_rating(&mut self, author: AuthorId, rating: Rating) -> Result<Rating, DbError>;

    // Messages

    /// Store a message unless it is already present.
    ///
    /// `source` is the contact the message arrived from, or `None` for a
    /// locally generated message. Returns false if the message was already
    /// stored (idempotent).
    fn add_message(&mut self, message: &Message, source: Option<ContactId>)
        -> Result<bool, DbError>;

    /// Retrieve a stored message.
    fn get_message(&mut self, id: MessageId) -> Result<Message, DbError>;

    /// Select sendable messages for a contact, oldest first, whose total
    /// wire size fits within `capacity`.
    ///
    /// A message is sendable iff its author is trusted, the contact is
    /// subscribed to its group, it is not already outstanding to the
    /// contact and the contact is not known to hold it already.
    fn get_sendable_messages(
        &mut self,
        contact: ContactId,
        capacity: usize,
    ) -> Result<Vec<MessageId>, DbError>;

    /// Select the oldest messages totalling at least `target_bytes` of wire
    /// size (or all messages, if fewer).
    fn get_old_messages(&mut self, target_bytes: usize) -> Result<Vec<MessageId>, DbError>;

    /// Remove a message and all its per-contact status.
    fn remove_message(&mut self, id: MessageId) -> Result<(), DbError>;

    // Message status

    /// Record a batch sent to a contact as outstanding (awaiting ack).
    fn add_outstanding_batch(
        &mut self,
        contact: ContactId,
        batch: BatchId,
        sent: BTreeSet<MessageId>,
    ) -> Result<(), DbError>;

    /// Remove an outstanding batch the contact acknowledged, marking its
    /// messages as held by the contact. A no-op for an unknown batch id.
    fn remove_acked_batch(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError>;

    /// Remove an outstanding batch presumed lost, making its messages
    /// eligible for resend. A no-op for an unknown batch id.
    fn remove_lost_batch(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError>;

    /// Drain and return the batch ids owed to a contact as acks.
    fn remove_batches_to_ack(&mut self, contact: ContactId)
        -> Result<BTreeSet<BatchId>, DbError>;

    /// Record a batch id to be acknowledged to a contact in the next
    /// outgoing bundle.
    fn add_batch_to_ack(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError>;

    /// Record a received bundle in the ledger and return the outstanding
    /// batches for this contact that are now considered lost.
    fn add_received_bundle(
        &mut self,
        contact: ContactId,
        bundle: BundleId,
    ) -> Result<BTreeSet<BatchId>, DbError>;
}
