//! In-memory reference database.
//!
//! Transactions are serialized by a mutex and made atomic by keeping an
//! undo copy of the state: dropping a transaction without committing
//! restores the state byte-for-byte. Not persistent - all data is lost
//! when the database is dropped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use courier_types::{
    AuthorId, BatchId, BundleId, ContactId, GroupId, Message, MessageId, Rating, TransportMap,
};

use crate::db::{Database, Transaction};
use crate::error::DbError;

/// How many received bundles may pass over an outstanding batch before it
/// is declared lost. Acks carried by a bundle are processed before the
/// bundle is added to the ledger, so a batch acked by that very bundle is
/// never passed over by it.
const RETRANSMIT_THRESHOLD: u32 = 1;

#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    arrival: u64,
}

#[derive(Debug, Clone, Default)]
struct OutstandingBatch {
    messages: BTreeSet<MessageId>,
    passovers: u32,
}

#[derive(Debug, Clone, Default)]
struct State {
    next_contact: u32,
    next_arrival: u64,
    contacts: BTreeSet<ContactId>,
    local_subs: BTreeSet<GroupId>,
    contact_subs: BTreeMap<ContactId, BTreeSet<GroupId>>,
    local_transports: TransportMap,
    contact_transports: BTreeMap<ContactId, TransportMap>,
    ratings: BTreeMap<AuthorId, Rating>,
    messages: BTreeMap<MessageId, StoredMessage>,
    outstanding: BTreeMap<ContactId, BTreeMap<BatchId, OutstandingBatch>>,
    acks_to_send: BTreeMap<ContactId, BTreeSet<BatchId>>,
    received_bundles: BTreeMap<ContactId, BTreeSet<BundleId>>,
    /// Messages each contact is known to hold (received from them, or in
    /// a batch they acknowledged). Never offered to them again.
    held: BTreeMap<ContactId, BTreeSet<MessageId>>,
}

impl State {
    fn messages_by_arrival(&self) -> Vec<(&MessageId, &StoredMessage)> {
        let mut all: Vec<_> = self.messages.iter().collect();
        all.sort_by_key(|(_, stored)| stored.arrival);
        all
    }
}

/// An in-memory [`Database`].
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<State>,
}

impl MemoryDatabase {
    /// Create an empty database.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Database for MemoryDatabase {
    type Txn<'a> = MemoryTransaction<'a>;

    fn begin(&self) -> Result<Self::Txn<'_>, DbError> {
        let guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let undo = guard.clone();
        Ok(MemoryTransaction {
            guard,
            undo: Some(undo),
        })
    }
}

/// One open transaction on a [`MemoryDatabase`].
pub struct MemoryTransaction<'a> {
    guard: MutexGuard<'a, State>,
    /// Pre-transaction state, restored on drop unless committed.
    undo: Option<State>,
}

impl Drop for MemoryTransaction<'_> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            *self.guard = undo;
        }
    }
}

impl Transaction for MemoryTransaction<'_> {
    fn commit(mut self) -> Result<(), DbError> {
        self.undo = None;
        Ok(())
    }

    fn add_contact(&mut self, transports: TransportMap) -> Result<ContactId, DbError> {
        let contact = ContactId::new(self.guard.next_contact);
        self.guard.next_contact += 1;
        self.guard.contacts.insert(contact);
        self.guard.contact_transports.insert(contact, transports);
        Ok(contact)
    }

    fn contains_contact(&mut self, contact: ContactId) -> Result<bool, DbError> {
        Ok(self.guard.contacts.contains(&contact))
    }

    fn get_contacts(&mut self) -> Result<BTreeSet<ContactId>, DbError> {
        Ok(self.guard.contacts.clone())
    }

    fn remove_contact(&mut self, contact: ContactId) -> Result<(), DbError> {
        let state = &mut *self.guard;
        state.contacts.remove(&contact);
        state.contact_subs.remove(&contact);
        state.contact_transports.remove(&contact);
        state.outstanding.remove(&contact);
        state.acks_to_send.remove(&contact);
        state.received_bundles.remove(&contact);
        state.held.remove(&contact);
        Ok(())
    }

    fn add_subscription(&mut self, group: GroupId) -> Result<(), DbError> {
        self.guard.local_subs.insert(group);
        Ok(())
    }

    fn remove_subscription(&mut self, group: GroupId) -> Result<(), DbError> {
        self.guard.local_subs.remove(&group);
        Ok(())
    }

    fn contains_subscription(&mut self, group: GroupId) -> Result<bool, DbError> {
        Ok(self.guard.local_subs.contains(&group))
    }

    fn get_subscriptions(&mut self) -> Result<BTreeSet<GroupId>, DbError> {
        Ok(self.guard.local_subs.clone())
    }

    fn set_contact_subscriptions(
        &mut self,
        contact: ContactId,
        subs: BTreeSet<GroupId>,
    ) -> Result<(), DbError> {
        self.guard.contact_subs.insert(contact, subs);
        Ok(())
    }

    fn get_local_transports(&mut self) -> Result<TransportMap, DbError> {
        Ok(self.guard.local_transports.clone())
    }

    fn set_local_transports(&mut self, transports: TransportMap) -> Result<(), DbError> {
        self.guard.local_transports = transports;
        Ok(())
    }

    fn get_contact_transports(&mut self, contact: ContactId) -> Result<TransportMap, DbError> {
        Ok(self
            .guard
            .contact_transports
            .get(&contact)
            .cloned()
            .unwrap_or_default())
    }

    fn set_contact_transports(
        &mut self,
        contact: ContactId,
        transports: TransportMap,
    ) -> Result<(), DbError> {
        self.guard.contact_transports.insert(contact, transports);
        Ok(())
    }

    fn get_rating(&mut self, author: AuthorId) -> Result<Rating, DbError> {
        Ok(self.guard.ratings.get(&author).copied().unwrap_or_default())
    }

    fn set_rating(&mut self, author: AuthorId, rating: Rating) -> Result<Rating, DbError> {
        Ok(self
            .guard
            .ratings
            .insert(author, rating)
            .unwrap_or_default())
    }

    fn add_message(
        &mut self,
        message: &Message,
        source: Option<ContactId>,
    ) -> Result<bool, DbError> {
        let id = message.id();
        let state = &mut *self.guard;
        if let Some(contact) = source {
            // The sender holds the message whether or not it is new to us
            state.held.entry(contact).or_default().insert(id);
        }
        if state.messages.contains_key(&id) {
            return Ok(false);
        }
        let arrival = state.next_arrival;
        state.next_arrival += 1;
        state.messages.insert(
            id,
            StoredMessage {
                message: message.clone(),
                arrival,
            },
        );
        Ok(true)
    }

    fn get_message(&mut self, id: MessageId) -> Result<Message, DbError> {
        self.guard
            .messages
            .get(&id)
            .map(|stored| stored.message.clone())
            .ok_or(DbError::NoSuchMessage(id))
    }

    fn get_sendable_messages(
        &mut self,
        contact: ContactId,
        capacity: usize,
    ) -> Result<Vec<MessageId>, DbError> {
        let state = &*self.guard;
        let subs = state.contact_subs.get(&contact);
        let held = state.held.get(&contact);
        let outstanding: BTreeSet<MessageId> = state
            .outstanding
            .get(&contact)
            .into_iter()
            .flat_map(|batches| batches.values())
            .flat_map(|batch| batch.messages.iter().copied())
            .collect();
        let mut selected = Vec::new();
        let mut total = 0;
        for (id, stored) in state.messages_by_arrival() {
            let message = &stored.message;
            let trusted = state.ratings.get(&message.author()).copied().unwrap_or_default()
                == Rating::Trusted;
            if !trusted {
                continue;
            }
            if !subs.is_some_and(|subs| subs.contains(&message.group())) {
                continue;
            }
            if held.is_some_and(|held| held.contains(id)) || outstanding.contains(id) {
                continue;
            }
            if total + message.wire_size() > capacity {
                break;
            }
            total += message.wire_size();
            selected.push(*id);
        }
        Ok(selected)
    }

    fn get_old_messages(&mut self, target_bytes: usize) -> Result<Vec<MessageId>, DbError> {
        let mut selected = Vec::new();
        let mut total = 0;
        for (id, stored) in self.guard.messages_by_arrival() {
            if total >= target_bytes {
                break;
            }
            total += stored.message.wire_size();
            selected.push(*id);
        }
        Ok(selected)
    }

    fn remove_message(&mut self, id: MessageId) -> Result<(), DbError> {
        let state = &mut *self.guard;
        state.messages.remove(&id);
        for held in state.held.values_mut() {
            held.remove(&id);
        }
        Ok(())
    }

    fn add_outstanding_batch(
        &mut self,
        contact: ContactId,
        batch: BatchId,
        sent: BTreeSet<MessageId>,
    ) -> Result<(), DbError> {
        self.guard.outstanding.entry(contact).or_default().insert(
            batch,
            OutstandingBatch {
                messages: sent,
                passovers: 0,
            },
        );
        Ok(())
    }

    fn remove_acked_batch(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError> {
        let state = &mut *self.guard;
        let removed = state
            .outstanding
            .get_mut(&contact)
            .and_then(|batches| batches.remove(&batch));
        if let Some(removed) = removed {
            state
                .held
                .entry(contact)
                .or_default()
                .extend(removed.messages);
        }
        Ok(())
    }

    fn remove_lost_batch(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError> {
        if let Some(batches) = self.guard.outstanding.get_mut(&contact) {
            batches.remove(&batch);
        }
        Ok(())
    }

    fn remove_batches_to_ack(
        &mut self,
        contact: ContactId,
    ) -> Result<BTreeSet<BatchId>, DbError> {
        Ok(self.guard.acks_to_send.remove(&contact).unwrap_or_default())
    }

    fn add_batch_to_ack(&mut self, contact: ContactId, batch: BatchId) -> Result<(), DbError> {
        self.guard
            .acks_to_send
            .entry(contact)
            .or_default()
            .insert(batch);
        Ok(())
    }

    fn add_received_bundle(
        &mut self,
        contact: ContactId,
        bundle: BundleId,
    ) -> Result<BTreeSet<BatchId>, DbError> {
        let state = &mut *self.guard;
        state
            .received_bundles
            .entry(contact)
            .or_default()
            .insert(bundle);
        let mut lost = BTreeSet::new();
        if let Some(batches) = state.outstanding.get_mut(&contact) {
            for (id, batch) in batches.iter_mut() {
                batch.passovers += 1;
                if batch.passovers >= RETRANSMIT_THRESHOLD {
                    lost.insert(*id);
                }
            }
        }
        Ok(lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::{BatchBuilder, Message};

    fn message(body: &[u8]) -> Message {
        Message::new(GroupId::derive(b"group"), AuthorId::derive(b"author"), body.to_vec())
    }

    #[test]
    fn uncommitted_transaction_is_aborted() {
        let db = MemoryDatabase::new();
        {
            let mut txn = db.begin().unwrap();
            txn.add_contact(TransportMap::new()).unwrap();
            txn.add_subscription(GroupId::derive(b"g")).unwrap();
            // Dropped without commit
        }
        let mut txn = db.begin().unwrap();
        assert!(txn.get_contacts().unwrap().is_empty());
        assert!(txn.get_subscriptions().unwrap().is_empty());
    }

    #[test]
    fn committed_transaction_persists() {
        let db = MemoryDatabase::new();
        let contact = {
            let mut txn = db.begin().unwrap();
            let c = txn.add_contact(TransportMap::new()).unwrap();
            txn.commit().unwrap();
            c
        };
        let mut txn = db.begin().unwrap();
        assert!(txn.contains_contact(contact).unwrap());
    }

    #[test]
    fn contact_ids_are_not_reused() {
        let db = MemoryDatabase::new();
        let mut txn = db.begin().unwrap();
        let c1 = txn.add_contact(TransportMap::new()).unwrap();
        txn.remove_contact(c1).unwrap();
        let c2 = txn.add_contact(TransportMap::new()).unwrap();
        assert_ne!(c1, c2);
    }

    #[test]
    fn duplicate_message_is_not_stored_twice() {
        let db = MemoryDatabase::new();
        let m = message(b"body");
        let mut txn = db.begin().unwrap();
        assert!(txn.add_message(&m, None).unwrap());
        assert!(!txn.add_message(&m, None).unwrap());
    }

    fn sendable_fixture(db: &MemoryDatabase, m: &Message) -> ContactId {
        let mut txn = db.begin().unwrap();
        let contact = txn.add_contact(TransportMap::new()).unwrap();
        txn.set_contact_subscriptions(contact, [m.group()].into()).unwrap();
        txn.set_rating(m.author(), Rating::Trusted).unwrap();
        txn.add_message(m, None).unwrap();
        txn.commit().unwrap();
        contact
    }

    #[test]
    fn sendable_requires_trust_subscription_and_novelty() {
        let db = MemoryDatabase::new();
        let m = message(b"hello");
        let contact = sendable_fixture(&db, &m);

        let mut txn = db.begin().unwrap();
        assert_eq!(txn.get_sendable_messages(contact, usize::MAX).unwrap(), vec![m.id()]);

        // Distrusting the author withholds the message
        txn.set_rating(m.author(), Rating::Distrusted).unwrap();
        assert!(txn.get_sendable_messages(contact, usize::MAX).unwrap().is_empty());
        txn.set_rating(m.author(), Rating::Trusted).unwrap();

        // Dropping the contact's subscription withholds it
        txn.set_contact_subscriptions(contact, BTreeSet::new()).unwrap();
        assert!(txn.get_sendable_messages(contact, usize::MAX).unwrap().is_empty());
        txn.set_contact_subscriptions(contact, [m.group()].into()).unwrap();

        // A message received from the contact is never offered back
        txn.add_message(&m, Some(contact)).unwrap();
        assert!(txn.get_sendable_messages(contact, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn outstanding_messages_are_not_reselected() {
        let db = MemoryDatabase::new();
        let m = message(b"hello");
        let contact = sendable_fixture(&db, &m);

        let mut txn = db.begin().unwrap();
        let mut builder = BatchBuilder::new();
        builder.add(m.clone());
        let batch = builder.build();
        txn.add_outstanding_batch(contact, batch.id(), [m.id()].into()).unwrap();
        assert!(txn.get_sendable_messages(contact, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn acked_batch_marks_messages_held() {
        let db = MemoryDatabase::new();
        let m = message(b"hello");
        let contact = sendable_fixture(&db, &m);

        let mut txn = db.begin().unwrap();
        let batch_id = BatchId::compute([m.id()].into_iter());
        txn.add_outstanding_batch(contact, batch_id, [m.id()].into()).unwrap();
        txn.remove_acked_batch(contact, batch_id).unwrap();
        // Not outstanding any more, but held - still not sendable
        assert!(txn.get_sendable_messages(contact, usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn lost_batch_makes_messages_sendable_again() {
        let db = MemoryDatabase::new();
        let m = message(b"hello");
        let contact = sendable_fixture(&db, &m);

        let mut txn = db.begin().unwrap();
        let batch_id = BatchId::compute([m.id()].into_iter());
        txn.add_outstanding_batch(contact, batch_id, [m.id()].into()).unwrap();

        let lost = txn.add_received_bundle(contact, BundleId::from_bytes(&[1; 32]).unwrap()).unwrap();
        assert_eq!(lost, [batch_id].into());
        txn.remove_lost_batch(contact, batch_id).unwrap();
        assert_eq!(txn.get_sendable_messages(contact, usize::MAX).unwrap(), vec![m.id()]);
    }

    #[test]
    fn capacity_limits_selection() {
        let db = MemoryDatabase::new();
        let m1 = message(b"first message");
        let contact = sendable_fixture(&db, &m1);
        let m2 = message(b"second message");

        let mut txn = db.begin().unwrap();
        txn.set_rating(m2.author(), Rating::Trusted).unwrap();
        txn.add_message(&m2, None).unwrap();
        // Room for the first message only
        let selected = txn.get_sendable_messages(contact, m1.wire_size()).unwrap();
        assert_eq!(selected, vec![m1.id()]);
    }

    #[test]
    fn old_messages_selected_by_arrival_until_target() {
        let db = MemoryDatabase::new();
        let m1 = message(b"oldest");
        let m2 = message(b"newer");
        let mut txn = db.begin().unwrap();
        txn.add_message(&m1, None).unwrap();
        txn.add_message(&m2, None).unwrap();
        let old = txn.get_old_messages(1).unwrap();
        assert_eq!(old, vec![m1.id()]);
        let all = txn.get_old_messages(usize::MAX).unwrap();
        assert_eq!(all, vec![m1.id(), m2.id()]);
    }
}
