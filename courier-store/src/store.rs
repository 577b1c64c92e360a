//! The synchronization store.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use tracing::debug;

use courier_types::{
    AuthorId, Batch, BatchBuilder, Bundle, ContactId, GroupId, HeaderBuilder, Message, Rating,
    TransportMap, BUNDLE_OVERHEAD, MAX_BATCH_SIZE,
};

use crate::db::{Database, Transaction};
use crate::error::StoreError;
use crate::event::{StoreEvent, StoreListener};
use crate::gate::WriteGate;
use crate::locks::{Domain, DomainLocks, LockMode};

use Domain::{Contacts, MessageStatus, Messages, Ratings, Subscriptions, Transports};
use LockMode::{Read, Write};

/// The transactional, lock-guarded owner of contacts, subscriptions,
/// ratings, transports and messages.
///
/// See the crate docs for the concurrency model. Each operation documents
/// the domain locks it takes; every lock set is acquired in the fixed
/// global order enforced by [`DomainLocks`].
pub struct SyncStore<D: Database> {
    db: D,
    locks: DomainLocks,
    gate: Arc<WriteGate>,
    listeners: Mutex<Vec<Arc<dyn StoreListener>>>,
}

impl<D: Database> SyncStore<D> {
    /// Create a store over the given storage backend.
    pub fn new(db: D) -> Self {
        Self {
            db,
            locks: DomainLocks::new(),
            gate: Arc::new(WriteGate::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The write gate honored before large writes; hand this to the
    /// external capacity monitor.
    pub fn write_gate(&self) -> Arc<WriteGate> {
        Arc::clone(&self.gate)
    }

    /// Register a listener for store events.
    pub fn add_listener(&self, listener: Arc<dyn StoreListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    fn emit(&self, event: StoreEvent) {
        // Clone under the lock, invoke outside it
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener.event_occurred(&event);
        }
    }

    /// Run one transaction: commit on `Ok`, abort on `Err`.
    fn transaction<T>(
        &self,
        f: impl FnOnce(&mut D::Txn<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut txn = self.db.begin()?;
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }

    /// Re-check that the contact still exists. Callers hold at least a
    /// read lock on Contacts, so the answer stays valid until it is
    /// released.
    fn check_contact(&self, contact: ContactId) -> Result<(), StoreError> {
        let exists = self.transaction(|txn| Ok(txn.contains_contact(contact)?))?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::NoSuchContact(contact))
        }
    }

    /// Add a contact with its initial transport configuration.
    ///
    /// Locks: Contacts W, Transports W.
    pub fn add_contact(&self, transports: TransportMap) -> Result<ContactId, StoreError> {
        let contact = {
            let _locks = self
                .locks
                .acquire(&[(Contacts, Write), (Transports, Write)]);
            self.transaction(|txn| Ok(txn.add_contact(transports)?))?
        };
        debug!(%contact, "added contact");
        self.emit(StoreEvent::ContactAdded { contact });
        Ok(contact)
    }

    /// Remove a contact, cascading to its transport, subscription and
    /// outstanding-batch state.
    ///
    /// Locks: Contacts W, MessageStatus W, Subscriptions W, Transports W.
    pub fn remove_contact(&self, contact: ContactId) -> Result<(), StoreError> {
        {
            let _locks = self.locks.acquire(&[
                (Contacts, Write),
                (MessageStatus, Write),
                (Subscriptions, Write),
                (Transports, Write),
            ]);
            self.check_contact(contact)?;
            self.transaction(|txn| Ok(txn.remove_contact(contact)?))?;
        }
        debug!(%contact, "removed contact");
        self.emit(StoreEvent::ContactRemoved { contact });
        Ok(())
    }

    /// All contacts. Locks: Contacts R.
    pub fn get_contacts(&self) -> Result<BTreeSet<ContactId>, StoreError> {
        let _locks = self.locks.acquire(&[(Contacts, Read)]);
        self.transaction(|txn| Ok(txn.get_contacts()?))
    }

    /// Subscribe the local instance to a group. Locks: Subscriptions W.
    pub fn subscribe(&self, group: GroupId) -> Result<(), StoreError> {
        debug!(%group, "subscribing");
        let _locks = self.locks.acquire(&[(Subscriptions, Write)]);
        self.transaction(|txn| Ok(txn.add_subscription(group)?))
    }

    /// Unsubscribe the local instance from a group. Messages already
    /// stored under the group remain stored.
    ///
    /// Locks: Contacts R, Messages W, MessageStatus W, Subscriptions W.
    pub fn unsubscribe(&self, group: GroupId) -> Result<(), StoreError> {
        debug!(%group, "unsubscribing");
        let _locks = self.locks.acquire(&[
            (Contacts, Read),
            (Messages, Write),
            (MessageStatus, Write),
            (Subscriptions, Write),
        ]);
        self.transaction(|txn| Ok(txn.remove_subscription(group)?))
    }

    /// The local subscription set. Locks: Subscriptions R.
    pub fn get_subscriptions(&self) -> Result<BTreeSet<GroupId>, StoreError> {
        let _locks = self.locks.acquire(&[(Subscriptions, Read)]);
        self.transaction(|txn| Ok(txn.get_subscriptions()?))
    }

    /// Set an author's rating. A transition to or from
    /// [`Rating::Trusted`] flips the sendability of the author's existing
    /// messages.
    ///
    /// Locks: Messages W, Ratings W.
    pub fn set_rating(&self, author: AuthorId, rating: Rating) -> Result<(), StoreError> {
        let _locks = self.locks.acquire(&[(Messages, Write), (Ratings, Write)]);
        self.transaction(|txn| {
            let old = txn.set_rating(author, rating)?;
            if old != rating {
                debug!(%author, ?old, ?rating, "rating changed");
            }
            Ok(())
        })
    }

    /// An author's rating. Locks: Ratings R.
    pub fn get_rating(&self, author: AuthorId) -> Result<Rating, StoreError> {
        let _locks = self.locks.acquire(&[(Ratings, Read)]);
        self.transaction(|txn| Ok(txn.get_rating(author)?))
    }

    /// The local transport configuration. Locks: Transports R.
    pub fn get_local_transports(&self) -> Result<TransportMap, StoreError> {
        let _locks = self.locks.acquire(&[(Transports, Read)]);
        self.transaction(|txn| Ok(txn.get_local_transports()?))
    }

    /// Replace the local transport configuration. Locks: Transports W.
    pub fn set_local_transports(&self, transports: TransportMap) -> Result<(), StoreError> {
        let _locks = self.locks.acquire(&[(Transports, Write)]);
        self.transaction(|txn| Ok(txn.set_local_transports(transports)?))
    }

    /// A contact's recorded transport configuration.
    ///
    /// Locks: Contacts R, Transports R.
    pub fn get_contact_transports(&self, contact: ContactId) -> Result<TransportMap, StoreError> {
        let _locks = self.locks.acquire(&[(Contacts, Read), (Transports, Read)]);
        self.check_contact(contact)?;
        self.transaction(|txn| Ok(txn.get_contact_transports(contact)?))
    }

    /// Store a locally generated message, unless the local instance is not
    /// subscribed to its group. Returns whether the message was newly
    /// stored.
    ///
    /// Honors the write gate, then locks: Contacts R, Messages W,
    /// MessageStatus W, Subscriptions R.
    pub fn add_local_message(&self, message: Message) -> Result<bool, StoreError> {
        self.gate.wait_for_permission_to_write();
        let added = {
            let _locks = self.locks.acquire(&[
                (Contacts, Read),
                (Messages, Write),
                (MessageStatus, Write),
                (Subscriptions, Read),
            ]);
            self.transaction(|txn| {
                if !txn.contains_subscription(message.group())? {
                    debug!(group = %message.group(), "not subscribed, dropping local message");
                    return Ok(false);
                }
                let added = txn.add_message(&message, None)?;
                if !added {
                    debug!(id = %message.id(), "duplicate local message");
                }
                Ok(added)
            })?
        };
        if added {
            self.emit(StoreEvent::MessageAdded {
                message: message.id(),
                group: message.group(),
                source: None,
            });
        }
        Ok(added)
    }

    /// Remove the oldest messages totalling at least `target_bytes`, in one
    /// transaction. Returns the number of messages removed.
    ///
    /// The triggering policy belongs to the external capacity manager;
    /// this operation only guarantees atomicity and lock safety.
    ///
    /// Locks: Contacts R, Messages W, MessageStatus W.
    pub fn expire_messages(&self, target_bytes: usize) -> Result<usize, StoreError> {
        let _locks = self.locks.acquire(&[
            (Contacts, Read),
            (Messages, Write),
            (MessageStatus, Write),
        ]);
        let removed = self.transaction(|txn| {
            let old = txn.get_old_messages(target_bytes)?;
            for id in &old {
                txn.remove_message(*id)?;
            }
            Ok(old.len())
        })?;
        debug!(removed, target_bytes, "expired messages");
        Ok(removed)
    }

    /// Generate a bundle for a contact, sized to fit `capacity` bytes.
    ///
    /// Runs as a sequence of independent transactions with locks released
    /// between phases; the contact's existence is re-checked before every
    /// phase. See the module docs for the resumability contract.
    pub fn generate_bundle(
        &self,
        contact: ContactId,
        capacity: usize,
    ) -> Result<Bundle, StoreError> {
        debug!(%contact, capacity, "generating bundle");
        let mut header = HeaderBuilder::new();
        // Drain and claim the acks owed to this contact.
        // Locks: Contacts R, MessageStatus W.
        {
            let _locks = self.locks.acquire(&[(Contacts, Read), (MessageStatus, Write)]);
            self.check_contact(contact)?;
            let acks = self.transaction(|txn| Ok(txn.remove_batches_to_ack(contact)?))?;
            debug!(acks = acks.len(), "added acks");
            header.add_acks(acks);
        }
        // Snapshot the local subscription set.
        // Locks: Contacts R, Subscriptions R.
        {
            let _locks = self.locks.acquire(&[(Contacts, Read), (Subscriptions, Read)]);
            self.check_contact(contact)?;
            let subs = self.transaction(|txn| Ok(txn.get_subscriptions()?))?;
            debug!(subscriptions = subs.len(), "added subscriptions");
            header.add_subscriptions(subs);
        }
        // Snapshot the local transport configuration.
        // Locks: Contacts R, Transports R.
        {
            let _locks = self.locks.acquire(&[(Contacts, Read), (Transports, Read)]);
            self.check_contact(contact)?;
            let transports = self.transaction(|txn| Ok(txn.get_local_transports()?))?;
            debug!(transports = transports.len(), "added transports");
            header.set_transports(transports);
        }
        // Seal the header and pack batches into the remaining capacity.
        let header = header.build();
        let mut remaining = capacity.saturating_sub(header.size() + BUNDLE_OVERHEAD);
        let mut batches = Vec::new();
        loop {
            let batch_capacity = remaining.min(MAX_BATCH_SIZE);
            let Some(batch) = self.fill_batch(contact, batch_capacity)? else {
                break; // No more messages to send
            };
            let size = batch.size();
            remaining = remaining.saturating_sub(size);
            batches.push(batch);
            // If the batch is less than half full, stop trying - there may
            // be more messages trickling in but we can't wait forever
            if size * 2 < MAX_BATCH_SIZE {
                break;
            }
        }
        let bundle = Bundle::new(header, batches);
        debug!(batches = bundle.batches.len(), size = bundle.size(), "bundle generated");
        Ok(bundle)
    }

    /// Select one batch of sendable messages and record it as outstanding.
    ///
    /// Selection and recording are two independent transactions, mirroring
    /// the two lock modes needed on MessageStatus.
    ///
    /// Locks: Contacts R, Messages R held throughout; MessageStatus R for
    /// selection, then MessageStatus W for recording.
    fn fill_batch(
        &self,
        contact: ContactId,
        capacity: usize,
    ) -> Result<Option<Batch>, StoreError> {
        let _outer = self.locks.acquire(&[(Contacts, Read), (Messages, Read)]);
        self.check_contact(contact)?;
        let selected = {
            let _status = self.locks.acquire(&[(MessageStatus, Read)]);
            self.transaction(|txn| {
                let overhead = BatchBuilder::new().size();
                let ids =
                    txn.get_sendable_messages(contact, capacity.saturating_sub(overhead))?;
                if ids.is_empty() {
                    return Ok(None); // No more messages to send
                }
                let mut builder = BatchBuilder::new();
                let mut sent = BTreeSet::new();
                for id in ids {
                    builder.add(txn.get_message(id)?);
                    sent.insert(id);
                }
                Ok(Some((builder.build(), sent)))
            })?
        };
        let Some((batch, sent)) = selected else {
            return Ok(None);
        };
        // Record the contents of the batch
        {
            let _status = self.locks.acquire(&[(MessageStatus, Write)]);
            self.transaction(|txn| {
                Ok(txn.add_outstanding_batch(contact, batch.id(), sent)?)
            })?;
        }
        Ok(Some(batch))
    }

    /// Consume a bundle received from a contact.
    ///
    /// Runs as a sequence of independent transactions; a failure aborts
    /// only the current step, and committed steps stay committed (message
    /// storage and ack bookkeeping are idempotent, so re-applying the same
    /// bundle later is safe).
    pub fn receive_bundle(&self, contact: ContactId, bundle: &Bundle) -> Result<(), StoreError> {
        debug!(%contact, size = bundle.size(), "received bundle");
        let header = &bundle.header;
        // Remove the outstanding batches the contact acknowledged, each in
        // its own transaction.
        // Locks: Contacts R, Messages R, MessageStatus W.
        {
            let _locks = self.locks.acquire(&[
                (Contacts, Read),
                (Messages, Read),
                (MessageStatus, Write),
            ]);
            self.check_contact(contact)?;
            for ack in header.acks() {
                self.transaction(|txn| Ok(txn.remove_acked_batch(contact, *ack)?))?;
            }
            debug!(acks = header.acks().len(), "processed acks");
        }
        // Replace the contact's recorded subscriptions.
        // Locks: Contacts R, Subscriptions W.
        {
            let _locks = self.locks.acquire(&[(Contacts, Read), (Subscriptions, Write)]);
            self.check_contact(contact)?;
            self.transaction(|txn| {
                Ok(txn.set_contact_subscriptions(contact, header.subscriptions().clone())?)
            })?;
            debug!(subscriptions = header.subscriptions().len(), "updated subscriptions");
        }
        // Replace the contact's recorded transport configuration.
        // Locks: Contacts R, Transports W.
        {
            let _locks = self.locks.acquire(&[(Contacts, Read), (Transports, Write)]);
            self.check_contact(contact)?;
            self.transaction(|txn| {
                Ok(txn.set_contact_transports(contact, header.transports().clone())?)
            })?;
        }
        // Store the messages, one transaction per batch, honoring the
        // write gate before each.
        // Locks: Contacts R, Messages W, MessageStatus W, Subscriptions R.
        for batch in &bundle.batches {
            self.gate.wait_for_permission_to_write();
            let events = {
                let _locks = self.locks.acquire(&[
                    (Contacts, Read),
                    (Messages, Write),
                    (MessageStatus, Write),
                    (Subscriptions, Read),
                ]);
                self.check_contact(contact)?;
                self.transaction(|txn| {
                    let mut events = Vec::new();
                    let mut stored = 0;
                    for message in batch.messages() {
                        // Only store under a live subscription
                        if !txn.contains_subscription(message.group())? {
                            continue;
                        }
                        if txn.add_message(message, Some(contact))? {
                            stored += 1;
                            events.push(StoreEvent::MessageAdded {
                                message: message.id(),
                                group: message.group(),
                                source: Some(contact),
                            });
                        }
                    }
                    txn.add_batch_to_ack(contact, batch.id())?;
                    debug!(received = batch.messages().len(), stored, "stored batch");
                    Ok(events)
                })?
            };
            for event in events {
                self.emit(event);
            }
        }
        // Record the bundle in the ledger and find batches sent in an
        // earlier session that the contact has evidently never received.
        // Locks: Contacts R, Messages R, MessageStatus W.
        let lost = {
            let _locks = self.locks.acquire(&[
                (Contacts, Read),
                (Messages, Read),
                (MessageStatus, Write),
            ]);
            self.check_contact(contact)?;
            self.transaction(|txn| Ok(txn.add_received_bundle(contact, bundle.id())?))?
        };
        // Remove each lost batch so its messages become sendable again.
        for batch in lost {
            let _locks = self.locks.acquire(&[
                (Contacts, Read),
                (Messages, Read),
                (MessageStatus, Write),
            ]);
            self.check_contact(contact)?;
            debug!(%batch, "removing lost batch");
            self.transaction(|txn| Ok(txn.remove_lost_batch(contact, batch)?))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDatabase;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn store() -> SyncStore<MemoryDatabase> {
        SyncStore::new(MemoryDatabase::new())
    }

    fn group() -> GroupId {
        GroupId::derive(b"test-group")
    }

    fn author() -> AuthorId {
        AuthorId::derive(b"test-author")
    }

    fn message(body: &[u8]) -> Message {
        Message::new(group(), author(), body.to_vec())
    }

    /// A store with one contact subscribed to the test group, the test
    /// author trusted and the local instance subscribed.
    fn synced_pair() -> (SyncStore<MemoryDatabase>, ContactId) {
        let store = store();
        let contact = store.add_contact(TransportMap::new()).unwrap();
        store.subscribe(group()).unwrap();
        store.set_rating(author(), Rating::Trusted).unwrap();
        // Pretend the contact told us it subscribes to the group
        let mut header = HeaderBuilder::new();
        header.add_subscriptions([group()]);
        store
            .receive_bundle(contact, &Bundle::new(header.build(), vec![]))
            .unwrap();
        (store, contact)
    }

    struct CountingListener(AtomicUsize);

    impl StoreListener for CountingListener {
        fn event_occurred(&self, event: &StoreEvent) {
            if matches!(event, StoreEvent::MessageAdded { .. }) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Panics on the first event it sees, behaves afterwards.
    struct FaultyListener(std::sync::atomic::AtomicBool);

    impl StoreListener for FaultyListener {
        fn event_occurred(&self, _event: &StoreEvent) {
            if !self.0.swap(true, Ordering::SeqCst) {
                panic!("listener failure");
            }
        }
    }

    #[test]
    fn bundle_carries_message_to_subscribed_contact() {
        let (store, contact) = synced_pair();
        store.add_local_message(message(b"hi")).unwrap();
        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert_eq!(bundle.batches.len(), 1);
        assert_eq!(bundle.batches[0].messages().len(), 1);
        assert_eq!(bundle.batches[0].messages()[0].body(), b"hi");
    }

    #[test]
    fn message_for_unsubscribed_group_is_withheld_but_header_is_full() {
        let store = store();
        let contact = store.add_contact(TransportMap::new()).unwrap();
        store.subscribe(group()).unwrap();
        store.set_rating(author(), Rating::Trusted).unwrap();
        let mut transports = TransportMap::new();
        transports.insert("mailbox".into(), "usb0".into());
        store.set_local_transports(transports.clone()).unwrap();
        // The contact never announced a subscription to the group
        store.add_local_message(message(b"pending")).unwrap();

        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(bundle.batches.is_empty());
        assert_eq!(bundle.header.subscriptions(), &BTreeSet::from([group()]));
        assert_eq!(bundle.header.transports(), &transports);
    }

    #[test]
    fn untrusted_author_is_withheld() {
        let (store, contact) = synced_pair();
        store.set_rating(author(), Rating::Unknown).unwrap();
        store.add_local_message(message(b"hi")).unwrap();
        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(bundle.batches.is_empty());
    }

    #[test]
    fn local_message_requires_local_subscription() {
        let store = store();
        assert!(!store.add_local_message(message(b"hi")).unwrap());
        store.subscribe(group()).unwrap();
        assert!(store.add_local_message(message(b"hi")).unwrap());
        // Idempotent
        assert!(!store.add_local_message(message(b"hi")).unwrap());
    }

    #[test]
    fn outstanding_batch_is_not_resent_until_lost() {
        let (store, contact) = synced_pair();
        store.add_local_message(message(b"hi")).unwrap();
        let first = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert_eq!(first.batches.len(), 1);
        // Still outstanding: nothing to send
        let second = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(second.batches.is_empty());
        // A new bundle from the contact without the ack declares the batch
        // lost and re-queues its messages
        let mut header = HeaderBuilder::new();
        header.add_subscriptions([group()]);
        store
            .receive_bundle(contact, &Bundle::new(header.build(), vec![]))
            .unwrap();
        let third = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert_eq!(third.batches.len(), 1);
        assert_eq!(third.batches[0].messages()[0].body(), b"hi");
    }

    #[test]
    fn acked_batch_is_never_resent() {
        let (store, contact) = synced_pair();
        store.add_local_message(message(b"hi")).unwrap();
        let sent = store.generate_bundle(contact, 64 * 1024).unwrap();
        let batch_id = sent.batches[0].id();
        // The contact acknowledges the batch
        let mut header = HeaderBuilder::new();
        header.add_acks([batch_id]);
        header.add_subscriptions([group()]);
        let ack_bundle = Bundle::new(header.build(), vec![]);
        store.receive_bundle(contact, &ack_bundle).unwrap();
        // Processing the same ack again is a no-op, not an error
        store.receive_bundle(contact, &ack_bundle).unwrap();
        // Even after further sessions the batch stays acknowledged
        let next = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(next.batches.is_empty());
    }

    #[test]
    fn received_bundle_is_stored_once_and_acked() {
        let (alice, bob_id) = synced_pair();
        let (bob, alice_id) = synced_pair();
        let counter = Arc::new(CountingListener(AtomicUsize::new(0)));
        bob.add_listener(counter.clone());

        alice.add_local_message(message(b"hello bob")).unwrap();
        let bundle = alice.generate_bundle(bob_id, 64 * 1024).unwrap();

        bob.receive_bundle(alice_id, &bundle).unwrap();
        // Duplicate delivery of the same bundle is silently idempotent
        bob.receive_bundle(alice_id, &bundle).unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);

        // Bob's next bundle to Alice acknowledges the batch
        let reply = bob.generate_bundle(alice_id, 64 * 1024).unwrap();
        assert!(reply.header.acks().contains(&bundle.batches[0].id()));
        alice.receive_bundle(bob_id, &reply).unwrap();
        // The batch is acknowledged, nothing left to send
        let idle = alice.generate_bundle(bob_id, 64 * 1024).unwrap();
        assert!(idle.is_idle());
    }

    #[test]
    fn message_for_unsubscribed_group_is_not_stored() {
        let store = store();
        let contact = store.add_contact(TransportMap::new()).unwrap();
        // Not subscribed locally
        let mut batch = BatchBuilder::new();
        batch.add(message(b"unwanted"));
        let batch = batch.build();
        let batch_id = batch.id();
        let bundle = Bundle::new(HeaderBuilder::new().build(), vec![batch]);
        store.receive_bundle(contact, &bundle).unwrap();
        // The batch is still acked so the peer stops resending it
        let reply = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(reply.header.acks().contains(&batch_id));
    }

    #[test]
    fn bundle_respects_capacity() {
        let (store, contact) = synced_pair();
        for i in 0..20u8 {
            store
                .add_local_message(Message::new(group(), author(), vec![i; 512]))
                .unwrap();
        }
        let capacity = 2048;
        let bundle = store.generate_bundle(contact, capacity).unwrap();
        assert!(bundle.size() <= capacity);
        assert!(bundle.to_bytes().unwrap().len() <= capacity);
        for batch in &bundle.batches {
            assert!(batch.size() <= MAX_BATCH_SIZE);
        }
    }

    #[test]
    fn batches_are_bounded_by_max_batch_size() {
        let (store, contact) = synced_pair();
        // Enough data for several batches
        for i in 0..40u32 {
            let body = vec![(i % 251) as u8; 100 * 1024];
            store
                .add_local_message(Message::new(group(), author(), body))
                .unwrap();
        }
        let bundle = store.generate_bundle(contact, 16 * 1024 * 1024).unwrap();
        assert!(bundle.batches.len() > 1);
        for batch in &bundle.batches {
            assert!(batch.size() <= MAX_BATCH_SIZE);
            let encoded = rmp_serde::to_vec(batch).unwrap().len();
            assert!(encoded <= MAX_BATCH_SIZE);
        }
    }

    #[test]
    fn removed_contact_is_rejected() {
        let (store, contact) = synced_pair();
        store.remove_contact(contact).unwrap();
        assert!(matches!(
            store.generate_bundle(contact, 1024),
            Err(StoreError::NoSuchContact(_))
        ));
        let bundle = Bundle::new(HeaderBuilder::new().build(), vec![]);
        assert!(matches!(
            store.receive_bundle(contact, &bundle),
            Err(StoreError::NoSuchContact(_))
        ));
        assert!(matches!(
            store.get_contact_transports(contact),
            Err(StoreError::NoSuchContact(_))
        ));
    }

    #[test]
    fn panicking_listener_does_not_wedge_the_store() {
        let (store, contact) = synced_pair();
        store.add_listener(Arc::new(FaultyListener(Default::default())));
        let counter = Arc::new(CountingListener(AtomicUsize::new(0)));
        store.add_listener(counter.clone());

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            store.add_local_message(message(b"first")).unwrap();
        }));
        assert!(panicked.is_err());

        // The store stays usable and later events still reach listeners
        assert!(store.add_local_message(message(b"second")).unwrap());
        store.add_listener(Arc::new(CountingListener(AtomicUsize::new(0))));
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert_eq!(bundle.batches.len(), 1);
    }

    #[test]
    fn expire_messages_removes_oldest_first() {
        let (store, contact) = synced_pair();
        let old = message(b"old message");
        store.add_local_message(old.clone()).unwrap();
        store.add_local_message(message(b"new message")).unwrap();
        let removed = store.expire_messages(1).unwrap();
        assert_eq!(removed, 1);
        // The remaining message is the newer one
        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert_eq!(bundle.batches.len(), 1);
        assert_eq!(bundle.batches[0].messages()[0].body(), b"new message");
    }

    #[test]
    fn subscriptions_and_transports_are_replaced_from_header() {
        let (store, contact) = synced_pair();
        let mut transports = TransportMap::new();
        transports.insert("bluetooth".into(), "AA:BB".into());
        let other_group = GroupId::derive(b"other");
        let mut header = HeaderBuilder::new();
        header.add_subscriptions([other_group]);
        header.set_transports(transports.clone());
        store
            .receive_bundle(contact, &Bundle::new(header.build(), vec![]))
            .unwrap();
        assert_eq!(store.get_contact_transports(contact).unwrap(), transports);
        // The old subscription was replaced, so the message is withheld now
        store.add_local_message(message(b"hi")).unwrap();
        let bundle = store.generate_bundle(contact, 64 * 1024).unwrap();
        assert!(bundle.batches.is_empty());
    }
}
