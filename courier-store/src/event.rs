//! Store events for external listeners.

use courier_types::{ContactId, GroupId, MessageId};

/// An event emitted by the store after the corresponding transaction has
/// committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// A message was durably stored for the first time.
    MessageAdded {
        /// The stored message.
        message: MessageId,
        /// The group the message belongs to.
        group: GroupId,
        /// The contact it arrived from, or `None` for a local message.
        source: Option<ContactId>,
    },
    /// A contact was added.
    ContactAdded {
        /// The new contact.
        contact: ContactId,
    },
    /// A contact was removed, cascading to its transport, subscription and
    /// outstanding-batch state.
    ContactRemoved {
        /// The removed contact.
        contact: ContactId,
    },
}

/// Receives store events.
///
/// Listeners are called after the transaction that caused the event has
/// committed, on the thread that ran the operation; they must not call
/// back into the store.
pub trait StoreListener: Send + Sync {
    /// Called for every event.
    fn event_occurred(&self, event: &StoreEvent);
}
