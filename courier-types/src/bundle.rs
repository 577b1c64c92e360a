//! Units of exchange: messages, batches, headers and bundles.
//!
//! All sizes used for packing arithmetic are documented upper bounds on the
//! MessagePack-encoded size, so a batch or bundle built within a size budget
//! never encodes larger than that budget.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::WireError;
use crate::ids::{AuthorId, BatchId, BundleId, GroupId, MessageId};

/// The maximum encoded size of a batch, in bytes.
pub const MAX_BATCH_SIZE: usize = 1024 * 1024;

/// Upper bound on the encoded size of a message beyond its body.
const MESSAGE_OVERHEAD: usize = 80;

/// Upper bound on the encoded size of a batch beyond its messages.
const BATCH_OVERHEAD: usize = 16;

/// Upper bound on the encoded size of one 32-byte id.
const ID_WIRE_SIZE: usize = 36;

/// Upper bound on the encoded size of a header beyond its entries.
const HEADER_OVERHEAD: usize = 32;

/// Upper bound on the encoded size of a bundle beyond its header and batches.
pub const BUNDLE_OVERHEAD: usize = 16;

/// Per-transport key-value configuration describing how to reach or
/// recognise an instance over its transports.
pub type TransportMap = BTreeMap<String, String>;

/// Per-author trust value.
///
/// Only messages from [`Rating::Trusted`] authors are offered for sending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Rating {
    /// No rating recorded yet.
    #[default]
    Unknown,
    /// Explicitly distrusted; messages are withheld.
    Distrusted,
    /// Trusted; the author's messages are eligible for sending.
    Trusted,
}

/// Serde helper encoding a byte vector as a MessagePack bin value.
mod bytes_vec {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        struct BytesVisitor;

        impl<'de> Visitor<'de> for BytesVisitor {
            type Value = Vec<u8>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a byte buffer")
            }

            fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                Ok(v.to_vec())
            }

            fn visit_byte_buf<E: Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
                Ok(v)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(b) = seq.next_element()? {
                    out.push(b);
                }
                Ok(out)
            }
        }

        d.deserialize_byte_buf(BytesVisitor)
    }
}

/// An immutable, content-addressed unit of user data.
///
/// A message belongs to exactly one group; its id is derived from its
/// content, so storing the same message twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    group: GroupId,
    author: AuthorId,
    #[serde(with = "bytes_vec")]
    body: Vec<u8>,
}

impl Message {
    /// Create a message in the given group.
    pub fn new(group: GroupId, author: AuthorId, body: Vec<u8>) -> Self {
        Self {
            group,
            author,
            body,
        }
    }

    /// The content-addressed id of this message.
    pub fn id(&self) -> MessageId {
        MessageId::compute(&self.group, &self.author, &self.body)
    }

    /// The group this message belongs to.
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// The author of this message.
    pub fn author(&self) -> AuthorId {
        self.author
    }

    /// The message body.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Upper bound on the encoded size of this message.
    pub fn wire_size(&self) -> usize {
        self.body.len() + MESSAGE_OVERHEAD
    }
}

/// A size-bounded, ordered collection of messages sent together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    messages: Vec<Message>,
}

impl Batch {
    /// The derived id of this batch.
    pub fn id(&self) -> BatchId {
        BatchId::compute(self.messages.iter().map(Message::id))
    }

    /// The messages in this batch, in send order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Upper bound on the encoded size of this batch.
    pub fn size(&self) -> usize {
        self.messages.iter().map(Message::wire_size).sum::<usize>() + BATCH_OVERHEAD
    }
}

/// Accumulates messages into a [`Batch`].
///
/// A plain value builder; the caller is responsible for keeping the running
/// [`size`](BatchBuilder::size) within its budget before adding.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    messages: Vec<Message>,
    size: usize,
}

impl BatchBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to the batch under construction.
    pub fn add(&mut self, message: Message) {
        self.size += message.wire_size();
        self.messages.push(message);
    }

    /// Upper bound on the encoded size of the batch built so far.
    pub fn size(&self) -> usize {
        self.size + BATCH_OVERHEAD
    }

    /// Whether no messages have been added yet.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Build the batch.
    pub fn build(self) -> Batch {
        Batch {
            messages: self.messages,
        }
    }
}

/// Per-bundle metadata: batch acknowledgements, the sender's full current
/// subscription set, and the sender's transport configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    acks: BTreeSet<BatchId>,
    subscriptions: BTreeSet<GroupId>,
    transports: TransportMap,
}

impl Header {
    /// The derived id of this header, used as the bundle's id in the
    /// received-bundle ledger.
    pub fn id(&self) -> BundleId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"courier-bundle-v1");
        for ack in &self.acks {
            hasher.update(ack.as_bytes());
        }
        for sub in &self.subscriptions {
            hasher.update(sub.as_bytes());
        }
        for (key, value) in &self.transports {
            hasher.update(&(key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update(&(value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
        BundleId::from_hash(hasher.finalize())
    }

    /// The batch acknowledgements carried by this header.
    pub fn acks(&self) -> &BTreeSet<BatchId> {
        &self.acks
    }

    /// The sender's subscription set at generation time.
    pub fn subscriptions(&self) -> &BTreeSet<GroupId> {
        &self.subscriptions
    }

    /// The sender's transport configuration at generation time.
    pub fn transports(&self) -> &TransportMap {
        &self.transports
    }

    /// Upper bound on the encoded size of this header.
    pub fn size(&self) -> usize {
        let entries = (self.acks.len() + self.subscriptions.len()) * ID_WIRE_SIZE;
        let transports: usize = self
            .transports
            .iter()
            .map(|(k, v)| k.len() + v.len() + 10)
            .sum();
        HEADER_OVERHEAD + entries + transports
    }
}

/// Accumulates acks, subscriptions and transports into a [`Header`].
#[derive(Debug, Default)]
pub struct HeaderBuilder {
    acks: BTreeSet<BatchId>,
    subscriptions: BTreeSet<GroupId>,
    transports: TransportMap,
}

impl HeaderBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add batch acknowledgements.
    pub fn add_acks(&mut self, acks: impl IntoIterator<Item = BatchId>) {
        self.acks.extend(acks);
    }

    /// Add subscriptions.
    pub fn add_subscriptions(&mut self, subs: impl IntoIterator<Item = GroupId>) {
        self.subscriptions.extend(subs);
    }

    /// Set the transport configuration.
    pub fn set_transports(&mut self, transports: TransportMap) {
        self.transports = transports;
    }

    /// Seal the header.
    pub fn build(self) -> Header {
        Header {
            acks: self.acks,
            subscriptions: self.subscriptions,
            transports: self.transports,
        }
    }
}

/// One discrete unit of exchange: a [`Header`] followed by zero or more
/// [`Batch`]es, capacity-bounded as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bundle {
    /// The bundle's metadata.
    pub header: Header,
    /// The batches of messages, in send order.
    pub batches: Vec<Batch>,
}

impl Bundle {
    /// Create a bundle from a sealed header and its batches.
    pub fn new(header: Header, batches: Vec<Batch>) -> Self {
        Self { header, batches }
    }

    /// The id of this bundle (its header's id).
    pub fn id(&self) -> BundleId {
        self.header.id()
    }

    /// Whether this bundle carries neither acks nor batches.
    ///
    /// Idle bundles drive the duplex termination rule: a side stops once it
    /// has both sent and received an idle bundle.
    pub fn is_idle(&self) -> bool {
        self.header.acks().is_empty() && self.batches.is_empty()
    }

    /// Upper bound on the encoded size of this bundle.
    pub fn size(&self) -> usize {
        self.header.size() + self.batches.iter().map(Batch::size).sum::<usize>() + BUNDLE_OVERHEAD
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        rmp_serde::to_vec(self).map_err(WireError::Encode)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        rmp_serde::from_slice(bytes).map_err(WireError::Decode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_message(body: &[u8]) -> Message {
        Message::new(GroupId::random(), AuthorId::random(), body.to_vec())
    }

    #[test]
    fn message_wire_size_is_upper_bound() {
        let m = test_message(&[42u8; 1000]);
        let encoded = rmp_serde::to_vec(&m).unwrap();
        assert!(encoded.len() <= m.wire_size());
    }

    #[test]
    fn batch_size_is_upper_bound() {
        let mut builder = BatchBuilder::new();
        for i in 0..10 {
            builder.add(test_message(&vec![i; 100 * i as usize]));
        }
        let batch = builder.build();
        let encoded = rmp_serde::to_vec(&batch).unwrap();
        assert!(encoded.len() <= batch.size());
    }

    #[test]
    fn batch_id_depends_on_contents() {
        let m1 = test_message(b"one");
        let m2 = test_message(b"two");
        let mut b1 = BatchBuilder::new();
        b1.add(m1.clone());
        let mut b2 = BatchBuilder::new();
        b2.add(m1);
        let mut b3 = BatchBuilder::new();
        b3.add(m2);
        assert_eq!(b1.build().id(), b2.build().id());
        assert_ne!(BatchBuilder::new().build().id(), b3.build().id());
    }

    #[test]
    fn header_size_is_upper_bound() {
        let mut builder = HeaderBuilder::new();
        builder.add_acks([BatchId::compute([].into_iter())]);
        builder.add_subscriptions([GroupId::random(), GroupId::random()]);
        let mut transports = TransportMap::new();
        transports.insert("lan.address".into(), "192.168.1.10:7643".into());
        builder.set_transports(transports);
        let header = builder.build();
        let encoded = rmp_serde::to_vec(&header).unwrap();
        assert!(encoded.len() <= header.size());
    }

    #[test]
    fn header_id_deterministic() {
        let mut b1 = HeaderBuilder::new();
        b1.add_subscriptions([GroupId::derive(b"g")]);
        let mut b2 = HeaderBuilder::new();
        b2.add_subscriptions([GroupId::derive(b"g")]);
        assert_eq!(b1.build().id(), b2.build().id());
    }

    #[test]
    fn bundle_roundtrip() {
        let mut hb = HeaderBuilder::new();
        hb.add_subscriptions([GroupId::random()]);
        let mut bb = BatchBuilder::new();
        bb.add(test_message(b"payload"));
        let bundle = Bundle::new(hb.build(), vec![bb.build()]);
        let bytes = bundle.to_bytes().unwrap();
        assert!(bytes.len() <= bundle.size());
        let back = Bundle::from_bytes(&bytes).unwrap();
        assert_eq!(bundle, back);
    }

    #[test]
    fn idle_bundle_has_no_acks_or_batches() {
        let bundle = Bundle::new(HeaderBuilder::new().build(), vec![]);
        assert!(bundle.is_idle());
        let mut hb = HeaderBuilder::new();
        hb.add_acks([BatchId::compute([].into_iter())]);
        assert!(!Bundle::new(hb.build(), vec![]).is_idle());
    }

    #[test]
    fn rating_defaults_to_unknown() {
        assert_eq!(Rating::default(), Rating::Unknown);
    }
}
