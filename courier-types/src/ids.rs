//! Identity types for Courier.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Serde helper encoding a 32-byte array as a MessagePack bin value
/// instead of an array of integers.
pub(crate) mod bytes32 {
    use serde::de::{Error, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_bytes(bytes)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        struct Bytes32Visitor;

        impl<'de> Visitor<'de> for Bytes32Visitor {
            type Value = [u8; 32];

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("exactly 32 bytes")
            }

            fn visit_bytes<E: Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                v.try_into()
                    .map_err(|_| E::invalid_length(v.len(), &self))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut arr = [0u8; 32];
                for (i, slot) in arr.iter_mut().enumerate() {
                    *slot = seq
                        .next_element()?
                        .ok_or_else(|| Error::invalid_length(i, &self))?;
                }
                Ok(arr)
            }
        }

        d.deserialize_bytes(Bytes32Visitor)
    }
}

fn random_bytes32() -> [u8; 32] {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes).expect("getrandom failed");
    bytes
}

fn short_b64(bytes: &[u8; 32]) -> String {
    let full = URL_SAFE_NO_PAD.encode(bytes);
    full[..8].to_string()
}

/// A unique identifier for a contact.
///
/// Assigned by the synchronization store when the contact is added;
/// never reused within one store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContactId(u32);

impl ContactId {
    /// Create a ContactId from its numeric value.
    pub fn new(value: u32) -> Self {
        Self(value)
    }

    /// Get the numeric value of this ContactId.
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactId({})", self.0)
    }
}

/// A transport registered with the external transport registry.
///
/// The same numeric id must be configured on both ends of a connection;
/// it is bound into every frame nonce.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransportId(u16);

impl TransportId {
    /// Create a TransportId from its numeric value.
    pub fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the numeric value of this TransportId.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportId({})", self.0)
    }
}

/// A unique identifier for a message author.
///
/// Derived from the author's public key material.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AuthorId(#[serde(with = "bytes32")] [u8; 32]);

impl AuthorId {
    /// Derive an AuthorId from public key bytes.
    pub fn derive(public_key: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"courier-author-v1");
        hasher.update(public_key);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a random AuthorId (for testing).
    pub fn random() -> Self {
        Self(random_bytes32())
    }

    /// Create an AuthorId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this AuthorId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuthorId({})", short_b64(&self.0))
    }
}

/// A unique identifier for a group (topic) that instances subscribe to.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(#[serde(with = "bytes32")] [u8; 32]);

impl GroupId {
    /// Derive a GroupId from a group's public descriptor.
    pub fn derive(descriptor: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"courier-group-v1");
        hasher.update(descriptor);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a random GroupId (for testing).
    pub fn random() -> Self {
        Self(random_bytes32())
    }

    /// Create a GroupId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this GroupId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", short_b64(&self.0))
    }
}

/// A content-addressed message identifier.
///
/// Computed over the group, author and body, so re-receiving the same
/// message always yields the same id (idempotent storage).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(#[serde(with = "bytes32")] [u8; 32]);

impl MessageId {
    pub(crate) fn compute(group: &GroupId, author: &AuthorId, body: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"courier-message-v1");
        hasher.update(group.as_bytes());
        hasher.update(author.as_bytes());
        hasher.update(body);
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a MessageId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this MessageId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", short_b64(&self.0))
    }
}

/// A derived identifier for a batch of messages sent together.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(#[serde(with = "bytes32")] [u8; 32]);

impl BatchId {
    /// Compute the id of a batch from the ids of its messages, in order.
    pub fn compute(message_ids: impl Iterator<Item = MessageId>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"courier-batch-v1");
        for id in message_ids {
            hasher.update(id.as_bytes());
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Create a BatchId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this BatchId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", short_b64(&self.0))
    }
}

/// A derived identifier for a bundle, computed over its header.
///
/// Used as the key of the received-bundle ledger that drives lost-batch
/// detection.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BundleId(#[serde(with = "bytes32")] [u8; 32]);

impl BundleId {
    pub(crate) fn from_hash(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }

    /// Create a BundleId from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Get the raw bytes of this BundleId.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl fmt::Debug for BundleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BundleId({})", short_b64(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn author_id_roundtrip() {
        let original = AuthorId::random();
        let restored = AuthorId::from_bytes(original.as_bytes()).unwrap();
        assert_eq!(original, restored);
    }

    #[test]
    fn author_id_from_invalid_length_fails() {
        assert!(AuthorId::from_bytes(&[0u8; 16]).is_none());
        assert!(AuthorId::from_bytes(&[0u8; 64]).is_none());
    }

    #[test]
    fn group_id_deterministic() {
        let g1 = GroupId::derive(b"same descriptor");
        let g2 = GroupId::derive(b"same descriptor");
        assert_eq!(g1, g2);
        assert_ne!(g1, GroupId::derive(b"other descriptor"));
    }

    #[test]
    fn message_id_is_content_addressed() {
        let group = GroupId::random();
        let author = AuthorId::random();
        let m1 = MessageId::compute(&group, &author, b"hello");
        let m2 = MessageId::compute(&group, &author, b"hello");
        let m3 = MessageId::compute(&group, &author, b"goodbye");
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }

    #[test]
    fn id_serializes_as_bin() {
        let id = GroupId::random();
        let bytes = rmp_serde::to_vec(&id).unwrap();
        // bin8 header (2 bytes) + 32 bytes of payload
        assert_eq!(bytes.len(), 34);
        let back: GroupId = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn contact_id_display() {
        assert_eq!(ContactId::new(7).to_string(), "7");
    }
}
