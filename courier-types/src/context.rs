//! Per-connection key context.
//!
//! The context is resolved by an external key-agreement / endpoint
//! management component before a connection is handed to the core; the
//! core never negotiates keys itself.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ids::{ContactId, TransportId};

/// Which side of the connection this instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The side that dialed / wrote first.
    Initiator,
    /// The side that accepted.
    Responder,
}

impl Direction {
    /// One-byte flag bound into every frame nonce.
    pub fn flag(&self) -> u8 {
        match self {
            Direction::Initiator => 0x00,
            Direction::Responder => 0x01,
        }
    }

    /// The opposite direction.
    pub fn reverse(&self) -> Direction {
        match self {
            Direction::Initiator => Direction::Responder,
            Direction::Responder => Direction::Initiator,
        }
    }
}

/// The shared secret for one connection, zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Access the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Everything the frame layer and the connection drivers need to know
/// about one accepted connection.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// The contact on the far end.
    pub contact: ContactId,
    /// The transport the connection arrived over.
    pub transport: TransportId,
    /// The connection number within the (contact, transport) key period.
    pub connection: u64,
    /// Which side of the connection this instance is.
    pub direction: Direction,
    secret: SharedSecret,
}

impl ConnectionContext {
    /// Create a context for one connection.
    pub fn new(
        contact: ContactId,
        transport: TransportId,
        connection: u64,
        direction: Direction,
        secret: SharedSecret,
    ) -> Self {
        Self {
            contact,
            transport,
            connection,
            direction,
            secret,
        }
    }

    /// The connection's shared secret.
    pub fn secret(&self) -> &SharedSecret {
        &self.secret
    }

    /// The same connection seen from the peer's side.
    ///
    /// Useful in tests that run both ends in one process.
    pub fn peer(&self, contact: ContactId) -> Self {
        Self {
            contact,
            transport: self.transport,
            connection: self.connection,
            direction: self.direction.reverse(),
            secret: self.secret.clone(),
        }
    }
}
