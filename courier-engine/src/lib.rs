//! # courier-engine
//!
//! Connection drivers that run the Courier exchange protocol over accepted
//! byte streams.
//!
//! The engine does no dialing, listening or key agreement: an external
//! endpoint component hands it a stream (or stream pair) together with the
//! [`ConnectionContext`](courier_types::ConnectionContext) resolved for it.
//! The drivers wrap the stream in the encrypted framing of
//! [`courier-frame`](courier_frame), move bundles between the stream and a
//! [`SyncStore`](courier_store::SyncStore), and return when the session is
//! over. One session, one thread, blocking I/O.
//!
//! - [`simplex::send`] / [`simplex::receive`] drive one-way transports.
//! - [`duplex::exchange`] alternates bundles over a two-way transport until
//!   both sides go idle.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod duplex;
mod error;
pub mod simplex;
mod wire;

pub use error::EngineError;
pub use wire::MAX_BUNDLE_LENGTH;
