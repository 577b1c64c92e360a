//! # courier-types
//!
//! Shared types for the Courier store-and-forward sync protocol.
//!
//! This crate provides the foundational types used across all Courier crates:
//! - [`ContactId`], [`AuthorId`], [`GroupId`], [`MessageId`], [`BatchId`],
//!   [`BundleId`], [`TransportId`] - Identity types
//! - [`Message`], [`Batch`], [`Header`], [`Bundle`] - Units of exchange
//! - [`ConnectionContext`], [`SharedSecret`], [`Direction`] - Per-connection
//!   key context resolved by an external key-agreement component
//! - [`WireError`] - Serialization error type

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bundle;
mod context;
mod error;
mod ids;

pub use bundle::{
    Batch, BatchBuilder, Bundle, Header, HeaderBuilder, Message, Rating, TransportMap,
    BUNDLE_OVERHEAD, MAX_BATCH_SIZE,
};
pub use context::{ConnectionContext, Direction, SharedSecret};
pub use error::WireError;
pub use ids::{AuthorId, BatchId, BundleId, ContactId, GroupId, MessageId, TransportId};
