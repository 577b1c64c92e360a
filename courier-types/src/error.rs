//! Error types for wire encoding.

use thiserror::Error;

/// Errors produced while encoding or decoding wire types.
#[derive(Debug, Error)]
pub enum WireError {
    /// MessagePack serialization failed
    #[error("serialization failed: {0}")]
    Encode(#[source] rmp_serde::encode::Error),

    /// MessagePack deserialization failed
    #[error("deserialization failed: {0}")]
    Decode(#[source] rmp_serde::decode::Error),
}
