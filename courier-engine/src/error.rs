//! Error types for the connection drivers.

use std::io;
use thiserror::Error;

use courier_frame::FrameError;
use courier_store::StoreError;
use courier_types::WireError;

/// Errors terminating a connection session.
///
/// Any of these ends the session; the store is left in a consistent state
/// and unacknowledged batches will be retransmitted in a later session.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The framing layer rejected the stream.
    #[error("framing error")]
    Frame(#[from] FrameError),

    /// The store rejected the operation.
    #[error("store error")]
    Store(#[from] StoreError),

    /// A bundle failed to encode or decode.
    #[error("bundle serialization error")]
    Wire(#[from] WireError),

    /// A bundle declared a length beyond the session bound.
    #[error("bundle too large: {len} bytes (max {max})")]
    BundleTooLarge {
        /// The declared bundle length.
        len: usize,
        /// The maximum permitted bundle length.
        max: usize,
    },

    /// The stream ended inside a bundle.
    #[error("session truncated mid-bundle")]
    TruncatedSession,
}

impl From<io::Error> for EngineError {
    /// Classify an I/O failure, unwrapping frame errors that the frame
    /// layer carried through the `std::io` traits.
    fn from(err: io::Error) -> Self {
        EngineError::Frame(FrameError::from_io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_error_is_recovered_from_io() {
        let io_err: io::Error = FrameError::AuthenticationFailure.into();
        let err: EngineError = io_err.into();
        assert!(matches!(
            err,
            EngineError::Frame(FrameError::AuthenticationFailure)
        ));
    }

    #[test]
    fn plain_io_error_is_wrapped() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let err: EngineError = io_err.into();
        assert!(matches!(err, EngineError::Frame(FrameError::Io(_))));
    }
}
