//! Error types for the framing layer.

use std::io;
use thiserror::Error;

/// Errors produced by the frame codec.
///
/// All of these are fatal to the connection; none is retried at this layer.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The connection tag or an AEAD tag did not verify.
    #[error("frame authentication failed")]
    AuthenticationFailure,

    /// A frame arrived with a counter that is not the expected next value.
    #[error("frame counter out of sequence: expected {expected}, got {actual}")]
    FrameDesync {
        /// The next counter value this side expected.
        expected: u64,
        /// The counter value carried by the frame.
        actual: u64,
    },

    /// A frame declared a length beyond the frame bound.
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// The declared ciphertext length.
        len: usize,
        /// The maximum permitted ciphertext length.
        max: usize,
    },

    /// The stream ended in the middle of a frame.
    #[error("connection truncated mid-frame")]
    TruncatedConnection,

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Io(#[source] io::Error),
}

impl FrameError {
    /// Recover a `FrameError` that was wrapped into an `io::Error` by the
    /// `std::io` trait impls of [`FrameReader`](crate::FrameReader) and
    /// [`FrameWriter`](crate::FrameWriter).
    pub fn from_io(err: io::Error) -> Self {
        match err.downcast::<FrameError>() {
            Ok(frame_err) => frame_err,
            Err(io_err) => FrameError::Io(io_err),
        }
    }
}

impl From<FrameError> for io::Error {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(io_err) => io_err,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
