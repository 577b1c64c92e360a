//! # courier-frame
//!
//! The encrypted per-connection framing layer for Courier.
//!
//! A raw byte stream is turned into a sequence of authenticated,
//! replay-resistant frames:
//!
//! - One [connection tag](connection_tag) is written before the first
//!   frame, letting the peer recognise and key the connection before any
//!   data arrives.
//! - Each frame is encrypted with XChaCha20-Poly1305 under a per-direction
//!   key, with a deterministic nonce built from the direction flag, the
//!   transport id, the connection number and a strictly increasing frame
//!   counter. The counter check is the sole defense against truncation,
//!   reordering and replay of whole frames; the AEAD tag covers tampering.
//!
//! [`FrameWriter`] and [`FrameReader`] implement the ordinary `std::io`
//! traits so protocol code can treat the connection as a plain byte stream.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod keys;
mod reader;
mod writer;

pub use error::FrameError;
pub use keys::connection_tag;
pub use reader::FrameReader;
pub use writer::FrameWriter;

/// Length of the connection tag written before the first frame.
pub const TAG_LENGTH: usize = 16;

/// Maximum plaintext payload of one frame.
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024;

/// Length of the plaintext frame header: counter (8) + ciphertext length (4).
pub(crate) const FRAME_HEADER_LENGTH: usize = 12;

/// Length of the AEAD authentication tag appended to each ciphertext.
pub(crate) const AEAD_TAG_LENGTH: usize = 16;
