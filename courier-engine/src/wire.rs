//! Bundle framing within a session.
//!
//! Each bundle travels as a 4-byte big-endian length followed by its
//! MessagePack encoding, all inside the encrypted frame stream. The length
//! prefix lets a reader distinguish a clean end of session (end of stream
//! between bundles) from a truncated one.

use std::io::{Read, Write};

use courier_types::Bundle;

use crate::error::EngineError;

/// The maximum encoded size of a single bundle accepted from a peer.
pub const MAX_BUNDLE_LENGTH: usize = 32 * 1024 * 1024;

/// Write one length-prefixed bundle.
pub(crate) fn write_bundle<W: Write>(sink: &mut W, bundle: &Bundle) -> Result<(), EngineError> {
    let bytes = bundle.to_bytes()?;
    sink.write_all(&(bytes.len() as u32).to_be_bytes())?;
    sink.write_all(&bytes)?;
    Ok(())
}

/// Read one length-prefixed bundle, or `None` on a clean end of stream.
pub(crate) fn read_bundle<R: Read>(source: &mut R) -> Result<Option<Bundle>, EngineError> {
    let mut prefix = [0u8; 4];
    match fill(source, &mut prefix)? {
        Fill::Eof => return Ok(None),
        Fill::Partial => return Err(EngineError::TruncatedSession),
        Fill::Full => {}
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_BUNDLE_LENGTH {
        return Err(EngineError::BundleTooLarge {
            len,
            max: MAX_BUNDLE_LENGTH,
        });
    }
    let mut bytes = vec![0u8; len];
    match fill(source, &mut bytes)? {
        Fill::Full => {}
        Fill::Eof | Fill::Partial => return Err(EngineError::TruncatedSession),
    }
    Ok(Some(Bundle::from_bytes(&bytes)?))
}

enum Fill {
    Full,
    Eof,
    Partial,
}

fn fill<R: Read>(source: &mut R, out: &mut [u8]) -> Result<Fill, EngineError> {
    let mut filled = 0;
    while filled < out.len() {
        match source.read(&mut out[filled..]) {
            Ok(0) if filled == 0 => return Ok(Fill::Eof),
            Ok(0) => return Ok(Fill::Partial),
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Fill::Full)
}
