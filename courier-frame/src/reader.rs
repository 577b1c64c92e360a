//! Byte-oriented reader that pulls and decrypts frames on demand.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use std::io::{self, Read};
use tracing::trace;

use courier_types::{ConnectionContext, Direction, TransportId};

use crate::error::FrameError;
use crate::keys::{connection_tag, derive_frame_key, frame_nonce};
use crate::{AEAD_TAG_LENGTH, FRAME_HEADER_LENGTH, MAX_FRAME_PAYLOAD, TAG_LENGTH};

enum Fill {
    Full,
    Eof,
    Partial,
}

/// Adapts a sequence of encrypted frames back into an ordinary byte source.
///
/// The connection tag is verified before the first frame is decrypted.
/// Left-over plaintext from a frame is buffered for subsequent reads.
/// End-of-stream in the middle of a frame is reported as
/// [`FrameError::TruncatedConnection`]; end-of-stream at a frame boundary
/// is an ordinary end of stream.
pub struct FrameReader<R: Read> {
    inner: R,
    cipher: XChaCha20Poly1305,
    direction: Direction,
    transport: TransportId,
    connection: u64,
    counter: u64,
    expected_tag: [u8; TAG_LENGTH],
    tag_checked: bool,
    buf: Vec<u8>,
    pos: usize,
}

impl<R: Read> FrameReader<R> {
    /// Create a reader for the peer's outgoing direction.
    ///
    /// `ctx` describes this instance's side of the connection; the reader
    /// derives the peer's keys by reversing the direction.
    pub fn new(inner: R, ctx: &ConnectionContext) -> Self {
        let peer = ctx.direction.reverse();
        let key = derive_frame_key(ctx.secret(), peer);
        let expected_tag = connection_tag(ctx.secret(), peer, ctx.transport, ctx.connection);
        Self {
            inner,
            cipher: XChaCha20Poly1305::new(&key),
            direction: peer,
            transport: ctx.transport,
            connection: ctx.connection,
            counter: 0,
            expected_tag,
            tag_checked: false,
            buf: Vec::new(),
            pos: 0,
        }
    }

    fn fill(&mut self, out: &mut [u8]) -> io::Result<Fill> {
        let mut filled = 0;
        while filled < out.len() {
            match self.inner.read(&mut out[filled..]) {
                Ok(0) if filled == 0 => return Ok(Fill::Eof),
                Ok(0) => return Ok(Fill::Partial),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Fill::Full)
    }

    fn check_tag(&mut self) -> io::Result<bool> {
        let mut tag = [0u8; TAG_LENGTH];
        match self.fill(&mut tag)? {
            Fill::Eof => return Ok(false),
            Fill::Partial => return Err(FrameError::TruncatedConnection.into()),
            Fill::Full => {}
        }
        if tag != self.expected_tag {
            return Err(FrameError::AuthenticationFailure.into());
        }
        self.tag_checked = true;
        Ok(true)
    }

    /// Read and decrypt the next frame into the plaintext buffer.
    ///
    /// Returns false on a clean end of stream.
    fn read_frame(&mut self) -> io::Result<bool> {
        if !self.tag_checked && !self.check_tag()? {
            return Ok(false);
        }
        loop {
            let mut header = [0u8; FRAME_HEADER_LENGTH];
            match self.fill(&mut header)? {
                Fill::Eof => return Ok(false),
                Fill::Partial => return Err(FrameError::TruncatedConnection.into()),
                Fill::Full => {}
            }
            let actual = u64::from_be_bytes(header[..8].try_into().unwrap());
            let len = u32::from_be_bytes(header[8..].try_into().unwrap()) as usize;
            if actual != self.counter {
                return Err(FrameError::FrameDesync {
                    expected: self.counter,
                    actual,
                }
                .into());
            }
            let max = MAX_FRAME_PAYLOAD + AEAD_TAG_LENGTH;
            if len > max {
                return Err(FrameError::FrameTooLarge { len, max }.into());
            }
            let mut ciphertext = vec![0u8; len];
            match self.fill(&mut ciphertext)? {
                Fill::Full => {}
                Fill::Eof | Fill::Partial => {
                    return Err(FrameError::TruncatedConnection.into())
                }
            }
            let nonce =
                frame_nonce(self.direction, self.transport, self.connection, self.counter);
            let plaintext = self
                .cipher
                .decrypt(&nonce, ciphertext.as_slice())
                .map_err(|_| io::Error::from(FrameError::AuthenticationFailure))?;
            trace!(counter = self.counter, bytes = plaintext.len(), "opened frame");
            self.counter += 1;
            if plaintext.is_empty() {
                continue; // Nothing usable in this frame, try the next
            }
            self.buf = plaintext;
            self.pos = 0;
            return Ok(true);
        }
    }
}

impl<R: Read> Read for FrameReader<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        if self.pos == self.buf.len() && !self.read_frame()? {
            return Ok(0);
        }
        let n = out.len().min(self.buf.len() - self.pos);
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
