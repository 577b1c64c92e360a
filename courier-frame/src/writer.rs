//! Byte-oriented writer that seals bytes into encrypted frames.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::XChaCha20Poly1305;
use std::io::{self, Write};
use tracing::trace;

use courier_types::{ConnectionContext, Direction, TransportId};

use crate::error::FrameError;
use crate::keys::{connection_tag, derive_frame_key, frame_nonce};
use crate::{MAX_FRAME_PAYLOAD, TAG_LENGTH};

/// Adapts an ordinary byte sink into a sequence of encrypted frames.
///
/// Writes accumulate into an internal buffer and are sealed into one frame
/// when the buffer fills or on [`flush`](Write::flush). The connection tag
/// is written before the first frame.
pub struct FrameWriter<W: Write> {
    inner: W,
    cipher: XChaCha20Poly1305,
    direction: Direction,
    transport: TransportId,
    connection: u64,
    counter: u64,
    tag: [u8; TAG_LENGTH],
    tag_written: bool,
    buf: Vec<u8>,
}

impl<W: Write> FrameWriter<W> {
    /// Create a writer for this side's outgoing direction.
    pub fn new(inner: W, ctx: &ConnectionContext) -> Self {
        let key = derive_frame_key(ctx.secret(), ctx.direction);
        let tag = connection_tag(ctx.secret(), ctx.direction, ctx.transport, ctx.connection);
        Self {
            inner,
            cipher: XChaCha20Poly1305::new(&key),
            direction: ctx.direction,
            transport: ctx.transport,
            connection: ctx.connection,
            counter: 0,
            tag,
            tag_written: false,
            buf: Vec::with_capacity(MAX_FRAME_PAYLOAD),
        }
    }

    fn write_tag(&mut self) -> io::Result<()> {
        if !self.tag_written {
            self.inner.write_all(&self.tag)?;
            self.tag_written = true;
        }
        Ok(())
    }

    fn seal_frame(&mut self) -> io::Result<()> {
        self.write_tag()?;
        let nonce = frame_nonce(self.direction, self.transport, self.connection, self.counter);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, self.buf.as_slice())
            .map_err(|_| io::Error::from(FrameError::AuthenticationFailure))?;
        self.inner.write_all(&self.counter.to_be_bytes())?;
        self.inner.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
        self.inner.write_all(&ciphertext)?;
        trace!(counter = self.counter, bytes = self.buf.len(), "sealed frame");
        self.counter += 1;
        self.buf.clear();
        Ok(())
    }

    /// Flush any buffered bytes and return the underlying sink.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for FrameWriter<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = MAX_FRAME_PAYLOAD - self.buf.len();
        let take = room.min(data.len());
        self.buf.extend_from_slice(&data[..take]);
        if self.buf.len() == MAX_FRAME_PAYLOAD {
            self.seal_frame()?;
        }
        Ok(take)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.write_tag()?;
        if !self.buf.is_empty() {
            self.seal_frame()?;
        }
        self.inner.flush()
    }
}
