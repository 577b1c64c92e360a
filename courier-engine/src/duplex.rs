//! Two-way session driver.
//!
//! Over a duplex transport the two sides alternate bundles, the initiator
//! writing first. Each side keeps its turn order strictly: generate and
//! send, then read and consume, and so on. A side finishes once its most
//! recently sent and most recently received bundles were both idle
//! (no acks and no batches); since an idle bundle gives the peer nothing
//! new to acknowledge, both sides converge on idle together.

use std::io::{Read, Write};

use tracing::debug;

use courier_frame::{FrameReader, FrameWriter};
use courier_store::{Database, SyncStore};
use courier_types::{ConnectionContext, Direction};

use crate::error::EngineError;
use crate::wire::{read_bundle, write_bundle};

/// Run a duplex exchange over the given stream halves until both sides go
/// idle, or the peer closes the stream.
///
/// `capacity` bounds the size of each outgoing bundle. Returns the number
/// of bundles consumed from the peer.
pub fn exchange<D: Database, R: Read, W: Write>(
    store: &SyncStore<D>,
    ctx: &ConnectionContext,
    source: R,
    sink: W,
    capacity: usize,
) -> Result<usize, EngineError> {
    debug!(
        contact = %ctx.contact,
        direction = ?ctx.direction,
        "starting duplex session"
    );
    let mut reader = FrameReader::new(source, ctx);
    let mut writer = FrameWriter::new(sink, ctx);
    let mut sending = ctx.direction == Direction::Initiator;
    let mut sent_idle = false;
    let mut received_idle = false;
    let mut consumed = 0;
    while !(sent_idle && received_idle) {
        if sending {
            let bundle = store.generate_bundle(ctx.contact, capacity)?;
            sent_idle = bundle.is_idle();
            write_bundle(&mut writer, &bundle)?;
            writer.flush()?;
            debug!(batches = bundle.batches.len(), idle = sent_idle, "sent bundle");
        } else {
            let Some(bundle) = read_bundle(&mut reader)? else {
                debug!("peer closed the session");
                break;
            };
            received_idle = bundle.is_idle();
            store.receive_bundle(ctx.contact, &bundle)?;
            debug!(batches = bundle.batches.len(), idle = received_idle, "consumed bundle");
            consumed += 1;
        }
        sending = !sending;
    }
    writer.flush()?;
    debug!(consumed, "duplex session complete");
    Ok(consumed)
}
