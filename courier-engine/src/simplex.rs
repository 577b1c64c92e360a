//! One-way session drivers.
//!
//! A simplex transport (a USB stick, a one-way relay) carries whole
//! sessions in one direction only. The writing side generates a single
//! bundle sized to the transport's capacity; the reading side consumes
//! every bundle in the stream until a clean end of stream.

use std::io::{Read, Write};

use tracing::debug;

use courier_frame::{FrameReader, FrameWriter};
use courier_store::{Database, SyncStore};
use courier_types::ConnectionContext;

use crate::error::EngineError;
use crate::wire::{read_bundle, write_bundle};

/// Generate one bundle for the context's contact and write it to `sink`
/// as an encrypted session.
///
/// `capacity` is the transport's payload budget in bytes; the bundle is
/// generated to fit it. The sink is flushed before returning.
pub fn send<D: Database, W: Write>(
    store: &SyncStore<D>,
    ctx: &ConnectionContext,
    sink: W,
    capacity: usize,
) -> Result<(), EngineError> {
    debug!(contact = %ctx.contact, capacity, "starting outgoing simplex session");
    let mut writer = FrameWriter::new(sink, ctx);
    let bundle = store.generate_bundle(ctx.contact, capacity)?;
    write_bundle(&mut writer, &bundle)?;
    writer.flush()?;
    debug!(batches = bundle.batches.len(), "outgoing simplex session complete");
    Ok(())
}

/// Read an encrypted session from `source` and feed every bundle in it to
/// the store.
///
/// Returns the number of bundles consumed. An empty session (tag only, or
/// nothing at all) is valid and consumes zero bundles.
pub fn receive<D: Database, R: Read>(
    store: &SyncStore<D>,
    ctx: &ConnectionContext,
    source: R,
) -> Result<usize, EngineError> {
    debug!(contact = %ctx.contact, "starting incoming simplex session");
    let mut reader = FrameReader::new(source, ctx);
    let mut consumed = 0;
    while let Some(bundle) = read_bundle(&mut reader)? {
        store.receive_bundle(ctx.contact, &bundle)?;
        consumed += 1;
    }
    debug!(consumed, "incoming simplex session complete");
    Ok(consumed)
}
