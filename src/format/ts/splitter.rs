use bytes::{Bytes, BytesMut};
use log::trace;

use super::types::{SYNC_BYTE, TS_PACKET_SIZE};
use crate::av::Stage;

/// Splits opaque byte chunks into exactly 188-byte TS packets.
///
/// Incoming bytes are appended to a carry buffer; a packet is emitted only
/// when both its start and the byte one packet later hold the 0x47 sync
/// byte, so the final complete packet of a chunk stays buffered until the
/// next chunk (or a flush) confirms its boundary. Sync loss is recovered by
/// advancing one byte at a time until a plausible packet boundary reappears.
#[derive(Debug, Default)]
pub struct PacketSplitter {
    buffer: BytesMut,
}

impl PacketSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for PacketSplitter {
    type Input = Bytes;
    type Output = Bytes;

    fn push(&mut self, input: Bytes, out: &mut Vec<Bytes>) {
        self.buffer.extend_from_slice(&input);

        let mut start = 0;
        let mut end = TS_PACKET_SIZE;
        while end < self.buffer.len() {
            if self.buffer[start] == SYNC_BYTE && self.buffer[end] == SYNC_BYTE {
                out.push(Bytes::copy_from_slice(&self.buffer[start..end]));
                start += TS_PACKET_SIZE;
                end += TS_PACKET_SIZE;
            } else {
                trace!("TS sync lost at buffer offset {}, resyncing", start);
                start += 1;
                end += 1;
            }
        }

        let _ = self.buffer.split_to(start);
    }

    fn flush(&mut self, out: &mut Vec<Bytes>) {
        // A held packet is only trustworthy if it is exactly one packet long
        // and starts on a sync byte.
        if self.buffer.len() == TS_PACKET_SIZE && self.buffer[0] == SYNC_BYTE {
            out.push(self.buffer.split().freeze());
        }
    }

    fn partial_flush(&mut self, out: &mut Vec<Bytes>) {
        self.flush(out);
    }

    fn end_timeline(&mut self, out: &mut Vec<Bytes>) {
        self.flush(out);
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}
