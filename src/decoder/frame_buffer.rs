//! Reassembles arbitrarily chunked bulk-IN reads into 4-byte USB-MIDI packets

use bytes::BytesMut;

/// Size of one USB-MIDI event packet
pub const PACKET_SIZE: usize = 4;

/// Accumulates raw bytes and hands out whole packets, keeping any partial tail
#[derive(Debug, Default)]
pub struct FrameBuffer {
    pending: BytesMut,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(64),
        }
    }

    /// Append bytes and split off every complete packet.
    ///
    /// Returns an empty buffer when fewer than 4 bytes are pending.
    pub fn push(&mut self, data: &[u8]) -> BytesMut {
        self.pending.extend_from_slice(data);
        let complete = self.pending.len() / PACKET_SIZE * PACKET_SIZE;
        self.pending.split_to(complete)
    }

    /// Bytes of an incomplete packet waiting for the next read
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Iterate the packets of a buffer returned by [`FrameBuffer::push`]
pub fn packets(frames: &[u8]) -> impl Iterator<Item = [u8; PACKET_SIZE]> + '_ {
    frames
        .chunks_exact(PACKET_SIZE)
        .map(|c| [c[0], c[1], c[2], c[3]])
}
