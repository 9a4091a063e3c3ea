//! Packet reassembler for accumulating partial reads.
//!
//! Uses `bytes::BytesMut` for buffer management and a two-state machine
//! driven purely by byte count:
//! - `AwaitingLength`: need the 4-byte length prefix
//! - `AwaitingPayload`: length known, need `declared` more bytes
//!
//! A single socket read may contain the tail of one packet, several complete
//! packets, and the head of the next; a single packet may span many reads.
//! Both cases flow through the same state machine. `push` never blocks and
//! performs no I/O, so it can be tested with synthetic chunk boundaries.

use bytes::BytesMut;

use super::packet::Packet;
use super::wire::{decode_length, DEFAULT_MAX_PACKET_SIZE, LENGTH_FIELD_SIZE, TYPE_FIELD_SIZE};
use crate::error::{FramewireError, Result};

/// State machine for packet parsing.
#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for the complete 4-byte length prefix.
    AwaitingLength,
    /// Length known, waiting for `declared` bytes (type byte + payload).
    AwaitingPayload { declared: u32 },
}

/// Per-connection buffer that turns raw byte chunks into complete packets.
///
/// Owned exclusively by the session that owns the connection.
pub struct PacketAssembler {
    /// Accumulated bytes from socket reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Ceiling for the declared packet length.
    max_packet_size: u32,
}

impl PacketAssembler {
    /// Create an assembler with the default packet size ceiling.
    pub fn new() -> Self {
        Self::with_max_packet_size(DEFAULT_MAX_PACKET_SIZE)
    }

    /// Create an assembler with a custom packet size ceiling.
    pub fn with_max_packet_size(max_packet_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(LENGTH_FIELD_SIZE + max_packet_size as usize),
            state: State::AwaitingLength,
            max_packet_size,
        }
    }

    /// Push freshly received bytes and extract all complete packets.
    ///
    /// Returns the packets completed by this chunk, in stream order (may be
    /// empty while a packet is still partial). Partial data is buffered for
    /// the next push.
    ///
    /// # Errors
    ///
    /// Returns [`FramewireError::OversizedPacket`] or
    /// [`FramewireError::EmptyPacket`] when the declared length violates
    /// `0 < length <= max_packet_size`. These are protocol violations: the
    /// caller must disconnect, not retry — a corrupted stream cannot be
    /// trusted to realign on packet boundaries.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }

        Ok(packets)
    }

    /// Try to extract a single packet from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(packet))` if a complete packet was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on a protocol violation
    fn try_extract_one(&mut self) -> Result<Option<Packet>> {
        match self.state {
            State::AwaitingLength => {
                if self.buffer.len() < LENGTH_FIELD_SIZE {
                    return Ok(None);
                }

                let declared = decode_length(
                    self.buffer[..LENGTH_FIELD_SIZE]
                        .try_into()
                        .expect("buffer has enough bytes"),
                );

                if declared == 0 {
                    return Err(FramewireError::EmptyPacket);
                }
                if declared > self.max_packet_size {
                    return Err(FramewireError::OversizedPacket {
                        declared,
                        max: self.max_packet_size,
                    });
                }

                let _ = self.buffer.split_to(LENGTH_FIELD_SIZE);
                self.state = State::AwaitingPayload { declared };

                // The payload may already be buffered.
                self.try_extract_one()
            }

            State::AwaitingPayload { declared } => {
                let declared = declared as usize;
                if self.buffer.len() < declared {
                    return Ok(None);
                }

                let frame = self.buffer.split_to(declared).freeze();
                self.state = State::AwaitingLength;

                // declared >= 1, so the type byte is always present.
                let message_type = frame[0];
                let payload = frame.slice(TYPE_FIELD_SIZE..);

                Ok(Some(Packet::new(message_type, payload)))
            }
        }
    }

    /// Number of buffered bytes not yet assembled into a packet.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the assembler holds no partial data.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::AwaitingLength => "AwaitingLength",
            State::AwaitingPayload { .. } => "AwaitingPayload",
        }
    }
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}
