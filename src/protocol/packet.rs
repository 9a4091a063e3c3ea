//! Decoded packet with typed accessors.
//!
//! Uses `bytes::Bytes` so the payload can be handed to a handler without
//! copying.

use bytes::Bytes;

/// One complete unit of the wire protocol: a message type and its payload,
/// already stripped of the length prefix and type byte.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Message type discriminator.
    pub message_type: u8,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Packet {
    /// Create a new packet from its parts.
    pub fn new(message_type: u8, payload: Bytes) -> Self {
        Self {
            message_type,
            payload,
        }
    }

    /// Get the message type.
    #[inline]
    pub fn message_type(&self) -> u8 {
        self.message_type
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the payload length.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }
}
