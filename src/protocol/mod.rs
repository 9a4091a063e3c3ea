//! Wire protocol: framing rules, decoded packets, and the reassembler.
//!
//! The wire format is a 4-byte little-endian length prefix followed by a
//! 1-byte message type and an opaque payload. The length counts everything
//! after the prefix, so `length = 1 + payload_size`.

mod assembler;
mod packet;
mod wire;

pub use assembler::PacketAssembler;
pub use packet::Packet;
pub use wire::{
    decode_length, encode_packet, WireValue, DEFAULT_MAX_PACKET_SIZE, LENGTH_FIELD_SIZE,
    READ_BUFFER_SIZE, TYPE_FIELD_SIZE,
};
