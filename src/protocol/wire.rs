//! Wire format encoding and decoding.
//!
//! Packet layout:
//! ```text
//! ┌──────────────┬──────────┬──────────────────┐
//! │ Length       │ Type     │ Payload          │
//! │ 4 bytes      │ 1 byte   │ length - 1 bytes │
//! │ uint32 LE    │          │ opaque           │
//! └──────────────┴──────────┴──────────────────┘
//! ```
//!
//! The length field counts everything after itself (type byte plus payload),
//! so a packet with an empty payload has `length == 1`. The length is
//! little-endian and bounded by a ceiling both peers agree on out of band.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{FramewireError, Result};

/// Size of the length prefix in bytes (fixed, exactly 4).
pub const LENGTH_FIELD_SIZE: usize = 4;

/// Size of the message type discriminator in bytes.
pub const TYPE_FIELD_SIZE: usize = 1;

/// Default ceiling for the declared packet length (type byte + payload).
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 256;

/// Size of the per-session read scratch buffer.
///
/// Any positive size is correct since the reassembler handles arbitrary
/// chunking; this is merely large enough to pull a full packet per `recv`
/// in the common case.
pub const READ_BUFFER_SIZE: usize = 512;

/// Encode a complete wire packet: `length(u32 LE) || type(u8) || payload`.
///
/// # Errors
///
/// Returns [`FramewireError::PayloadTooLarge`] if the encoded length would
/// exceed `max_packet_size`. Oversized payloads are never truncated.
pub fn encode_packet(message_type: u8, payload: &[u8], max_packet_size: u32) -> Result<Bytes> {
    let length = TYPE_FIELD_SIZE + payload.len();
    if length > max_packet_size as usize {
        return Err(FramewireError::PayloadTooLarge {
            size: payload.len(),
            max: max_packet_size,
        });
    }

    let mut buf = BytesMut::with_capacity(LENGTH_FIELD_SIZE + length);
    buf.put_u32_le(length as u32);
    buf.put_u8(message_type);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Reinterpret 4 bytes as the little-endian length field.
///
/// No validation happens here; the ceiling is enforced by the reassembler
/// once the value is known.
#[inline]
pub fn decode_length(buf: &[u8; LENGTH_FIELD_SIZE]) -> u32 {
    u32::from_le_bytes(*buf)
}

/// Fixed-width values with a well-defined little-endian wire image.
///
/// Backs [`SessionHandle::send_value`](crate::session::SessionHandle::send_value):
/// the width comes from the value's own type, so callers never pass a size.
pub trait WireValue {
    /// Byte image of the value.
    type Bytes: AsRef<[u8]>;

    /// Little-endian byte image of the value.
    fn to_le_wire(&self) -> Self::Bytes;
}

macro_rules! impl_wire_value {
    ($($t:ty => $n:expr),* $(,)?) => {$(
        impl WireValue for $t {
            type Bytes = [u8; $n];

            #[inline]
            fn to_le_wire(&self) -> [u8; $n] {
                self.to_le_bytes()
            }
        }
    )*};
}

impl_wire_value!(
    u8 => 1, i8 => 1,
    u16 => 2, i16 => 2,
    u32 => 4, i32 => 4,
    u64 => 8, i64 => 8,
    f32 => 4, f64 => 8,
);
