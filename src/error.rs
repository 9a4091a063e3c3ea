//! Error types for framewire.

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error)]
pub enum FramewireError {
    /// I/O error during socket operations (bind, accept, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Peer declared a packet larger than the configured ceiling.
    ///
    /// Connection-fatal: a stream that violates the size bound cannot be
    /// trusted to realign on packet boundaries.
    #[error("declared packet length {declared} exceeds maximum {max}")]
    OversizedPacket { declared: u32, max: u32 },

    /// Peer declared a zero-length packet (the length field must cover at
    /// least the type byte). Connection-fatal, like [`Self::OversizedPacket`].
    #[error("declared packet length is zero")]
    EmptyPacket,

    /// Outbound payload would not fit under the configured ceiling.
    #[error("payload of {size} bytes does not fit in maximum packet size {max}")]
    PayloadTooLarge { size: usize, max: u32 },

    /// A well-formed packet arrived for a message type with no handler.
    /// Connection-fatal.
    #[error("no handler registered for message type {0}")]
    UnknownMessageType(u8),

    /// Send on a session whose receive loop has already terminated.
    #[error("connection closed")]
    ConnectionClosed,

    /// `start` was called on a server that is not idle.
    #[error("server already started")]
    AlreadyStarted,

    /// Failure reported by a host-supplied handler.
    #[error("handler failure: {0}")]
    Handler(String),
}

/// Result type alias using FramewireError.
pub type Result<T> = std::result::Result<T, FramewireError>;
