//! # framewire
//!
//! Embeddable TCP server for a length-prefixed, type-tagged binary message
//! protocol.
//!
//! A host application registers a handler per message type, starts the
//! server, and reacts to connect/disconnect events; framewire turns the
//! arbitrarily chunked TCP byte stream of each client into discrete,
//! size-bounded packets and dispatches them, exactly once each and in
//! arrival order.
//!
//! ## Architecture
//!
//! - **Wire protocol** ([`protocol`]): `u32 LE length || u8 type || payload`,
//!   `length = 1 + payload_size`, bounded by a configured ceiling.
//! - **Packet reassembler** ([`protocol::PacketAssembler`]): pure per-connection
//!   state machine, no I/O, independently testable.
//! - **Dispatch table** ([`dispatch::DispatchTable`]): message type → handler,
//!   shared read-mostly across sessions; at most one handler per type.
//! - **Sessions** ([`session::SessionHandle`]): one tokio task per accepted
//!   connection; a slow handler stalls only its own client.
//! - **Server** ([`server::Server`]): accept loop, session registry, and
//!   cooperative shutdown that drains every session.
//!
//! Payload bodies are opaque: serialization, authentication, and transport
//! security are the host's concern.
//!
//! ## Example
//!
//! ```ignore
//! use framewire::{Server, SessionHandle};
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let mut server = Server::new([127, 0, 0, 1].into(), 47110);
//!
//!     // Type 0: reply with the sum of two little-endian i32s.
//!     server.add_callback(0, |session: SessionHandle, message_type, payload| async move {
//!         let a = i32::from_le_bytes(payload[0..4].try_into().unwrap());
//!         let b = i32::from_le_bytes(payload[4..8].try_into().unwrap());
//!         session.send_value(message_type, a + b).await
//!     });
//!
//!     server.set_on_client_connected(|session| {
//!         println!("client {} connected from {}", session.id(), session.ip_address());
//!     });
//!
//!     server.run().await
//! }
//! ```

pub mod dispatch;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;

pub use dispatch::{DispatchTable, HandlerResult, MessageHandler};
pub use error::{FramewireError, Result};
pub use protocol::{Packet, PacketAssembler, WireValue, DEFAULT_MAX_PACKET_SIZE};
pub use server::{Server, ShutdownHandle};
pub use session::SessionHandle;
