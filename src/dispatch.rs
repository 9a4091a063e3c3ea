//! Dispatch table mapping message types to handlers.
//!
//! The table is shared read-mostly across all sessions behind a single
//! `RwLock`; registration is expected before the server starts or between
//! connections, but concurrent mutation is safe. A type can hold at most one
//! handler: `add` never overwrites.
//!
//! # Example
//!
//! ```ignore
//! use framewire::dispatch::DispatchTable;
//!
//! let mut table = DispatchTable::new();
//! table.add(0, |session, message_type, payload| async move {
//!     session.send_data(message_type, &payload).await
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::session::SessionHandle;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait for message handlers.
///
/// Handlers receive the originating session (so they can write a reply), the
/// message type they were registered under, and the payload already stripped
/// of length prefix and type byte. They run on the calling session's task:
/// a slow handler stalls only its own client.
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle one decoded packet.
    fn call(
        &self,
        session: SessionHandle,
        message_type: u8,
        payload: Bytes,
    ) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(SessionHandle, u8, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(
        &self,
        session: SessionHandle,
        message_type: u8,
        payload: Bytes,
    ) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(session, message_type, payload))
    }
}

/// Mapping from message type to handler.
pub struct DispatchTable {
    handlers: HashMap<u8, Arc<dyn MessageHandler>>,
}

impl DispatchTable {
    /// Create a new empty table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Register a handler for a message type.
    ///
    /// Returns `false` (and leaves the existing handler bound) if the type
    /// already has one.
    pub fn add<H: MessageHandler>(&mut self, message_type: u8, handler: H) -> bool {
        if self.handlers.contains_key(&message_type) {
            return false;
        }
        self.handlers.insert(message_type, Arc::new(handler));
        true
    }

    /// Remove the handler for a message type.
    ///
    /// Returns `false` if the type was unbound.
    pub fn remove(&mut self, message_type: u8) -> bool {
        self.handlers.remove(&message_type).is_some()
    }

    /// Look up the handler for a message type.
    pub fn get(&self, message_type: u8) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&message_type).cloned()
    }

    /// Whether a handler is bound for a message type.
    pub fn contains(&self, message_type: u8) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::new()
    }
}
