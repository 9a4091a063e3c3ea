//! Server lifecycle: bind/listen, the accept loop, the session registry,
//! and shutdown.
//!
//! The server owns the listening socket and the collection of live session
//! tasks. Each accepted connection gets its own task; the accept loop is the
//! only place the registry is touched, so it needs no locking. Shutdown is
//! cooperative: a shared watch channel wakes the accept loop and every
//! session's receive loop, and `stop` waits until all of them have drained.
//!
//! # Example
//!
//! ```ignore
//! use framewire::{Server, SessionHandle};
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let mut server = Server::new([127, 0, 0, 1].into(), 47110);
//!     server.add_callback(0, |session: SessionHandle, message_type, payload| async move {
//!         session.send_data(message_type, &payload).await
//!     });
//!     server.run().await
//! }
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatch::{DispatchTable, MessageHandler};
use crate::error::{FramewireError, Result};
use crate::protocol::DEFAULT_MAX_PACKET_SIZE;
use crate::session::{LifecycleCallback, Session, SessionHandle, SessionTask};

/// Server lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Idle,
    Listening,
    Stopped,
}

/// Handle for requesting server shutdown from another task, typically an
/// OS interrupt handler. Cheaply cloneable; the host owns the [`Server`]
/// itself, there is no global state.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Request shutdown. Returns immediately; the server drains its
    /// sessions before `run`/`stop` completes.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// Embeddable TCP message-protocol server.
///
/// Register handlers and lifecycle callbacks, then either `run` (blocking
/// until shutdown is requested) or `start`/`stop`.
pub struct Server {
    bind_ip: IpAddr,
    bind_port: u16,
    max_packet_size: u32,
    dispatch: Arc<RwLock<DispatchTable>>,
    on_connect: Option<LifecycleCallback>,
    on_disconnect: Option<LifecycleCallback>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    accept_task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    state: ServerState,
}

impl Server {
    /// Create a server that will bind to the given address and port.
    ///
    /// Nothing is bound until [`start`](Self::start) or [`run`](Self::run).
    pub fn new(bind_ip: IpAddr, bind_port: u16) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            bind_ip,
            bind_port,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            dispatch: Arc::new(RwLock::new(DispatchTable::new())),
            on_connect: None,
            on_disconnect: None,
            shutdown_tx,
            shutdown_rx,
            accept_task: None,
            local_addr: None,
            state: ServerState::Idle,
        }
    }

    /// Set the packet size ceiling for both reassembly and outbound encode.
    ///
    /// Both peers must agree on this value out of band; it is not
    /// negotiated. Default: 256.
    pub fn with_max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Register a handler for a message type.
    ///
    /// Returns `false` (keeping the existing handler) if the type is
    /// already bound.
    pub fn add_callback<H: MessageHandler>(&self, message_type: u8, handler: H) -> bool {
        self.dispatch
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add(message_type, handler)
    }

    /// Remove the handler for a message type.
    ///
    /// Returns `false` if the type was unbound.
    pub fn remove_callback(&self, message_type: u8) -> bool {
        self.dispatch
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_type)
    }

    /// Set the connect notification, fired once per session before any data
    /// is read. At most one callback; set before `start`.
    pub fn set_on_client_connected<F>(&mut self, callback: F)
    where
        F: Fn(SessionHandle) + Send + Sync + 'static,
    {
        self.on_connect = Some(Arc::new(callback));
    }

    /// Set the disconnect notification, fired once per session after its
    /// receive loop has exited. At most one callback; set before `start`.
    pub fn set_on_client_disconnected<F>(&mut self, callback: F)
    where
        F: Fn(SessionHandle) + Send + Sync + 'static,
    {
        self.on_disconnect = Some(Arc::new(callback));
    }

    /// Handle for requesting shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Address actually bound, once listening. Useful when binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Bind, listen, and spawn the accept loop.
    ///
    /// # Errors
    ///
    /// [`FramewireError::Io`] if bind fails — the server stays `Idle` and
    /// `start` may be retried. [`FramewireError::AlreadyStarted`] if the
    /// server is not idle.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Idle {
            return Err(FramewireError::AlreadyStarted);
        }

        let listener = TcpListener::bind((self.bind_ip, self.bind_port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "listening");

        let ctx = AcceptContext {
            dispatch: self.dispatch.clone(),
            on_connect: self.on_connect.clone(),
            on_disconnect: self.on_disconnect.clone(),
            shutdown: self.shutdown_rx.clone(),
            max_packet_size: self.max_packet_size,
        };

        self.accept_task = Some(tokio::spawn(accept_loop(listener, ctx)));
        self.local_addr = Some(local_addr);
        self.state = ServerState::Listening;
        Ok(())
    }

    /// Start and block until shutdown is requested via a
    /// [`ShutdownHandle`], then drain all sessions.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        self.wait().await;
        Ok(())
    }

    /// Request shutdown and wait until the accept loop and every session
    /// have finished. Idempotent: a no-op unless currently listening.
    pub async fn stop(&mut self) {
        if self.state != ServerState::Listening {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        self.wait().await;
    }

    async fn wait(&mut self) {
        if let Some(task) = self.accept_task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    tracing::error!("accept loop panicked");
                }
            }
        }
        self.state = ServerState::Stopped;
        tracing::info!("server stopped");
    }
}

/// Everything the accept loop needs, cloned out of the server so the loop
/// can run on its own task.
struct AcceptContext {
    dispatch: Arc<RwLock<DispatchTable>>,
    on_connect: Option<LifecycleCallback>,
    on_disconnect: Option<LifecycleCallback>,
    shutdown: watch::Receiver<bool>,
    max_packet_size: u32,
}

async fn accept_loop(listener: TcpListener, ctx: AcceptContext) {
    let mut sessions: Vec<SessionTask> = Vec::new();
    let mut next_id: u64 = 1;
    let mut shutdown = ctx.shutdown.clone();

    loop {
        tokio::select! {
            // Discard the non-`Send` watch guard inside the branch so the
            // select's output type stays `Send` across the awaits below.
            _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    // Reap terminated sessions before adding the new one;
                    // this bounds the registry without a separate timer.
                    reap_finished(&mut sessions).await;

                    let task = Session::spawn(
                        next_id,
                        stream,
                        peer,
                        ctx.dispatch.clone(),
                        ctx.on_connect.clone(),
                        ctx.on_disconnect.clone(),
                        ctx.shutdown.clone(),
                        ctx.max_packet_size,
                    );
                    next_id += 1;
                    sessions.push(task);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            },
        }
    }

    // Closing the listener unblocks nothing further; sessions observe the
    // same shutdown signal and exit their receive loops.
    drop(listener);

    tracing::debug!(live = sessions.len(), "draining sessions");
    for task in sessions {
        task.join().await;
    }
}

/// Join and drop every session whose task has already exited.
async fn reap_finished(sessions: &mut Vec<SessionTask>) {
    let mut i = 0;
    while i < sessions.len() {
        if sessions[i].is_finished() {
            let task = sessions.swap_remove(i);
            task.join().await;
        } else {
            i += 1;
        }
    }
}
