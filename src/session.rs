//! Client session: one accepted connection, its receive loop, and the
//! handle handlers use to reply.
//!
//! Each session runs on its own tokio task. The task pulls bytes from the
//! socket into a bounded scratch buffer, feeds them to the
//! [`PacketAssembler`], and dispatches every completed packet in arrival
//! order — a packet is fully handled before the next byte of the stream is
//! reassembled. Any exit condition (peer close, I/O error, protocol
//! violation, unknown message type, handler fault, server shutdown) tears
//! the session down the same way: the socket is shut down exactly once and
//! the disconnect notification fires exactly once.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::dispatch::DispatchTable;
use crate::error::{FramewireError, Result};
use crate::protocol::{encode_packet, PacketAssembler, WireValue, READ_BUFFER_SIZE};

/// Connect/disconnect notification supplied by the host.
pub type LifecycleCallback = Arc<dyn Fn(SessionHandle) + Send + Sync>;

/// State shared between the session task and every handle clone.
struct SessionShared {
    /// Session id, unique per server instance. Used for logging and host
    /// bookkeeping.
    id: u64,
    /// Remote address of the accepted connection.
    peer: SocketAddr,
    /// Write half of the socket. A send's result reflects the actual socket
    /// write, so failures surface to the caller instead of a queue.
    writer: Mutex<OwnedWriteHalf>,
    /// True until the receive loop has exited and teardown ran.
    connected: AtomicBool,
    /// Outbound encode ceiling (same as the reassembly ceiling).
    max_packet_size: u32,
}

/// Cheaply cloneable handle to a live session.
///
/// Passed to message handlers and lifecycle callbacks so the host can write
/// replies and identify the client.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<SessionShared>,
}

impl SessionHandle {
    fn new(id: u64, peer: SocketAddr, writer: OwnedWriteHalf, max_packet_size: u32) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                id,
                peer,
                writer: Mutex::new(writer),
                connected: AtomicBool::new(true),
                max_packet_size,
            }),
        }
    }

    /// Get the session id.
    #[inline]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Get the remote address.
    #[inline]
    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.peer
    }

    /// Get the remote IP address.
    #[inline]
    pub fn ip_address(&self) -> IpAddr {
        self.inner.peer.ip()
    }

    /// Get the remote port.
    #[inline]
    pub fn port(&self) -> u16 {
        self.inner.peer.port()
    }

    /// True until the receive loop has exited and teardown is complete.
    #[inline]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Send a packet with the given message type and payload.
    ///
    /// # Errors
    ///
    /// [`FramewireError::PayloadTooLarge`] if the payload exceeds the
    /// configured ceiling, [`FramewireError::ConnectionClosed`] if the
    /// session has terminated, or the underlying I/O error of a failed
    /// write. No partial-send retries are attempted.
    pub async fn send_data(&self, message_type: u8, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(FramewireError::ConnectionClosed);
        }

        let packet = encode_packet(message_type, payload, self.inner.max_packet_size)?;
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&packet).await?;
        Ok(())
    }

    /// Send a single fixed-width value, little-endian.
    ///
    /// The wire width comes from the value's type:
    ///
    /// ```ignore
    /// session.send_value(MSG_ADD, 5i32).await?; // 4-byte payload
    /// ```
    pub async fn send_value<V: WireValue>(&self, message_type: u8, value: V) -> Result<()> {
        self.send_data(message_type, value.to_le_wire().as_ref())
            .await
    }

    /// Shut the socket down, exactly once.
    async fn close(&self) {
        if self.inner.connected.swap(false, Ordering::AcqRel) {
            let mut writer = self.inner.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}

/// Why a receive loop exited. Drives the teardown log line.
enum Disconnect {
    /// Orderly close or reset by the peer.
    PeerClosed,
    /// Socket read failed.
    Io(std::io::Error),
    /// Oversized/empty packet or unknown message type.
    Protocol(FramewireError),
    /// A handler panicked.
    HandlerFault(u8),
    /// A handler returned an error.
    HandlerError(u8, FramewireError),
    /// The server requested shutdown.
    Shutdown,
}

/// A spawned session as the server tracks it.
pub(crate) struct SessionTask {
    handle: SessionHandle,
    join: JoinHandle<()>,
}

impl SessionTask {
    /// Whether the session task has exited.
    pub(crate) fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the session task and release it.
    pub(crate) async fn join(self) {
        if let Err(e) = self.join.await {
            if e.is_panic() {
                tracing::error!(id = self.handle.id(), "session task panicked");
            }
        }
    }
}

/// Everything a session owns while running.
pub(crate) struct Session {
    handle: SessionHandle,
    reader: OwnedReadHalf,
    assembler: PacketAssembler,
    dispatch: Arc<RwLock<DispatchTable>>,
    on_connect: Option<LifecycleCallback>,
    on_disconnect: Option<LifecycleCallback>,
    shutdown: watch::Receiver<bool>,
}

impl Session {
    /// Split the accepted stream and spawn the session task.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn spawn(
        id: u64,
        stream: TcpStream,
        peer: SocketAddr,
        dispatch: Arc<RwLock<DispatchTable>>,
        on_connect: Option<LifecycleCallback>,
        on_disconnect: Option<LifecycleCallback>,
        shutdown: watch::Receiver<bool>,
        max_packet_size: u32,
    ) -> SessionTask {
        let (reader, writer) = stream.into_split();
        let handle = SessionHandle::new(id, peer, writer, max_packet_size);

        let session = Session {
            handle: handle.clone(),
            reader,
            assembler: PacketAssembler::with_max_packet_size(max_packet_size),
            dispatch,
            on_connect,
            on_disconnect,
            shutdown,
        };

        let join = tokio::spawn(session.run());
        SessionTask { handle, join }
    }

    async fn run(mut self) {
        tracing::debug!(id = self.handle.id(), peer = %self.handle.peer_addr(), "client connected");

        if let Some(callback) = &self.on_connect {
            callback(self.handle.clone());
        }

        let reason = self.receive_loop().await;
        let id = self.handle.id();
        match &reason {
            Disconnect::PeerClosed => tracing::debug!(id, "peer disconnected"),
            Disconnect::Shutdown => tracing::debug!(id, "session stopped by server shutdown"),
            Disconnect::Io(e) => tracing::warn!(id, error = %e, "socket error, disconnecting"),
            Disconnect::Protocol(e) => {
                tracing::warn!(id, error = %e, "protocol violation, disconnecting")
            }
            Disconnect::HandlerFault(t) => {
                tracing::error!(id, message_type = t, "handler panicked, disconnecting")
            }
            Disconnect::HandlerError(t, e) => {
                tracing::warn!(id, message_type = t, error = %e, "handler failed, disconnecting")
            }
        }

        // Marks the session terminated before the host is notified.
        self.handle.close().await;

        if let Some(callback) = &self.on_disconnect {
            callback(self.handle.clone());
        }
    }

    async fn receive_loop(&mut self) -> Disconnect {
        let mut scratch = vec![0u8; READ_BUFFER_SIZE];

        loop {
            let n = tokio::select! {
                // wait_for checks the current value, so a signal sent before
                // this session was spawned is still observed. A dropped
                // sender counts as shutdown as well.
                _ = self.shutdown.wait_for(|stop| *stop) => return Disconnect::Shutdown,
                read = self.reader.read(&mut scratch) => match read {
                    Ok(0) => return Disconnect::PeerClosed,
                    Ok(n) => n,
                    Err(e) => return Disconnect::Io(e),
                },
            };

            let packets = match self.assembler.push(&scratch[..n]) {
                Ok(packets) => packets,
                Err(e) => return Disconnect::Protocol(e),
            };

            for packet in packets {
                let handler = {
                    let table = self.dispatch.read().unwrap_or_else(PoisonError::into_inner);
                    table.get(packet.message_type())
                };

                let Some(handler) = handler else {
                    return Disconnect::Protocol(FramewireError::UnknownMessageType(
                        packet.message_type(),
                    ));
                };

                let message_type = packet.message_type();
                let payload: Bytes = packet.payload;
                let call = handler.call(self.handle.clone(), message_type, payload);

                // Awaited inline, so packets stay strictly ordered within the
                // connection; the task boundary confines a panicking handler
                // to this session and still runs teardown.
                match tokio::spawn(call).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => return Disconnect::HandlerError(message_type, e),
                    Err(join) if join.is_panic() => return Disconnect::HandlerFault(message_type),
                    Err(_) => return Disconnect::Shutdown,
                }
            }
        }
    }
}
