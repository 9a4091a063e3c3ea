//! Arithmetic demo server.
//!
//! Registers three handlers — ADD (0), SUBTRACT (1), MULTIPLY (2) — each
//! taking two little-endian `i32` operands and replying with the result
//! under the same message type. Ctrl-C requests a clean shutdown that
//! drains every connected client.
//!
//! Try it with a few bytes of netcat:
//!
//! ```text
//! printf '\x09\x00\x00\x00\x00\x02\x00\x00\x00\x03\x00\x00\x00' | nc 127.0.0.1 47110 | xxd
//! ```

use bytes::Bytes;
use framewire::{FramewireError, HandlerResult, Server, SessionHandle};

const MSG_ADD: u8 = 0;
const MSG_SUBTRACT: u8 = 1;
const MSG_MULTIPLY: u8 = 2;

fn decode_operands(payload: &[u8]) -> Option<(i32, i32)> {
    if payload.len() < 8 {
        return None;
    }
    let a = i32::from_le_bytes(payload[0..4].try_into().ok()?);
    let b = i32::from_le_bytes(payload[4..8].try_into().ok()?);
    Some((a, b))
}

async fn arithmetic(
    session: SessionHandle,
    message_type: u8,
    payload: Bytes,
    op: fn(i32, i32) -> i32,
) -> HandlerResult {
    match decode_operands(&payload) {
        Some((a, b)) => session.send_value(message_type, op(a, b)).await,
        None => Err(FramewireError::Handler(
            "expected two little-endian i32 operands".into(),
        )),
    }
}

#[tokio::main]
async fn main() -> framewire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut server = Server::new([127, 0, 0, 1].into(), 47110);

    server.add_callback(MSG_ADD, |s: SessionHandle, t: u8, p: Bytes| {
        arithmetic(s, t, p, i32::wrapping_add)
    });
    server.add_callback(MSG_SUBTRACT, |s: SessionHandle, t: u8, p: Bytes| {
        arithmetic(s, t, p, i32::wrapping_sub)
    });
    server.add_callback(MSG_MULTIPLY, |s: SessionHandle, t: u8, p: Bytes| {
        arithmetic(s, t, p, i32::wrapping_mul)
    });

    server.set_on_client_connected(|session| {
        tracing::info!(
            id = session.id(),
            ip = %session.ip_address(),
            port = session.port(),
            "client connected"
        );
    });
    server.set_on_client_disconnected(|session| {
        tracing::info!(id = session.id(), "client disconnected");
    });

    // The host owns the server; the interrupt handler only holds a
    // shutdown handle.
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await
}
