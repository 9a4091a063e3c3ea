//! Integration tests for framewire.
//!
//! These run a real server on a loopback ephemeral port and speak the wire
//! protocol over actual TCP connections.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use framewire::{FramewireError, Server, SessionHandle};

const MSG_ADD: u8 = 0;
const MSG_ECHO: u8 = 1;
const MSG_FAIL: u8 = 2;

fn localhost() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

/// Encode a wire packet by hand: `length(u32 LE) || type || payload`.
fn encode(message_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5 + payload.len());
    buf.extend((payload.len() as u32 + 1).to_le_bytes());
    buf.push(message_type);
    buf.extend_from_slice(payload);
    buf
}

/// Read one complete packet off the stream.
async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    let length = u32::from_le_bytes(prefix) as usize;
    assert!(length >= 1, "length must cover the type byte");

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await.unwrap();
    (body[0], body[1..].to_vec())
}

/// Wait for the server to close the connection (EOF or reset).
async fn expect_disconnect(stream: &mut TcpStream) {
    let mut buf = [0u8; 32];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("timed out waiting for disconnect");
    match read {
        Ok(0) => {}
        Ok(n) => panic!("expected disconnect, got {n} more bytes"),
        Err(_) => {} // reset counts too
    }
}

/// Poll a counter until it reaches `expected` or two seconds pass.
async fn wait_for_count(counter: &AtomicUsize, expected: usize) {
    for _ in 0..200 {
        if counter.load(Ordering::SeqCst) == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(counter.load(Ordering::SeqCst), expected);
}

fn add_handler(server: &Server) {
    server.add_callback(
        MSG_ADD,
        |session: SessionHandle, message_type: u8, payload: Bytes| async move {
            let a = i32::from_le_bytes(payload[0..4].try_into().unwrap());
            let b = i32::from_le_bytes(payload[4..8].try_into().unwrap());
            session.send_value(message_type, a.wrapping_add(b)).await
        },
    );
}

fn echo_handler(server: &Server) {
    server.add_callback(
        MSG_ECHO,
        |session: SessionHandle, message_type: u8, payload: Bytes| async move {
            session.send_data(message_type, &payload).await
        },
    );
}

async fn start(server: &mut Server) -> SocketAddr {
    server.start().await.unwrap();
    server.local_addr().unwrap()
}

#[tokio::test]
async fn test_end_to_end_add_scenario() {
    let mut server = Server::new(localhost(), 0);
    add_handler(&server);
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    // length = 9 (type + two i32), type = ADD, operands 2 and 3.
    let mut request = Vec::new();
    request.extend(9u32.to_le_bytes());
    request.push(MSG_ADD);
    request.extend(2i32.to_le_bytes());
    request.extend(3i32.to_le_bytes());
    client.write_all(&request).await.unwrap();

    let (message_type, payload) = read_packet(&mut client).await;
    assert_eq!(message_type, MSG_ADD);
    assert_eq!(payload, 5i32.to_le_bytes());

    server.stop().await;
}

#[tokio::test]
async fn test_chunked_request_reassembled() {
    let mut server = Server::new(localhost(), 0);
    add_handler(&server);
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut payload = Vec::new();
    payload.extend(40i32.to_le_bytes());
    payload.extend(2i32.to_le_bytes());
    let request = encode(MSG_ADD, &payload);

    // One byte at a time, flushing between writes.
    for byte in &request {
        client.write_all(&[*byte]).await.unwrap();
        client.flush().await.unwrap();
        sleep(Duration::from_millis(1)).await;
    }

    let (message_type, reply) = read_packet(&mut client).await;
    assert_eq!(message_type, MSG_ADD);
    assert_eq!(reply, 42i32.to_le_bytes());

    server.stop().await;
}

#[tokio::test]
async fn test_multiple_packets_in_one_write() {
    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    let mut burst = Vec::new();
    burst.extend(encode(MSG_ECHO, b"one"));
    burst.extend(encode(MSG_ECHO, b"two"));
    burst.extend(encode(MSG_ECHO, b"three"));
    client.write_all(&burst).await.unwrap();

    // Replies arrive in arrival order.
    for expected in [&b"one"[..], b"two", b"three"] {
        let (message_type, payload) = read_packet(&mut client).await;
        assert_eq!(message_type, MSG_ECHO);
        assert_eq!(payload, expected);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_type_disconnects_without_dispatch() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();

    let mut server = Server::new(localhost(), 0);
    server.add_callback(
        MSG_ADD,
        move |_session: SessionHandle, _message_type: u8, _payload: Bytes| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encode(99, b"junk")).await.unwrap();

    expect_disconnect(&mut client).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_oversized_packet_disconnects_without_dispatch() {
    let invocations = Arc::new(AtomicUsize::new(0));
    let counter = invocations.clone();

    let mut server = Server::new(localhost(), 0).with_max_packet_size(16);
    server.add_callback(
        MSG_ECHO,
        move |_session: SessionHandle, _message_type: u8, _payload: Bytes| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    // Declared length 17 against a ceiling of 16.
    client.write_all(&17u32.to_le_bytes()).await.unwrap();

    expect_disconnect(&mut client).await;
    assert_eq!(invocations.load(Ordering::SeqCst), 0);

    server.stop().await;
}

#[tokio::test]
async fn test_connect_and_disconnect_callbacks_fire_once() {
    let connects = Arc::new(AtomicUsize::new(0));
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    {
        let connects = connects.clone();
        server.set_on_client_connected(move |session| {
            assert!(session.is_connected());
            connects.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let disconnects = disconnects.clone();
        server.set_on_client_disconnected(move |session| {
            assert!(!session.is_connected());
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = start(&mut server).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encode(MSG_ECHO, b"ping")).await.unwrap();
    let _ = read_packet(&mut client).await;

    wait_for_count(&connects, 1).await;
    drop(client);
    wait_for_count(&disconnects, 1).await;

    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);

    server.stop().await;
}

#[tokio::test]
async fn test_concurrent_clients_are_independent() {
    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    let addr = start(&mut server).await;

    let mut alice = TcpStream::connect(addr).await.unwrap();
    let mut bob = TcpStream::connect(addr).await.unwrap();

    // Interleave traffic from both clients.
    for i in 0..20u8 {
        alice
            .write_all(&encode(MSG_ECHO, &[b'A', i]))
            .await
            .unwrap();
        bob.write_all(&encode(MSG_ECHO, &[b'B', i])).await.unwrap();
    }

    // Each connection sees only its own replies, in the order it sent them.
    for i in 0..20u8 {
        let (_, payload) = read_packet(&mut alice).await;
        assert_eq!(payload, [b'A', i]);

        let (_, payload) = read_packet(&mut bob).await;
        assert_eq!(payload, [b'B', i]);
    }

    server.stop().await;
}

#[tokio::test]
async fn test_handler_error_disconnects_only_that_session() {
    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    server.add_callback(
        MSG_FAIL,
        |_session: SessionHandle, _message_type: u8, _payload: Bytes| async {
            Err(FramewireError::Handler("boom".into()))
        },
    );
    let addr = start(&mut server).await;

    let mut failing = TcpStream::connect(addr).await.unwrap();
    let mut healthy = TcpStream::connect(addr).await.unwrap();

    failing.write_all(&encode(MSG_FAIL, b"")).await.unwrap();
    expect_disconnect(&mut failing).await;

    // The server and the other session keep working.
    healthy.write_all(&encode(MSG_ECHO, b"still here")).await.unwrap();
    let (_, payload) = read_packet(&mut healthy).await;
    assert_eq!(payload, b"still here");

    server.stop().await;
}

#[tokio::test]
async fn test_shutdown_drains_sessions() {
    let disconnects = Arc::new(AtomicUsize::new(0));

    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    {
        let disconnects = disconnects.clone();
        server.set_on_client_disconnected(move |_| {
            disconnects.fetch_add(1, Ordering::SeqCst);
        });
    }
    let addr = start(&mut server).await;

    let mut one = TcpStream::connect(addr).await.unwrap();
    let mut two = TcpStream::connect(addr).await.unwrap();
    // Round-trip on both so both sessions are known to be live.
    one.write_all(&encode(MSG_ECHO, b"warm")).await.unwrap();
    let _ = read_packet(&mut one).await;
    two.write_all(&encode(MSG_ECHO, b"warm")).await.unwrap();
    let _ = read_packet(&mut two).await;

    server.stop().await;

    // Every session was torn down before stop returned.
    assert_eq!(disconnects.load(Ordering::SeqCst), 2);
    expect_disconnect(&mut one).await;
    expect_disconnect(&mut two).await;

    // Listening socket is gone.
    assert!(TcpStream::connect(addr).await.is_err());

    // Second stop is a no-op.
    server.stop().await;
}

#[tokio::test]
async fn test_run_with_shutdown_handle() {
    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&encode(MSG_ECHO, b"hi")).await.unwrap();
    let (_, payload) = read_packet(&mut client).await;
    assert_eq!(payload, b"hi");

    shutdown.shutdown();
    // stop() after the handle fired still drains and returns.
    timeout(Duration::from_secs(2), server.stop())
        .await
        .expect("shutdown did not drain in time");

    expect_disconnect(&mut client).await;
}

#[tokio::test]
async fn test_session_metadata_visible_to_host() {
    let seen: Arc<std::sync::Mutex<Vec<(u64, IpAddr)>>> =
        Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut server = Server::new(localhost(), 0);
    echo_handler(&server);
    {
        let seen = seen.clone();
        server.set_on_client_connected(move |session| {
            seen.lock()
                .unwrap()
                .push((session.id(), session.ip_address()));
        });
    }
    let addr = start(&mut server).await;

    let _a = TcpStream::connect(addr).await.unwrap();
    let _b = TcpStream::connect(addr).await.unwrap();

    for _ in 0..200 {
        if seen.lock().unwrap().len() == 2 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    // Ids are unique and the peer address is loopback.
    assert_ne!(seen[0].0, seen[1].0);
    assert!(seen.iter().all(|(_, ip)| *ip == localhost()));
    drop(seen);

    server.stop().await;
}
