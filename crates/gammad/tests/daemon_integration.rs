//! Integration tests for the assembled daemon.
//!
//! These tests spawn the full worker stack (network, supervisor,
//! spectrometer, position) on ephemeral ports with the simulated
//! detector and an in-memory sink, then drive it over real TCP and UDP
//! sockets the way an operator console would.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::Framed;

use gamma_protocol::{
    decode_datagram, encode_datagram, encode_frame, tags, Frame, FrameCodec, Message,
};
use gammad::config::Config;
use gammad::daemon::Daemon;
use gammad::driver::{FaultHandle, SimDetector};
use gammad::storage::MemorySink;

// ============================================================================
// Constants
// ============================================================================

/// Maximum time to wait for any single response
const RECV_WINDOW: Duration = Duration::from_secs(10);

/// Fast session tick so tests complete quickly
const TEST_TICK_MS: u64 = 10;

// ============================================================================
// Test Helpers
// ============================================================================

/// Test daemon context: the full worker stack on ephemeral loopback ports.
struct TestDaemon {
    daemon: Daemon,
    fault: FaultHandle,
}

impl TestDaemon {
    /// Spawns a daemon with the simulated detector and an in-memory sink.
    async fn spawn() -> Self {
        let mut config = Config::default();
        config.network.tcp_listen = "127.0.0.1:0".to_string();
        config.network.udp_listen = "127.0.0.1:0".to_string();
        config.session.tick_interval_ms = TEST_TICK_MS;
        config.position.source = "none".to_string();

        let detector = SimDetector::new();
        let fault = detector.fault_handle();

        let daemon = Daemon::builder(config)
            .driver(Box::new(detector))
            .sink(Arc::new(MemorySink::new()))
            .spawn()
            .await
            .expect("spawn daemon");

        Self { daemon, fault }
    }

    /// Opens a framed TCP connection to the daemon.
    async fn connect(&self) -> TestClient {
        let stream = TcpStream::connect(self.daemon.tcp_addr)
            .await
            .expect("connect to daemon");
        TestClient {
            framed: Framed::new(stream, FrameCodec),
        }
    }

    async fn shutdown(self) {
        self.daemon.shutdown().await;
    }
}

/// Framed TCP client with receive timeouts.
struct TestClient {
    framed: Framed<TcpStream, FrameCodec>,
}

impl TestClient {
    async fn send(&mut self, msg: Message) {
        self.framed.send(msg).await.expect("send command");
    }

    async fn recv(&mut self) -> Message {
        let frame = timeout(RECV_WINDOW, self.framed.next())
            .await
            .expect("timed out waiting for response")
            .expect("connection closed by daemon")
            .expect("connection error");
        match frame {
            Frame::Message(msg) => msg,
            Frame::Malformed(reason) => panic!("malformed frame from daemon: {reason}"),
        }
    }

    /// Receives messages until one matches the wanted command, skipping
    /// interleaved spectra and errors.
    async fn recv_until(&mut self, command: &str) -> Message {
        loop {
            let msg = self.recv().await;
            if msg.command == command {
                return msg;
            }
        }
    }
}

fn config_message() -> Message {
    Message::new(tags::DETECTOR_CONFIG)
        .with("voltage", 775)
        .with("coarse_gain", 1.0)
        .with("fine_gain", 1.375)
        .with("num_channels", 64)
        .with("lld", 3)
        .with("uld", 110)
}

fn start_message(name: &str) -> Message {
    Message::new(tags::START_SESSION)
        .with("session_name", name)
        .with("livetime", 0.01)
}

/// Configures the detector and drains the acknowledgement.
async fn configure(client: &mut TestClient) {
    client.send(config_message()).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::DETECTOR_CONFIG_SUCCESS);
}

// ============================================================================
// Connection and Dispatch Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_pong() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(Message::new(tags::PING).with("seq", 42)).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::PING_OK);
    assert_eq!(reply.get_u64("seq"), Some(42));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_command_rejected() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(Message::new("frobnicate")).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::UNKNOWN_COMMAND);
    assert!(reply.get_str("message").unwrap().contains("frobnicate"));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconnect_after_disconnect() {
    let daemon = TestDaemon::spawn().await;

    let mut client = daemon.connect().await;
    client.send(Message::new(tags::PING)).await;
    assert_eq!(client.recv().await.command, tags::PING_OK);
    drop(client);

    // The daemon survives the disconnect and accepts a new connection.
    let mut client = daemon.connect().await;
    client.send(Message::new(tags::PING)).await;
    assert_eq!(client.recv().await.command, tags::PING_OK);

    daemon.shutdown().await;
}

// ============================================================================
// Framing Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_frame_split_across_writes() {
    let daemon = TestDaemon::spawn().await;

    let mut stream = TcpStream::connect(daemon.daemon.tcp_addr)
        .await
        .expect("connect to daemon");

    // Deliver the frame one byte per write; the decoder must reassemble.
    let frame = encode_frame(&Message::new(tags::PING).with("seq", 7)).unwrap();
    for byte in frame {
        stream.write_all(&[byte]).await.unwrap();
        stream.flush().await.unwrap();
    }

    let mut client = TestClient {
        framed: Framed::new(stream, FrameCodec),
    };
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::PING_OK);
    assert_eq!(reply.get_u64("seq"), Some(7));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_payload_answered_without_disconnect() {
    let daemon = TestDaemon::spawn().await;

    let mut stream = TcpStream::connect(daemon.daemon.tcp_addr)
        .await
        .expect("connect to daemon");

    // Valid length header, garbage payload.
    let payload = b"not json at all";
    let mut frame = (payload.len() as u32).to_be_bytes().to_vec();
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.unwrap();

    let mut client = TestClient {
        framed: Framed::new(stream, FrameCodec),
    };
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::ERROR);

    // The connection is still usable.
    client.send(Message::new(tags::PING)).await;
    assert_eq!(client.recv().await.command, tags::PING_OK);

    daemon.shutdown().await;
}

// ============================================================================
// UDP Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_status_over_udp() {
    let daemon = TestDaemon::spawn().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(daemon.daemon.udp_addr).await.unwrap();
    let bytes = encode_datagram(&Message::new(tags::GET_STATUS)).unwrap();
    socket.send(&bytes).await.unwrap();

    let mut buf = vec![0u8; 65536];
    let len = timeout(RECV_WINDOW, socket.recv(&mut buf))
        .await
        .expect("timed out waiting for datagram")
        .unwrap();
    let reply = decode_datagram(&buf[..len]).unwrap();
    assert_eq!(reply.command, tags::STATUS);
    assert_eq!(reply.get_str("session_state"), Some("ready"));
    assert_eq!(reply.get_str("detector_state"), Some("cold"));

    daemon.shutdown().await;
}

// ============================================================================
// Session Lifecycle Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_detector_config_reflected_in_status() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;

    client.send(Message::new(tags::GET_STATUS)).await;
    let status = client.recv().await;
    assert_eq!(status.command, tags::STATUS);
    assert_eq!(status.get_str("detector_state"), Some("warm"));

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_busy_session_rejects_config_and_start() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;
    client.send(start_message("busy-check")).await;
    let reply = client.recv_until(tags::START_SESSION_SUCCESS).await;
    assert_eq!(reply.get_str("session_name"), Some("busy-check"));

    client.send(config_message()).await;
    let reply = client.recv_until(tags::DETECTOR_CONFIG_BUSY).await;
    assert!(reply.get_str("message").unwrap().contains("active"));

    client.send(start_message("another")).await;
    client.recv_until(tags::START_SESSION_BUSY).await;

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_session_streams_indexed_spectra() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;
    client.send(start_message("survey")).await;
    client.recv_until(tags::START_SESSION_SUCCESS).await;

    let mut indices = Vec::new();
    while indices.len() < 3 {
        let msg = client.recv_until(tags::SPECTRUM).await;
        assert_eq!(msg.get_str("session_name"), Some("survey"));
        let channels = msg
            .fields
            .get("channels")
            .and_then(|v| v.as_array())
            .expect("spectrum carries channels");
        assert_eq!(channels.len(), 64);
        indices.push(msg.get_u64("index").unwrap());
    }
    assert_eq!(indices, vec![0, 1, 2]);

    client.send(Message::new(tags::STOP_SESSION)).await;
    client.recv_until(tags::STOP_SESSION_SUCCESS).await;

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_then_dump_replays_records() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;
    client.send(start_message("replay")).await;
    client.recv_until(tags::START_SESSION_SUCCESS).await;

    // Let at least two acquisitions land before stopping.
    client.recv_until(tags::SPECTRUM).await;
    client.recv_until(tags::SPECTRUM).await;
    client.send(Message::new(tags::STOP_SESSION)).await;
    client.recv_until(tags::STOP_SESSION_SUCCESS).await;

    // Dump defaults to the last session.
    client.send(Message::new(tags::DUMP_SESSION)).await;
    let header = client.recv_until(tags::DUMP_SESSION_SUCCESS).await;
    assert_eq!(header.get_str("session_name"), Some("replay"));
    let count = header.get_u64("count").unwrap();
    assert!(count >= 2, "expected at least 2 stored records, got {count}");

    for expected in 0..count {
        let msg = client.recv().await;
        assert_eq!(msg.command, tags::SPECTRUM);
        assert_eq!(msg.get_u64("index"), Some(expected));
    }

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dump_without_history() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(Message::new(tags::DUMP_SESSION)).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::DUMP_SESSION_NONE);

    daemon.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_without_session() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(Message::new(tags::STOP_SESSION)).await;
    let reply = client.recv().await;
    assert_eq!(reply.command, tags::STOP_SESSION_NONE);

    daemon.shutdown().await;
}

// ============================================================================
// Failure Handling Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_three_failures_stop_the_session() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;
    daemon.fault.fail_next(3);
    client.send(start_message("doomed")).await;
    client.recv_until(tags::START_SESSION_SUCCESS).await;

    // Three acquisition errors, then the final explanatory error.
    let mut acquisition_errors = 0;
    loop {
        let msg = client.recv_until(tags::ERROR).await;
        let text = msg.get_str("message").unwrap();
        if text.contains("3 times") {
            break;
        }
        acquisition_errors += 1;
    }
    assert_eq!(acquisition_errors, 3);

    // The daemon is ready again.
    client.send(Message::new(tags::GET_STATUS)).await;
    let status = client.recv_until(tags::STATUS).await;
    assert_eq!(status.get_str("session_state"), Some("ready"));

    client.send(start_message("recovered")).await;
    client.recv_until(tags::START_SESSION_SUCCESS).await;

    daemon.shutdown().await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_close_acknowledged_and_daemon_exits() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    client.send(Message::new(tags::CLOSE)).await;
    let reply = client.recv_until(tags::CLOSE_OK).await;
    assert_eq!(reply.command, tags::CLOSE_OK);

    // Every worker winds down without cancellation.
    timeout(RECV_WINDOW, daemon.daemon.wait())
        .await
        .expect("daemon did not stop after close");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_stops_daemon_mid_session() {
    let daemon = TestDaemon::spawn().await;
    let mut client = daemon.connect().await;

    configure(&mut client).await;
    client.send(start_message("interrupted")).await;
    client.recv_until(tags::START_SESSION_SUCCESS).await;

    timeout(RECV_WINDOW, daemon.shutdown())
        .await
        .expect("daemon did not stop after cancellation");
}
