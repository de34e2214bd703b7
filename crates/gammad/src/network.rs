//! Network worker - owns the externally reachable sockets.
//!
//! Listens on a framed TCP endpoint and a UDP endpoint. At most one TCP
//! peer is served at a time; further connection attempts wait in the OS
//! accept backlog until the current peer disconnects (documented
//! limitation of the single-operator design). Inbound bytes are decoded
//! with the frame codec and forwarded to the supervisor as typed
//! messages; supervisor-originated messages are framed and fully written
//! before the loop continues.
//!
//! A dropped connection is recoverable: the worker unregisters the peer,
//! clears its receive buffer, and keeps serving. Only a failed bind at
//! startup is fatal.

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use gamma_protocol::{
    decode_datagram, encode_datagram, tags, Frame, FrameCodec, Message, ProtocolError,
};

use crate::link::WorkerLink;

/// Datagrams larger than this are silently truncated by the OS; the
/// command subset spoken over UDP fits comfortably.
const UDP_RECV_BUFFER: usize = 8192;

/// Errors that can occur while setting up the network worker.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("Failed to bind {kind} endpoint {addr}: {source}")]
    Bind {
        kind: &'static str,
        addr: String,
        source: std::io::Error,
    },
}

/// Where responses and unsolicited messages are delivered: the most
/// recent sender is the sole addressee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyRoute {
    Stream,
    Datagram(SocketAddr),
}

/// The network worker.
pub struct NetworkWorker {
    listener: TcpListener,
    udp: UdpSocket,
    link: WorkerLink,
    peer: Option<Framed<TcpStream, FrameCodec>>,
    peer_addr: Option<SocketAddr>,
    route: ReplyRoute,
}

impl NetworkWorker {
    /// Binds both endpoints. A bind failure here is fatal to the daemon.
    pub async fn bind(
        tcp_addr: &str,
        udp_addr: &str,
        link: WorkerLink,
    ) -> Result<Self, NetError> {
        let listener = TcpListener::bind(tcp_addr)
            .await
            .map_err(|source| NetError::Bind {
                kind: "stream",
                addr: tcp_addr.to_string(),
                source,
            })?;
        let udp = UdpSocket::bind(udp_addr)
            .await
            .map_err(|source| NetError::Bind {
                kind: "datagram",
                addr: udp_addr.to_string(),
                source,
            })?;

        info!(
            tcp = %display_addr(listener.local_addr()),
            udp = %display_addr(udp.local_addr()),
            "network service listening"
        );

        Ok(Self {
            listener,
            udp,
            link,
            peer: None,
            peer_addr: None,
            route: ReplyRoute::Stream,
        })
    }

    /// Actual TCP listening address (useful with port 0).
    pub fn tcp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Actual UDP listening address (useful with port 0).
    pub fn udp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    /// Runs the worker loop until `close_ok` has been delivered or the
    /// supervisor link closes.
    pub async fn run(mut self) {
        let mut udp_buf = vec![0u8; UDP_RECV_BUFFER];

        loop {
            tokio::select! {
                // Outbound message from the supervisor.
                maybe = self.link.recv() => {
                    match maybe {
                        Some(msg) => {
                            let closing = msg.command == tags::CLOSE_OK;
                            self.deliver(msg).await;
                            if closing {
                                break;
                            }
                        }
                        None => {
                            debug!("supervisor link closed");
                            break;
                        }
                    }
                }

                // New connection, only while no peer is registered.
                result = self.listener.accept(), if self.peer.is_none() => {
                    match result {
                        Ok((stream, addr)) => {
                            info!(peer = %addr, "connection received");
                            // A fresh codec per connection resets the
                            // receive buffer.
                            self.peer = Some(Framed::new(stream, FrameCodec));
                            self.peer_addr = Some(addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                // Next frame from the connected peer.
                frame = next_frame(&mut self.peer), if self.peer.is_some() => {
                    self.handle_frame(frame).await;
                }

                // Inbound datagram.
                result = self.udp.recv_from(&mut udp_buf) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&udp_buf[..len], addr).await,
                        Err(e) => warn!(error = %e, "datagram receive failed"),
                    }
                }
            }
        }

        info!("network worker stopped");
    }

    /// Handles one decode attempt from the stream peer.
    async fn handle_frame(&mut self, frame: Option<Result<Frame, ProtocolError>>) {
        match frame {
            Some(Ok(Frame::Message(msg))) => {
                debug!(command = %msg.command, "frame received");
                self.route = ReplyRoute::Stream;
                if self.link.send(msg).await.is_err() {
                    warn!("supervisor link closed, dropping inbound frame");
                }
            }
            Some(Ok(Frame::Malformed(reason))) => {
                // The bad payload was consumed; the stream is still at a
                // frame boundary, so answer and keep the connection.
                warn!(reason = %reason, "malformed frame");
                self.send_stream(Message::error(format!("Invalid message: {reason}")))
                    .await;
            }
            Some(Err(e)) => {
                warn!(peer = ?self.peer_addr, error = %e, "frame decoding failed, dropping connection");
                self.drop_peer();
            }
            None => {
                info!(peer = ?self.peer_addr, "connection lost");
                self.drop_peer();
            }
        }
    }

    /// Handles one inbound datagram.
    async fn handle_datagram(&mut self, data: &[u8], addr: SocketAddr) {
        match decode_datagram(data) {
            Ok(msg) => {
                debug!(command = %msg.command, peer = %addr, "datagram received");
                self.route = ReplyRoute::Datagram(addr);
                if self.link.send(msg).await.is_err() {
                    warn!("supervisor link closed, dropping inbound datagram");
                }
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "malformed datagram");
                self.send_datagram(Message::error(format!("Invalid message: {e}")), addr)
                    .await;
            }
        }
    }

    /// Delivers one supervisor-originated message via the current route.
    async fn deliver(&mut self, msg: Message) {
        match self.route {
            ReplyRoute::Stream => self.send_stream(msg).await,
            ReplyRoute::Datagram(addr) => self.send_datagram(msg, addr).await,
        }
    }

    /// Frames and fully writes a message to the stream peer. A broken
    /// write tears the connection down without escalating.
    async fn send_stream(&mut self, msg: Message) {
        let Some(peer) = self.peer.as_mut() else {
            debug!(command = %msg.command, "no peer connected, dropping outbound message");
            return;
        };
        if let Err(e) = peer.send(msg).await {
            warn!(peer = ?self.peer_addr, error = %e, "write failed, dropping connection");
            self.drop_peer();
        }
    }

    /// Sends a message as one datagram to the last-seen sender.
    async fn send_datagram(&self, msg: Message, addr: SocketAddr) {
        match encode_datagram(&msg) {
            Ok(bytes) => {
                if let Err(e) = self.udp.send_to(&bytes, addr).await {
                    warn!(peer = %addr, error = %e, "datagram send failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to encode datagram"),
        }
    }

    fn drop_peer(&mut self) {
        self.peer = None;
        self.peer_addr = None;
    }
}

/// Polls the connected peer for its next frame; pending when no peer is
/// registered (the select guard keeps this branch disabled then).
async fn next_frame(
    peer: &mut Option<Framed<TcpStream, FrameCodec>>,
) -> Option<Result<Frame, ProtocolError>> {
    match peer.as_mut() {
        Some(framed) => framed.next().await,
        None => std::future::pending().await,
    }
}

fn display_addr(addr: std::io::Result<SocketAddr>) -> String {
    addr.map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_failure_is_fatal_error() {
        let (link, _other) = WorkerLink::pair();
        let result = NetworkWorker::bind("256.0.0.1:0", "127.0.0.1:0", link).await;
        assert!(matches!(result, Err(NetError::Bind { kind: "stream", .. })));
    }

    #[tokio::test]
    async fn test_ephemeral_ports_reported() {
        let (link, _other) = WorkerLink::pair();
        let worker = NetworkWorker::bind("127.0.0.1:0", "127.0.0.1:0", link)
            .await
            .unwrap();
        assert_ne!(worker.tcp_local_addr().unwrap().port(), 0);
        assert_ne!(worker.udp_local_addr().unwrap().port(), 0);
    }
}
