//! Async UDP socket wrapper for L2TP control traffic.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::core::Outbound;
use crate::core::constants::MAX_DATAGRAM_SIZE;

/// Default receive buffer size (largest UDP payload).
pub const DEFAULT_RECV_BUFFER_SIZE: usize = MAX_DATAGRAM_SIZE;

/// Async UDP socket with an owned receive buffer.
#[derive(Debug)]
pub struct L2tpSocket {
    /// The underlying UDP socket.
    socket: UdpSocket,
    /// Receive buffer.
    recv_buffer: Vec<u8>,
}

impl L2tpSocket {
    /// Create a socket bound to the given address.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        L2tpSocketBuilder::new().bind(addr).await
    }

    /// Wrap an existing UDP socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        L2tpSocketBuilder::new().from_socket(socket)
    }

    /// Get the local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Send a datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Receive a datagram and the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Send every queued datagram, draining `outbox`.
    ///
    /// A failed send is logged and the rest of the queue still goes out;
    /// lost control messages are recovered by retransmission.
    pub async fn flush(&self, outbox: &mut Vec<Outbound>) -> usize {
        let mut sent = 0;
        for outbound in outbox.drain(..) {
            match self.socket.send_to(&outbound.datagram, outbound.destination).await {
                Ok(_) => sent += 1,
                Err(e) => log::warn!("send to {} failed: {e}", outbound.destination),
            }
        }
        sent
    }
}

/// Builder for sockets with custom options.
#[derive(Debug, Clone)]
pub struct L2tpSocketBuilder {
    recv_buffer_size: usize,
}

impl Default for L2tpSocketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl L2tpSocketBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
        }
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    /// Bind to the given address and create a socket.
    pub async fn bind(self, addr: SocketAddr) -> io::Result<L2tpSocket> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(self.from_socket(socket))
    }

    /// Create a socket from an existing UDP socket.
    pub fn from_socket(self, socket: UdpSocket) -> L2tpSocket {
        L2tpSocket {
            socket,
            recv_buffer: vec![0u8; self.recv_buffer_size],
        }
    }
}
