//! Core traits for the L2TP control plane.
//!
//! The dispatcher never touches a socket. It hands encoded datagrams to a
//! [`Transmit`] implementation, which the server loop flushes afterwards.

use std::net::SocketAddr;

/// Capability to send a datagram to a peer.
///
/// Implementations must not block: the dispatcher calls this while it
/// processes a datagram.
pub trait Transmit {
    /// Queue `datagram` for delivery to `destination`.
    fn transmit(&mut self, datagram: &[u8], destination: SocketAddr);
}

/// An encoded datagram waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Encoded L2TP frame.
    pub datagram: Vec<u8>,
    /// Where to send it.
    pub destination: SocketAddr,
}

impl Transmit for Vec<Outbound> {
    fn transmit(&mut self, datagram: &[u8], destination: SocketAddr) {
        self.push(Outbound {
            datagram: datagram.to_vec(),
            destination,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_collects_in_order() {
        let peer: SocketAddr = "192.0.2.1:1701".parse().unwrap();
        let mut outbox: Vec<Outbound> = Vec::new();

        outbox.transmit(&[1, 2, 3], peer);
        outbox.transmit(&[4], peer);

        assert_eq!(outbox.len(), 2);
        assert_eq!(outbox[0].datagram, vec![1, 2, 3]);
        assert_eq!(outbox[1].datagram, vec![4]);
        assert_eq!(outbox[1].destination, peer);
    }
}
