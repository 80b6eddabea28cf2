//! Per-tunnel Ns/Nr bookkeeping with 16-bit serial arithmetic.

/// Check if `a` precedes `b` modulo 2^16.
pub fn seq_before(a: u16, b: u16) -> bool {
    a != b && b.wrapping_sub(a) < 0x8000
}

/// Classification of an inbound sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// New message; Nr advanced past it.
    Accepted,
    /// Already seen; must be re-acknowledged but not processed again.
    Duplicate,
}

/// Sequence state of one control connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    ns: u16,
    nr: u16,
}

impl Sequence {
    /// Start a sequence after accepting the peer's first message.
    pub fn new(peer_ns: u16) -> Self {
        Self {
            ns: 0,
            nr: peer_ns.wrapping_add(1),
        }
    }

    /// Next sequence number we will send.
    pub fn ns(&self) -> u16 {
        self.ns
    }

    /// Next sequence number we expect from the peer.
    pub fn nr(&self) -> u16 {
        self.nr
    }

    /// Take the next Ns for a message with a body.
    pub fn next_ns(&mut self) -> u16 {
        let ns = self.ns;
        self.ns = self.ns.wrapping_add(1);
        ns
    }

    /// Record an inbound Ns.
    pub fn on_receive(&mut self, ns: u16) -> Received {
        if seq_before(ns, self.nr) {
            return Received::Duplicate;
        }
        self.nr = ns.wrapping_add(1);
        Received::Accepted
    }

    /// Check if `ns` was already received.
    pub fn is_duplicate(&self, ns: u16) -> bool {
        seq_before(ns, self.nr)
    }
}
