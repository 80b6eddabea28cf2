//! Call sessions carried inside a tunnel.

use std::time::Instant;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// ICRP sent, waiting for ICCN.
    WaitConnect,
    /// ICCN received.
    Established,
}

/// A single call.
#[derive(Debug, Clone)]
pub struct Session {
    /// Our session id.
    local_id: u16,

    /// Session id assigned by the peer.
    peer_id: u16,

    /// Session state.
    phase: SessionPhase,

    /// Call serial number from the ICRQ, if any.
    call_serial: Option<u32>,

    /// Connect speed reported in the ICCN.
    connect_speed: Option<u32>,

    /// Created time.
    created_at: Instant,
}

impl Session {
    /// Create a session awaiting its ICCN.
    pub fn new(local_id: u16, peer_id: u16, call_serial: Option<u32>, now: Instant) -> Self {
        Self {
            local_id,
            peer_id,
            phase: SessionPhase::WaitConnect,
            call_serial,
            connect_speed: None,
            created_at: now,
        }
    }

    /// Get the local session id.
    pub fn local_id(&self) -> u16 {
        self.local_id
    }

    /// Get the peer's session id.
    pub fn peer_id(&self) -> u16 {
        self.peer_id
    }

    /// Get the session phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Get the call serial number.
    pub fn call_serial(&self) -> Option<u32> {
        self.call_serial
    }

    /// Get the connect speed.
    pub fn connect_speed(&self) -> Option<u32> {
        self.connect_speed
    }

    /// Mark the call connected.
    pub fn connect(&mut self, connect_speed: Option<u32>) {
        self.phase = SessionPhase::Established;
        self.connect_speed = connect_speed;
    }

    /// Get session age.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.created_at)
    }
}
