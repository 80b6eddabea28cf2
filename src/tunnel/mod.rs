//! Control connections and the message dispatcher.
//!
//! A [`Tunnel`] is the state of one control connection: its phase, the
//! Ns/Nr pair, the unacknowledged messages and the calls it carries.
//! [`Dispatcher`] owns every tunnel and routes inbound messages to them.

mod dispatcher;
mod retransmit;
mod sequence;
mod session;

pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use retransmit::{RetransmitAction, RetransmitPolicy, RetransmitQueue};
pub use sequence::{Received, Sequence, seq_before};
pub use session::{Session, SessionPhase};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::core::Transmit;
use crate::core::constants::{ERROR_NO_CONTROL_CONNECTION, STOPCCN_GENERAL_ERROR};
use crate::frame::{AttributeType, Avp, ControlMessageType, ReplyFrame, ResultCode};

/// Control connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    /// SCCRP sent, waiting for SCCCN.
    AwaitingScccn,
    /// Control connection is up.
    Established,
    /// StopCCN sent, waiting for its acknowledgement.
    Stopping,
    /// StopCCN received; the tunnel is being removed.
    Closed,
}

/// Outcome of a timer poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// The tunnel stays.
    Active,
    /// The tunnel must be removed.
    Finished(&'static str),
}

/// One control connection.
#[derive(Debug)]
pub struct Tunnel {
    /// Our tunnel id (key in the dispatcher's table).
    id: u16,

    /// Tunnel id assigned by the peer; goes in every outbound header.
    peer_tunnel_id: u16,

    /// Peer's address.
    peer: SocketAddr,

    /// Tunnel state.
    phase: TunnelPhase,

    /// Header version used on this tunnel.
    protocol_version: u8,

    /// Ns/Nr.
    sequence: Sequence,

    /// Calls keyed by local session id.
    sessions: HashMap<u16, Session>,

    /// Host Name from the SCCRQ.
    peer_host_name: Option<String>,

    /// Receive Window Size from the SCCRQ.
    peer_receive_window: Option<u16>,

    /// Messages awaiting acknowledgement.
    retransmit: RetransmitQueue,

    /// Last time anything arrived from the peer.
    last_received: Instant,

    /// Created time.
    created_at: Instant,
}

impl Tunnel {
    /// Create a tunnel for an accepted SCCRQ carrying `peer_ns`.
    pub fn new(
        id: u16,
        peer_tunnel_id: u16,
        peer: SocketAddr,
        protocol_version: u8,
        peer_ns: u16,
        policy: RetransmitPolicy,
        now: Instant,
    ) -> Self {
        Self {
            id,
            peer_tunnel_id,
            peer,
            phase: TunnelPhase::AwaitingScccn,
            protocol_version,
            sequence: Sequence::new(peer_ns),
            sessions: HashMap::new(),
            peer_host_name: None,
            peer_receive_window: None,
            retransmit: RetransmitQueue::new(policy),
            last_received: now,
            created_at: now,
        }
    }

    /// Get the local tunnel id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Get the peer's tunnel id.
    pub fn peer_tunnel_id(&self) -> u16 {
        self.peer_tunnel_id
    }

    /// Get the peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Get the tunnel phase.
    pub fn phase(&self) -> TunnelPhase {
        self.phase
    }

    /// Set the tunnel phase.
    pub fn set_phase(&mut self, phase: TunnelPhase) {
        self.phase = phase;
    }

    /// Get the header version.
    pub fn protocol_version(&self) -> u8 {
        self.protocol_version
    }

    /// Get the sequence state.
    pub fn sequence(&self) -> &Sequence {
        &self.sequence
    }

    /// Get the peer's host name.
    pub fn peer_host_name(&self) -> Option<&str> {
        self.peer_host_name.as_deref()
    }

    /// Get the peer's receive window.
    pub fn peer_receive_window(&self) -> Option<u16> {
        self.peer_receive_window
    }

    /// Record what the peer told us about itself.
    pub fn set_peer_info(&mut self, host_name: Option<String>, receive_window: Option<u16>) {
        self.peer_host_name = host_name;
        self.peer_receive_window = receive_window;
    }

    /// Look up a session by local id.
    pub fn session(&self, local_id: u16) -> Option<&Session> {
        self.sessions.get(&local_id)
    }

    /// Look up a session mutably.
    pub fn session_mut(&mut self, local_id: u16) -> Option<&mut Session> {
        self.sessions.get_mut(&local_id)
    }

    /// Add a session.
    pub fn add_session(&mut self, session: Session) {
        self.sessions.insert(session.local_id(), session);
    }

    /// Remove a session.
    pub fn remove_session(&mut self, local_id: u16) -> Option<Session> {
        self.sessions.remove(&local_id)
    }

    /// Number of sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of unacknowledged messages.
    pub fn unacked(&self) -> usize {
        self.retransmit.len()
    }

    /// Get tunnel age.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.created_at)
    }

    /// Time since the peer was last heard from.
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_received)
    }

    /// Record activity.
    pub fn touch(&mut self, now: Instant) {
        self.last_received = now;
    }

    /// Process the peer's Nr.
    pub fn on_peer_ack(&mut self, nr: u16, now: Instant) -> usize {
        self.retransmit.on_ack(nr, now)
    }

    /// Process the peer's Ns.
    pub fn on_receive(&mut self, ns: u16) -> Received {
        self.sequence.on_receive(ns)
    }

    /// Send a control message and keep it for retransmission.
    pub fn send<T: Transmit + ?Sized>(
        &mut self,
        message_type: ControlMessageType,
        session_id: u16,
        avps: Vec<Avp>,
        now: Instant,
        tx: &mut T,
    ) {
        let ns = self.sequence.next_ns();
        let frame = ReplyFrame {
            message_type: Some(message_type),
            protocol_version: self.protocol_version,
            tunnel_id: self.peer_tunnel_id,
            session_id,
            ns,
            nr: self.sequence.nr(),
            avps,
            priority: false,
        };
        let datagram = frame.encode();

        log::debug!(
            "tunnel {}: sending {message_type} to {} (Ns {ns}, Nr {})",
            self.id,
            self.peer,
            frame.nr
        );
        tx.transmit(&datagram, self.peer);
        self.retransmit.push(ns, datagram, now);
    }

    /// Acknowledge everything received so far with a ZLB.
    ///
    /// ZLBs do not consume a sequence number.
    pub fn acknowledge<T: Transmit + ?Sized>(&self, tx: &mut T) {
        let zlb = ReplyFrame::zlb(
            self.protocol_version,
            self.peer_tunnel_id,
            self.sequence.ns(),
            self.sequence.nr(),
        );
        log::trace!("tunnel {}: ZLB ack (Nr {})", self.id, self.sequence.nr());
        tx.transmit(&zlb.encode(), self.peer);
    }

    /// Send StopCCN and start tearing the tunnel down.
    ///
    /// All sessions are dropped. Does nothing if the tunnel is already stopping.
    pub fn stop<T: Transmit + ?Sized>(&mut self, result: ResultCode, now: Instant, tx: &mut T) {
        if matches!(self.phase, TunnelPhase::Stopping | TunnelPhase::Closed) {
            return;
        }
        log::info!(
            "tunnel {}: stopping (result {}{})",
            self.id,
            result.result,
            result
                .message
                .as_deref()
                .map(|message| format!(": {message}"))
                .unwrap_or_default()
        );

        let avps = vec![
            Avp::u16(AttributeType::AssignedTunnelId, self.id),
            Avp::result_code(result),
        ];
        self.send(ControlMessageType::StopCcn, 0, avps, now, tx);
        self.phase = TunnelPhase::Stopping;
        self.sessions.clear();
    }

    /// Drive retransmission and keepalive timers.
    pub fn poll<T: Transmit + ?Sized>(
        &mut self,
        now: Instant,
        config: &DispatcherConfig,
        tx: &mut T,
    ) -> TunnelStatus {
        match self.retransmit.poll(now) {
            RetransmitAction::GiveUp => {
                return TunnelStatus::Finished("peer stopped acknowledging");
            }
            RetransmitAction::Resend => {
                self.retransmit.refresh_nr(self.sequence.nr());
                log::debug!(
                    "tunnel {}: retransmitting {} message(s) (attempt {})",
                    self.id,
                    self.retransmit.len(),
                    self.retransmit.retransmit_count()
                );
                for datagram in self.retransmit.datagrams() {
                    tx.transmit(datagram, self.peer);
                }
            }
            RetransmitAction::Idle => {}
        }

        match self.phase {
            TunnelPhase::Closed => return TunnelStatus::Finished("closed by peer"),
            TunnelPhase::Stopping => {
                if self.retransmit.is_empty() {
                    return TunnelStatus::Finished("StopCCN acknowledged");
                }
                return TunnelStatus::Active;
            }
            TunnelPhase::AwaitingScccn | TunnelPhase::Established => {}
        }

        let idle = self.idle_time(now);
        if idle >= config.idle_timeout {
            let result = ResultCode::with_error(
                STOPCCN_GENERAL_ERROR,
                ERROR_NO_CONTROL_CONNECTION,
                "idle timeout",
            );
            self.stop(result, now, tx);
        } else if idle >= config.hello_interval
            && self.retransmit.is_empty()
            && self.phase == TunnelPhase::Established
        {
            self.send(ControlMessageType::Hello, 0, Vec::new(), now, tx);
        }
        TunnelStatus::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Outbound;
    use crate::frame::{ControlMessage, Header};

    fn tunnel(now: Instant) -> Tunnel {
        Tunnel::new(
            7,
            7,
            "198.51.100.7:1701".parse().unwrap(),
            2,
            0,
            RetransmitPolicy::default(),
            now,
        )
    }

    #[test]
    fn test_send_consumes_ns_and_ack_does_not() {
        let now = Instant::now();
        let mut tunnel = tunnel(now);
        let mut out: Vec<Outbound> = Vec::new();

        tunnel.send(ControlMessageType::Sccrp, 0, Vec::new(), now, &mut out);
        tunnel.acknowledge(&mut out);
        tunnel.send(ControlMessageType::Hello, 0, Vec::new(), now, &mut out);

        let headers: Vec<Header> = out
            .iter()
            .map(|o| Header::decode(&o.datagram).unwrap())
            .collect();
        assert_eq!(headers[0].ns, 0);
        assert_eq!(headers[1].ns, 1);
        assert_eq!(headers[1].length, 12);
        assert_eq!(headers[2].ns, 1);
        assert!(headers.iter().all(|h| h.tunnel_id == 7 && h.nr == 1));
        assert_eq!(tunnel.unacked(), 2);
    }

    #[test]
    fn test_stop_clears_sessions() {
        let now = Instant::now();
        let mut tunnel = tunnel(now);
        let mut out: Vec<Outbound> = Vec::new();
        tunnel.add_session(Session::new(3, 3, None, now));

        tunnel.stop(ResultCode::new(1), now, &mut out);
        tunnel.stop(ResultCode::new(1), now, &mut out);

        assert_eq!(out.len(), 1);
        assert_eq!(tunnel.phase(), TunnelPhase::Stopping);
        assert_eq!(tunnel.session_count(), 0);

        let message = ControlMessage::parse(&out[0].datagram, out[0].destination).unwrap();
        assert_eq!(message.message_type().unwrap(), ControlMessageType::StopCcn);
        assert_eq!(message.u16_value(AttributeType::AssignedTunnelId).unwrap(), 7);
    }

    #[test]
    fn test_hello_after_interval() {
        let start = Instant::now();
        let mut tunnel = tunnel(start);
        tunnel.set_phase(TunnelPhase::Established);
        let config = DispatcherConfig::default();
        let mut out: Vec<Outbound> = Vec::new();

        assert_eq!(tunnel.poll(start, &config, &mut out), TunnelStatus::Active);
        assert!(out.is_empty());

        let later = start + config.hello_interval;
        tunnel.poll(later, &config, &mut out);
        assert_eq!(out.len(), 1);
        let message = ControlMessage::parse(&out[0].datagram, out[0].destination).unwrap();
        assert_eq!(message.message_type().unwrap(), ControlMessageType::Hello);

        // A pending HELLO is not repeated by the keepalive timer.
        tunnel.poll(later, &config, &mut out);
        assert_eq!(out.len(), 1);
    }

    fn assert_idle_stop(out: &[Outbound]) {
        assert_eq!(out.len(), 1);
        let message = ControlMessage::parse(&out[0].datagram, out[0].destination).unwrap();
        assert_eq!(message.message_type().unwrap(), ControlMessageType::StopCcn);
        match &message.avp(AttributeType::ResultCode).unwrap().value {
            crate::frame::AvpValue::ResultCode(code) => {
                assert_eq!(code.result, STOPCCN_GENERAL_ERROR);
                assert_eq!(code.error, Some(ERROR_NO_CONTROL_CONNECTION));
            }
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn test_idle_timeout_without_keepalive() {
        let start = Instant::now();
        let mut tunnel = tunnel(start);
        tunnel.set_phase(TunnelPhase::Established);
        let config = DispatcherConfig {
            hello_interval: Duration::from_secs(600),
            idle_timeout: Duration::from_secs(300),
            ..DispatcherConfig::default()
        };
        let mut out: Vec<Outbound> = Vec::new();

        tunnel.poll(start + Duration::from_secs(299), &config, &mut out);
        assert!(out.is_empty());

        let later = start + config.idle_timeout;
        assert_eq!(tunnel.poll(later, &config, &mut out), TunnelStatus::Active);
        assert_idle_stop(&out);
        assert_eq!(tunnel.phase(), TunnelPhase::Stopping);
    }

    #[test]
    fn test_idle_timeout_awaiting_scccn() {
        let start = Instant::now();
        let mut tunnel = tunnel(start);
        let config = DispatcherConfig::default();
        let mut sccrp: Vec<Outbound> = Vec::new();
        tunnel.send(ControlMessageType::Sccrp, 0, Vec::new(), start, &mut sccrp);
        // SCCRP acknowledged, SCCCN never arrives.
        tunnel.on_peer_ack(1, start);

        let mut out: Vec<Outbound> = Vec::new();
        tunnel.poll(start + config.hello_interval, &config, &mut out);
        assert!(out.is_empty());

        tunnel.poll(start + config.idle_timeout, &config, &mut out);
        assert_idle_stop(&out);
    }

    #[test]
    fn test_stopping_finishes_when_acked() {
        let now = Instant::now();
        let mut tunnel = tunnel(now);
        let config = DispatcherConfig::default();
        let mut out: Vec<Outbound> = Vec::new();

        tunnel.stop(ResultCode::new(1), now, &mut out);
        assert_eq!(tunnel.poll(now, &config, &mut out), TunnelStatus::Active);

        tunnel.on_peer_ack(1, now);
        assert!(matches!(
            tunnel.poll(now, &config, &mut out),
            TunnelStatus::Finished(_)
        ));
    }
}
