//! Control message dispatcher.
//!
//! Owns every tunnel, keyed by local tunnel id, and routes each parsed
//! message to its handler with an exhaustive `match` on the message type.
//! Replies are handed to a [`Transmit`] so the dispatcher never touches a
//! socket and runs to completion for every datagram.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::{Received, RetransmitPolicy, Session, Tunnel, TunnelPhase, TunnelStatus};
use crate::core::constants::{
    AVP_PROTOCOL_VERSION, CDN_GENERAL_ERROR, DEFAULT_MAX_TUNNELS, DEFAULT_RECEIVE_WINDOW,
    ERROR_BAD_VALUE, ERROR_INSUFFICIENT_RESOURCES, ERROR_INVALID_SESSION, ERROR_NONE,
    HELLO_INTERVAL, IDLE_TIMEOUT, PROTOCOL_VERSION, STOPCCN_ALREADY_EXISTS, STOPCCN_CLEAR,
    STOPCCN_GENERAL_ERROR, STOPCCN_SHUTTING_DOWN, STOPCCN_VERSION_NOT_SUPPORTED,
};
use crate::core::{CodecError, DispatchError, Transmit};
use crate::frame::{
    AttributeType, Avp, AvpValue, ControlMessage, ControlMessageType, ReplyFrame, ResultCode,
    is_control_datagram,
};

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Header version nibble accepted and sent.
    pub protocol_version: u8,
    /// Host Name advertised in SCCRP.
    pub host_name: String,
    /// Vendor Name advertised in SCCRP.
    pub vendor_name: String,
    /// Firmware Revision advertised in SCCRP.
    pub firmware_revision: u16,
    /// Receive Window Size advertised in SCCRP.
    pub receive_window_size: u16,
    /// Inactivity before a HELLO is sent.
    pub hello_interval: Duration,
    /// Inactivity before the tunnel is stopped with StopCCN.
    ///
    /// Applies while no HELLO is outstanding: tunnels still waiting for
    /// SCCCN, or any tunnel when this is shorter than `hello_interval`.
    /// An unanswered HELLO ends the tunnel through retransmission give-up.
    pub idle_timeout: Duration,
    /// Retransmission timing.
    pub retransmit: RetransmitPolicy,
    /// Maximum number of tunnels.
    pub max_tunnels: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            host_name: "l2tpd".to_string(),
            vendor_name: "l2tp-control".to_string(),
            firmware_revision: 0x0100,
            receive_window_size: DEFAULT_RECEIVE_WINDOW,
            hello_interval: HELLO_INTERVAL,
            idle_timeout: IDLE_TIMEOUT,
            retransmit: RetransmitPolicy::default(),
            max_tunnels: DEFAULT_MAX_TUNNELS,
        }
    }
}

/// Routes control messages to tunnels.
#[derive(Debug)]
pub struct Dispatcher {
    config: DispatcherConfig,
    tunnels: HashMap<u16, Tunnel>,
}

impl Dispatcher {
    /// Create a dispatcher with no tunnels.
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            tunnels: HashMap::new(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Look up a tunnel by local id.
    pub fn tunnel(&self, id: u16) -> Option<&Tunnel> {
        self.tunnels.get(&id)
    }

    /// Number of tunnels.
    pub fn tunnel_count(&self) -> usize {
        self.tunnels.len()
    }

    /// Iterate over all tunnels.
    pub fn tunnels(&self) -> impl Iterator<Item = &Tunnel> {
        self.tunnels.values()
    }

    /// Decode and dispatch one datagram.
    ///
    /// Data messages (T bit clear) are ignored. Errors concern this datagram
    /// only; the dispatcher stays usable.
    pub fn handle_datagram<T: Transmit + ?Sized>(
        &mut self,
        datagram: &[u8],
        peer: SocketAddr,
        now: Instant,
        tx: &mut T,
    ) -> Result<(), DispatchError> {
        if !datagram.is_empty() && !is_control_datagram(datagram) {
            log::trace!("ignoring data message from {peer} ({} bytes)", datagram.len());
            return Ok(());
        }

        let message = ControlMessage::parse(datagram, peer).map_err(|source| match source {
            CodecError::UnknownControlMessageType(code) => {
                DispatchError::UnhandledControlMessage { code }
            }
            source => DispatchError::MalformedFrame { peer, source },
        })?;
        self.dispatch(&message, now, tx)
    }

    /// Dispatch a parsed control message.
    pub fn dispatch<T: Transmit + ?Sized>(
        &mut self,
        message: &ControlMessage,
        now: Instant,
        tx: &mut T,
    ) -> Result<(), DispatchError> {
        if message.is_zlb() {
            self.on_zlb(message, now);
            return Ok(());
        }
        if message.tunnel_id() == 0 && matches!(message.message_type(), Ok(ControlMessageType::Sccrq))
        {
            return self.on_sccrq(message, now, tx);
        }
        self.on_tunnel_message(message, now, tx)
    }

    /// Drive retransmission, keepalive and idle timers of every tunnel.
    pub fn poll_timers<T: Transmit + ?Sized>(&mut self, now: Instant, tx: &mut T) {
        let config = &self.config;
        self.tunnels.retain(|id, tunnel| match tunnel.poll(now, config, tx) {
            TunnelStatus::Active => true,
            TunnelStatus::Finished(reason) => {
                log::info!("tunnel {id} removed: {reason}");
                false
            }
        });
    }

    /// Send StopCCN to every tunnel and forget them.
    ///
    /// Returns the number of tunnels notified.
    pub fn shutdown<T: Transmit + ?Sized>(&mut self, now: Instant, tx: &mut T) -> usize {
        let mut notified = 0;
        for tunnel in self.tunnels.values_mut() {
            if matches!(tunnel.phase(), TunnelPhase::Stopping | TunnelPhase::Closed) {
                continue;
            }
            let result = ResultCode::with_error(
                STOPCCN_SHUTTING_DOWN,
                ERROR_NONE,
                "requester is being shut down",
            );
            tunnel.stop(result, now, tx);
            notified += 1;
        }
        self.tunnels.clear();
        notified
    }

    fn on_zlb(&mut self, message: &ControlMessage, now: Instant) {
        let tunnel_id = message.tunnel_id();
        let Some(tunnel) = self
            .tunnels
            .get_mut(&tunnel_id)
            .filter(|tunnel| tunnel.peer() == message.peer())
        else {
            log::debug!("ZLB for unknown tunnel {tunnel_id} from {}", message.peer());
            return;
        };

        tunnel.touch(now);
        let released = tunnel.on_peer_ack(message.nr(), now);
        log::trace!("tunnel {tunnel_id}: ZLB released {released} message(s)");

        if tunnel.phase() == TunnelPhase::Stopping && tunnel.unacked() == 0 {
            self.tunnels.remove(&tunnel_id);
            log::info!("tunnel {tunnel_id} removed: StopCCN acknowledged");
        }
    }

    fn on_sccrq<T: Transmit + ?Sized>(
        &mut self,
        message: &ControlMessage,
        now: Instant,
        tx: &mut T,
    ) -> Result<(), DispatchError> {
        // Peer id unknown: the StopCCN goes to tunnel 0.
        let peer_tunnel_id = match message.u16_value(AttributeType::AssignedTunnelId) {
            Ok(id) => id,
            Err(err) => {
                self.reject(message, 0, stop_result(&err), tx);
                return Err(err);
            }
        };

        if let Some(existing) = self.tunnels.get(&peer_tunnel_id) {
            if existing.peer() == message.peer() && existing.sequence().is_duplicate(message.ns()) {
                log::debug!("tunnel {peer_tunnel_id}: retransmitted SCCRQ, re-acknowledging");
                existing.acknowledge(tx);
                return Ok(());
            }
            let result = ResultCode::with_error(
                STOPCCN_ALREADY_EXISTS,
                ERROR_NONE,
                "control channel already exists",
            );
            self.reject(message, peer_tunnel_id, result, tx);
            return Err(DispatchError::DuplicateTunnel {
                tunnel_id: peer_tunnel_id,
            });
        }

        let (host_name, receive_window) = match self.validate_sccrq(message, peer_tunnel_id) {
            Ok(info) => info,
            Err(err) => {
                self.reject(message, peer_tunnel_id, stop_result(&err), tx);
                return Err(err);
            }
        };

        if self.tunnels.len() >= self.config.max_tunnels {
            let result = ResultCode::with_error(
                STOPCCN_GENERAL_ERROR,
                ERROR_INSUFFICIENT_RESOURCES,
                "tunnel limit reached",
            );
            self.reject(message, peer_tunnel_id, result, tx);
            return Err(DispatchError::TunnelLimit(self.config.max_tunnels));
        }

        let mut tunnel = Tunnel::new(
            peer_tunnel_id,
            peer_tunnel_id,
            message.peer(),
            self.config.protocol_version,
            message.ns(),
            self.config.retransmit,
            now,
        );
        log::info!(
            "tunnel {peer_tunnel_id} requested by {} ({host_name})",
            message.peer()
        );
        tunnel.set_peer_info(Some(host_name), receive_window);
        tunnel.send(
            ControlMessageType::Sccrp,
            0,
            self.sccrp_avps(peer_tunnel_id),
            now,
            tx,
        );
        self.tunnels.insert(peer_tunnel_id, tunnel);
        Ok(())
    }

    fn validate_sccrq(
        &self,
        message: &ControlMessage,
        peer_tunnel_id: u16,
    ) -> Result<(String, Option<u16>), DispatchError> {
        if message.version() != self.config.protocol_version {
            return Err(DispatchError::UnsupportedVersion {
                expected: self.config.protocol_version,
                actual: message.version(),
            });
        }
        match &message.avp(AttributeType::ProtocolVersion)?.value {
            AvpValue::Version { version, revision }
                if (*version, *revision) == AVP_PROTOCOL_VERSION => {}
            AvpValue::Version { version, .. } => {
                return Err(DispatchError::UnsupportedVersion {
                    expected: AVP_PROTOCOL_VERSION.0,
                    actual: *version,
                });
            }
            _ => {
                return Err(DispatchError::InvalidAttribute {
                    attribute: AttributeType::ProtocolVersion,
                });
            }
        }
        if peer_tunnel_id == 0 {
            return Err(DispatchError::InvalidAttribute {
                attribute: AttributeType::AssignedTunnelId,
            });
        }

        let host_name = message.text_value(AttributeType::HostName)?.to_string();
        let receive_window = message
            .get(AttributeType::ReceiveWindowSize)
            .and_then(|avp| avp.value.as_u16());
        Ok((host_name, receive_window))
    }

    fn sccrp_avps(&self, tunnel_id: u16) -> Vec<Avp> {
        let (version, revision) = AVP_PROTOCOL_VERSION;
        vec![
            Avp::new(
                AttributeType::ProtocolVersion,
                AvpValue::Version { version, revision },
            ),
            // Synchronous framing only.
            Avp::new(AttributeType::FramingCapabilities, AvpValue::Flags(false, true)),
            Avp::text(AttributeType::HostName, self.config.host_name.as_str()),
            Avp::u16(AttributeType::AssignedTunnelId, tunnel_id),
            Avp::optional(
                AttributeType::FirmwareRevision,
                AvpValue::U16(self.config.firmware_revision),
            ),
            Avp::optional(
                AttributeType::VendorName,
                AvpValue::Text(self.config.vendor_name.clone()),
            ),
            Avp::u16(
                AttributeType::ReceiveWindowSize,
                self.config.receive_window_size,
            ),
        ]
    }

    /// StopCCN for a request that never got a tunnel.
    fn reject<T: Transmit + ?Sized>(
        &self,
        message: &ControlMessage,
        peer_tunnel_id: u16,
        result: ResultCode,
        tx: &mut T,
    ) {
        log::warn!(
            "rejecting SCCRQ from {} (result {})",
            message.peer(),
            result.result
        );
        let frame = ReplyFrame {
            message_type: Some(ControlMessageType::StopCcn),
            protocol_version: self.config.protocol_version,
            tunnel_id: peer_tunnel_id,
            session_id: 0,
            ns: 0,
            nr: message.ns().wrapping_add(1),
            avps: vec![
                Avp::u16(AttributeType::AssignedTunnelId, 0),
                Avp::result_code(result),
            ],
            priority: false,
        };
        tx.transmit(&frame.encode(), message.peer());
    }

    fn on_tunnel_message<T: Transmit + ?Sized>(
        &mut self,
        message: &ControlMessage,
        now: Instant,
        tx: &mut T,
    ) -> Result<(), DispatchError> {
        let tunnel_id = message.tunnel_id();
        let Some(tunnel) = self.tunnels.get_mut(&tunnel_id) else {
            return Err(DispatchError::UnknownTunnel { tunnel_id });
        };
        if tunnel.peer() != message.peer() {
            log::warn!(
                "tunnel {tunnel_id}: message from {} but peer is {}",
                message.peer(),
                tunnel.peer()
            );
            return Err(DispatchError::UnknownTunnel { tunnel_id });
        }

        tunnel.touch(now);
        // Ns and Nr are only meaningful with the S bit set.
        let sequenced = message.header().sequence_present;
        if sequenced {
            tunnel.on_peer_ack(message.nr(), now);
        }

        let message_type = message.message_type();
        // ACK carries Ns without consuming it.
        if matches!(message_type, Ok(ControlMessageType::Ack)) {
            log::trace!("tunnel {tunnel_id}: explicit ACK (Nr {})", message.nr());
            return Ok(());
        }
        if sequenced && tunnel.on_receive(message.ns()) == Received::Duplicate {
            log::debug!(
                "tunnel {tunnel_id}: duplicate Ns {}, re-acknowledging",
                message.ns()
            );
            tunnel.acknowledge(tx);
            return Ok(());
        }

        let result = if message.version() != tunnel.protocol_version() {
            Err(DispatchError::UnsupportedVersion {
                expected: tunnel.protocol_version(),
                actual: message.version(),
            })
        } else {
            message_type.and_then(|message_type| handle(tunnel, message_type, message, now, tx))
        };

        if let Err(err) = &result {
            if err.terminates_tunnel() {
                log::warn!("tunnel {tunnel_id}: {err}");
                tunnel.stop(stop_result(err), now, tx);
            } else if matches!(err, DispatchError::UnexpectedMessage { .. }) {
                tunnel.acknowledge(tx);
            }
        }

        if tunnel.phase() == TunnelPhase::Closed {
            self.tunnels.remove(&tunnel_id);
            log::info!("tunnel {tunnel_id} removed: closed by peer");
        }
        result
    }
}

fn handle<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message_type: ControlMessageType,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    log::debug!(
        "tunnel {}: {message_type} from {} (session {}, Ns {}, Nr {})",
        tunnel.id(),
        message.peer(),
        message.session_id(),
        message.ns(),
        message.nr()
    );

    match message_type {
        ControlMessageType::Scccn => on_scccn(tunnel, tx),
        ControlMessageType::StopCcn => on_stopccn(tunnel, message, tx),
        ControlMessageType::Hello => {
            require(tunnel, TunnelPhase::Established, message_type)?;
            tunnel.acknowledge(tx);
            Ok(())
        }
        ControlMessageType::Icrq => on_icrq(tunnel, message, now, tx),
        ControlMessageType::Iccn => on_iccn(tunnel, message, now, tx),
        ControlMessageType::Ocrq => on_ocrq(tunnel, message, now, tx),
        ControlMessageType::Occn => on_occn(tunnel, message, now, tx),
        ControlMessageType::Cdn => on_cdn(tunnel, message, now, tx),
        ControlMessageType::Ack => Ok(()),
        ControlMessageType::Sccrq
        | ControlMessageType::Sccrp
        | ControlMessageType::Ocrp
        | ControlMessageType::Icrp => Err(unexpected(tunnel, message_type)),
    }
}

fn require(
    tunnel: &Tunnel,
    phase: TunnelPhase,
    message_type: ControlMessageType,
) -> Result<(), DispatchError> {
    if tunnel.phase() == phase {
        Ok(())
    } else {
        Err(unexpected(tunnel, message_type))
    }
}

fn unexpected(tunnel: &Tunnel, message_type: ControlMessageType) -> DispatchError {
    DispatchError::UnexpectedMessage {
        tunnel_id: tunnel.id(),
        message: message_type,
        phase: tunnel.phase(),
    }
}

/// Result code for a StopCCN caused by `err`.
fn stop_result(err: &DispatchError) -> ResultCode {
    match err {
        DispatchError::UnsupportedVersion { expected, .. } => ResultCode::with_error(
            STOPCCN_VERSION_NOT_SUPPORTED,
            u16::from(*expected),
            err.to_string(),
        ),
        _ => ResultCode::with_error(STOPCCN_GENERAL_ERROR, ERROR_BAD_VALUE, err.to_string()),
    }
}

fn on_scccn<T: Transmit + ?Sized>(tunnel: &mut Tunnel, tx: &mut T) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::AwaitingScccn, ControlMessageType::Scccn)?;
    tunnel.set_phase(TunnelPhase::Established);
    tunnel.acknowledge(tx);
    log::info!(
        "tunnel {} established with {} ({})",
        tunnel.id(),
        tunnel.peer(),
        tunnel.peer_host_name().unwrap_or("unknown host")
    );
    Ok(())
}

fn on_stopccn<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    tx: &mut T,
) -> Result<(), DispatchError> {
    match message.get(AttributeType::ResultCode).map(|avp| &avp.value) {
        Some(AvpValue::ResultCode(code)) => log::info!(
            "tunnel {}: StopCCN from peer (result {}, error {:?}, {:?})",
            tunnel.id(),
            code.result,
            code.error,
            code.message
        ),
        _ => log::info!("tunnel {}: StopCCN from peer", tunnel.id()),
    }
    tunnel.acknowledge(tx);
    tunnel.set_phase(TunnelPhase::Closed);
    Ok(())
}

fn on_icrq<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::Established, ControlMessageType::Icrq)?;
    let peer_session_id = message.u16_value(AttributeType::AssignedSessionId)?;
    if peer_session_id == 0 {
        return Err(DispatchError::InvalidAttribute {
            attribute: AttributeType::AssignedSessionId,
        });
    }
    let call_serial = match message.get(AttributeType::CallSerialNumber).map(|avp| &avp.value) {
        Some(AvpValue::U32(serial)) => Some(*serial),
        _ => None,
    };

    if tunnel.session(peer_session_id).is_some() {
        log::warn!(
            "tunnel {}: ICRQ reuses session {peer_session_id}, replacing it",
            tunnel.id()
        );
    }
    tunnel.add_session(Session::new(peer_session_id, peer_session_id, call_serial, now));
    log::info!(
        "tunnel {}: incoming call, session {peer_session_id}",
        tunnel.id()
    );

    let avps = vec![Avp::u16(AttributeType::AssignedSessionId, peer_session_id)];
    tunnel.send(ControlMessageType::Icrp, peer_session_id, avps, now, tx);
    Ok(())
}

fn on_iccn<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::Established, ControlMessageType::Iccn)?;
    let session_id = message.session_id();
    let connect_speed = match message.get(AttributeType::TxConnectSpeed).map(|avp| &avp.value) {
        Some(AvpValue::U32(speed)) => Some(*speed),
        _ => None,
    };

    let Some(session) = tunnel.session_mut(session_id) else {
        return Err(disconnect_unknown(tunnel, session_id, now, tx));
    };
    session.connect(connect_speed);
    tunnel.acknowledge(tx);
    log::info!("tunnel {}: session {session_id} connected", tunnel.id());
    Ok(())
}

fn on_ocrq<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::Established, ControlMessageType::Ocrq)?;
    let peer_session_id = message.u16_value(AttributeType::AssignedSessionId)?;

    log::warn!(
        "tunnel {}: refusing outgoing call for session {peer_session_id}",
        tunnel.id()
    );
    let avps = vec![
        Avp::result_code(ResultCode::with_error(
            CDN_GENERAL_ERROR,
            ERROR_NONE,
            "outgoing calls are not supported",
        )),
        Avp::u16(AttributeType::AssignedSessionId, 0),
    ];
    tunnel.send(ControlMessageType::Cdn, peer_session_id, avps, now, tx);
    Ok(())
}

fn on_occn<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::Established, ControlMessageType::Occn)?;
    Err(disconnect_unknown(tunnel, message.session_id(), now, tx))
}

/// Reply CDN for a call we have no record of.
fn disconnect_unknown<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    session_id: u16,
    now: Instant,
    tx: &mut T,
) -> DispatchError {
    let avps = vec![
        Avp::result_code(ResultCode::with_error(
            CDN_GENERAL_ERROR,
            ERROR_INVALID_SESSION,
            "unknown session",
        )),
        Avp::u16(AttributeType::AssignedSessionId, session_id),
    ];
    tunnel.send(ControlMessageType::Cdn, session_id, avps, now, tx);
    DispatchError::UnknownSession {
        tunnel_id: tunnel.id(),
        session_id,
    }
}

fn on_cdn<T: Transmit + ?Sized>(
    tunnel: &mut Tunnel,
    message: &ControlMessage,
    now: Instant,
    tx: &mut T,
) -> Result<(), DispatchError> {
    require(tunnel, TunnelPhase::Established, ControlMessageType::Cdn)?;
    // A CDN sent before our ICRP arrived has no session id in the header.
    let session_id = match message.session_id() {
        0 => message.u16_value(AttributeType::AssignedSessionId)?,
        id => id,
    };
    tunnel.acknowledge(tx);

    if tunnel.remove_session(session_id).is_none() {
        return Err(DispatchError::UnknownSession {
            tunnel_id: tunnel.id(),
            session_id,
        });
    }
    match message.get(AttributeType::ResultCode).map(|avp| &avp.value) {
        Some(AvpValue::ResultCode(code)) => log::info!(
            "tunnel {}: session {session_id} disconnected (result {}, {:?})",
            tunnel.id(),
            code.result,
            code.message
        ),
        _ => log::info!("tunnel {}: session {session_id} disconnected", tunnel.id()),
    }

    if tunnel.session_count() == 0 {
        tunnel.stop(ResultCode::new(STOPCCN_CLEAR), now, tx);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Outbound;
    use crate::frame::Header;
    use crate::tunnel::SessionPhase;

    fn lac() -> SocketAddr {
        "198.51.100.7:1701".parse().unwrap()
    }

    fn other_lac() -> SocketAddr {
        "198.51.100.9:1701".parse().unwrap()
    }

    fn frame(
        message_type: ControlMessageType,
        tunnel_id: u16,
        session_id: u16,
        ns: u16,
        nr: u16,
        avps: Vec<Avp>,
    ) -> Vec<u8> {
        ReplyFrame {
            message_type: Some(message_type),
            protocol_version: 2,
            tunnel_id,
            session_id,
            ns,
            nr,
            avps,
            priority: false,
        }
        .encode()
    }

    fn sccrq(assigned_tunnel_id: u16, ns: u16) -> Vec<u8> {
        frame(
            ControlMessageType::Sccrq,
            0,
            0,
            ns,
            0,
            vec![
                Avp::new(
                    AttributeType::ProtocolVersion,
                    AvpValue::Version {
                        version: 1,
                        revision: 0,
                    },
                ),
                Avp::text(AttributeType::HostName, "lac"),
                Avp::u16(AttributeType::AssignedTunnelId, assigned_tunnel_id),
                Avp::u16(AttributeType::ReceiveWindowSize, 8),
            ],
        )
    }

    fn parse(out: &Outbound) -> ControlMessage {
        ControlMessage::parse(&out.datagram, out.destination).unwrap()
    }

    fn result_code(message: &ControlMessage) -> ResultCode {
        match &message.avp(AttributeType::ResultCode).unwrap().value {
            AvpValue::ResultCode(code) => code.clone(),
            other => panic!("unexpected value {other:?}"),
        }
    }

    /// SCCRQ then SCCCN from `peer`, leaving an established tunnel with
    /// Nr 2 on our side and our SCCRP acknowledged.
    fn establish(dispatcher: &mut Dispatcher, tunnel_id: u16, peer: SocketAddr, now: Instant) {
        let mut out: Vec<Outbound> = Vec::new();
        dispatcher
            .handle_datagram(&sccrq(tunnel_id, 0), peer, now, &mut out)
            .unwrap();
        let scccn = frame(ControlMessageType::Scccn, tunnel_id, 0, 1, 1, Vec::new());
        dispatcher
            .handle_datagram(&scccn, peer, now, &mut out)
            .unwrap();
    }

    #[test]
    fn test_handshake() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), now, &mut out)
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, lac());
        let sccrp = parse(&out[0]);
        assert_eq!(sccrp.message_type().unwrap(), ControlMessageType::Sccrp);
        assert_eq!(sccrp.tunnel_id(), 7);
        assert_eq!(sccrp.ns(), 0);
        assert_eq!(sccrp.nr(), 1);
        assert_eq!(sccrp.u16_value(AttributeType::AssignedTunnelId).unwrap(), 7);
        assert_eq!(sccrp.text_value(AttributeType::HostName).unwrap(), "l2tpd");
        assert_eq!(
            sccrp.get(AttributeType::FramingCapabilities).unwrap().value,
            AvpValue::Flags(false, true)
        );
        assert_eq!(
            dispatcher.tunnel(7).unwrap().phase(),
            TunnelPhase::AwaitingScccn
        );

        out.clear();
        let scccn = frame(ControlMessageType::Scccn, 7, 0, 1, 1, Vec::new());
        dispatcher
            .handle_datagram(&scccn, lac(), now, &mut out)
            .unwrap();

        let tunnel = dispatcher.tunnel(7).unwrap();
        assert_eq!(tunnel.phase(), TunnelPhase::Established);
        assert_eq!(tunnel.peer_host_name(), Some("lac"));
        assert_eq!(tunnel.peer_receive_window(), Some(8));
        assert_eq!(tunnel.unacked(), 0);

        assert_eq!(out.len(), 1);
        let ack = parse(&out[0]);
        assert!(ack.is_zlb());
        assert_eq!(ack.tunnel_id(), 7);
        assert_eq!(ack.ns(), 1);
        assert_eq!(ack.nr(), 2);
    }

    #[test]
    fn test_interleaved_tunnels_keep_own_counters() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), now, &mut out)
            .unwrap();
        dispatcher
            .handle_datagram(&sccrq(9, 40), other_lac(), now, &mut out)
            .unwrap();

        let scccn = frame(ControlMessageType::Scccn, 7, 0, 1, 1, Vec::new());
        dispatcher
            .handle_datagram(&scccn, lac(), now, &mut out)
            .unwrap();
        let hello = frame(ControlMessageType::Hello, 7, 0, 2, 1, Vec::new());
        dispatcher
            .handle_datagram(&hello, lac(), now, &mut out)
            .unwrap();
        let scccn = frame(ControlMessageType::Scccn, 9, 0, 41, 1, Vec::new());
        dispatcher
            .handle_datagram(&scccn, other_lac(), now, &mut out)
            .unwrap();

        let first = dispatcher.tunnel(7).unwrap().sequence();
        let second = dispatcher.tunnel(9).unwrap().sequence();
        assert_eq!((first.ns(), first.nr()), (1, 3));
        assert_eq!((second.ns(), second.nr()), (1, 42));

        let to_second: Vec<ControlMessage> = out
            .iter()
            .filter(|o| o.destination == other_lac())
            .map(parse)
            .collect();
        assert!(to_second.iter().all(|m| m.tunnel_id() == 9));
        assert_eq!(to_second.last().unwrap().nr(), 42);
    }

    #[test]
    fn test_unknown_message_code() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let before = *dispatcher.tunnel(7).unwrap().sequence();

        let mut datagram = frame(ControlMessageType::Hello, 7, 0, 2, 1, Vec::new());
        // Message Type value sits right after the 12-byte header and 6-byte AVP header.
        datagram[18..20].copy_from_slice(&99u16.to_be_bytes());

        let mut out: Vec<Outbound> = Vec::new();
        let err = dispatcher
            .handle_datagram(&datagram, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::UnhandledControlMessage { code: 99 }
        ));
        assert!(out.is_empty());
        assert_eq!(*dispatcher.tunnel(7).unwrap().sequence(), before);
        assert_eq!(
            dispatcher.tunnel(7).unwrap().phase(),
            TunnelPhase::Established
        );
    }

    #[test]
    fn test_duplicate_tunnel_rejected() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);

        let mut out: Vec<Outbound> = Vec::new();
        let err = dispatcher
            .handle_datagram(&sccrq(7, 0), other_lac(), now, &mut out)
            .unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateTunnel { tunnel_id: 7 }));

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, other_lac());
        let stop = parse(&out[0]);
        assert_eq!(stop.message_type().unwrap(), ControlMessageType::StopCcn);
        assert_eq!(result_code(&stop).result, STOPCCN_ALREADY_EXISTS);

        let tunnel = dispatcher.tunnel(7).unwrap();
        assert_eq!(tunnel.peer(), lac());
        assert_eq!(tunnel.phase(), TunnelPhase::Established);
    }

    #[test]
    fn test_retransmitted_sccrq_reacknowledged() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), now, &mut out)
            .unwrap();
        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), now, &mut out)
            .unwrap();

        assert_eq!(dispatcher.tunnel_count(), 1);
        assert_eq!(out.len(), 2);
        assert!(parse(&out[1]).is_zlb());
        assert_eq!(dispatcher.tunnel(7).unwrap().sequence().ns(), 1);
    }

    #[test]
    fn test_incoming_call_lifecycle() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let icrq = frame(
            ControlMessageType::Icrq,
            7,
            0,
            2,
            1,
            vec![
                Avp::u16(AttributeType::AssignedSessionId, 3),
                Avp::new(AttributeType::CallSerialNumber, AvpValue::U32(42)),
            ],
        );
        dispatcher
            .handle_datagram(&icrq, lac(), now, &mut out)
            .unwrap();
        let icrp = parse(&out[0]);
        assert_eq!(icrp.message_type().unwrap(), ControlMessageType::Icrp);
        assert_eq!(icrp.session_id(), 3);
        assert_eq!(icrp.ns(), 1);
        assert_eq!(icrp.nr(), 3);
        assert_eq!(icrp.u16_value(AttributeType::AssignedSessionId).unwrap(), 3);

        let iccn = frame(
            ControlMessageType::Iccn,
            7,
            3,
            3,
            2,
            vec![Avp::new(AttributeType::TxConnectSpeed, AvpValue::U32(10_000_000))],
        );
        dispatcher
            .handle_datagram(&iccn, lac(), now, &mut out)
            .unwrap();
        let session = dispatcher.tunnel(7).unwrap().session(3).unwrap();
        assert_eq!(session.phase(), SessionPhase::Established);
        assert_eq!(session.call_serial(), Some(42));
        assert_eq!(session.connect_speed(), Some(10_000_000));
        assert!(parse(&out[1]).is_zlb());

        out.clear();
        let cdn = frame(
            ControlMessageType::Cdn,
            7,
            3,
            4,
            2,
            vec![
                Avp::result_code(ResultCode::new(CDN_GENERAL_ERROR)),
                Avp::u16(AttributeType::AssignedSessionId, 3),
            ],
        );
        dispatcher
            .handle_datagram(&cdn, lac(), now, &mut out)
            .unwrap();

        // ZLB for the CDN, then StopCCN since no session is left.
        assert_eq!(out.len(), 2);
        assert!(parse(&out[0]).is_zlb());
        let stop = parse(&out[1]);
        assert_eq!(stop.message_type().unwrap(), ControlMessageType::StopCcn);
        assert_eq!(result_code(&stop).result, STOPCCN_CLEAR);
        assert_eq!(dispatcher.tunnel(7).unwrap().phase(), TunnelPhase::Stopping);

        // Peer acknowledges the StopCCN (our Ns 2).
        let zlb = ReplyFrame::zlb(2, 7, 5, 3).encode();
        dispatcher
            .handle_datagram(&zlb, lac(), now, &mut out)
            .unwrap();
        assert!(dispatcher.tunnel(7).is_none());
    }

    #[test]
    fn test_duplicate_message_not_reprocessed() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let icrq = frame(
            ControlMessageType::Icrq,
            7,
            0,
            2,
            1,
            vec![Avp::u16(AttributeType::AssignedSessionId, 3)],
        );
        dispatcher
            .handle_datagram(&icrq, lac(), now, &mut out)
            .unwrap();
        dispatcher
            .handle_datagram(&icrq, lac(), now, &mut out)
            .unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(parse(&out[0]).message_type().unwrap(), ControlMessageType::Icrp);
        assert!(parse(&out[1]).is_zlb());
        assert_eq!(dispatcher.tunnel(7).unwrap().sequence().ns(), 2);
    }

    #[test]
    fn test_unsequenced_message_leaves_nr() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let mut hello = frame(ControlMessageType::Hello, 7, 0, 40, 1, Vec::new());
        hello[0] &= !crate::core::constants::FLAG_SEQUENCE;
        dispatcher
            .handle_datagram(&hello, lac(), now, &mut out)
            .unwrap();

        assert_eq!(out.len(), 1);
        assert!(parse(&out[0]).is_zlb());
        assert_eq!(parse(&out[0]).nr(), 2);
        assert_eq!(dispatcher.tunnel(7).unwrap().sequence().nr(), 2);

        // The next sequenced message is still in order.
        out.clear();
        let hello = frame(ControlMessageType::Hello, 7, 0, 2, 1, Vec::new());
        dispatcher
            .handle_datagram(&hello, lac(), now, &mut out)
            .unwrap();
        assert_eq!(parse(&out[0]).nr(), 3);
    }

    #[test]
    fn test_iccn_for_unknown_session() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let iccn = frame(ControlMessageType::Iccn, 7, 5, 2, 1, Vec::new());
        let err = dispatcher
            .handle_datagram(&iccn, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::UnknownSession {
                tunnel_id: 7,
                session_id: 5
            }
        ));
        let cdn = parse(&out[0]);
        assert_eq!(cdn.message_type().unwrap(), ControlMessageType::Cdn);
        assert_eq!(result_code(&cdn).error, Some(ERROR_INVALID_SESSION));
        assert_eq!(
            dispatcher.tunnel(7).unwrap().phase(),
            TunnelPhase::Established
        );
    }

    #[test]
    fn test_outgoing_call_refused() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let ocrq = frame(
            ControlMessageType::Ocrq,
            7,
            0,
            2,
            1,
            vec![Avp::u16(AttributeType::AssignedSessionId, 11)],
        );
        dispatcher
            .handle_datagram(&ocrq, lac(), now, &mut out)
            .unwrap();

        let cdn = parse(&out[0]);
        assert_eq!(cdn.message_type().unwrap(), ControlMessageType::Cdn);
        assert_eq!(cdn.session_id(), 11);
        assert_eq!(result_code(&cdn).result, CDN_GENERAL_ERROR);
        assert_eq!(dispatcher.tunnel(7).unwrap().session_count(), 0);
    }

    #[test]
    fn test_stopccn_removes_tunnel() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let stop = frame(
            ControlMessageType::StopCcn,
            7,
            0,
            2,
            1,
            vec![
                Avp::u16(AttributeType::AssignedTunnelId, 7),
                Avp::result_code(ResultCode::new(STOPCCN_CLEAR)),
            ],
        );
        dispatcher
            .handle_datagram(&stop, lac(), now, &mut out)
            .unwrap();

        assert!(dispatcher.tunnel(7).is_none());
        assert_eq!(out.len(), 1);
        let ack = parse(&out[0]);
        assert!(ack.is_zlb());
        assert_eq!(ack.nr(), 3);
    }

    #[test]
    fn test_missing_attribute_stops_tunnel() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let icrq = frame(ControlMessageType::Icrq, 7, 0, 2, 1, Vec::new());
        let err = dispatcher
            .handle_datagram(&icrq, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::MissingAttribute {
                attribute: AttributeType::AssignedSessionId
            }
        ));
        let stop = parse(&out[0]);
        assert_eq!(stop.message_type().unwrap(), ControlMessageType::StopCcn);
        assert_eq!(result_code(&stop).result, STOPCCN_GENERAL_ERROR);
        assert_eq!(dispatcher.tunnel(7).unwrap().phase(), TunnelPhase::Stopping);
    }

    #[test]
    fn test_unexpected_message_acknowledged() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        let mut out: Vec<Outbound> = Vec::new();

        let scccn = frame(ControlMessageType::Scccn, 7, 0, 2, 1, Vec::new());
        let err = dispatcher
            .handle_datagram(&scccn, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::UnexpectedMessage {
                tunnel_id: 7,
                message: ControlMessageType::Scccn,
                phase: TunnelPhase::Established,
            }
        ));
        assert!(parse(&out[0]).is_zlb());
        assert_eq!(
            dispatcher.tunnel(7).unwrap().phase(),
            TunnelPhase::Established
        );
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        let mut datagram = sccrq(7, 0);
        datagram[1] = 3;
        let err = dispatcher
            .handle_datagram(&datagram, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::UnsupportedVersion {
                expected: 2,
                actual: 3
            }
        ));
        assert_eq!(dispatcher.tunnel_count(), 0);
        let stop = parse(&out[0]);
        assert_eq!(result_code(&stop).result, STOPCCN_VERSION_NOT_SUPPORTED);
    }

    #[test]
    fn test_sccrq_without_tunnel_id_rejected() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        let datagram = frame(
            ControlMessageType::Sccrq,
            0,
            0,
            0,
            0,
            vec![
                Avp::new(
                    AttributeType::ProtocolVersion,
                    AvpValue::Version {
                        version: 1,
                        revision: 0,
                    },
                ),
                Avp::text(AttributeType::HostName, "lac"),
            ],
        );
        let err = dispatcher
            .handle_datagram(&datagram, lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::MissingAttribute {
                attribute: AttributeType::AssignedTunnelId
            }
        ));
        assert_eq!(dispatcher.tunnel_count(), 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].destination, lac());
        let stop = parse(&out[0]);
        assert_eq!(stop.message_type().unwrap(), ControlMessageType::StopCcn);
        assert_eq!(stop.tunnel_id(), 0);
        assert_eq!(stop.nr(), 1);
        let code = result_code(&stop);
        assert_eq!(code.result, STOPCCN_GENERAL_ERROR);
        assert_eq!(code.error, Some(ERROR_BAD_VALUE));
    }

    #[test]
    fn test_tunnel_limit() {
        let now = Instant::now();
        let config = DispatcherConfig {
            max_tunnels: 1,
            ..DispatcherConfig::default()
        };
        let mut dispatcher = Dispatcher::new(config);
        let mut out: Vec<Outbound> = Vec::new();

        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), now, &mut out)
            .unwrap();
        let err = dispatcher
            .handle_datagram(&sccrq(9, 0), other_lac(), now, &mut out)
            .unwrap_err();

        assert!(matches!(err, DispatchError::TunnelLimit(1)));
        assert_eq!(dispatcher.tunnel_count(), 1);
    }

    #[test]
    fn test_malformed_and_data_datagrams() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();

        let err = dispatcher
            .handle_datagram(&[0xC8, 0x02, 0x00], lac(), now, &mut out)
            .unwrap_err();
        assert!(err.is_malformed());

        let mut data = sccrq(7, 0);
        data[0] &= !0x80;
        dispatcher
            .handle_datagram(&data, lac(), now, &mut out)
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(dispatcher.tunnel_count(), 0);
    }

    #[test]
    fn test_retransmit_then_give_up() {
        let start = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        let mut out: Vec<Outbound> = Vec::new();
        dispatcher
            .handle_datagram(&sccrq(7, 0), lac(), start, &mut out)
            .unwrap();

        // Backoff 1, 2, 4, 8, 8 seconds.
        for secs in [1, 3, 7, 15, 23] {
            out.clear();
            dispatcher.poll_timers(start + Duration::from_secs(secs), &mut out);
            assert_eq!(out.len(), 1, "resend at {secs}s");
            let resent = Header::decode(&out[0].datagram).unwrap();
            assert_eq!((resent.tunnel_id, resent.ns), (7, 0));
        }

        out.clear();
        dispatcher.poll_timers(start + Duration::from_secs(31), &mut out);
        assert!(out.is_empty());
        assert!(dispatcher.tunnel(7).is_none());
    }

    #[test]
    fn test_shutdown_stops_every_tunnel() {
        let now = Instant::now();
        let mut dispatcher = Dispatcher::new(DispatcherConfig::default());
        establish(&mut dispatcher, 7, lac(), now);
        establish(&mut dispatcher, 9, other_lac(), now);

        let mut out: Vec<Outbound> = Vec::new();
        assert_eq!(dispatcher.shutdown(now, &mut out), 2);
        assert_eq!(dispatcher.tunnel_count(), 0);

        assert_eq!(out.len(), 2);
        for outbound in &out {
            let stop = parse(outbound);
            assert_eq!(stop.message_type().unwrap(), ControlMessageType::StopCcn);
            assert_eq!(result_code(&stop).result, STOPCCN_SHUTTING_DOWN);
        }
    }
}
