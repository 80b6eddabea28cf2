//! Control messages: inbound parse and outbound reply construction.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use super::avp::{self, Avp, AvpValue};
use super::header::Header;
use super::registry::{AttributeType, ControlMessageType};
use crate::core::constants::HEADER_SIZE;
use crate::core::{CodecError, DispatchError};

/// A decoded inbound control message.
///
/// Every datagram produces its own value; the AVP map is owned by the
/// message and dropped with it.
#[derive(Debug, Clone)]
pub struct ControlMessage {
    header: Header,
    peer: SocketAddr,
    body_len: usize,
    avps: BTreeMap<AttributeType, Avp>,
}

impl ControlMessage {
    /// Decode a datagram received from `peer`.
    ///
    /// AVPs are only decoded for control messages with a non-empty body.
    /// When the L bit is set the length field bounds the body; trailing
    /// bytes past it are ignored.
    pub fn parse(datagram: &[u8], peer: SocketAddr) -> Result<Self, CodecError> {
        let header = Header::decode(datagram)?;

        let end = if header.length_present {
            let declared = usize::from(header.length);
            if declared < HEADER_SIZE || declared > datagram.len() {
                return Err(CodecError::LengthMismatch {
                    declared,
                    actual: datagram.len(),
                });
            }
            declared
        } else {
            datagram.len()
        };
        let body = &datagram[HEADER_SIZE..end];

        let mut avps = BTreeMap::new();
        if header.is_control && !body.is_empty() {
            for avp in avp::decode_all(body)? {
                avps.insert(avp.attribute, avp);
            }
        }

        Ok(Self {
            header,
            peer,
            body_len: body.len(),
            avps,
        })
    }

    /// The decoded header.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Sender of the datagram.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Receiver's tunnel id from the header.
    pub fn tunnel_id(&self) -> u16 {
        self.header.tunnel_id
    }

    /// Receiver's session id from the header.
    pub fn session_id(&self) -> u16 {
        self.header.session_id
    }

    /// Sender's sequence number.
    pub fn ns(&self) -> u16 {
        self.header.ns
    }

    /// Next sequence number the sender expects from us.
    pub fn nr(&self) -> u16 {
        self.header.nr
    }

    /// Header version nibble.
    pub fn version(&self) -> u8 {
        self.header.version
    }

    /// Check if the T bit was set.
    pub fn is_control(&self) -> bool {
        self.header.is_control
    }

    /// Check if this is a Zero-Length Body acknowledgement.
    pub fn is_zlb(&self) -> bool {
        self.header.is_control && self.body_len == 0
    }

    /// Look up an AVP, if present.
    pub fn get(&self, attribute: AttributeType) -> Option<&Avp> {
        self.avps.get(&attribute)
    }

    /// Look up an AVP that must be present.
    pub fn avp(&self, attribute: AttributeType) -> Result<&Avp, DispatchError> {
        self.get(attribute)
            .ok_or(DispatchError::MissingAttribute { attribute })
    }

    /// Parsed AVPs, ordered by attribute code.
    pub fn avps(&self) -> impl Iterator<Item = &Avp> {
        self.avps.values()
    }

    /// The Message Type AVP.
    pub fn message_type(&self) -> Result<ControlMessageType, DispatchError> {
        match &self.avp(AttributeType::ControlMessage)?.value {
            AvpValue::MessageType(message) => Ok(*message),
            _ => Err(DispatchError::InvalidAttribute {
                attribute: AttributeType::ControlMessage,
            }),
        }
    }

    /// A required u16-valued AVP.
    pub fn u16_value(&self, attribute: AttributeType) -> Result<u16, DispatchError> {
        self.avp(attribute)?
            .value
            .as_u16()
            .ok_or(DispatchError::InvalidAttribute { attribute })
    }

    /// A required text AVP.
    pub fn text_value(&self, attribute: AttributeType) -> Result<&str, DispatchError> {
        self.avp(attribute)?
            .value
            .as_text()
            .ok_or(DispatchError::InvalidAttribute { attribute })
    }
}

/// An outbound control message.
///
/// `message_type` is prepended as the mandatory first AVP; `None` with no
/// AVPs produces a ZLB acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFrame {
    /// Message Type AVP to lead with.
    pub message_type: Option<ControlMessageType>,
    /// Header version nibble.
    pub protocol_version: u8,
    /// Peer's tunnel id.
    pub tunnel_id: u16,
    /// Peer's session id (0 for tunnel-level messages).
    pub session_id: u16,
    /// Our sequence number.
    pub ns: u16,
    /// Next sequence number we expect.
    pub nr: u16,
    /// AVPs following the Message Type.
    pub avps: Vec<Avp>,
    /// P bit.
    pub priority: bool,
}

impl ReplyFrame {
    /// Zero-Length Body acknowledgement.
    pub fn zlb(protocol_version: u8, tunnel_id: u16, ns: u16, nr: u16) -> Self {
        Self {
            message_type: None,
            protocol_version,
            tunnel_id,
            session_id: 0,
            ns,
            nr,
            avps: Vec::new(),
            priority: false,
        }
    }

    /// Encode header and AVPs, computing the length field.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(message) = self.message_type {
            Avp::message_type(message).encode_into(&mut body);
        }
        for avp in &self.avps {
            avp.encode_into(&mut body);
        }

        let mut header = Header::control(
            self.protocol_version,
            self.tunnel_id,
            self.session_id,
            self.ns,
            self.nr,
        );
        header.priority = self.priority;
        header.length = (HEADER_SIZE + body.len()) as u16;

        let mut datagram = Vec::with_capacity(HEADER_SIZE + body.len());
        datagram.extend_from_slice(&header.encode());
        datagram.extend_from_slice(&body);
        datagram
    }
}
