//! Attribute registry and control message type table.
//!
//! Both tables are closed enums resolved with a direct `match` on the wire
//! code, so every lookup is a single jump and every consumer is forced to
//! handle every variant.

use std::fmt;

/// How an attribute's value is laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    /// Big-endian u16, resolved through [`ControlMessageType`].
    MessageType,
    /// Big-endian u16.
    U16,
    /// Big-endian u32.
    U32,
    /// Two u8 fields: version, revision.
    Version,
    /// 32-bit field with two flag bits in the low bits (0x2, 0x1).
    Flags,
    /// Text consuming the whole value.
    Text,
    /// Opaque bytes of a fixed size.
    Opaque(usize),
    /// Result code u16, optional error code u16, optional message text.
    ResultCode,
}

impl ValueShape {
    /// Exact value size for fixed-size shapes.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            ValueShape::MessageType | ValueShape::U16 => Some(2),
            ValueShape::U32 | ValueShape::Flags => Some(4),
            ValueShape::Version => Some(2),
            ValueShape::Opaque(len) => Some(len),
            ValueShape::Text | ValueShape::ResultCode => None,
        }
    }
}

/// IETF attribute types understood by this endpoint (RFC 2661 4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum AttributeType {
    /// Message Type.
    ControlMessage = 0,
    /// Result Code (StopCCN, CDN).
    ResultCode = 1,
    /// Protocol Version.
    ProtocolVersion = 2,
    /// Framing Capabilities.
    FramingCapabilities = 3,
    /// Bearer Capabilities.
    BearerCapabilities = 4,
    /// Tie Breaker.
    TieBreaker = 5,
    /// Firmware Revision.
    FirmwareRevision = 6,
    /// Host Name.
    HostName = 7,
    /// Vendor Name.
    VendorName = 8,
    /// Assigned Tunnel ID.
    AssignedTunnelId = 9,
    /// Receive Window Size.
    ReceiveWindowSize = 10,
    /// Assigned Session ID.
    AssignedSessionId = 14,
    /// Call Serial Number.
    CallSerialNumber = 15,
    /// Bearer Type.
    BearerType = 18,
    /// Framing Type.
    FramingType = 19,
    /// (Tx) Connect Speed.
    TxConnectSpeed = 24,
}

impl AttributeType {
    /// Look up an attribute type by its wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(Self::ControlMessage),
            1 => Some(Self::ResultCode),
            2 => Some(Self::ProtocolVersion),
            3 => Some(Self::FramingCapabilities),
            4 => Some(Self::BearerCapabilities),
            5 => Some(Self::TieBreaker),
            6 => Some(Self::FirmwareRevision),
            7 => Some(Self::HostName),
            8 => Some(Self::VendorName),
            9 => Some(Self::AssignedTunnelId),
            10 => Some(Self::ReceiveWindowSize),
            14 => Some(Self::AssignedSessionId),
            15 => Some(Self::CallSerialNumber),
            18 => Some(Self::BearerType),
            19 => Some(Self::FramingType),
            24 => Some(Self::TxConnectSpeed),
            _ => None,
        }
    }

    /// Wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Registry name.
    pub fn name(self) -> &'static str {
        match self {
            Self::ControlMessage => "control_message",
            Self::ResultCode => "result_code",
            Self::ProtocolVersion => "protocol_version",
            Self::FramingCapabilities => "framing_capabilities",
            Self::BearerCapabilities => "bearer_capabilities",
            Self::TieBreaker => "tie_breaker",
            Self::FirmwareRevision => "firmware_revision",
            Self::HostName => "host_name",
            Self::VendorName => "vendor_name",
            Self::AssignedTunnelId => "assigned_tunnel_id",
            Self::ReceiveWindowSize => "receive_window_size",
            Self::AssignedSessionId => "assigned_session_id",
            Self::CallSerialNumber => "call_serial_number",
            Self::BearerType => "bearer_type",
            Self::FramingType => "framing_type",
            Self::TxConnectSpeed => "tx_connect_speed",
        }
    }

    /// Value layout.
    pub fn shape(self) -> ValueShape {
        match self {
            Self::ControlMessage => ValueShape::MessageType,
            Self::ResultCode => ValueShape::ResultCode,
            Self::ProtocolVersion => ValueShape::Version,
            Self::FramingCapabilities
            | Self::BearerCapabilities
            | Self::BearerType
            | Self::FramingType => ValueShape::Flags,
            Self::TieBreaker => ValueShape::Opaque(8),
            Self::FirmwareRevision
            | Self::AssignedTunnelId
            | Self::ReceiveWindowSize
            | Self::AssignedSessionId => ValueShape::U16,
            Self::HostName | Self::VendorName => ValueShape::Text,
            Self::CallSerialNumber | Self::TxConnectSpeed => ValueShape::U32,
        }
    }

    /// Every registered attribute, in code order.
    pub const ALL: [AttributeType; 16] = [
        Self::ControlMessage,
        Self::ResultCode,
        Self::ProtocolVersion,
        Self::FramingCapabilities,
        Self::BearerCapabilities,
        Self::TieBreaker,
        Self::FirmwareRevision,
        Self::HostName,
        Self::VendorName,
        Self::AssignedTunnelId,
        Self::ReceiveWindowSize,
        Self::AssignedSessionId,
        Self::CallSerialNumber,
        Self::BearerType,
        Self::FramingType,
        Self::TxConnectSpeed,
    ];
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Control message types (RFC 2661 3.2, plus the explicit ACK of RFC 3931).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ControlMessageType {
    /// Start-Control-Connection-Request
    Sccrq = 1,
    /// Start-Control-Connection-Reply
    Sccrp = 2,
    /// Start-Control-Connection-Connected
    Scccn = 3,
    /// Stop-Control-Connection-Notification
    StopCcn = 4,
    /// Hello (keep-alive)
    Hello = 6,
    /// Outgoing-Call-Request
    Ocrq = 7,
    /// Outgoing-Call-Reply
    Ocrp = 8,
    /// Outgoing-Call-Connected
    Occn = 9,
    /// Incoming-Call-Request
    Icrq = 10,
    /// Incoming-Call-Reply
    Icrp = 11,
    /// Incoming-Call-Connected
    Iccn = 12,
    /// Call-Disconnect-Notify
    Cdn = 14,
    /// Explicit Acknowledgement
    Ack = 20,
}

impl ControlMessageType {
    /// Look up a message type by its wire code.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1 => Some(Self::Sccrq),
            2 => Some(Self::Sccrp),
            3 => Some(Self::Scccn),
            4 => Some(Self::StopCcn),
            6 => Some(Self::Hello),
            7 => Some(Self::Ocrq),
            8 => Some(Self::Ocrp),
            9 => Some(Self::Occn),
            10 => Some(Self::Icrq),
            11 => Some(Self::Icrp),
            12 => Some(Self::Iccn),
            14 => Some(Self::Cdn),
            20 => Some(Self::Ack),
            _ => None,
        }
    }

    /// Wire code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Conventional short name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sccrq => "SCCRQ",
            Self::Sccrp => "SCCRP",
            Self::Scccn => "SCCCN",
            Self::StopCcn => "StopCCN",
            Self::Hello => "HELLO",
            Self::Ocrq => "OCRQ",
            Self::Ocrp => "OCRP",
            Self::Occn => "OCCN",
            Self::Icrq => "ICRQ",
            Self::Icrp => "ICRP",
            Self::Iccn => "ICCN",
            Self::Cdn => "CDN",
            Self::Ack => "ACK",
        }
    }
}

impl fmt::Display for ControlMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
