//! Error types for the L2TP control plane.

use std::net::SocketAddr;

use thiserror::Error;

use crate::frame::{AttributeType, ControlMessageType};
use crate::tunnel::TunnelPhase;

/// Errors raised while decoding the header or AVPs of a single datagram.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer than 12 bytes available for the control header.
    #[error("truncated header: expected at least {expected} bytes, got {actual}")]
    TruncatedHeader {
        /// Minimum header size.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// The header's length field disagrees with the datagram.
    #[error("length mismatch: header declares {declared} bytes, datagram has {actual}")]
    LengthMismatch {
        /// Length from the header.
        declared: usize,
        /// Datagram size.
        actual: usize,
    },

    /// An AVP header or value runs past the end of the payload.
    #[error("truncated AVP: needs {needed} bytes, {remaining} remaining")]
    TruncatedAvp {
        /// Bytes the AVP claims.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// An AVP declares a length smaller than its own header.
    #[error("invalid AVP length {0} (minimum is 6)")]
    InvalidAvpLength(usize),

    /// A fixed-size value has the wrong size.
    #[error("{attribute} value must be {expected} bytes, got {actual}")]
    ValueLength {
        /// The attribute being decoded.
        attribute: AttributeType,
        /// Size the shape requires.
        expected: usize,
        /// Size on the wire.
        actual: usize,
    },

    /// The attribute type (or vendor) is not in the registry.
    #[error("unknown attribute type {attribute_type} (vendor {vendor_id}, mandatory: {mandatory})")]
    UnknownAttribute {
        /// Vendor id of the AVP.
        vendor_id: u16,
        /// Raw attribute type.
        attribute_type: u16,
        /// Whether the M bit was set.
        mandatory: bool,
    },

    /// The Message Type AVP carries a code outside the table.
    #[error("unknown control message type {0}")]
    UnknownControlMessageType(u16),
}

impl CodecError {
    /// Check if decoding may continue past this error.
    ///
    /// Only a non-mandatory unknown attribute can be skipped; everything else
    /// aborts the datagram.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            CodecError::UnknownAttribute {
                mandatory: false,
                ..
            }
        )
    }
}

/// Errors raised while dispatching a parsed control message.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The datagram could not be decoded.
    #[error("malformed frame from {peer}: {source}")]
    MalformedFrame {
        /// Sender of the datagram.
        peer: SocketAddr,
        /// Underlying codec error.
        #[source]
        source: CodecError,
    },

    /// A required AVP is absent.
    #[error("missing attribute {attribute}")]
    MissingAttribute {
        /// The absent attribute.
        attribute: AttributeType,
    },

    /// An AVP is present but its value cannot be interpreted (e.g. hidden).
    #[error("attribute {attribute} has an unusable value")]
    InvalidAttribute {
        /// The offending attribute.
        attribute: AttributeType,
    },

    /// The control message code has no handler.
    #[error("unhandled control message type {code}")]
    UnhandledControlMessage {
        /// Raw message type code.
        code: u16,
    },

    /// Header version differs from the negotiated one.
    #[error("unsupported protocol version {actual} (expected {expected})")]
    UnsupportedVersion {
        /// Configured version.
        expected: u8,
        /// Version found in the header.
        actual: u8,
    },

    /// SCCRQ for a tunnel id that is already in use.
    #[error("tunnel {tunnel_id} already exists")]
    DuplicateTunnel {
        /// The requested tunnel id.
        tunnel_id: u16,
    },

    /// Message addressed to a tunnel we do not know.
    #[error("unknown tunnel {tunnel_id}")]
    UnknownTunnel {
        /// Tunnel id from the header.
        tunnel_id: u16,
    },

    /// Message addressed to a session we do not know.
    #[error("unknown session {session_id} in tunnel {tunnel_id}")]
    UnknownSession {
        /// Tunnel id.
        tunnel_id: u16,
        /// Session id.
        session_id: u16,
    },

    /// A known message arrived in a phase where it makes no sense.
    #[error("unexpected {message} in tunnel {tunnel_id} while {phase:?}")]
    UnexpectedMessage {
        /// Tunnel id.
        tunnel_id: u16,
        /// The message received.
        message: ControlMessageType,
        /// Tunnel phase at the time.
        phase: TunnelPhase,
    },

    /// The tunnel table is full.
    #[error("tunnel limit of {0} reached")]
    TunnelLimit(usize),
}

impl DispatchError {
    /// Check if this error stops the tunnel it was raised on.
    ///
    /// These indicate a protocol violation by the peer: the dispatcher sends
    /// StopCCN and moves the tunnel to `Stopping`.
    pub fn terminates_tunnel(&self) -> bool {
        matches!(
            self,
            DispatchError::MissingAttribute { .. }
                | DispatchError::InvalidAttribute { .. }
                | DispatchError::UnsupportedVersion { .. }
        )
    }

    /// Check if this error comes from decoding rather than dispatching.
    pub fn is_malformed(&self) -> bool {
        matches!(self, DispatchError::MalformedFrame { .. })
    }
}

/// Errors loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read {path}: {source}")]
    Read {
        /// Path of the file.
        path: String,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for the expected layout.
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The requested protocol has no entry.
    #[error("no configuration for protocol {0}")]
    MissingProtocol(String),

    /// A value is out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum L2tpError {
    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Dispatch error.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
