//! Fixed 12-byte L2TP control header.
//!
//! Wire format (RFC 2661 3.1, always carrying Length and Ns/Nr):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |T|L|x|x|S|x|O|P|x|x|x|x|  Ver  |            Length             |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Tunnel ID           |           Session ID          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |               Ns              |               Nr              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use crate::core::CodecError;
use crate::core::constants::{
    FLAG_LENGTH, FLAG_OFFSET, FLAG_PRIORITY, FLAG_SEQUENCE, FLAG_TYPE, HEADER_SIZE, VERSION_MASK,
};

/// Decoded control header.
///
/// Reserved bits are dropped on decode and written as zero on encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// T bit: control message (true) or data message (false).
    pub is_control: bool,
    /// L bit: the length field is valid.
    pub length_present: bool,
    /// S bit: Ns and Nr are valid.
    pub sequence_present: bool,
    /// O bit: offset size present (unused by the control plane).
    pub offset_present: bool,
    /// P bit: priority.
    pub priority: bool,
    /// Protocol version nibble.
    pub version: u8,
    /// Total frame length including this header.
    pub length: u16,
    /// Receiver's tunnel id.
    pub tunnel_id: u16,
    /// Receiver's session id (0 for tunnel-level messages).
    pub session_id: u16,
    /// Sender's sequence number.
    pub ns: u16,
    /// Next sequence number the sender expects.
    pub nr: u16,
}

impl Header {
    /// Create a control header with T, L and S set.
    ///
    /// `length` is left at the bare header size; set it to `12 + payload`
    /// before encoding if a payload follows.
    pub fn control(version: u8, tunnel_id: u16, session_id: u16, ns: u16, nr: u16) -> Self {
        Self {
            is_control: true,
            length_present: true,
            sequence_present: true,
            offset_present: false,
            priority: false,
            version,
            length: HEADER_SIZE as u16,
            tunnel_id,
            session_id,
            ns,
            nr,
        }
    }

    /// Parse a header from the first 12 bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::TruncatedHeader {
                expected: HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let flags = bytes[0];
        Ok(Self {
            is_control: flags & FLAG_TYPE != 0,
            length_present: flags & FLAG_LENGTH != 0,
            sequence_present: flags & FLAG_SEQUENCE != 0,
            offset_present: flags & FLAG_OFFSET != 0,
            priority: flags & FLAG_PRIORITY != 0,
            version: bytes[1] & VERSION_MASK,
            length: u16::from_be_bytes([bytes[2], bytes[3]]),
            tunnel_id: u16::from_be_bytes([bytes[4], bytes[5]]),
            session_id: u16::from_be_bytes([bytes[6], bytes[7]]),
            ns: u16::from_be_bytes([bytes[8], bytes[9]]),
            nr: u16::from_be_bytes([bytes[10], bytes[11]]),
        })
    }

    /// Serialize the header (12 bytes).
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut flags = 0u8;
        if self.is_control {
            flags |= FLAG_TYPE;
        }
        if self.length_present {
            flags |= FLAG_LENGTH;
        }
        if self.sequence_present {
            flags |= FLAG_SEQUENCE;
        }
        if self.offset_present {
            flags |= FLAG_OFFSET;
        }
        if self.priority {
            flags |= FLAG_PRIORITY;
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = flags;
        buf[1] = self.version & VERSION_MASK;
        buf[2..4].copy_from_slice(&self.length.to_be_bytes());
        buf[4..6].copy_from_slice(&self.tunnel_id.to_be_bytes());
        buf[6..8].copy_from_slice(&self.session_id.to_be_bytes());
        buf[8..10].copy_from_slice(&self.ns.to_be_bytes());
        buf[10..12].copy_from_slice(&self.nr.to_be_bytes());
        buf
    }
}

/// Check the T bit of a raw datagram without decoding the rest.
///
/// Data messages may use the short header form, so the server filters them
/// out before handing the datagram to the fixed-size decoder.
pub fn is_control_datagram(bytes: &[u8]) -> bool {
    bytes.first().is_some_and(|flags| flags & FLAG_TYPE != 0)
}
