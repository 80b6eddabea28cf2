//! Protocol constants from RFC 2661.
//!
//! Wire sizes and codes are fixed by the protocol and MUST NOT be changed.
//! Timing values are defaults; the server configuration may override them.

use std::time::Duration;

// =============================================================================
// TRANSPORT
// =============================================================================

/// Default UDP port for L2TP.
pub const L2TP_PORT: u16 = 1701;

/// Protocol version carried in the header's version nibble (L2TPv2).
pub const PROTOCOL_VERSION: u8 = 2;

/// Protocol version advertised in the Protocol Version AVP (1.0).
pub const AVP_PROTOCOL_VERSION: (u8, u8) = (1, 0);

/// Largest datagram the receive path accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65535;

// =============================================================================
// WIRE SIZES
// =============================================================================

/// Control header size (flags/version + length + tunnel + session + Ns + Nr).
pub const HEADER_SIZE: usize = 12;

/// AVP header size (flags/length + vendor id + attribute type).
pub const AVP_HEADER_SIZE: usize = 6;

/// Largest value the 10-bit AVP length field can express.
pub const AVP_MAX_LENGTH: usize = 0x03FF;

// =============================================================================
// HEADER FLAG BITS (first byte)
// =============================================================================

/// T: control message.
pub const FLAG_TYPE: u8 = 0x80;

/// L: length field present.
pub const FLAG_LENGTH: u8 = 0x40;

/// S: Ns/Nr present.
pub const FLAG_SEQUENCE: u8 = 0x08;

/// O: offset size present.
pub const FLAG_OFFSET: u8 = 0x02;

/// P: priority.
pub const FLAG_PRIORITY: u8 = 0x01;

/// Version nibble mask (second byte).
pub const VERSION_MASK: u8 = 0x0F;

// =============================================================================
// AVP FLAG BITS (first 16-bit word)
// =============================================================================

/// M: receiver must understand this AVP.
pub const AVP_FLAG_MANDATORY: u16 = 0x8000;

/// H: value is hidden.
pub const AVP_FLAG_HIDDEN: u16 = 0x4000;

/// Length mask of the first word.
pub const AVP_LENGTH_MASK: u16 = 0x03FF;

/// IETF vendor id.
pub const IETF_VENDOR_ID: u16 = 0;

// =============================================================================
// STOPCCN RESULT CODES (RFC 2661 4.4.2)
// =============================================================================

/// General request to clear control connection.
pub const STOPCCN_CLEAR: u16 = 1;

/// General error, error code indicates the problem.
pub const STOPCCN_GENERAL_ERROR: u16 = 2;

/// Control channel already exists.
pub const STOPCCN_ALREADY_EXISTS: u16 = 3;

/// Protocol version not supported.
pub const STOPCCN_VERSION_NOT_SUPPORTED: u16 = 5;

/// Requester is being shut down.
pub const STOPCCN_SHUTTING_DOWN: u16 = 6;

// =============================================================================
// CDN RESULT CODES (RFC 2661 4.4.2)
// =============================================================================

/// General error, error code indicates the problem.
pub const CDN_GENERAL_ERROR: u16 = 2;

// =============================================================================
// GENERAL ERROR CODES (RFC 2661 4.4.2)
// =============================================================================

/// No general error.
pub const ERROR_NONE: u16 = 0;

/// No control connection exists yet for this LAC-LNS pair.
pub const ERROR_NO_CONTROL_CONNECTION: u16 = 1;

/// One of the field values was out of range or reserved field was non-zero.
pub const ERROR_BAD_VALUE: u16 = 3;

/// Insufficient resources to handle this operation now.
pub const ERROR_INSUFFICIENT_RESOURCES: u16 = 4;

/// The Session ID is invalid in this context.
pub const ERROR_INVALID_SESSION: u16 = 5;

// =============================================================================
// TIMING DEFAULTS
// =============================================================================

/// First retransmission timeout.
pub const INITIAL_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Retransmission timeout ceiling (RFC 2661 5.8 recommends 8 seconds).
pub const MAX_RETRANSMIT_TIMEOUT: Duration = Duration::from_secs(8);

/// Retransmissions before the tunnel is torn down.
pub const MAX_RETRANSMITS: u32 = 5;

/// Send HELLO after this long without hearing from the peer.
pub const HELLO_INTERVAL: Duration = Duration::from_secs(60);

/// Tear the tunnel down after this long without hearing from the peer.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Granularity of the server's timer tick.
pub const TIMER_TICK: Duration = Duration::from_millis(250);

/// Receive window advertised in SCCRP.
pub const DEFAULT_RECEIVE_WINDOW: u16 = 4;

/// Maximum number of concurrent tunnels.
pub const DEFAULT_MAX_TUNNELS: usize = 1024;
