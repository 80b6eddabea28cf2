//! L2TP frame codec.
//!
//! - [`Header`]: the fixed 12-byte control header
//! - [`AttributeType`] / [`ControlMessageType`]: the closed registries
//! - [`Avp`]: attribute-value pairs and their typed values
//! - [`ControlMessage`] / [`ReplyFrame`]: inbound parse, outbound build
//!
//! All multi-byte integers are big-endian.

pub mod avp;
mod header;
mod message;
mod registry;

pub use avp::{Avp, AvpValue, ResultCode, decode_all, decode_value, encode_all};
pub use header::{Header, is_control_datagram};
pub use message::{ControlMessage, ReplyFrame};
pub use registry::{AttributeType, ControlMessageType, ValueShape};
