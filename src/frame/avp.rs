//! Attribute-Value Pair encoding and decoding.
//!
//! Wire format (RFC 2661 4.1):
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |M|H| rsvd  |      Length       |           Vendor ID           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |         Attribute Type        |        Attribute Value...
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use super::registry::{AttributeType, ControlMessageType, ValueShape};
use crate::core::CodecError;
use crate::core::constants::{
    AVP_FLAG_HIDDEN, AVP_FLAG_MANDATORY, AVP_HEADER_SIZE, AVP_LENGTH_MASK, AVP_MAX_LENGTH,
    IETF_VENDOR_ID,
};

const MAX_VALUE_LEN: usize = AVP_MAX_LENGTH - AVP_HEADER_SIZE;

/// Longest prefix of `text` within `max` bytes that ends on a char boundary.
fn fit_text(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Contents of a Result Code AVP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultCode {
    /// Result code.
    pub result: u16,
    /// Optional error code.
    pub error: Option<u16>,
    /// Optional human-readable message (requires `error`).
    pub message: Option<String>,
}

impl ResultCode {
    /// A result code with no error code or message.
    pub fn new(result: u16) -> Self {
        Self {
            result,
            error: None,
            message: None,
        }
    }

    /// A result code with an error code and message.
    pub fn with_error(result: u16, error: u16, message: impl Into<String>) -> Self {
        Self {
            result,
            error: Some(error),
            message: Some(message.into()),
        }
    }
}

/// Decoded AVP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvpValue {
    /// Message Type, resolved through the table.
    MessageType(ControlMessageType),
    /// 16-bit scalar.
    U16(u16),
    /// 32-bit scalar.
    U32(u32),
    /// Protocol version and revision.
    Version {
        /// Version.
        version: u8,
        /// Revision.
        revision: u8,
    },
    /// Two flag bits: (0x2 bit, 0x1 bit), e.g. (async, sync) framing.
    Flags(bool, bool),
    /// Text value.
    Text(String),
    /// Opaque bytes.
    Opaque(Vec<u8>),
    /// Result Code.
    ResultCode(ResultCode),
    /// Value of a hidden AVP, left obscured.
    Hidden(Vec<u8>),
}

impl AvpValue {
    /// Scalar u16, if this is one.
    pub fn as_u16(&self) -> Option<u16> {
        match self {
            AvpValue::U16(value) => Some(*value),
            _ => None,
        }
    }

    /// Text, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AvpValue::Text(text) => Some(text),
            _ => None,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            AvpValue::MessageType(message) => buf.extend_from_slice(&message.code().to_be_bytes()),
            AvpValue::U16(value) => buf.extend_from_slice(&value.to_be_bytes()),
            AvpValue::U32(value) => buf.extend_from_slice(&value.to_be_bytes()),
            AvpValue::Version { version, revision } => buf.extend_from_slice(&[*version, *revision]),
            AvpValue::Flags(high, low) => {
                let bits = (u32::from(*high) << 1) | u32::from(*low);
                buf.extend_from_slice(&bits.to_be_bytes());
            }
            AvpValue::Text(text) => {
                buf.extend_from_slice(fit_text(text, MAX_VALUE_LEN).as_bytes());
            }
            AvpValue::Opaque(bytes) | AvpValue::Hidden(bytes) => buf.extend_from_slice(bytes),
            AvpValue::ResultCode(code) => {
                buf.extend_from_slice(&code.result.to_be_bytes());
                if let Some(error) = code.error {
                    buf.extend_from_slice(&error.to_be_bytes());
                    if let Some(message) = &code.message {
                        buf.extend_from_slice(fit_text(message, MAX_VALUE_LEN - 4).as_bytes());
                    }
                }
            }
        }
    }
}

/// A single attribute-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Avp {
    /// M bit.
    pub mandatory: bool,
    /// H bit.
    pub hidden: bool,
    /// Vendor id (always IETF for registered attributes).
    pub vendor_id: u16,
    /// Attribute type.
    pub attribute: AttributeType,
    /// Decoded value.
    pub value: AvpValue,
}

impl Avp {
    /// Create a mandatory IETF AVP.
    pub fn new(attribute: AttributeType, value: AvpValue) -> Self {
        Self {
            mandatory: true,
            hidden: false,
            vendor_id: IETF_VENDOR_ID,
            attribute,
            value,
        }
    }

    /// Create a non-mandatory IETF AVP.
    pub fn optional(attribute: AttributeType, value: AvpValue) -> Self {
        Self {
            mandatory: false,
            ..Self::new(attribute, value)
        }
    }

    /// Message Type AVP.
    pub fn message_type(message: ControlMessageType) -> Self {
        Self::new(AttributeType::ControlMessage, AvpValue::MessageType(message))
    }

    /// Mandatory u16-valued AVP.
    pub fn u16(attribute: AttributeType, value: u16) -> Self {
        Self::new(attribute, AvpValue::U16(value))
    }

    /// Mandatory text AVP.
    pub fn text(attribute: AttributeType, text: impl Into<String>) -> Self {
        Self::new(attribute, AvpValue::Text(text.into()))
    }

    /// Mandatory Result Code AVP.
    pub fn result_code(code: ResultCode) -> Self {
        Self::new(AttributeType::ResultCode, AvpValue::ResultCode(code))
    }

    /// Total encoded length including the 6-byte AVP header.
    pub fn encoded_len(&self) -> usize {
        let mut value = Vec::new();
        self.value.encode_into(&mut value);
        (AVP_HEADER_SIZE + value.len()).min(AVP_MAX_LENGTH)
    }

    /// Append the encoded AVP to `buf`.
    ///
    /// Values longer than the 10-bit length field allows are cut off;
    /// text is cut at a character boundary.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let mut value = Vec::new();
        self.value.encode_into(&mut value);
        if value.len() > MAX_VALUE_LEN {
            log::warn!(
                "{} value of {} bytes truncated to fit the AVP length field",
                self.attribute,
                value.len()
            );
            value.truncate(MAX_VALUE_LEN);
        }

        let mut word = (AVP_HEADER_SIZE + value.len()) as u16 & AVP_LENGTH_MASK;
        if self.mandatory {
            word |= AVP_FLAG_MANDATORY;
        }
        if self.hidden {
            word |= AVP_FLAG_HIDDEN;
        }

        buf.extend_from_slice(&word.to_be_bytes());
        buf.extend_from_slice(&self.vendor_id.to_be_bytes());
        buf.extend_from_slice(&self.attribute.code().to_be_bytes());
        buf.extend_from_slice(&value);
    }
}

/// Decode a value according to the attribute's registered shape.
///
/// Text is decoded lossily: invalid UTF-8 becomes U+FFFD, so such a value
/// does not re-encode to the same bytes.
pub fn decode_value(attribute: AttributeType, raw: &[u8]) -> Result<AvpValue, CodecError> {
    let shape = attribute.shape();
    if let Some(expected) = shape.fixed_len() {
        if raw.len() != expected {
            return Err(CodecError::ValueLength {
                attribute,
                expected,
                actual: raw.len(),
            });
        }
    }

    let value = match shape {
        ValueShape::MessageType => {
            let code = u16::from_be_bytes([raw[0], raw[1]]);
            let message = ControlMessageType::from_code(code)
                .ok_or(CodecError::UnknownControlMessageType(code))?;
            AvpValue::MessageType(message)
        }
        ValueShape::U16 => AvpValue::U16(u16::from_be_bytes([raw[0], raw[1]])),
        ValueShape::U32 => AvpValue::U32(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]])),
        ValueShape::Version => AvpValue::Version {
            version: raw[0],
            revision: raw[1],
        },
        ValueShape::Flags => {
            let bits = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            AvpValue::Flags(bits & 0x2 != 0, bits & 0x1 != 0)
        }
        ValueShape::Text => AvpValue::Text(String::from_utf8_lossy(raw).into_owned()),
        ValueShape::Opaque(_) => AvpValue::Opaque(raw.to_vec()),
        ValueShape::ResultCode => AvpValue::ResultCode(decode_result_code(attribute, raw)?),
    };
    Ok(value)
}

fn decode_result_code(attribute: AttributeType, raw: &[u8]) -> Result<ResultCode, CodecError> {
    match raw.len() {
        2 => Ok(ResultCode::new(u16::from_be_bytes([raw[0], raw[1]]))),
        len if len >= 4 => Ok(ResultCode {
            result: u16::from_be_bytes([raw[0], raw[1]]),
            error: Some(u16::from_be_bytes([raw[2], raw[3]])),
            message: (len > 4).then(|| String::from_utf8_lossy(&raw[4..]).into_owned()),
        }),
        len => Err(CodecError::ValueLength {
            attribute,
            expected: if len < 2 { 2 } else { 4 },
            actual: len,
        }),
    }
}

/// Iterator over the AVPs of a control message payload.
///
/// Yields `Err(UnknownAttribute { mandatory: false, .. })` for an
/// unrecognised optional AVP and carries on with the next one. Any other
/// error is yielded once and ends the iteration.
#[derive(Debug, Clone)]
pub struct AvpIter<'a> {
    remaining: &'a [u8],
    fused: bool,
}

/// Iterate over the AVPs in `payload`.
pub fn iter(payload: &[u8]) -> AvpIter<'_> {
    AvpIter {
        remaining: payload,
        fused: false,
    }
}

impl AvpIter<'_> {
    fn read_one(&mut self) -> Result<Avp, CodecError> {
        let buf = self.remaining;
        if buf.len() < AVP_HEADER_SIZE {
            return Err(CodecError::TruncatedAvp {
                needed: AVP_HEADER_SIZE,
                remaining: buf.len(),
            });
        }

        let word = u16::from_be_bytes([buf[0], buf[1]]);
        let length = usize::from(word & AVP_LENGTH_MASK);
        if length < AVP_HEADER_SIZE {
            return Err(CodecError::InvalidAvpLength(length));
        }
        if length > buf.len() {
            return Err(CodecError::TruncatedAvp {
                needed: length,
                remaining: buf.len(),
            });
        }

        let mandatory = word & AVP_FLAG_MANDATORY != 0;
        let hidden = word & AVP_FLAG_HIDDEN != 0;
        let vendor_id = u16::from_be_bytes([buf[2], buf[3]]);
        let attribute_type = u16::from_be_bytes([buf[4], buf[5]]);
        let raw = &buf[AVP_HEADER_SIZE..length];

        // Advance first so an unknown optional AVP can be stepped over.
        self.remaining = &buf[length..];

        let attribute = if vendor_id == IETF_VENDOR_ID {
            AttributeType::from_code(attribute_type)
        } else {
            None
        };
        let attribute = attribute.ok_or(CodecError::UnknownAttribute {
            vendor_id,
            attribute_type,
            mandatory,
        })?;

        let value = if hidden {
            AvpValue::Hidden(raw.to_vec())
        } else {
            decode_value(attribute, raw)?
        };

        Ok(Avp {
            mandatory,
            hidden,
            vendor_id,
            attribute,
            value,
        })
    }
}

impl Iterator for AvpIter<'_> {
    type Item = Result<Avp, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused || self.remaining.is_empty() {
            return None;
        }

        let item = self.read_one();
        if let Err(err) = &item {
            if !err.is_skippable() {
                self.fused = true;
            }
        }
        Some(item)
    }
}

/// Decode every AVP in `payload`.
///
/// Unknown AVPs without the M bit are skipped (RFC 2661 4.1); an unknown
/// mandatory AVP, or any structural error, aborts the whole payload.
pub fn decode_all(payload: &[u8]) -> Result<Vec<Avp>, CodecError> {
    let mut avps = Vec::new();
    for item in iter(payload) {
        match item {
            Ok(avp) => avps.push(avp),
            Err(err) if err.is_skippable() => log::debug!("skipping AVP: {err}"),
            Err(err) => return Err(err),
        }
    }
    Ok(avps)
}

/// Encode `avps` back to back, in the given order.
pub fn encode_all(avps: &[Avp]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(avps.iter().map(Avp::encoded_len).sum());
    for avp in avps {
        avp.encode_into(&mut buf);
    }
    buf
}
