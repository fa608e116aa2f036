use std::fmt;

/// Frame-level decode failures. These are always resolved locally by the
/// caller (stream connection closed, datagram dropped) and never reach an
/// application as anything more detailed than `ERR`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// `msg_type` is not one of the five known values.
    BadMsgType(u32),
    /// `header_length` is less than the fixed 16-byte header.
    HeaderTooShort(u32),
    /// A TLV carries a type other than the ones this wire format defines.
    BadTlvType(u32),
    /// Bytes remained after all TLVs were consumed.
    TrailingBytes(usize),
    /// Not enough bytes were available to decode a complete header or TLV.
    Truncated,
    /// A TLV's `value_length` would read past the declared header length.
    ValueLengthOverflow { declared: u32, remaining: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::BadMsgType(v) => write!(f, "unknown msg_type {v}"),
            FrameError::HeaderTooShort(v) => write!(f, "header_length {v} is less than 16"),
            FrameError::BadTlvType(v) => write!(f, "unknown tlv type {v}"),
            FrameError::TrailingBytes(n) => write!(f, "{n} trailing bytes after TLVs"),
            FrameError::Truncated => write!(f, "frame data truncated"),
            FrameError::ValueLengthOverflow { declared, remaining } => write!(
                f,
                "tlv value_length {declared} exceeds {remaining} remaining bytes"
            ),
        }
    }
}

impl std::error::Error for FrameError {}
