use bytes::Bytes;

use crate::FrameError;

/// The only TLV type this wire format defines. Any other value on the wire
/// is a fatal frame error.
pub const TLV_TYPE_METHOD_NAME: u32 = 1;

/// Request-scoped method name buffer. The decoder copies at most this many
/// bytes of a `METHOD_NAME` TLV value, matching the fixed-width buffer the
/// original receive path used.
pub const METHOD_NAME_MAX: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tlv {
    pub tlv_type: u32,
    pub value: Bytes,
}

impl Tlv {
    pub fn method_name(name: &str) -> Self {
        Tlv {
            tlv_type: TLV_TYPE_METHOD_NAME,
            value: Bytes::copy_from_slice(name.as_bytes()),
        }
    }

    pub fn encoded_len(&self) -> usize {
        8 + self.value.len()
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.tlv_type.to_be_bytes());
        buf.extend_from_slice(&(self.value.len() as u32).to_be_bytes());
        buf.extend_from_slice(&self.value);
    }
}

/// Walk `raw[..extra_len]` decoding zero or more TLVs. Mirrors
/// `decode_tlvs`: an unknown type is a fatal `BadTlvType`; a declared
/// `value_length` that would read past `extra_len` is rejected before any
/// copy happens; bytes left over once `extra_len` is exhausted are
/// `TrailingBytes`.
pub fn decode_tlvs(raw: &[u8], extra_len: usize) -> Result<Vec<Tlv>, FrameError> {
    if raw.len() < extra_len {
        return Err(FrameError::Truncated);
    }
    let mut tlvs = Vec::new();
    let mut offset = 0usize;
    while offset < extra_len {
        if extra_len - offset < 8 {
            return Err(FrameError::Truncated);
        }
        let tlv_type = u32::from_be_bytes(raw[offset..offset + 4].try_into().unwrap());
        let value_length = u32::from_be_bytes(raw[offset + 4..offset + 8].try_into().unwrap());
        let remaining = extra_len - offset - 8;
        if value_length as usize > remaining {
            return Err(FrameError::ValueLengthOverflow {
                declared: value_length,
                remaining,
            });
        }
        if tlv_type != TLV_TYPE_METHOD_NAME {
            return Err(FrameError::BadTlvType(tlv_type));
        }
        let value_start = offset + 8;
        let value_end = value_start + value_length as usize;
        tlvs.push(Tlv {
            tlv_type,
            value: Bytes::copy_from_slice(&raw[value_start..value_end]),
        });
        offset = value_end;
    }
    if offset != extra_len {
        return Err(FrameError::TrailingBytes(extra_len - offset));
    }
    Ok(tlvs)
}

/// Extract a method name from a decoded TLV list, truncating the value to
/// `METHOD_NAME_MAX` bytes and lossily converting to UTF-8 (the wire value
/// is expected to be a null-terminated UTF-8 string; any interior NUL and
/// anything after it is trimmed).
pub fn method_name_from_tlvs(tlvs: &[Tlv]) -> Option<String> {
    tlvs.iter().find(|t| t.tlv_type == TLV_TYPE_METHOD_NAME).map(|t| {
        let truncated = &t.value[..t.value.len().min(METHOD_NAME_MAX)];
        let nul_pos = truncated.iter().position(|&b| b == 0).unwrap_or(truncated.len());
        String::from_utf8_lossy(&truncated[..nul_pos]).into_owned()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all(tlvs: &[Tlv]) -> Vec<u8> {
        let mut buf = Vec::new();
        for t in tlvs {
            t.encode_into(&mut buf);
        }
        buf
    }

    #[test]
    fn tlv_round_trip_method_names() {
        for len in 1..128usize {
            let name: String = "a".repeat(len);
            let tlv = Tlv::method_name(&name);
            let buf = encode_all(&[tlv]);
            let decoded = decode_tlvs(&buf, buf.len()).unwrap();
            assert_eq!(method_name_from_tlvs(&decoded).as_deref(), Some(name.as_str()));
        }
    }

    #[test]
    fn empty_extra_bytes_is_legal() {
        let decoded = decode_tlvs(&[], 0).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn unknown_tlv_type_is_fatal() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&99u32.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        let err = decode_tlvs(&buf, buf.len()).unwrap_err();
        assert_eq!(err, FrameError::BadTlvType(99));
    }

    #[test]
    fn overflowing_value_length_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&TLV_TYPE_METHOD_NAME.to_be_bytes());
        buf.extend_from_slice(&1000u32.to_be_bytes());
        let err = decode_tlvs(&buf, buf.len()).unwrap_err();
        assert!(matches!(err, FrameError::ValueLengthOverflow { .. }));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let tlv = Tlv::method_name("foo");
        let mut buf = encode_all(&[tlv]);
        buf.push(0xff);
        let err = decode_tlvs(&buf, buf.len()).unwrap_err();
        assert!(matches!(err, FrameError::TrailingBytes(1)));
    }

    #[test]
    fn name_over_max_is_truncated() {
        let name = "x".repeat(200);
        let tlv = Tlv::method_name(&name);
        let buf = encode_all(&[tlv]);
        let decoded = decode_tlvs(&buf, buf.len()).unwrap();
        let got = method_name_from_tlvs(&decoded).unwrap();
        assert_eq!(got.len(), METHOD_NAME_MAX);
    }
}
