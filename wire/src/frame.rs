use bytes::Bytes;

use crate::{decode_tlvs, method_name_from_tlvs, FrameError, Header, MsgType, StatusCode, Tlv, HEADER_LEN};

/// A fully decoded frame: header, TLV extensions, and packed body.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: Header,
    pub tlvs: Vec<Tlv>,
    pub body: Bytes,
}

impl Frame {
    /// Build a `METHOD_REQ`/one-way request frame carrying a `METHOD_NAME` TLV.
    pub fn request(msg_type: MsgType, method_name: &str, body: Bytes) -> Self {
        let tlv = Tlv::method_name(method_name);
        let header = Header::new(
            msg_type,
            HEADER_LEN as u32 + tlv.encoded_len() as u32,
            body.len() as u32,
            StatusCode::Unset,
        );
        Frame {
            header,
            tlvs: vec![tlv],
            body,
        }
    }

    /// Build a header-only frame with no TLVs and no body (echo, empty replies).
    pub fn empty(msg_type: MsgType, status: StatusCode) -> Self {
        Frame {
            header: Header::new(msg_type, HEADER_LEN as u32, 0, status),
            tlvs: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Build a `METHOD_REPLY` frame carrying a body, echoing back the
    /// original method name (the closure contract requires this).
    pub fn reply(method_name: &str, status: StatusCode, body: Bytes) -> Self {
        let tlv = Tlv::method_name(method_name);
        let header = Header::new(
            MsgType::MethodReply,
            HEADER_LEN as u32 + tlv.encoded_len() as u32,
            body.len() as u32,
            status,
        );
        Frame {
            header,
            tlvs: vec![tlv],
            body,
        }
    }

    pub fn method_name(&self) -> Option<String> {
        method_name_from_tlvs(&self.tlvs)
    }

    /// Total number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        self.header.header_length as usize + self.header.message_length as usize
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.extend_from_slice(&self.header.to_bytes());
        for tlv in &self.tlvs {
            tlv.encode_into(&mut buf);
        }
        buf.extend_from_slice(&self.body);
        buf
    }

    /// Decode a complete frame from `header` plus the bytes that follow it
    /// on the wire (`extra_header_bytes` TLV bytes, then the body).
    pub fn decode(header: Header, rest: &[u8]) -> Result<Self, FrameError> {
        let extra = header.extra_header_bytes() as usize;
        let expected = extra + header.message_length as usize;
        if rest.len() != expected {
            if rest.len() < expected {
                return Err(FrameError::Truncated);
            }
            return Err(FrameError::TrailingBytes(rest.len() - expected));
        }
        let tlvs = decode_tlvs(&rest[..extra], extra)?;
        let body = Bytes::copy_from_slice(&rest[extra..]);
        Ok(Frame { header, tlvs, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trip() {
        let f = Frame::request(MsgType::MethodReq, "foo", Bytes::from_static(b"hello"));
        let encoded = f.encode();
        let header = Header::decode(&encoded[..HEADER_LEN]).unwrap();
        let decoded = Frame::decode(header, &encoded[HEADER_LEN..]).unwrap();
        assert_eq!(decoded.method_name().as_deref(), Some("foo"));
        assert_eq!(&decoded.body[..], b"hello");
    }

    #[test]
    fn empty_frame_round_trip() {
        let f = Frame::empty(MsgType::EchoReq, StatusCode::Unset);
        let encoded = f.encode();
        assert_eq!(encoded.len(), HEADER_LEN);
        let header = Header::decode(&encoded).unwrap();
        assert_eq!(header.msg_type, MsgType::EchoReq);
        let decoded = Frame::decode(header, &[]).unwrap();
        assert!(decoded.body.is_empty());
    }
}
