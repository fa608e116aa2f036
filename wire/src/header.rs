use crate::{FrameError, MsgType, StatusCode};

/// The fixed 16-byte frame header. On the wire every field is big-endian;
/// in memory it's already host-order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub msg_type: MsgType,
    pub header_length: u32,
    pub message_length: u32,
    pub status_code: StatusCode,
}

pub const HEADER_LEN: usize = 16;

impl Header {
    pub fn new(msg_type: MsgType, header_length: u32, message_length: u32, status_code: StatusCode) -> Self {
        Self {
            msg_type,
            header_length,
            message_length,
            status_code,
        }
    }

    /// `encode_header(msg_type, extra_header_bytes, body_bytes, status)`.
    pub fn encode(msg_type: MsgType, extra_header_bytes: u32, body_bytes: u32, status: StatusCode) -> [u8; HEADER_LEN] {
        let header_length = HEADER_LEN as u32 + extra_header_bytes;
        let h = Header::new(msg_type, header_length, body_bytes, status);
        h.to_bytes()
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.msg_type.as_u32().to_be_bytes());
        buf[4..8].copy_from_slice(&self.header_length.to_be_bytes());
        buf[8..12].copy_from_slice(&self.message_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.status_code.as_u32().to_be_bytes());
        buf
    }

    /// `decode_header(raw16) -> Header | FrameError`.
    pub fn decode(raw: &[u8]) -> Result<Header, FrameError> {
        if raw.len() < HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let msg_type = u32::from_be_bytes(raw[0..4].try_into().unwrap());
        let header_length = u32::from_be_bytes(raw[4..8].try_into().unwrap());
        let message_length = u32::from_be_bytes(raw[8..12].try_into().unwrap());
        let status_code = u32::from_be_bytes(raw[12..16].try_into().unwrap());

        let msg_type = MsgType::from_u32(msg_type)?;
        if header_length < HEADER_LEN as u32 {
            return Err(FrameError::HeaderTooShort(header_length));
        }
        Ok(Header {
            msg_type,
            header_length,
            message_length,
            status_code: StatusCode::from_u32(status_code),
        })
    }

    /// Bytes following the fixed header that belong to TLV extensions.
    pub fn extra_header_bytes(&self) -> u32 {
        self.header_length - HEADER_LEN as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let cases = [
            (MsgType::MethodReq, 16u32, 0u32, StatusCode::Unset),
            (MsgType::MethodReply, 32, 128, StatusCode::Success),
            (MsgType::EchoReq, 16, 0, StatusCode::Unset),
            (MsgType::EchoReply, 16, 0, StatusCode::Success),
            (MsgType::ConnOpen, 16, 0, StatusCode::Unset),
            (MsgType::MethodReply, 16, u32::MAX - 16, StatusCode::ServerConnReset),
        ];
        for (msg_type, header_length, message_length, status) in cases {
            let h = Header::new(msg_type, header_length, message_length, status);
            let bytes = h.to_bytes();
            let decoded = Header::decode(&bytes).unwrap();
            assert_eq!(decoded, h);
        }
    }

    #[test]
    fn decode_rejects_bad_msg_type() {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&99u32.to_be_bytes());
        buf[4..8].copy_from_slice(&16u32.to_be_bytes());
        let err = Header::decode(&buf).unwrap_err();
        assert_eq!(err, FrameError::BadMsgType(99));
    }

    #[test]
    fn decode_rejects_short_header_length() {
        let mut buf = [0u8; HEADER_LEN];
        buf[4..8].copy_from_slice(&8u32.to_be_bytes());
        let err = Header::decode(&buf).unwrap_err();
        assert_eq!(err, FrameError::HeaderTooShort(8));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let buf = [0u8; 10];
        assert_eq!(Header::decode(&buf).unwrap_err(), FrameError::Truncated);
    }
}
