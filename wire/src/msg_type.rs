use crate::FrameError;

/// One of the five legal values of the `msg_type` header field.
///
/// The wire values are stable and match the order they're listed in the
/// interface contract: request, reply, echo request, echo reply, conn-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgType {
    MethodReq = 0,
    MethodReply = 1,
    EchoReq = 2,
    EchoReply = 3,
    ConnOpen = 4,
}

impl MsgType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(v: u32) -> Result<Self, FrameError> {
        match v {
            0 => Ok(MsgType::MethodReq),
            1 => Ok(MsgType::MethodReply),
            2 => Ok(MsgType::EchoReq),
            3 => Ok(MsgType::EchoReply),
            4 => Ok(MsgType::ConnOpen),
            other => Err(FrameError::BadMsgType(other)),
        }
    }
}

/// `status_code`, meaningful only on `MsgType::MethodReply`. Wire-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum StatusCode {
    Unset = 0,
    Success = 1,
    ServiceFailed = 2,
    TooManyPending = 3,
    ServiceQueued = 4,
    ServiceDropped = 5,
    ServerConnReset = 6,
    ServerMethodNotFound = 7,
    ConnectionClosed = 8,
}

impl StatusCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Unknown values decode to `Unset` rather than erroring: this field is
    /// a courtesy to peers and an unexpected value is never itself fatal to
    /// framing the way a bad `msg_type` is.
    pub fn from_u32(v: u32) -> Self {
        match v {
            1 => StatusCode::Success,
            2 => StatusCode::ServiceFailed,
            3 => StatusCode::TooManyPending,
            4 => StatusCode::ServiceQueued,
            5 => StatusCode::ServiceDropped,
            6 => StatusCode::ServerConnReset,
            7 => StatusCode::ServerMethodNotFound,
            8 => StatusCode::ConnectionClosed,
            _ => StatusCode::Unset,
        }
    }
}
