use std::fmt;

use rpc_transport::TransportError;

/// The small set of application-visible outcomes. Low-level frame/codec/
/// transport errors are always resolved locally (close, drop, reconnect)
/// and only ever surface to a caller as one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOutcome {
    Ok,
    Queued,
    Dropped,
    Err,
    MethodNotFound,
    Closed,
}

#[derive(Debug)]
pub enum ClientError {
    NotConnected,
    Transport(TransportError),
    Encode(String),
    Decode(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::NotConnected => write!(f, "client is not connected"),
            ClientError::Transport(e) => write!(f, "transport error: {e}"),
            ClientError::Encode(e) => write!(f, "encode error: {e}"),
            ClientError::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(e)
    }
}

#[derive(Debug)]
pub enum ServerError {
    Transport(TransportError),
    Decode(String),
    Encode(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::Transport(e) => write!(f, "transport error: {e}"),
            ServerError::Decode(e) => write!(f, "decode error: {e}"),
            ServerError::Encode(e) => write!(f, "encode error: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ServerError {
    fn from(e: TransportError) -> Self {
        ServerError::Transport(e)
    }
}
