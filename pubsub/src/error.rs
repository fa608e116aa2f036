use std::fmt;

use rpc_transport::TransportError;

#[derive(Debug)]
pub enum PubSubError {
    Transport(TransportError),
    UnknownMethod(String),
}

impl fmt::Display for PubSubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PubSubError::Transport(e) => write!(f, "transport error: {e}"),
            PubSubError::UnknownMethod(m) => write!(f, "unknown method: {m}"),
        }
    }
}

impl std::error::Error for PubSubError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PubSubError::Transport(e) => Some(e),
            PubSubError::UnknownMethod(_) => None,
        }
    }
}

impl From<TransportError> for PubSubError {
    fn from(e: TransportError) -> Self {
        PubSubError::Transport(e)
    }
}
