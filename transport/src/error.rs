use std::fmt;

use rpc_wire::FrameError;

/// Errors the transport capability set can surface. Distinguishes the
/// "peer closed normally" case (logged at DEBUG, not counted as an error)
/// from genuine faults.
#[derive(Debug)]
pub enum TransportError {
    /// The peer closed the connection (recv returned EOF / 0 bytes).
    Closed,
    /// The peer reset the connection; benign but distinct from `Closed`.
    ConnReset,
    /// A send wrote fewer bytes than the frame required.
    ShortWrite { wrote: usize, needed: usize },
    /// The underlying frame was malformed.
    Frame(FrameError),
    /// An I/O error not covered by the above.
    Io(std::io::Error),
    /// The transport has already been closed locally.
    AlreadyClosed,
    /// A capability this backend does not implement was invoked (the
    /// `Userdefined` default stubs use this instead of panicking).
    Unsupported(&'static str),
    /// `connect`/`bind` failed to parse or apply the requested address.
    Addr(String),
    /// A crypto-framed payload's preamble was missing or malformed.
    Crypto(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed by peer"),
            TransportError::ConnReset => write!(f, "connection reset by peer"),
            TransportError::ShortWrite { wrote, needed } => {
                write!(f, "short write: wrote {wrote} of {needed} bytes")
            }
            TransportError::Frame(e) => write!(f, "frame error: {e}"),
            TransportError::Io(e) => write!(f, "io error: {e}"),
            TransportError::AlreadyClosed => write!(f, "transport already closed"),
            TransportError::Unsupported(op) => write!(f, "operation not supported: {op}"),
            TransportError::Addr(s) => write!(f, "address error: {s}"),
            TransportError::Crypto(s) => write!(f, "crypto framing error: {s}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransportError::Frame(e) => Some(e),
            TransportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FrameError> for TransportError {
    fn from(e: FrameError) -> Self {
        TransportError::Frame(e)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionReset => TransportError::ConnReset,
            ErrorKind::UnexpectedEof | ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io(e),
        }
    }
}
