use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rpc_wire::{Frame, Header, HEADER_LEN};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UnixListener, UnixStream};
use tokio::sync::Mutex as AsyncMutex;

use crate::TransportError;

/// Messages above this size spill the receive buffer onto the heap instead
/// of using the inline stack buffer.
const STACK_BUFFER_LEN: usize = 512;

type BoxRead = Box<dyn AsyncRead + Unpin + Send + Sync>;
type BoxWrite = Box<dyn AsyncWrite + Unpin + Send + Sync>;

struct StreamInner {
    reader: AsyncMutex<BoxRead>,
    writer: AsyncMutex<BoxWrite>,
    closed: AtomicBool,
    tport_id: String,
}

/// Byte-stream transport over TCP (v4/v6) or UNIX domain sockets. Covers
/// both the `StreamRpc` and `StreamOneway` variants: the distinction
/// between RPC and one-way traffic is made by the client/server core, not
/// by this transport.
#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl StreamTransport {
    pub fn from_split(reader: BoxRead, writer: BoxWrite, tport_id: String) -> Self {
        StreamTransport {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(reader),
                writer: AsyncMutex::new(writer),
                closed: AtomicBool::new(false),
                tport_id,
            }),
        }
    }

    pub fn from_tcp_stream(stream: TcpStream, tport_id: String) -> Self {
        let _ = stream.set_nodelay(true);
        let (r, w) = stream.into_split();
        Self::from_split(Box::new(r), Box::new(w), tport_id)
    }

    pub fn from_unix_stream(stream: UnixStream) -> Self {
        let tport_id = "unix:.unix".to_string();
        let (r, w) = stream.into_split();
        Self::from_split(Box::new(r), Box::new(w), tport_id)
    }

    /// In-memory duplex pair, used by tests that want a real `AsyncRead`/
    /// `AsyncWrite` seam without opening sockets.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        let (ar, aw) = tokio::io::split(a);
        let (br, bw) = tokio::io::split(b);
        (
            Self::from_split(Box::new(ar), Box::new(aw), "stream:duplex-a".into()),
            Self::from_split(Box::new(br), Box::new(bw), "stream:duplex-b".into()),
        )
    }

    pub async fn connect_tcp(addr: SocketAddr) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await?;
        let tport_id = format_tport_id(addr);
        Ok(Self::from_tcp_stream(stream, tport_id))
    }

    pub async fn connect_unix(path: &str) -> Result<Self, TransportError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_unix_stream(stream))
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        let encoded = frame.encode();
        let mut writer = self.inner.writer.lock().await;
        match writer.write_all(&encoded).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.close();
                Err(TransportError::from(e))
            }
        }
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        let mut reader = self.inner.reader.lock().await;
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = read_exact_or_eof(&mut *reader, &mut header_buf).await {
            self.close();
            return Err(e);
        }
        let header = Header::decode(&header_buf).map_err(|e| {
            self.close();
            TransportError::from(e)
        })?;
        let rest_len = header.extra_header_bytes() as usize + header.message_length as usize;
        let frame = if rest_len <= STACK_BUFFER_LEN {
            let mut buf = [0u8; STACK_BUFFER_LEN];
            reader.read_exact(&mut buf[..rest_len]).await.map_err(|e| {
                self.close();
                TransportError::from(e)
            })?;
            Frame::decode(header, &buf[..rest_len])
        } else {
            let mut buf = vec![0u8; rest_len];
            reader.read_exact(&mut buf).await.map_err(|e| {
                self.close();
                TransportError::from(e)
            })?;
            Frame::decode(header, &buf)
        };
        frame.map_err(|e| {
            self.close();
            TransportError::from(e)
        })
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_congested(&self) -> bool {
        false
    }

    pub fn send_can_block_enable(&self, _enable: bool) {
        // Stream sockets in this implementation always block the awaiting
        // task rather than the OS thread; nothing to toggle.
    }

    pub fn tport_id(&self) -> String {
        self.inner.tport_id.clone()
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("tport_id", &self.inner.tport_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Reads exactly `buf.len()` bytes, mapping a clean zero-byte read at the
/// very start to `TransportError::Closed` (normal peer shutdown) rather than
/// an I/O error.
async fn read_exact_or_eof<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(TransportError::Closed);
            }
            return Err(TransportError::ShortWrite {
                wrote: filled,
                needed: buf.len(),
            });
        }
        filled += n;
    }
    Ok(())
}

fn format_tport_id(addr: SocketAddr) -> String {
    match addr {
        SocketAddr::V4(a) => format!("ipv4:{}:{}", a.ip(), a.port()),
        SocketAddr::V6(a) => format!("ipv6:[{}]:{}", a.ip(), a.port()),
    }
}

/// A listening endpoint, not itself a `Transport`: owns the accept loop.
pub enum StreamListener {
    Tcp(TcpListener),
    Unix { listener: UnixListener, path: String },
}

impl StreamListener {
    /// Binds with `SO_REUSEADDR` always set, and `IP_FREEBIND` set when
    /// `ipfree_bind_enable` is true (addresses the tentative-address DAD
    /// race during listen). Backlog is fixed at 10.
    ///
    /// The options are applied to the very socket tokio ends up listening
    /// on: build and configure it with `socket2`, then hand it to tokio via
    /// `TcpListener::from_std` instead of configuring a throwaway fd and
    /// binding a separate one.
    pub async fn bind_tcp(addr: SocketAddr, ipfree_bind_enable: bool) -> Result<Self, TransportError> {
        use socket2::{Domain, Socket, Type};

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        if ipfree_bind_enable {
            #[cfg(target_os = "linux")]
            {
                let fd = socket.as_raw_fd();
                let one: libc::c_int = 1;
                // SAFETY: `fd` is owned by `socket` and stays valid for this call.
                let rc = unsafe {
                    libc::setsockopt(
                        fd,
                        libc::IPPROTO_IP,
                        libc::IP_FREEBIND,
                        &one as *const _ as *const libc::c_void,
                        std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                    )
                };
                if rc < 0 {
                    return Err(TransportError::Io(std::io::Error::last_os_error()));
                }
            }
        }
        socket.bind(&addr.into())?;
        socket.listen(10)?;
        socket.set_nonblocking(true)?;
        let listener = TcpListener::from_std(socket.into())?;
        Ok(StreamListener::Tcp(listener))
    }

    /// UNIX path is derived by the caller per the addressing convention
    /// (`/tmp/<service-name-with-dots-to-underscores>`); any stale path is
    /// unlinked before binding.
    pub async fn bind_unix(path: &str) -> Result<Self, TransportError> {
        let _ = std::fs::remove_file(path);
        let listener = UnixListener::bind(path)?;
        Ok(StreamListener::Unix {
            listener,
            path: path.to_string(),
        })
    }

    pub async fn accept(&self) -> Result<StreamTransport, TransportError> {
        match self {
            StreamListener::Tcp(l) => {
                let (stream, addr) = l.accept().await?;
                Ok(StreamTransport::from_tcp_stream(stream, format_tport_id(addr)))
            }
            StreamListener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(StreamTransport::from_unix_stream(stream))
            }
        }
    }

    pub fn local_tport_id(&self) -> String {
        match self {
            StreamListener::Tcp(l) => l
                .local_addr()
                .map(format_tport_id)
                .unwrap_or_else(|_| "ipv4:unknown".to_string()),
            StreamListener::Unix { .. } => "unix:.unix".to_string(),
        }
    }

    /// Raw fd, exposed so an external accept-loop/event-loop can register
    /// this listener's readability the way `Userdefined` transports expect.
    pub fn as_raw_fd(&self) -> std::os::fd::RawFd {
        match self {
            StreamListener::Tcp(l) => l.as_raw_fd(),
            StreamListener::Unix { listener, .. } => listener.as_raw_fd(),
        }
    }
}

impl Drop for StreamListener {
    fn drop(&mut self) {
        if let StreamListener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Derives the UNIX socket path for a service name: `/tmp/<name>` with
/// every `.` replaced by `_`.
pub fn unix_socket_path(service_name: &str) -> String {
    format!("/tmp/{}", service_name.replace('.', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_wire::{MsgType, StatusCode};

    #[tokio::test]
    async fn duplex_pair_roundtrips_frames() {
        let (a, b) = StreamTransport::pair();
        let f = Frame::request(MsgType::MethodReq, "foo", bytes::Bytes::from_static(b"payload"));
        a.send_frame(f).await.unwrap();
        let got = b.recv_frame().await.unwrap();
        assert_eq!(got.method_name().as_deref(), Some("foo"));
        assert_eq!(&got.body[..], b"payload");
    }

    #[tokio::test]
    async fn duplex_pair_roundtrips_large_payload() {
        let (a, b) = StreamTransport::pair();
        let big = vec![0x42u8; 4096];
        let f = Frame::request(MsgType::MethodReq, "bulk", bytes::Bytes::from(big.clone()));
        a.send_frame(f).await.unwrap();
        let got = b.recv_frame().await.unwrap();
        assert_eq!(&got.body[..], &big[..]);
    }

    #[tokio::test]
    async fn closing_local_side_rejects_send() {
        let (a, _b) = StreamTransport::pair();
        a.close();
        let f = Frame::empty(MsgType::EchoReq, StatusCode::Unset);
        assert!(a.send_frame(f).await.is_err());
    }

    #[test]
    fn unix_socket_path_replaces_dots() {
        assert_eq!(unix_socket_path("com.example.svc"), "/tmp/com_example_svc");
    }
}
