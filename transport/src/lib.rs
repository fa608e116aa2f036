//! The transport capability set: a uniform interface over stream sockets,
//! a datagram bus, user-defined hooks, and an in-process loopback pipe.
//!
//! [`Transport`] is a polymorphic enum over the four backends, dispatched
//! via [`enum_dispatch`] the same way the frame codec's service dispatch
//! forwards to concrete method handlers.

mod crypto;
mod datagram;
mod error;
mod loopback;
mod stream;
mod userdefined;

pub use crypto::{CryptoHooks, CRYPTO_PREAMBLE_MAGIC};
pub use datagram::DatagramTransport;
pub use error::TransportError;
pub use loopback::LoopbackTransport;
pub use stream::{unix_socket_path, StreamListener, StreamTransport};
pub use userdefined::UserdefinedTransport;

use enum_dispatch::enum_dispatch;
use rpc_wire::Frame;

/// The capability set every transport variant provides. Connection
/// establishment (`connect`/`listen`/`accept`) happens before a value of
/// this trait exists (see [`StreamListener`] and the per-backend
/// constructors); this trait covers what a client or server does with an
/// already-established transport.
#[enum_dispatch]
pub trait TransportBackend: Send + Sync {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError>;
    async fn recv_frame(&self) -> Result<Frame, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
    /// Always `false` except for `DatagramBus`.
    fn is_congested(&self) -> bool;
    /// When enabled and the transport is congested, `send_frame` loops
    /// with a 1 ms backoff until uncongested instead of returning an error.
    fn send_can_block_enable(&self, enable: bool);
    fn tport_id(&self) -> String;
}

macro_rules! forward_transport_backend {
    ($ty:ty) => {
        #[enum_dispatch]
        impl TransportBackend for $ty {
            async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
                <$ty>::send_frame(self, frame).await
            }
            async fn recv_frame(&self) -> Result<Frame, TransportError> {
                <$ty>::recv_frame(self).await
            }
            fn close(&self) {
                <$ty>::close(self)
            }
            fn is_closed(&self) -> bool {
                <$ty>::is_closed(self)
            }
            fn is_congested(&self) -> bool {
                <$ty>::is_congested(self)
            }
            fn send_can_block_enable(&self, enable: bool) {
                <$ty>::send_can_block_enable(self, enable)
            }
            fn tport_id(&self) -> String {
                <$ty>::tport_id(self)
            }
        }
    };
}

forward_transport_backend!(LoopbackTransport);
forward_transport_backend!(StreamTransport);
forward_transport_backend!(DatagramTransport);
forward_transport_backend!(UserdefinedTransport);

/// The capability set, polymorphic over the five variants named in the
/// interface contract (`StreamRpc`/`StreamOneway` collapse onto the same
/// `Stream` variant here: the RPC-vs-one-way distinction is a property of
/// how the client/server core uses a transport, not of the transport
/// itself).
#[enum_dispatch(TransportBackend)]
#[derive(Clone, Debug)]
pub enum Transport {
    Loopback(LoopbackTransport),
    Stream(StreamTransport),
    Datagram(DatagramTransport),
    Userdefined(UserdefinedTransport),
}

impl Transport {
    pub fn loopback_pair() -> (Self, Self) {
        let (a, b) = LoopbackTransport::pair();
        (a.into(), b.into())
    }

    pub fn stream_pair() -> (Self, Self) {
        let (a, b) = StreamTransport::pair();
        (a.into(), b.into())
    }

    pub fn datagram_group(group_name: &str, count: usize) -> Vec<Self> {
        DatagramTransport::group(group_name, count)
            .into_iter()
            .map(Into::into)
            .collect()
    }
}
