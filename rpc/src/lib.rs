//! Facade crate tying together the wire codec, transport abstraction, RPC
//! core, and publish/subscribe layer behind a single dependency.

#[doc(hidden)]
pub use rpc_core;
#[doc(hidden)]
pub use rpc_pubsub;
#[doc(hidden)]
pub use rpc_transport;
#[doc(hidden)]
pub use rpc_wire;

pub use rpc_core::{
    AtomicCounters, BoxFuture, Client, ClientError, Codec, CompositeClient, Connector, Encoding, ExternalSendQueue,
    FilterDecision, FilterTable, Handler, JsonCodec, LogMode, Message, MethodDescriptor, NullObserver, Observer,
    ParentRef, Policy, PostcardCodec, ProcessingReason, QueuedRequest, RawCodec, RawCodecError, ReceiveQueue,
    ReplyContext, RpcOutcome, SendQueue, SendQueueEntry, Server, ServerError, ServerList, ServiceDescriptor,
    ServiceDescriptorBuilder, UnknownEncoding, UnknownMethod, log_mode, set_log_mode,
};
pub use rpc_pubsub::{
    control_descriptor, PubSubError, Publisher, SubscribeRequest, Subscriber, SubscriberTransportConfig,
    SUBSCRIBE_METHOD_NAME,
};
pub use rpc_transport::{
    unix_socket_path, CryptoHooks, DatagramTransport, LoopbackTransport, StreamListener, StreamTransport, Transport,
    TransportError, UserdefinedTransport, CRYPTO_PREAMBLE_MAGIC,
};
pub use rpc_wire::{decode_tlvs, method_name_from_tlvs, Frame, FrameError, Header, MsgType, StatusCode, Tlv, HEADER_LEN};

/// Convenient glob import: `use rpc::prelude::*;`
pub mod prelude {
    pub use crate::{
        Client, FilterDecision, Handler, Message, Observer, Policy, Publisher, ReplyContext, RpcOutcome, Server,
        ServiceDescriptor, Subscriber, Transport,
    };
}
