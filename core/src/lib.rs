//! Client/server RPC core: service descriptors, the per-method queue-filter
//! table, send/receive queues, and the client and server entities built on
//! top of [`rpc_transport::Transport`].

mod client;
mod codec;
mod config;
mod descriptor;
mod error;
mod filter;
mod message;
mod observe;
mod queue;
mod server;

pub use client::{Client, CompositeClient, Connector, ExternalSendQueue, ParentRef};
pub use codec::{Codec, Encoding, JsonCodec, PostcardCodec, RawCodec, RawCodecError, UnknownEncoding};
pub use config::{log_mode, set_log_mode, LogMode};
pub use descriptor::{MethodDescriptor, ServiceDescriptor, ServiceDescriptorBuilder};
pub use error::{ClientError, RpcOutcome, ServerError};
pub use filter::{FilterDecision, FilterTable, Policy, UnknownMethod};
pub use message::Message;
pub use observe::{AtomicCounters, NullObserver, Observer};
pub use queue::{QueuedRequest, ReceiveQueue, SendQueue, SendQueueEntry};
pub use server::{BoxFuture, Handler, ProcessingReason, ReplyContext, Server, ServerList};
