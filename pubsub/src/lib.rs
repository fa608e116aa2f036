//! Publish/subscribe layer built on the client/server RPC core: a
//! subscription registry behind a control-plane RPC, a publisher that fans a
//! one-way invocation out to every matching subscriber, and eviction of any
//! subscriber whose transport exhausts its retry budget.

mod error;
mod publisher;
mod subscriber;

pub use error::PubSubError;
pub use publisher::{
    control_descriptor, Publisher, SubscribeRequest, SubscriberTransportConfig, SUBSCRIBE_METHOD_NAME,
};
pub use subscriber::Subscriber;
