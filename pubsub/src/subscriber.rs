use std::sync::Arc;

use bytes::Bytes;
use rpc_core::{Client, Connector, NullObserver, Observer, RpcOutcome, Server, ServiceDescriptor};
use rpc_transport::TransportError;

use crate::error::PubSubError;
use crate::publisher::{control_descriptor, SubscriberTransportConfig, SubscribeRequest, SUBSCRIBE_METHOD_NAME};

/// The receiving half of pub/sub: a server that accepts the publisher's
/// fanned-out invocations, plus a control client used to register and
/// deregister the methods this subscriber wants, against `local_address` (the
/// address the publisher is told to dial back for delivery).
pub struct Subscriber {
    server: Arc<Server>,
    control_client: Client,
    local_address: SubscriberTransportConfig,
}

impl Subscriber {
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        publisher_control_connector: Connector,
        local_address: SubscriberTransportConfig,
    ) -> Self {
        Self::with_observer(descriptor, publisher_control_connector, local_address, Arc::new(NullObserver))
    }

    pub fn with_observer(
        descriptor: Arc<ServiceDescriptor>,
        publisher_control_connector: Connector,
        local_address: SubscriberTransportConfig,
        observer: Arc<dyn Observer>,
    ) -> Self {
        let control_client = Client::new(control_descriptor(), publisher_control_connector, observer.clone());
        Subscriber {
            server: Arc::new(Server::new(descriptor, observer)),
            control_client,
            local_address,
        }
    }

    /// The server notifications arrive on; register handlers on it and run
    /// an accept loop against whatever listener corresponds to
    /// `local_address` before subscribing.
    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub async fn subscribe(&self, method_name: &str) -> Result<(), PubSubError> {
        self.send_control(true, method_name).await
    }

    pub async fn unsubscribe(&self, method_name: &str) -> Result<(), PubSubError> {
        self.send_control(false, method_name).await
    }

    async fn send_control(&self, add: bool, method_name: &str) -> Result<(), PubSubError> {
        if !self.server.descriptor.contains(method_name) {
            return Err(PubSubError::UnknownMethod(method_name.to_string()));
        }
        let req = SubscribeRequest {
            add,
            method_name: method_name.to_string(),
            config: self.local_address.clone(),
        };
        let body = postcard::to_allocvec(&req).map_err(|_| PubSubError::Transport(TransportError::Unsupported("encode")))?;
        match self.control_client.invoke_one_way(SUBSCRIBE_METHOD_NAME, Bytes::from(body)).await {
            RpcOutcome::Ok | RpcOutcome::Queued => Ok(()),
            _ => Err(PubSubError::Transport(TransportError::Closed)),
        }
    }
}
