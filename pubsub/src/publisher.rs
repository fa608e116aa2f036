use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use rpc_core::{
    BoxFuture, Client, Connector, ExternalSendQueue, FilterDecision, FilterTable, Handler, Message, NullObserver,
    Observer, ParentRef, RpcOutcome, SendQueue, SendQueueEntry, Server, ServiceDescriptor,
};
use rpc_transport::{StreamListener, StreamTransport, Transport, TransportError};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{info, warn};

pub const SUBSCRIBE_METHOD_NAME: &str = "subscribe";

const SUBSCRIBER_QUEUE_MAX_RETRIES: u32 = 10;
const SUBSCRIBER_QUEUE_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// The subset of a transport config that two subscriber entries tuple-compare
/// on: socket family and full address (or UNIX path).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubscriberTransportConfig {
    Tcp(SocketAddr),
    Unix(String),
}

impl SubscriberTransportConfig {
    async fn connect(&self) -> Result<Transport, TransportError> {
        match self {
            SubscriberTransportConfig::Tcp(addr) => Ok(StreamTransport::connect_tcp(*addr).await?.into()),
            SubscriberTransportConfig::Unix(path) => Ok(StreamTransport::connect_unix(path).await?.into()),
        }
    }
}

/// Wire body of the `subscribe` control RPC: `{add, method_name,
/// transport_type+address fields}` reconstructed by the publisher into a
/// [`SubscriberTransportConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub add: bool,
    pub method_name: String,
    pub config: SubscriberTransportConfig,
}

/// The fixed internal service descriptor for the publisher's control plane,
/// shared by every publisher and subscriber (distinct from the published
/// service's own descriptor).
pub fn control_descriptor() -> Arc<ServiceDescriptor> {
    Arc::new(ServiceDescriptor::builder("pubsub-control").oneway_method(SUBSCRIBE_METHOD_NAME).build())
}

struct SubscriberEntry {
    config: SubscriberTransportConfig,
    method_name: Arc<str>,
    client_key: u64,
}

struct ClientState {
    client: Arc<Client>,
    config: SubscriberTransportConfig,
}

/// Subscriber entries, shared clients, and the config->client-key index,
/// behind one lock: `publish`'s fan-out loop holds this lock for its whole
/// snapshot-then-invoke(+retry) pass, mirroring `cmsg_pub_invoke` holding
/// `subscriber_list_mutex` across the iterate-and-invoke loop rather than
/// only across a snapshot.
#[derive(Default)]
struct PublisherState {
    entries: Vec<SubscriberEntry>,
    clients: HashMap<u64, ClientState>,
    config_to_key: HashMap<SubscriberTransportConfig, u64>,
}

struct SubscribeHandler {
    publisher: Weak<Publisher>,
}

impl Handler for SubscribeHandler {
    fn unpack(&self, body: &Bytes) -> Result<Message, ()> {
        postcard::from_bytes::<SubscribeRequest>(body).map(Message::new).map_err(|_| ())
    }

    fn invoke(&self, msg: Message, ctx: rpc_core::ReplyContext) -> BoxFuture<()> {
        let publisher = self.publisher.clone();
        Box::pin(async move {
            if let (Some(publisher), Some(req)) = (publisher.upgrade(), msg.downcast_ref::<SubscribeRequest>()) {
                publisher.apply_subscribe(req.clone()).await;
            }
            ctx.reply(None).await;
        })
    }
}

/// Multiplexes a one-way invocation across a dynamic set of subscribers.
/// Owns an internal server for `subscribe`/`unsubscribe` control RPCs and a
/// subscriber-entry list; one lazily-created client is shared by every entry
/// targeting the same transport config.
pub struct Publisher {
    descriptor: Arc<ServiceDescriptor>,
    state: AsyncMutex<PublisherState>,
    next_client_key: AtomicU64,
    pub filters: FilterTable,
    send_queue: SendQueue<u64>,
    drain_notify: Notify,
    observer: Arc<dyn Observer>,
    sub_server: Arc<Server>,
    self_weak: Weak<Publisher>,
}

impl Publisher {
    pub fn new(descriptor: Arc<ServiceDescriptor>) -> Arc<Self> {
        Self::with_observer(descriptor, Arc::new(NullObserver))
    }

    pub fn with_observer(descriptor: Arc<ServiceDescriptor>, observer: Arc<dyn Observer>) -> Arc<Self> {
        Arc::new_cyclic(|weak| {
            let filters = FilterTable::new(descriptor.clone());
            let sub_descriptor = control_descriptor();
            let sub_server = Arc::new(Server::new(sub_descriptor.clone(), observer.clone()));
            let handler: Arc<dyn Handler> = Arc::new(SubscribeHandler { publisher: weak.clone() });
            sub_server.register_handler(sub_descriptor.method_index(SUBSCRIBE_METHOD_NAME).unwrap(), handler);

            Publisher {
                descriptor,
                state: AsyncMutex::new(PublisherState::default()),
                next_client_key: AtomicU64::new(0),
                filters,
                send_queue: SendQueue::new(),
                drain_notify: Notify::new(),
                observer,
                sub_server,
                self_weak: weak.clone(),
            }
        })
    }

    pub fn sub_server(&self) -> &Arc<Server> {
        &self.sub_server
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Accepts control connections on `listener` forever, spawning one
    /// receive loop per accepted connection. Mirrors the accept-then-select
    /// pattern the transport-conformance server loop uses.
    pub fn spawn_control_listener(self: &Arc<Self>, listener: StreamListener) -> tokio::task::JoinHandle<()> {
        let server = self.sub_server.clone();
        tokio::spawn(async move {
            loop {
                let transport: Transport = match listener.accept().await {
                    Ok(t) => t.into(),
                    Err(_) => break,
                };
                let conn_id = server.register_accepted(transport.clone()).await;
                let server = server.clone();
                tokio::spawn(async move {
                    loop {
                        if server.server_recv(&transport).await.is_err() {
                            server.close_connection(conn_id).await;
                            break;
                        }
                    }
                });
            }
        })
    }

    /// Runs the dedicated queue drain loop: wakes whenever `publish` enqueues
    /// a `Queue`-filtered invocation, retrying each entry up to
    /// [`SUBSCRIBER_QUEUE_MAX_RETRIES`] times before evicting every
    /// subscriber sharing that transport.
    pub fn spawn_queue_drain(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let publisher = self.clone();
        tokio::spawn(async move {
            loop {
                match publisher.send_queue.pop_front().await {
                    Some(entry) => publisher.drain_one(entry).await,
                    None => {
                        publisher.drain_notify.notified().await;
                    }
                }
            }
        })
    }

    async fn drain_one(&self, entry: SendQueueEntry<u64>) {
        let client = self.state.lock().await.clients.get(&entry.key).map(|s| s.client.clone());
        let Some(client) = client else { return };
        let mut delivered = false;
        for attempt in 0..SUBSCRIBER_QUEUE_MAX_RETRIES {
            if client.send_request_only(&entry.method_name, &entry.packed_body).await {
                delivered = true;
                break;
            }
            if attempt + 1 < SUBSCRIBER_QUEUE_MAX_RETRIES {
                tokio::time::sleep(SUBSCRIBER_QUEUE_RETRY_BACKOFF).await;
            }
        }
        if !delivered {
            self.observer.queue_errors();
            self.evict_transport(entry.key).await;
        }
    }

    async fn evict_transport(&self, client_key: u64) {
        let mut state = self.state.lock().await;
        self.evict_locked(&mut state, client_key).await;
    }

    /// Same as [`Publisher::evict_transport`], but for a caller that already
    /// holds `state` locked (`publish`'s fan-out loop).
    async fn evict_locked(&self, state: &mut PublisherState, client_key: u64) {
        self.send_queue.purge_by_key(&client_key).await;
        let before = state.entries.len();
        state.entries.retain(|e| e.client_key != client_key);
        let removed_entries = before - state.entries.len();
        if let Some(removed) = state.clients.remove(&client_key) {
            removed.client.close().await;
            state.config_to_key.remove(&removed.config);
        }
        if removed_entries > 0 {
            warn!(client_key, removed_entries, "evicted subscriber(s) after exhausting retries");
        }
    }

    async fn client_key_for(&self, config: &SubscriberTransportConfig) -> u64 {
        let mut state = self.state.lock().await;
        if let Some(key) = state.config_to_key.get(config).copied() {
            return key;
        }
        let key = self.next_client_key.fetch_add(1, Ordering::Relaxed);
        let cfg = config.clone();
        let connector: Connector = Arc::new(move || {
            let cfg = cfg.clone();
            Box::pin(async move { cfg.connect().await })
        });
        let queue: Arc<dyn ExternalSendQueue> = self.self_weak.upgrade().expect("publisher outlives its own clients");
        let client = Arc::new(
            Client::new(self.descriptor.clone(), connector, self.observer.clone())
                .with_parent(ParentRef::Publisher { queue, subscriber_key: key }),
        );
        state.clients.insert(key, ClientState { client, config: config.clone() });
        state.config_to_key.insert(config.clone(), key);
        key
    }

    async fn apply_subscribe(&self, req: SubscribeRequest) {
        if !self.descriptor.contains(&req.method_name) {
            warn!(method = %req.method_name, "subscribe request for unknown method");
            return;
        }
        let method: Arc<str> = Arc::from(req.method_name.as_str());
        if req.add {
            let client_key = self.client_key_for(&req.config).await;
            let mut state = self.state.lock().await;
            let already = state.entries.iter().any(|e| e.config == req.config && e.method_name == method);
            if !already {
                state.entries.push(SubscriberEntry {
                    config: req.config,
                    method_name: method.clone(),
                    client_key,
                });
                info!(method = %method, "subscriber added");
            }
        } else {
            let (client_key, removed) = {
                let mut state = self.state.lock().await;
                let client_key = state.config_to_key.get(&req.config).copied();
                let before = state.entries.len();
                state.entries.retain(|e| !(e.config == req.config && e.method_name == method));
                (client_key, before != state.entries.len())
            };
            if removed {
                if let Some(key) = client_key {
                    let purged = self.send_queue.purge_where(|e| e.key == key && e.method_name == method).await;
                    info!(method = %method, purged, "subscriber removed");
                }
                self.drop_client_if_orphaned(client_key).await;
            }
        }
    }

    async fn drop_client_if_orphaned(&self, client_key: Option<u64>) {
        let Some(key) = client_key else { return };
        let mut state = self.state.lock().await;
        let still_used = state.entries.iter().any(|e| e.client_key == key);
        if !still_used {
            if let Some(removed) = state.clients.remove(&key) {
                removed.client.close().await;
                state.config_to_key.remove(&removed.config);
            }
        }
    }

    /// Fans `method_name` out to every subscriber, per the publisher's own
    /// filter decision for that method (children inherit the publisher's
    /// filter table rather than consulting their own). Returns how many
    /// subscribers the invocation was delivered or enqueued to.
    ///
    /// `state` is held locked for the whole snapshot-then-invoke pass, not
    /// just the snapshot: a concurrent `subscribe`/`unsubscribe` never
    /// observes (or races with) a fan-out in progress, mirroring
    /// `cmsg_pub_invoke` holding its subscriber-list mutex across the same
    /// span. A `Process`-filtered send retries up to
    /// [`SUBSCRIBER_QUEUE_MAX_RETRIES`] times with
    /// [`SUBSCRIBER_QUEUE_RETRY_BACKOFF`] between attempts before the
    /// subscriber is evicted, the same retry budget `Queue`-filtered sends
    /// get from the dedicated drain loop.
    pub async fn publish(&self, method_name: &str, body: Bytes) -> usize {
        let decision = self.filters.get(method_name);
        if matches!(decision, FilterDecision::Error) {
            self.observer.pack_errors();
            return 0;
        }
        if matches!(decision, FilterDecision::Drop) {
            self.observer.messages_dropped();
            return 0;
        }

        let mut state = self.state.lock().await;
        let (entries, clients) = (&state.entries, &state.clients);
        let matching: Vec<(u64, Arc<Client>)> = entries
            .iter()
            .filter(|e| e.method_name.as_ref() == method_name)
            .filter_map(|e| clients.get(&e.client_key).map(|s| (e.client_key, s.client.clone())))
            .collect();

        let mut delivered = 0;
        for (client_key, client) in matching {
            let mut outcome = client.invoke_one_way_as(method_name, body.clone(), decision).await;
            if decision == FilterDecision::Process {
                let mut attempt = 1;
                while outcome == RpcOutcome::Err && attempt < SUBSCRIBER_QUEUE_MAX_RETRIES {
                    tokio::time::sleep(SUBSCRIBER_QUEUE_RETRY_BACKOFF).await;
                    outcome = client.invoke_one_way_as(method_name, body.clone(), decision).await;
                    attempt += 1;
                }
            }
            match outcome {
                RpcOutcome::Ok | RpcOutcome::Queued => delivered += 1,
                RpcOutcome::Err => self.evict_locked(&mut state, client_key).await,
                _ => {}
            }
        }
        delivered
    }
}

impl ExternalSendQueue for Publisher {
    fn push(&self, subscriber_key: u64, method_name: Arc<str>, packed_body: Bytes) -> BoxFuture<()> {
        let publisher = self.self_weak.upgrade();
        Box::pin(async move {
            if let Some(publisher) = publisher {
                publisher
                    .send_queue
                    .push(SendQueueEntry {
                        key: subscriber_key,
                        method_name,
                        packed_body,
                    })
                    .await;
                publisher.observer.messages_queued();
                publisher.drain_notify.notify_one();
            }
        })
    }
}
