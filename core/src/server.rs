use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex as SyncMutex, RwLock};
use rpc_transport::{CryptoHooks, Transport, TransportError};
use rpc_wire::{Frame, MsgType, StatusCode};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, info};

use crate::filter::FilterDecision;
use crate::queue::{QueuedRequest, ReceiveQueue};
use crate::{FilterTable, Message, Observer, ServerError, ServiceDescriptor};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The processing-reason tag a closure inspects to decide what (if
/// anything) to send back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingReason {
    OkToInvoke,
    Queued,
    Dropped,
    InvokingFromQueue,
}

/// One-shot and sticky message-ownership overrides. Suppress the server's
/// automatic release of the unpacked message; the application becomes
/// responsible for retaining it (via [`Server::take_retained_messages`]).
///
/// Shared per-server rather than per-connection, mirroring the original
/// single process-wide flag; a one-shot override set during one request's
/// handler races with concurrent requests on other transports.
#[derive(Default)]
struct OwnershipFlags {
    current_request: AtomicBool,
    all_requests: AtomicBool,
}

/// Handed to a handler invocation; the handler calls [`ReplyContext::reply`]
/// (for RPC methods) exactly once to complete the closure contract.
pub struct ReplyContext {
    method_name: Arc<str>,
    reason: ProcessingReason,
    is_oneway: bool,
    transport: Transport,
    observer: Arc<dyn Observer>,
    crypto: Option<CryptoHooks>,
    ownership: Arc<OwnershipFlags>,
}

impl ReplyContext {
    /// `Some(body)` packs and sends `METHOD_REPLY` with `SUCCESS`; `None`
    /// sends an empty `METHOD_REPLY` with `SERVICE_FAILED`. A no-op for
    /// one-way methods and for requests being invoked from the queue
    /// (whose reply was already sent at queue time).
    pub async fn reply(&self, body: Option<Bytes>) {
        if self.is_oneway || self.reason == ProcessingReason::InvokingFromQueue {
            return;
        }
        let frame = match body {
            Some(b) => Frame::reply(&self.method_name, StatusCode::Success, b),
            None => Frame::reply(&self.method_name, StatusCode::ServiceFailed, Bytes::new()),
        };
        self.send(frame).await;
    }

    async fn send(&self, mut frame: Frame) {
        if let Some(crypto) = &self.crypto {
            let ciphertext = Bytes::from(crypto.encrypt_framed(&frame.body));
            frame.header.message_length = ciphertext.len() as u32;
            frame.body = ciphertext;
        }
        if self.transport.send_frame(frame).await.is_err() {
            self.observer.send_errors();
        }
    }

    /// One-shot: suppresses the automatic free for only the current request.
    pub fn set_app_owns_current_msg(&self) {
        self.ownership.current_request.store(true, Ordering::Release);
    }

    /// Sticky: suppresses the automatic free for every subsequent request
    /// on this server until cleared.
    pub fn set_app_owns_all_msgs(&self) {
        self.ownership.all_requests.store(true, Ordering::Release);
    }
}

/// Decodes a request body into an opaque [`Message`] (real type-specific
/// decoding is a stub-generator concern; this core only carries bytes
/// through), then invokes the method. Implementations must eventually call
/// [`ReplyContext::reply`].
pub trait Handler: Send + Sync {
    fn unpack(&self, body: &Bytes) -> Result<Message, ()>;
    fn invoke(&self, msg: Message, ctx: ReplyContext) -> BoxFuture<()>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Enabled,
    Draining,
    Disabled,
}

/// Server entity: listening/accepted transports, implementation table,
/// per-method filter table, receive queue, and queueing sub-state.
pub struct Server {
    pub descriptor: Arc<ServiceDescriptor>,
    pub filters: FilterTable,
    handlers: RwLock<HashMap<usize, Arc<dyn Handler>>>,
    receive_queue: ReceiveQueue,
    queue_state: SyncMutex<QueueState>,
    accepted: AsyncMutex<HashMap<u64, Transport>>,
    next_conn_id: AtomicU64,
    observer: Arc<dyn Observer>,
    crypto: Option<CryptoHooks>,
    ownership: Arc<OwnershipFlags>,
    retained_messages: AsyncMutex<Vec<Message>>,
}

impl Server {
    pub fn new(descriptor: Arc<ServiceDescriptor>, observer: Arc<dyn Observer>) -> Self {
        let filters = FilterTable::new(descriptor.clone());
        Server {
            descriptor,
            filters,
            handlers: RwLock::new(HashMap::new()),
            receive_queue: ReceiveQueue::new(),
            queue_state: SyncMutex::new(QueueState::Disabled),
            accepted: AsyncMutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(0),
            observer,
            crypto: None,
            ownership: Arc::new(OwnershipFlags::default()),
            retained_messages: AsyncMutex::new(Vec::new()),
        }
    }

    pub fn with_crypto(mut self, crypto: CryptoHooks) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn register_handler(&self, method_index: usize, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(method_index, handler);
    }

    /// Registers an already-accepted transport, matching "activity on the
    /// listen socket -> accept, add to accepted set, invoke crypto accept
    /// hook".
    pub async fn register_accepted(&self, transport: Transport) -> u64 {
        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.accepted.lock().await.insert(id, transport);
        self.observer.connections_accepted();
        if let Some(c) = &self.crypto {
            (c.on_accept)();
        }
        info!(conn_id = id, "accepted connection");
        id
    }

    pub async fn close_connection(&self, conn_id: u64) {
        if let Some(t) = self.accepted.lock().await.remove(&conn_id) {
            t.close();
            if let Some(c) = &self.crypto {
                (c.on_close)();
            }
            self.observer.connections_closed();
            info!(conn_id, "closed connection");
        }
    }

    pub async fn accepted_transport(&self, conn_id: u64) -> Option<Transport> {
        self.accepted.lock().await.get(&conn_id).cloned()
    }

    /// Services one inbound frame on `transport`. Returns `Err` when the
    /// connection should be closed by the caller (`CLOSED`/`ERR`).
    pub async fn server_recv(&self, transport: &Transport) -> Result<(), ServerError> {
        let frame = match transport.recv_frame().await {
            Ok(f) => f,
            Err(e) => {
                if !matches!(e, TransportError::Closed | TransportError::ConnReset) {
                    self.observer.recv_errors();
                }
                return Err(ServerError::from(e));
            }
        };
        self.dispatch(transport, frame).await;
        Ok(())
    }

    async fn dispatch(&self, transport: &Transport, frame: Frame) {
        match frame.header.msg_type {
            MsgType::MethodReq => self.dispatch_method_req(transport, frame).await,
            MsgType::MethodReply => {
                error!("illegal METHOD_REPLY received on a server");
                self.observer.protocol_errors();
            }
            MsgType::EchoReq => {
                let reply = Frame::empty(MsgType::EchoReply, StatusCode::Success);
                if transport.send_frame(reply).await.is_err() {
                    self.observer.send_errors();
                }
            }
            MsgType::EchoReply => {
                error!("illegal ECHO_REPLY received on a server");
                self.observer.protocol_errors();
            }
            MsgType::ConnOpen => {
                debug!("consumed CONN_OPEN");
            }
        }
    }

    async fn dispatch_method_req(&self, transport: &Transport, frame: Frame) {
        let Some(method_name) = frame.method_name() else {
            self.observer.unknown_rpc();
            let reply = Frame::empty(MsgType::MethodReply, StatusCode::ServerMethodNotFound);
            let _ = transport.send_frame(reply).await;
            return;
        };
        let Some(method_index) = self.descriptor.method_index(&method_name) else {
            self.observer.unknown_rpc();
            let reply = Frame::reply(&method_name, StatusCode::ServerMethodNotFound, Bytes::new());
            let _ = transport.send_frame(reply).await;
            return;
        };
        let is_oneway = self.descriptor.methods()[method_index].is_oneway;

        let draining_forces_queue = *self.queue_state.lock() == QueueState::Draining;
        let decision = if draining_forces_queue {
            FilterDecision::Queue
        } else {
            self.filters.get(&method_name)
        };

        match decision {
            FilterDecision::Queue => {
                let handler = self.handlers.read().get(&method_index).cloned();
                let Some(handler) = handler else {
                    self.observer.pack_errors();
                    return;
                };
                match handler.unpack(&frame.body) {
                    Ok(msg) => {
                        self.receive_queue
                            .push(QueuedRequest {
                                method_index,
                                method_name: Arc::from(method_name.as_str()),
                                packed_body: frame.body.clone(),
                                unpacked: msg,
                            })
                            .await;
                        self.observer.messages_queued();
                        if !is_oneway {
                            let reply = Frame::reply(&method_name, StatusCode::ServiceQueued, Bytes::new());
                            let _ = transport.send_frame(reply).await;
                        }
                    }
                    Err(()) => {
                        self.observer.pack_errors();
                    }
                }
            }
            FilterDecision::Drop => {
                self.observer.messages_dropped();
                if !is_oneway {
                    let reply = Frame::reply(&method_name, StatusCode::ServiceDropped, Bytes::new());
                    let _ = transport.send_frame(reply).await;
                }
            }
            FilterDecision::Error => {
                self.observer.pack_errors();
            }
            FilterDecision::Process => {
                let handler = self.handlers.read().get(&method_index).cloned();
                let Some(handler) = handler else {
                    self.observer.pack_errors();
                    return;
                };
                let msg = match handler.unpack(&frame.body) {
                    Ok(msg) => msg,
                    Err(()) => {
                        self.observer.pack_errors();
                        return;
                    }
                };
                self.observer.rpc();
                self.ownership.current_request.store(false, Ordering::Release);
                let ctx = ReplyContext {
                    method_name: Arc::from(method_name.as_str()),
                    reason: ProcessingReason::OkToInvoke,
                    is_oneway,
                    transport: transport.clone(),
                    observer: self.observer.clone(),
                    crypto: self.crypto.clone(),
                    ownership: self.ownership.clone(),
                };
                let retain = msg.clone();
                handler.invoke(msg, ctx).await;
                if self.ownership.current_request.load(Ordering::Acquire)
                    || self.ownership.all_requests.load(Ordering::Acquire)
                {
                    self.retained_messages.lock().await.push(retain);
                }
            }
        }
    }

    /// Pops up to `n` queued entries and invokes them with
    /// `INVOKING_FROM_QUEUE` (the reply frame was already sent when each
    /// entry was queued).
    pub async fn process_some(&self, n: usize) -> usize {
        let mut processed = 0;
        for _ in 0..n {
            let Some(req) = self.receive_queue.pop_front().await else {
                break;
            };
            let handler = self.handlers.read().get(&req.method_index).cloned();
            if let Some(handler) = handler {
                let is_oneway = self
                    .descriptor
                    .methods()
                    .get(req.method_index)
                    .map(|m| m.is_oneway)
                    .unwrap_or(false);
                // The dispatching transport for a queued request isn't
                // tracked past enqueue time (the reply already went out);
                // invoking from the queue therefore never sends again,
                // regardless of which transport originally delivered it.
                let ctx = ReplyContext {
                    method_name: req.method_name.clone(),
                    reason: ProcessingReason::InvokingFromQueue,
                    is_oneway,
                    transport: self.dummy_transport(),
                    observer: self.observer.clone(),
                    crypto: self.crypto.clone(),
                    ownership: self.ownership.clone(),
                };
                handler.invoke(req.unpacked, ctx).await;
            }
            processed += 1;
            if self.receive_queue.is_empty().await {
                self.maybe_finish_draining().await;
            }
        }
        processed
    }

    pub async fn process_all(&self) -> usize {
        let mut total = 0;
        loop {
            let n = self.process_some(usize::MAX.min(1024)).await;
            if n == 0 {
                break;
            }
            total += n;
            if self.receive_queue.is_empty().await {
                break;
            }
        }
        total
    }

    fn dummy_transport(&self) -> Transport {
        // INVOKING_FROM_QUEUE never sends (see `ReplyContext::reply`), so
        // this transport is never actually used for I/O; it only needs to
        // exist to satisfy `ReplyContext`'s shape.
        rpc_transport::UserdefinedTransport::new("queue-drain").into()
    }

    /// Sets every method to the given policy via the filter table and
    /// derives the queueing sub-state transition: turning queueing off
    /// while the receive queue is non-empty moves to `Draining` until the
    /// queue empties, at which point filters clear to `Process` and the
    /// server returns to `Disabled`.
    pub async fn set_all_filters(&self, policy: crate::filter::Policy) {
        use crate::filter::Policy;
        self.filters.set_all(policy);
        let queue_non_empty = !self.receive_queue.is_empty().await;
        let mut state = self.queue_state.lock();
        *state = match policy {
            Policy::Queue => QueueState::Enabled,
            Policy::Process | Policy::Drop if queue_non_empty => QueueState::Draining,
            _ => QueueState::Disabled,
        };
    }

    async fn maybe_finish_draining(&self) {
        let mut state = self.queue_state.lock();
        if *state == QueueState::Draining {
            self.filters.clear_all();
            *state = QueueState::Disabled;
        }
    }

    pub async fn take_retained_messages(&self) -> Vec<Message> {
        std::mem::take(&mut *self.retained_messages.lock().await)
    }

    pub async fn receive_queue_len(&self) -> usize {
        self.receive_queue.len().await
    }

    pub async fn accepted_count(&self) -> usize {
        self.accepted.lock().await.len()
    }
}

type PendingRecv = BoxFuture<(usize, u64, Result<(), ServerError>)>;

/// Runs one `select()` covering every accepted transport across a set of
/// servers, so a single task can service many listening sockets instead of
/// spawning one task per connection.
///
/// The outstanding `server_recv` future for each connection is kept as state
/// across `poll_once` calls (`pending`/`tracked`) rather than rebuilt from
/// scratch on every call: `recv_frame` reads a frame in several `read_exact`
/// steps against the connection's own mutex-guarded reader, so a future that
/// has already consumed some of those bytes can never be safely discarded
/// and restarted without corrupting that connection's frame boundary.
pub struct ServerList {
    servers: Vec<Arc<Server>>,
    pending: AsyncMutex<futures_util::stream::FuturesUnordered<PendingRecv>>,
    tracked: AsyncMutex<std::collections::HashSet<(usize, u64)>>,
}

impl ServerList {
    pub fn new(servers: Vec<Arc<Server>>) -> Self {
        ServerList {
            servers,
            pending: AsyncMutex::new(futures_util::stream::FuturesUnordered::new()),
            tracked: AsyncMutex::new(std::collections::HashSet::new()),
        }
    }

    /// Services exactly one inbound frame across the whole set, on whichever
    /// accepted transport becomes ready first. Returns the index into the
    /// server list the frame was serviced on.
    pub async fn poll_once(&self) -> Option<usize> {
        use futures_util::StreamExt;

        self.refresh_pending().await;

        let mut pending = self.pending.lock().await;
        let (server_idx, conn_id, result) = pending.next().await?;
        drop(pending);

        self.tracked.lock().await.remove(&(server_idx, conn_id));
        match result {
            Ok(()) => Some(server_idx),
            Err(_) => {
                self.servers[server_idx].close_connection(conn_id).await;
                Some(server_idx)
            }
        }
    }

    /// Starts one `server_recv` future for every accepted connection that
    /// doesn't already have one outstanding. Connections whose future is
    /// still pending from a previous call are left untouched.
    async fn refresh_pending(&self) {
        let mut tracked = self.tracked.lock().await;
        let mut pending = self.pending.lock().await;
        for (server_idx, server) in self.servers.iter().enumerate() {
            let accepted = server.accepted.lock().await;
            for (&conn_id, transport) in accepted.iter() {
                if tracked.insert((server_idx, conn_id)) {
                    let server = server.clone();
                    let transport = transport.clone();
                    pending.push(Box::pin(async move {
                        let result = server.server_recv(&transport).await;
                        (server_idx, conn_id, result)
                    }));
                }
            }
        }
    }

    pub fn servers(&self) -> &[Arc<Server>] {
        &self.servers
    }
}
