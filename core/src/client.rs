use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use rpc_transport::{CryptoHooks, Transport, TransportError};
use rpc_wire::{Frame, MsgType, StatusCode};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, error, warn};

use crate::queue::{SendQueue, SendQueueEntry, SEND_QUEUE_MAX_RETRIES, SEND_QUEUE_RETRY_BACKOFF};
use crate::{ClientError, FilterDecision, FilterTable, Observer, RpcOutcome, ServiceDescriptor};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
/// How a client (re)establishes its transport. A client created directly
/// from an already-open transport (e.g. a loopback pair, or a publisher's
/// lazily-created subscriber client) has no way to redial and its
/// connector simply reports `Unsupported`.
pub type Connector = Arc<dyn Fn() -> BoxFuture<Result<Transport, TransportError>> + Send + Sync>;

/// Where a client routes `Queue`-filtered one-way sends. A plain client
/// queues into its own [`SendQueue`]; a publisher's child client instead
/// routes into the publisher's shared queue (see design notes: replacing
/// the "parent back-pointer" pattern with a static enum instead of a
/// runtime type check).
pub trait ExternalSendQueue: Send + Sync {
    fn push(&self, subscriber_key: u64, method_name: Arc<str>, packed_body: Bytes) -> BoxFuture<()>;
}

pub enum ParentRef {
    None,
    Publisher {
        queue: Arc<dyn ExternalSendQueue>,
        subscriber_key: u64,
    },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ConnStatus {
    Init,
    Connected,
    Closed,
}

struct ConnState {
    transport: Option<Transport>,
    status: ConnStatus,
}

/// Client entity: one exclusively-owned transport, a shared immutable
/// service descriptor, connection lifecycle, per-method filter table, and
/// a send queue for `Queue`-filtered one-way traffic.
pub struct Client {
    conn: AsyncMutex<ConnState>,
    connector: Connector,
    pub descriptor: Arc<ServiceDescriptor>,
    pub filters: FilterTable,
    send_queue: SendQueue<()>,
    observer: Arc<dyn Observer>,
    crypto: Option<CryptoHooks>,
    parent: ParentRef,
    /// Set by a publisher on its children: forces queueing for this client
    /// regardless of what the filter table says, per the "force-invoke"
    /// semantics described for the server side but mirrored here for the
    /// publish path ("queue_enabled_from_parent").
    queue_enabled_from_parent: SyncMutex<bool>,
}

fn unsupported_connector() -> Connector {
    Arc::new(|| Box::pin(async { Err(TransportError::Unsupported("connect")) }))
}

impl Client {
    pub fn new(descriptor: Arc<ServiceDescriptor>, connector: Connector, observer: Arc<dyn Observer>) -> Self {
        let filters = FilterTable::new(descriptor.clone());
        Client {
            conn: AsyncMutex::new(ConnState {
                transport: None,
                status: ConnStatus::Init,
            }),
            connector,
            descriptor,
            filters,
            send_queue: SendQueue::new(),
            observer,
            crypto: None,
            parent: ParentRef::None,
            queue_enabled_from_parent: SyncMutex::new(false),
        }
    }

    pub fn from_connected(descriptor: Arc<ServiceDescriptor>, transport: Transport, observer: Arc<dyn Observer>) -> Self {
        let filters = FilterTable::new(descriptor.clone());
        Client {
            conn: AsyncMutex::new(ConnState {
                transport: Some(transport),
                status: ConnStatus::Connected,
            }),
            connector: unsupported_connector(),
            descriptor,
            filters,
            send_queue: SendQueue::new(),
            observer,
            crypto: None,
            parent: ParentRef::None,
            queue_enabled_from_parent: SyncMutex::new(false),
        }
    }

    pub fn with_parent(mut self, parent: ParentRef) -> Self {
        self.parent = parent;
        self
    }

    pub fn with_crypto(mut self, crypto: CryptoHooks) -> Self {
        self.crypto = Some(crypto);
        self
    }

    pub fn set_queue_enabled_from_parent(&self, enabled: bool) {
        *self.queue_enabled_from_parent.lock() = enabled;
    }

    pub fn send_queue(&self) -> &SendQueue<()> {
        &self.send_queue
    }

    /// Idempotent: a no-op returning `Ok(())` if already connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        self.connect_locked(&mut conn).await
    }

    async fn connect_locked(&self, conn: &mut ConnState) -> Result<(), ClientError> {
        if conn.status == ConnStatus::Connected {
            return Ok(());
        }
        self.observer.connect_attempts();
        match (self.connector)().await {
            Ok(t) => {
                conn.transport = Some(t);
                conn.status = ConnStatus::Connected;
                if let Some(c) = &self.crypto {
                    (c.on_connect)();
                }
                Ok(())
            }
            Err(e) => {
                self.observer.connect_failures();
                conn.status = ConnStatus::Init;
                Err(ClientError::from(e))
            }
        }
    }

    /// Sends `frame`, closing and reconnecting once on failure before
    /// giving up. Holds the connection mutex across the whole attempt,
    /// matching the "serializes state transitions and socket use" policy.
    async fn send_with_reconnect(&self, frame: Frame) -> Result<(), ClientError> {
        let mut conn = self.conn.lock().await;
        self.connect_locked(&mut conn).await?;
        let first_attempt = {
            let transport = conn.transport.as_ref().expect("connected");
            transport.send_frame(frame.clone()).await
        };
        if first_attempt.is_ok() {
            return Ok(());
        }
        warn!("short write on send, closing and reconnecting once");
        if let Some(t) = conn.transport.take() {
            t.close();
        }
        conn.status = ConnStatus::Init;
        self.connect_locked(&mut conn).await?;
        let second_attempt = {
            let transport = conn.transport.as_ref().expect("connected");
            transport.send_frame(frame).await
        };
        match second_attempt {
            Ok(()) => Ok(()),
            Err(e) => {
                self.observer.send_errors();
                Err(ClientError::from(e))
            }
        }
    }

    async fn recv_one(&self) -> Result<Frame, ClientError> {
        let conn = self.conn.lock().await;
        let transport = conn.transport.as_ref().ok_or(ClientError::NotConnected)?;
        let mut frame = match transport.recv_frame().await {
            Ok(f) => f,
            Err(e) => {
                self.observer.recv_errors();
                return Err(ClientError::from(e));
            }
        };
        if let Some(c) = &self.crypto {
            if !frame.body.is_empty() {
                let plaintext = c.decrypt_framed(&frame.body).map_err(ClientError::from)?;
                frame.header.message_length = plaintext.len() as u32;
                frame.body = Bytes::from(plaintext);
            }
        }
        Ok(frame)
    }

    /// Two-way RPC invocation by method name.
    pub async fn call(&self, method_name: &str, body: Bytes) -> Result<(RpcOutcome, Option<Bytes>), ClientError> {
        self.observer.rpc();
        let frame = Frame::request(MsgType::MethodReq, method_name, body);
        if self.send_with_reconnect(frame).await.is_err() {
            return Ok((RpcOutcome::Err, None));
        }
        let reply = match self.recv_one().await {
            Ok(f) => f,
            Err(_) => return Ok((RpcOutcome::Err, None)),
        };
        Ok(self.interpret_reply(reply))
    }

    fn interpret_reply(&self, reply: Frame) -> (RpcOutcome, Option<Bytes>) {
        match reply.header.status_code {
            StatusCode::Success => {
                if reply.body.is_empty() {
                    (RpcOutcome::Ok, None)
                } else {
                    (RpcOutcome::Ok, Some(reply.body))
                }
            }
            StatusCode::ServiceQueued => (RpcOutcome::Queued, None),
            StatusCode::ServiceDropped => (RpcOutcome::Dropped, None),
            StatusCode::ServerMethodNotFound => {
                self.observer.unknown_rpc();
                (RpcOutcome::MethodNotFound, None)
            }
            StatusCode::ServerConnReset => {
                debug!("server reset connection");
                (RpcOutcome::Err, None)
            }
            StatusCode::ServiceFailed | StatusCode::ConnectionClosed => {
                error!("rpc failed: {:?}", reply.header.status_code);
                (RpcOutcome::Err, None)
            }
            StatusCode::Unset | StatusCode::TooManyPending => (RpcOutcome::Err, None),
        }
    }

    /// One-way invocation. Consults the filter table first.
    pub async fn invoke_one_way(&self, method_name: &str, body: Bytes) -> RpcOutcome {
        let forced_queue = *self.queue_enabled_from_parent.lock();
        let decision = if forced_queue {
            FilterDecision::Queue
        } else {
            self.filters.get(method_name)
        };
        self.act_on_decision(method_name, body, decision).await
    }

    /// Like [`Client::invoke_one_way`], but the caller has already resolved
    /// the filter decision (used by a publisher, whose own filter table
    /// governs every child client's one-way sends instead of each child's
    /// own table).
    pub async fn invoke_one_way_as(&self, method_name: &str, body: Bytes, decision: FilterDecision) -> RpcOutcome {
        self.act_on_decision(method_name, body, decision).await
    }

    async fn act_on_decision(&self, method_name: &str, body: Bytes, decision: FilterDecision) -> RpcOutcome {
        match decision {
            FilterDecision::Process => {
                let frame = Frame::request(MsgType::MethodReq, method_name, body);
                match self.send_with_reconnect(frame).await {
                    Ok(()) => RpcOutcome::Ok,
                    Err(_) => RpcOutcome::Err,
                }
            }
            FilterDecision::Queue => {
                self.observer.messages_queued();
                let name: Arc<str> = Arc::from(method_name);
                match &self.parent {
                    ParentRef::None => {
                        self.send_queue
                            .push(SendQueueEntry {
                                key: (),
                                method_name: name,
                                packed_body: body,
                            })
                            .await;
                    }
                    ParentRef::Publisher { queue, subscriber_key } => {
                        queue.push(*subscriber_key, name, body).await;
                    }
                }
                RpcOutcome::Queued
            }
            FilterDecision::Drop => {
                self.observer.messages_dropped();
                RpcOutcome::Dropped
            }
            FilterDecision::Error => RpcOutcome::Err,
        }
    }

    /// Drains the client's own send queue (no-op for publisher children,
    /// whose queue lives on the publisher). Retries each entry up to
    /// [`SEND_QUEUE_MAX_RETRIES`] times with [`SEND_QUEUE_RETRY_BACKOFF`]
    /// between whole-buffer attempts; on terminal failure the rest of the
    /// queue is abandoned (cleared), matching "free every queued entry
    /// whose transport matches the failed one".
    pub async fn drain_send_queue(&self) -> Result<(), ClientError> {
        while let Some(entry) = self.send_queue.pop_front().await {
            let mut last_err = None;
            let mut sent = false;
            for attempt in 0..SEND_QUEUE_MAX_RETRIES {
                let frame = Frame::request(MsgType::MethodReq, &entry.method_name, entry.packed_body.clone());
                match self.send_with_reconnect(frame).await {
                    Ok(()) => {
                        sent = true;
                        break;
                    }
                    Err(e) => {
                        last_err = Some(e);
                        if attempt + 1 < SEND_QUEUE_MAX_RETRIES {
                            tokio::time::sleep(SEND_QUEUE_RETRY_BACKOFF).await;
                        }
                    }
                }
            }
            if !sent {
                self.observer.queue_errors();
                self.send_queue.purge_by_key(&()).await;
                return Err(last_err.unwrap_or(ClientError::NotConnected));
            }
        }
        Ok(())
    }

    /// Header-only `ECHO_REQ`/`ECHO_REPLY` round trip, same reconnect-once
    /// send policy as `call`.
    pub async fn send_echo_request(&self) -> RpcOutcome {
        let frame = Frame::empty(MsgType::EchoReq, StatusCode::Unset);
        if self.send_with_reconnect(frame).await.is_err() {
            return RpcOutcome::Err;
        }
        match self.recv_one().await {
            Ok(reply) if reply.header.msg_type == MsgType::EchoReply => RpcOutcome::Ok,
            _ => RpcOutcome::Err,
        }
    }

    /// Send-only half of an RPC, used by [`crate::CompositeClient`]'s
    /// two-phase fan-out. Returns whether the send succeeded.
    pub async fn send_request_only(&self, method_name: &str, body: &Bytes) -> bool {
        let frame = Frame::request(MsgType::MethodReq, method_name, body.clone());
        self.send_with_reconnect(frame).await.is_ok()
    }

    /// Receive-only half, called only on children whose send succeeded.
    pub async fn recv_reply_outcome(&self) -> RpcOutcome {
        match self.recv_one().await {
            Ok(reply) => self.interpret_reply(reply).0,
            Err(_) => RpcOutcome::Err,
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.status == ConnStatus::Connected
    }

    pub async fn close(&self) {
        let mut conn = self.conn.lock().await;
        if let Some(t) = conn.transport.take() {
            t.close();
        }
        conn.status = ConnStatus::Closed;
    }
}

/// Fans one invocation out to a list of child clients in parallel.
/// Restricted to stream transports per the design (no datagram/loopback
/// children): send-all, then receive-all from the children whose send
/// succeeded. A single slow child must never block the others' sends.
pub struct CompositeClient {
    children: Vec<Arc<Client>>,
    last_results: SyncMutex<Vec<(usize, RpcOutcome)>>,
}

impl CompositeClient {
    pub fn new(children: Vec<Arc<Client>>) -> Self {
        CompositeClient {
            children,
            last_results: SyncMutex::new(Vec::new()),
        }
    }

    pub async fn invoke(&self, method_name: &str, body: Bytes) -> RpcOutcome {
        let send_ok: Vec<bool> =
            futures_util::future::join_all(self.children.iter().map(|c| c.send_request_only(method_name, &body))).await;

        let mut results = Vec::with_capacity(self.children.len());
        let mut overall = RpcOutcome::Ok;
        let recv_futures = self.children.iter().zip(send_ok.iter()).map(|(c, ok)| {
            let ok = *ok;
            async move {
                if ok {
                    c.recv_reply_outcome().await
                } else {
                    RpcOutcome::Err
                }
            }
        });
        let outcomes = futures_util::future::join_all(recv_futures).await;
        for (i, outcome) in outcomes.into_iter().enumerate() {
            if outcome != RpcOutcome::Ok {
                overall = RpcOutcome::Err;
            }
            results.push((i, outcome));
        }
        *self.last_results.lock() = results;
        overall
    }

    /// Per-child last return, so a caller can tell which child failed even
    /// though the aggregate result collapses to `Err`.
    pub fn last_results(&self) -> Vec<(usize, RpcOutcome)> {
        self.last_results.lock().clone()
    }
}
