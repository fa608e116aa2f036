//! End-to-end conformance tests exercising the client/server pair over a
//! real transport, not just the individual module unit tests.

use std::sync::Arc;

use bytes::Bytes;
use rpc_core::{
    AtomicCounters, Client, Connector, Handler, Message, NullObserver, Observer, Policy, ReceiveQueue, ReplyContext,
    RpcOutcome, Server, ServiceDescriptor,
};
use rpc_transport::{Transport, TransportError};
use tokio::sync::Mutex as AsyncMutex;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn descriptor() -> Arc<ServiceDescriptor> {
    Arc::new(
        ServiceDescriptor::builder("conformance")
            .method("echo")
            .method("record")
            .oneway_method("notify")
            .build(),
    )
}

struct EchoHandler;

impl Handler for EchoHandler {
    fn unpack(&self, body: &Bytes) -> Result<Message, ()> {
        Ok(Message::new(body.clone()))
    }

    fn invoke(&self, msg: Message, ctx: ReplyContext) -> rpc_core::BoxFuture<()> {
        Box::pin(async move {
            let body = msg.downcast_ref::<Bytes>().cloned();
            ctx.reply(body).await;
        })
    }
}

struct RecordingHandler {
    seen: Arc<AsyncMutex<Vec<Bytes>>>,
}

impl Handler for RecordingHandler {
    fn unpack(&self, body: &Bytes) -> Result<Message, ()> {
        Ok(Message::new(body.clone()))
    }

    fn invoke(&self, msg: Message, ctx: ReplyContext) -> rpc_core::BoxFuture<()> {
        let seen = self.seen.clone();
        Box::pin(async move {
            if let Some(body) = msg.downcast_ref::<Bytes>() {
                seen.lock().await.push(body.clone());
            }
            ctx.reply(None).await;
        })
    }
}

fn spawn_server_loop(server: Arc<Server>, transport: Transport) {
    tokio::spawn(async move {
        loop {
            if server.server_recv(&transport).await.is_err() {
                break;
            }
        }
    });
}

#[tokio::test]
async fn echo_round_trip_over_loopback() {
    init_tracing();
    let desc = descriptor();
    let (client_t, server_t) = Transport::loopback_pair();

    let server = Arc::new(Server::new(desc.clone(), Arc::new(NullObserver)));
    server.register_handler(desc.method_index("echo").unwrap(), Arc::new(EchoHandler));
    spawn_server_loop(server.clone(), server_t);

    let client = Client::from_connected(desc, client_t, Arc::new(NullObserver));
    let (outcome, body) = client.call("echo", Bytes::from_static(b"hello")).await.unwrap();
    assert_eq!(outcome, RpcOutcome::Ok);
    assert_eq!(body.as_deref(), Some(&b"hello"[..]));
}

#[tokio::test]
async fn unknown_method_reports_method_not_found() {
    init_tracing();
    let desc = descriptor();
    let (client_t, server_t) = Transport::loopback_pair();

    let server = Arc::new(Server::new(desc.clone(), Arc::new(NullObserver)));
    server.register_handler(desc.method_index("echo").unwrap(), Arc::new(EchoHandler));
    spawn_server_loop(server.clone(), server_t);

    let client = Client::from_connected(desc, client_t, Arc::new(NullObserver));
    let (outcome, body) = client.call("does-not-exist", Bytes::new()).await.unwrap();
    assert_eq!(outcome, RpcOutcome::MethodNotFound);
    assert!(body.is_none());
}

#[tokio::test]
async fn client_send_queue_drains_in_arrival_order() {
    init_tracing();
    let desc = descriptor();
    let (client_t, server_t) = Transport::loopback_pair();

    let seen = Arc::new(AsyncMutex::new(Vec::new()));
    let server = Arc::new(Server::new(desc.clone(), Arc::new(NullObserver)));
    server.register_handler(
        desc.method_index("notify").unwrap(),
        Arc::new(RecordingHandler { seen: seen.clone() }),
    );
    spawn_server_loop(server.clone(), server_t);

    let client = Client::from_connected(desc, client_t, Arc::new(NullObserver));
    client.filters.set("notify", Policy::Queue).unwrap();

    for i in 0u8..3 {
        let outcome = client.invoke_one_way("notify", Bytes::from(vec![i])).await;
        assert_eq!(outcome, RpcOutcome::Queued);
    }
    assert_eq!(client.send_queue().len().await, 3);

    client.drain_send_queue().await.unwrap();
    assert_eq!(client.send_queue().len().await, 0);

    // Give the server loop a beat to process the sends it just received.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let recorded = seen.lock().await.clone();
    assert_eq!(recorded, vec![Bytes::from(vec![0u8]), Bytes::from(vec![1u8]), Bytes::from(vec![2u8])]);
}

#[tokio::test]
async fn server_queue_filter_holds_then_drains_in_order() {
    init_tracing();
    let desc = descriptor();
    let (client_t, server_t) = Transport::loopback_pair();

    let seen = Arc::new(AsyncMutex::new(Vec::new()));
    let server = Arc::new(Server::new(desc.clone(), Arc::new(NullObserver)));
    server.register_handler(
        desc.method_index("record").unwrap(),
        Arc::new(RecordingHandler { seen: seen.clone() }),
    );
    server.filters.set("record", Policy::Queue).unwrap();
    spawn_server_loop(server.clone(), server_t);

    let client = Client::from_connected(desc, client_t, Arc::new(NullObserver));

    for i in 0u8..3 {
        let (outcome, _) = client.call("record", Bytes::from(vec![i])).await.unwrap();
        assert_eq!(outcome, RpcOutcome::Queued);
    }

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(server.receive_queue_len().await, 3);
    assert!(seen.lock().await.is_empty());

    let processed = server.process_all().await;
    assert_eq!(processed, 3);
    assert_eq!(server.receive_queue_len().await, 0);

    let recorded = seen.lock().await.clone();
    assert_eq!(recorded, vec![Bytes::from(vec![0u8]), Bytes::from(vec![1u8]), Bytes::from(vec![2u8])]);
}

#[tokio::test]
async fn drain_gives_up_and_purges_after_retries_exhausted() {
    init_tracing();
    let desc = descriptor();
    let observer = Arc::new(AtomicCounters::default());

    let always_fails: Connector = Arc::new(|| Box::pin(async { Err(TransportError::Unsupported("connect")) }));
    let client = Client::new(desc, always_fails, observer.clone());
    client.filters.set("notify", Policy::Queue).unwrap();

    let outcome = client.invoke_one_way("notify", Bytes::from_static(b"x")).await;
    assert_eq!(outcome, RpcOutcome::Queued);
    assert_eq!(client.send_queue().len().await, 1);

    let result = client.drain_send_queue().await;
    assert!(result.is_err());
    assert_eq!(client.send_queue().len().await, 0);
    assert!(observer.queue_errors_count() >= 1);
    assert!(observer.connect_attempts_count() >= 1);
}

#[tokio::test]
async fn receive_queue_feeds_descriptor_ordering() {
    // The descriptor's own method ordering is what the receive queue
    // entries are indexed by; confirm it lines up with the receive queue
    // independent of a live transport.
    let desc = descriptor();
    let q = ReceiveQueue::new();
    for (i, name) in ["echo", "record", "notify"].iter().enumerate() {
        let index = desc.method_index(name).unwrap();
        assert_eq!(index, i);
        q.push(rpc_core::QueuedRequest {
            method_index: index,
            method_name: Arc::from(*name),
            packed_body: Bytes::new(),
            unpacked: Message::new(index),
        })
        .await;
    }
    for expected in 0..3usize {
        let req = q.pop_front().await.unwrap();
        assert_eq!(req.method_index, expected);
    }
}
