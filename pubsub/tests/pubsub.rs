use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rpc_core::{BoxFuture, Handler, Message, NullObserver, ReplyContext, ServiceDescriptor};
use rpc_pubsub::{Publisher, Subscriber, SubscriberTransportConfig};
use rpc_transport::{StreamListener, StreamTransport, Transport};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn event_descriptor() -> Arc<ServiceDescriptor> {
    Arc::new(ServiceDescriptor::builder("notifications").oneway_method("event").build())
}

/// Counts how many `event` notifications a subscriber's server received.
struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl Handler for CountingHandler {
    fn unpack(&self, body: &Bytes) -> Result<Message, ()> {
        Ok(Message::new(body.clone()))
    }

    fn invoke(&self, _msg: Message, ctx: ReplyContext) -> BoxFuture<()> {
        let count = self.count.clone();
        Box::pin(async move {
            count.fetch_add(1, Ordering::SeqCst);
            ctx.reply(None).await;
        })
    }
}

/// Binds an ephemeral TCP listener and spawns an accept-and-serve loop on
/// `server`, returning the bound address.
async fn spawn_serving_listener(server: Arc<rpc_core::Server>) -> SocketAddr {
    let listener = StreamListener::bind_tcp("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
    let real_addr = match &listener {
        StreamListener::Tcp(l) => l.local_addr().unwrap(),
        _ => unreachable!(),
    };
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
    });
    real_addr
}

async fn unreachable_tcp_addr() -> SocketAddr {
    let listener = StreamListener::bind_tcp("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
    match &listener {
        StreamListener::Tcp(l) => l.local_addr().unwrap(),
        _ => unreachable!(),
    }
    // listener drops here, releasing the port with nothing bound to it
}

#[tokio::test]
async fn duplicate_subscribe_is_idempotent() {
    init_tracing();
    let descriptor = event_descriptor();
    let publisher = Publisher::with_observer(descriptor.clone(), Arc::new(NullObserver));
    let control_listener = StreamListener::bind_tcp("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
    let control_addr = match &control_listener {
        StreamListener::Tcp(l) => l.local_addr().unwrap(),
        _ => unreachable!(),
    };
    publisher.spawn_control_listener(control_listener);
    publisher.spawn_queue_drain();

    let count = Arc::new(AtomicUsize::new(0));
    let sub_server = Arc::new(rpc_core::Server::new(descriptor.clone(), Arc::new(NullObserver)));
    sub_server.register_handler(
        descriptor.method_index("event").unwrap(),
        Arc::new(CountingHandler { count: count.clone() }),
    );
    let sub_addr = spawn_serving_listener(sub_server.clone()).await;

    let control_connector: rpc_core::Connector = Arc::new(move || {
        Box::pin(async move { Ok(StreamTransport::connect_tcp(control_addr).await?.into()) })
    });
    let subscriber = Subscriber::new(
        descriptor.clone(),
        control_connector,
        SubscriberTransportConfig::Tcp(sub_addr),
    );

    subscriber.subscribe("event").await.unwrap();
    subscriber.subscribe("event").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.subscriber_count().await, 1);
}

#[tokio::test]
async fn dead_subscriber_is_evicted_after_retries_survivor_gets_exactly_one() {
    init_tracing();
    let descriptor = event_descriptor();
    let publisher = Publisher::with_observer(descriptor.clone(), Arc::new(NullObserver));
    publisher.filters.set("event", rpc_core::Policy::Queue).unwrap();
    let control_listener = StreamListener::bind_tcp("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
    let control_addr = match &control_listener {
        StreamListener::Tcp(l) => l.local_addr().unwrap(),
        _ => unreachable!(),
    };
    publisher.spawn_control_listener(control_listener);
    publisher.spawn_queue_drain();

    let control_connector = || -> rpc_core::Connector {
        Arc::new(move || Box::pin(async move { Ok(StreamTransport::connect_tcp(control_addr).await?.into()) }))
    };

    // Survivor: a real listening subscriber.
    let survivor_count = Arc::new(AtomicUsize::new(0));
    let survivor_server = Arc::new(rpc_core::Server::new(descriptor.clone(), Arc::new(NullObserver)));
    survivor_server.register_handler(
        descriptor.method_index("event").unwrap(),
        Arc::new(CountingHandler {
            count: survivor_count.clone(),
        }),
    );
    let survivor_addr = spawn_serving_listener(survivor_server.clone()).await;
    let survivor = Subscriber::new(
        descriptor.clone(),
        control_connector(),
        SubscriberTransportConfig::Tcp(survivor_addr),
    );
    survivor.subscribe("event").await.unwrap();

    // Dead subscriber: address nobody is listening on.
    let dead_addr = unreachable_tcp_addr().await;
    let dead = Subscriber::new(descriptor.clone(), control_connector(), SubscriberTransportConfig::Tcp(dead_addr));
    dead.subscribe("event").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.subscriber_count().await, 2);

    publisher.publish("event", Bytes::from_static(b"hello")).await;

    // 10 retries * 200ms backoff plus slack for the drain loop to notice.
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert_eq!(publisher.subscriber_count().await, 1);
    assert_eq!(survivor_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dead_subscriber_under_default_process_policy_is_evicted_after_retries() {
    init_tracing();
    let descriptor = event_descriptor();
    let publisher = Publisher::with_observer(descriptor.clone(), Arc::new(NullObserver));
    // Default policy is `Process`, not `Queue`: a direct one-way send still
    // gets the full retry budget before eviction, same as the queued path.
    let control_listener = StreamListener::bind_tcp("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
    let control_addr = match &control_listener {
        StreamListener::Tcp(l) => l.local_addr().unwrap(),
        _ => unreachable!(),
    };
    publisher.spawn_control_listener(control_listener);
    publisher.spawn_queue_drain();

    let control_connector = || -> rpc_core::Connector {
        Arc::new(move || Box::pin(async move { Ok(StreamTransport::connect_tcp(control_addr).await?.into()) }))
    };

    let survivor_count = Arc::new(AtomicUsize::new(0));
    let survivor_server = Arc::new(rpc_core::Server::new(descriptor.clone(), Arc::new(NullObserver)));
    survivor_server.register_handler(
        descriptor.method_index("event").unwrap(),
        Arc::new(CountingHandler {
            count: survivor_count.clone(),
        }),
    );
    let survivor_addr = spawn_serving_listener(survivor_server.clone()).await;
    let survivor = Subscriber::new(
        descriptor.clone(),
        control_connector(),
        SubscriberTransportConfig::Tcp(survivor_addr),
    );
    survivor.subscribe("event").await.unwrap();

    let dead_addr = unreachable_tcp_addr().await;
    let dead = Subscriber::new(descriptor.clone(), control_connector(), SubscriberTransportConfig::Tcp(dead_addr));
    dead.subscribe("event").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(publisher.subscriber_count().await, 2);

    // `publish` itself retries the Process-filtered send up to 10 times
    // before evicting, so this single call's future only resolves once
    // that budget is exhausted.
    publisher.publish("event", Bytes::from_static(b"hello")).await;

    assert_eq!(publisher.subscriber_count().await, 1);
    assert_eq!(survivor_count.load(Ordering::SeqCst), 1);
}
