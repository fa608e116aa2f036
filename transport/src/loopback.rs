use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rpc_wire::Frame;
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::TransportError;

const CHANNEL_CAPACITY: usize = 64;

struct LoopbackInner {
    tx: mpsc::Sender<Frame>,
    rx: AsyncMutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
}

/// In-process pipe transport. Used for tests and for same-process dispatch
/// without network I/O (the `Loopback` variant of the capability set).
#[derive(Clone)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

impl LoopbackTransport {
    /// Build a cross-wired pair: sending on one side is received on the other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_b) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let a = LoopbackTransport {
            inner: Arc::new(LoopbackInner {
                tx: tx_a,
                rx: AsyncMutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = LoopbackTransport {
            inner: Arc::new(LoopbackInner {
                tx: tx_b,
                rx: AsyncMutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        self.inner.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_congested(&self) -> bool {
        false
    }

    pub fn send_can_block_enable(&self, _enable: bool) {}

    pub fn tport_id(&self) -> String {
        "loopback".to_string()
    }
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackTransport")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
