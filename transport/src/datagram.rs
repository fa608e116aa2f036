use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rpc_wire::Frame;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use crate::TransportError;

/// Per-group flow-control state, shared by every member of a group. Real
/// congestion signalling (e.g. from a kernel multicast queue) is out of
/// scope here; this tracks a caller-settable flag so `is_congested` and
/// `send_can_block_enable`'s backoff loop have something real to consult.
struct GroupFlowState {
    congested: AtomicBool,
}

struct DatagramInner {
    group_name: String,
    tx: broadcast::Sender<Frame>,
    rx: AsyncMutex<broadcast::Receiver<Frame>>,
    flow: Arc<GroupFlowState>,
    closed: AtomicBool,
    block_on_congestion: AtomicBool,
}

/// Connectionless group transport (`DatagramBus`). One-way only: there is
/// no reply path, matching the capability set's description of this
/// variant.
#[derive(Clone)]
pub struct DatagramTransport {
    inner: Arc<DatagramInner>,
}

impl DatagramTransport {
    /// Create `count` members of one group, each receiving every other
    /// member's sends (including its own, filtered out by the caller if
    /// undesired — matching a real multicast bus, which does not suppress
    /// loopback at this layer).
    pub fn group(group_name: &str, count: usize) -> Vec<Self> {
        let (tx, _) = broadcast::channel(256);
        let flow = Arc::new(GroupFlowState {
            congested: AtomicBool::new(false),
        });
        (0..count)
            .map(|_| DatagramTransport {
                inner: Arc::new(DatagramInner {
                    group_name: group_name.to_string(),
                    tx: tx.clone(),
                    rx: AsyncMutex::new(tx.subscribe()),
                    flow: flow.clone(),
                    closed: AtomicBool::new(false),
                    block_on_congestion: AtomicBool::new(false),
                }),
            })
            .collect()
    }

    pub fn pair(group_name: &str) -> (Self, Self) {
        let mut v = Self::group(group_name, 2);
        let b = v.pop().unwrap();
        let a = v.pop().unwrap();
        (a, b)
    }

    /// For tests/operators to simulate bus congestion.
    pub fn set_congested(&self, congested: bool) {
        self.inner.flow.congested.store(congested, Ordering::Release);
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        if self.inner.block_on_congestion.load(Ordering::Acquire) {
            while self.is_congested() {
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        }
        self.inner.tx.send(frame).map(|_| ()).map_err(|_| TransportError::Closed)
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        let mut rx = self.inner.rx.lock().await;
        loop {
            match rx.recv().await {
                Ok(frame) => return Ok(frame),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_congested(&self) -> bool {
        self.inner.flow.congested.load(Ordering::Acquire)
    }

    pub fn send_can_block_enable(&self, enable: bool) {
        self.inner.block_on_congestion.store(enable, Ordering::Release);
    }

    pub fn tport_id(&self) -> String {
        format!("tipc:{}", self.inner.group_name)
    }
}

impl std::fmt::Debug for DatagramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatagramTransport")
            .field("group", &self.inner.group_name)
            .field("congested", &self.is_congested())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_wire::{MsgType, StatusCode};

    #[tokio::test]
    async fn group_fans_out_to_all_members() {
        let members = DatagramTransport::group("g", 3);
        let f = Frame::empty(MsgType::MethodReq, StatusCode::Unset);
        members[0].send_frame(f).await.unwrap();
        for m in &members[1..] {
            m.recv_frame().await.unwrap();
        }
    }

    #[tokio::test]
    async fn congestion_flag_is_shared_across_group() {
        let (a, b) = DatagramTransport::pair("g");
        assert!(!a.is_congested());
        b.set_congested(true);
        assert!(a.is_congested());
    }
}
