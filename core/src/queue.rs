use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};

use crate::Message;

/// Number of whole-buffer send attempts the drain makes before giving up
/// on an entry and evicting it.
pub const SEND_QUEUE_MAX_RETRIES: u32 = 10;
/// Backoff between retries.
pub const SEND_QUEUE_RETRY_BACKOFF: Duration = Duration::from_millis(200);
/// Bound on how long a drain loop waits for new work before re-checking
/// shutdown state.
pub const DRAIN_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// One entry of a send queue: a method name and its already-packed body,
/// tagged with a caller-chosen key identifying which transport it targets
/// (used for per-transport eviction on terminal failure). A plain client's
/// own queue uses `()`; a publisher's shared queue uses a subscriber key.
#[derive(Debug, Clone)]
pub struct SendQueueEntry<K> {
    pub key: K,
    pub method_name: Arc<str>,
    pub packed_body: Bytes,
}

/// FIFO used when a filter resolves to `Queue`, drained by a retry loop.
pub struct SendQueue<K: Clone + Eq + Send + Sync + 'static> {
    queue: Mutex<VecDeque<SendQueueEntry<K>>>,
    notify: Notify,
}

impl<K: Clone + Eq + Send + Sync + 'static> Default for SendQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone + Eq + Send + Sync + 'static> SendQueue<K> {
    pub fn new() -> Self {
        SendQueue {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    pub async fn push(&self, entry: SendQueueEntry<K>) {
        self.queue.lock().await.push_back(entry);
        self.notify.notify_one();
    }

    pub async fn pop_front(&self) -> Option<SendQueueEntry<K>> {
        self.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Waits up to [`DRAIN_WAIT_TIMEOUT`] for an enqueue; returns whether
    /// one happened (`false` just means the bounded wait elapsed, so a
    /// drain loop can re-check its own shutdown flag).
    pub async fn wait_for_work(&self) -> bool {
        tokio::time::timeout(DRAIN_WAIT_TIMEOUT, self.notify.notified())
            .await
            .is_ok()
    }

    /// Removes every entry whose key matches `key`. Used both for
    /// unsubscribe (purge matching subscriber) and for terminal send
    /// failure (evict everything bound to the failed transport).
    pub async fn purge_by_key(&self, key: &K) -> usize {
        self.purge_where(|e| &e.key == key).await
    }

    /// Removes every entry matching an arbitrary predicate, e.g. a
    /// publisher unsubscribe purging entries bound to one subscriber's
    /// transport *and* method, a finer grain than [`SendQueue::purge_by_key`].
    pub async fn purge_where(&self, pred: impl Fn(&SendQueueEntry<K>) -> bool) -> usize {
        let mut q = self.queue.lock().await;
        let before = q.len();
        q.retain(|e| !pred(e));
        before - q.len()
    }
}

/// One entry of a receive queue. The unpacked message is produced once, at
/// receive time, rather than lazily at drain time (see the Open Question
/// resolution in the design notes): a drain consumer never has to worry
/// about a decode failure appearing mid-drain.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
    pub method_index: usize,
    pub method_name: Arc<str>,
    pub packed_body: Bytes,
    pub unpacked: Message,
}

/// FIFO used when a server-side filter resolves to `Queue`, drained by
/// explicit `process_some`/`process_all` calls.
#[derive(Default)]
pub struct ReceiveQueue {
    queue: Mutex<VecDeque<QueuedRequest>>,
}

impl ReceiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, req: QueuedRequest) {
        self.queue.lock().await.push_back(req);
    }

    pub async fn pop_front(&self) -> Option<QueuedRequest> {
        self.queue.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_queue_fifo_order() {
        let q: SendQueue<u32> = SendQueue::new();
        q.push(SendQueueEntry {
            key: 1,
            method_name: Arc::from("a"),
            packed_body: Bytes::new(),
        })
        .await;
        q.push(SendQueueEntry {
            key: 1,
            method_name: Arc::from("b"),
            packed_body: Bytes::new(),
        })
        .await;
        let first = q.pop_front().await.unwrap();
        assert_eq!(first.method_name.as_ref(), "a");
    }

    #[tokio::test]
    async fn purge_by_key_removes_only_matching_entries() {
        let q: SendQueue<u32> = SendQueue::new();
        for key in [1, 2, 1] {
            q.push(SendQueueEntry {
                key,
                method_name: Arc::from("m"),
                packed_body: Bytes::new(),
            })
            .await;
        }
        let removed = q.purge_by_key(&1).await;
        assert_eq!(removed, 2);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn receive_queue_preserves_arrival_order() {
        let q = ReceiveQueue::new();
        for i in 0..3u32 {
            q.push(QueuedRequest {
                method_index: 0,
                method_name: Arc::from("update"),
                packed_body: Bytes::new(),
                unpacked: Message::new(i),
            })
            .await;
        }
        for expected in 0..3u32 {
            let got = q.pop_front().await.unwrap();
            assert_eq!(*got.unpacked.downcast_ref::<u32>().unwrap(), expected);
        }
    }
}
