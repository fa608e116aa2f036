use std::sync::atomic::{AtomicU64, Ordering};

/// The seam the core calls at each named increment point. The concrete
/// counter/metrics sidecar lives outside the core; this trait is all the
/// core knows about it.
pub trait Observer: Send + Sync + 'static {
    fn rpc(&self) {}
    fn unknown_rpc(&self) {}
    fn unknown_fields(&self) {}
    fn messages_queued(&self) {}
    fn messages_dropped(&self) {}
    fn connect_attempts(&self) {}
    fn connect_failures(&self) {}
    fn connections_accepted(&self) {}
    fn connections_closed(&self) {}
    fn errors(&self) {}
    fn poll_errors(&self) {}
    fn recv_errors(&self) {}
    fn send_errors(&self) {}
    fn pack_errors(&self) {}
    fn memory_errors(&self) {}
    fn protocol_errors(&self) {}
    fn queue_errors(&self) {}
}

/// Default atomic-counter backend. Every field is relaxed-ordering (these
/// are independent counters, not synchronization primitives).
#[derive(Default)]
pub struct AtomicCounters {
    pub rpc: AtomicU64,
    pub unknown_rpc: AtomicU64,
    pub unknown_fields: AtomicU64,
    pub messages_queued: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub connect_attempts: AtomicU64,
    pub connect_failures: AtomicU64,
    pub connections_accepted: AtomicU64,
    pub connections_closed: AtomicU64,
    pub errors: AtomicU64,
    pub poll_errors: AtomicU64,
    pub recv_errors: AtomicU64,
    pub send_errors: AtomicU64,
    pub pack_errors: AtomicU64,
    pub memory_errors: AtomicU64,
    pub protocol_errors: AtomicU64,
    pub queue_errors: AtomicU64,
}

macro_rules! counter_getters {
    ($($field:ident => $getter:ident),* $(,)?) => {
        impl AtomicCounters {
            $(
                pub fn $getter(&self) -> u64 {
                    self.$field.load(Ordering::Relaxed)
                }
            )*
        }
    };
}

counter_getters!(
    rpc => rpc_count,
    unknown_rpc => unknown_rpc_count,
    unknown_fields => unknown_fields_count,
    messages_queued => messages_queued_count,
    messages_dropped => messages_dropped_count,
    connect_attempts => connect_attempts_count,
    connect_failures => connect_failures_count,
    connections_accepted => connections_accepted_count,
    connections_closed => connections_closed_count,
    errors => errors_count,
    poll_errors => poll_errors_count,
    recv_errors => recv_errors_count,
    send_errors => send_errors_count,
    pack_errors => pack_errors_count,
    memory_errors => memory_errors_count,
    protocol_errors => protocol_errors_count,
    queue_errors => queue_errors_count,
);

impl Observer for AtomicCounters {
    fn rpc(&self) {
        self.rpc.fetch_add(1, Ordering::Relaxed);
    }
    fn unknown_rpc(&self) {
        self.unknown_rpc.fetch_add(1, Ordering::Relaxed);
    }
    fn unknown_fields(&self) {
        self.unknown_fields.fetch_add(1, Ordering::Relaxed);
    }
    fn messages_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }
    fn messages_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }
    fn connect_attempts(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Relaxed);
    }
    fn connect_failures(&self) {
        self.connect_failures.fetch_add(1, Ordering::Relaxed);
    }
    fn connections_accepted(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }
    fn connections_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }
    fn errors(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }
    fn poll_errors(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn recv_errors(&self) {
        self.recv_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn pack_errors(&self) {
        self.pack_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn memory_errors(&self) {
        self.memory_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn protocol_errors(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }
    fn queue_errors(&self) {
        self.queue_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// An observer that discards every event; used where no one is watching.
pub struct NullObserver;

impl Observer for NullObserver {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let c = AtomicCounters::default();
        Observer::rpc(&c);
        Observer::rpc(&c);
        Observer::unknown_rpc(&c);
        assert_eq!(c.rpc_count(), 2);
        assert_eq!(c.unknown_rpc_count(), 1);
        assert_eq!(c.errors_count(), 0);
    }
}
