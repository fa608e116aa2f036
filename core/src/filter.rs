use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::ServiceDescriptor;

/// Per-method policy. Initialized to `Process` for every method in a
/// service descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Process,
    Queue,
    Drop,
}

/// The result of a filter lookup: a real policy, or `Error` — a sentinel
/// distinct from any policy, returned for a name the service descriptor
/// does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    Process,
    Queue,
    Drop,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownMethod(pub String);

impl fmt::Display for UnknownMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown method: {}", self.0)
    }
}

impl std::error::Error for UnknownMethod {}

/// Per-service, per-method policy map. Names are interned on insertion
/// (borrowed from the shared descriptor's `Arc<str>`s) to avoid repeated
/// hashing of long method names on every invocation.
pub struct FilterTable {
    descriptor: Arc<ServiceDescriptor>,
    policies: RwLock<HashMap<Arc<str>, Policy>>,
}

impl FilterTable {
    pub fn new(descriptor: Arc<ServiceDescriptor>) -> Self {
        let policies = descriptor
            .methods()
            .iter()
            .map(|m| (m.name.clone(), Policy::Process))
            .collect();
        FilterTable {
            descriptor,
            policies: RwLock::new(policies),
        }
    }

    pub fn get(&self, method: &str) -> FilterDecision {
        if !self.descriptor.contains(method) {
            return FilterDecision::Error;
        }
        match self.policies.read().get(method).copied().unwrap_or(Policy::Process) {
            Policy::Process => FilterDecision::Process,
            Policy::Queue => FilterDecision::Queue,
            Policy::Drop => FilterDecision::Drop,
        }
    }

    pub fn set(&self, method: &str, policy: Policy) -> Result<(), UnknownMethod> {
        let Some(index) = self.descriptor.method_index(method) else {
            return Err(UnknownMethod(method.to_string()));
        };
        let name = self.descriptor.methods()[index].name.clone();
        self.policies.write().insert(name, policy);
        Ok(())
    }

    pub fn set_all(&self, policy: Policy) {
        let mut table = self.policies.write();
        for method in self.descriptor.methods() {
            table.insert(method.name.clone(), policy);
        }
    }

    pub fn clear_all(&self) {
        self.set_all(Policy::Process);
    }

    /// Queueing sub-state is derived from this: `true` iff any method is
    /// `Policy::Queue`.
    pub fn any_queued(&self) -> bool {
        self.policies.read().values().any(|p| *p == Policy::Queue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FilterTable {
        let desc = Arc::new(ServiceDescriptor::builder("svc").method("foo").method("bar").build());
        FilterTable::new(desc)
    }

    #[test]
    fn defaults_to_process() {
        let t = table();
        assert_eq!(t.get("foo"), FilterDecision::Process);
    }

    #[test]
    fn unknown_method_is_error_sentinel() {
        let t = table();
        assert_eq!(t.get("nope"), FilterDecision::Error);
    }

    #[test]
    fn set_unknown_method_fails() {
        let t = table();
        assert!(t.set("nope", Policy::Queue).is_err());
    }

    #[test]
    fn set_all_and_clear_all() {
        let t = table();
        t.set_all(Policy::Drop);
        assert_eq!(t.get("foo"), FilterDecision::Drop);
        assert_eq!(t.get("bar"), FilterDecision::Drop);
        t.clear_all();
        assert_eq!(t.get("foo"), FilterDecision::Process);
    }

    #[test]
    fn any_queued_tracks_queue_policy() {
        let t = table();
        assert!(!t.any_queued());
        t.set("foo", Policy::Queue).unwrap();
        assert!(t.any_queued());
    }
}
