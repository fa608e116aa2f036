use std::collections::HashMap;
use std::sync::Arc;

/// One method of a service, as the stub generator emits it. `index` is the
/// position in the descriptor's method list *on this side*; the wire
/// carries the method name (not the index) so peers whose descriptors
/// drifted out of sync can still resolve it.
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    pub name: Arc<str>,
    pub index: usize,
    /// Whether callers invoke this method one-way (no reply frame). The
    /// closure contract is a no-op on every branch for such methods.
    pub is_oneway: bool,
}

/// Ordered list of methods for one service, shared and immutable once
/// built. Consumed read-only by clients, servers, and the queue-filter
/// table.
#[derive(Debug)]
pub struct ServiceDescriptor {
    pub service_name: String,
    methods: Vec<MethodDescriptor>,
    name_to_index: HashMap<Arc<str>, usize>,
}

impl ServiceDescriptor {
    pub fn builder(service_name: impl Into<String>) -> ServiceDescriptorBuilder {
        ServiceDescriptorBuilder {
            service_name: service_name.into(),
            names: Vec::new(),
        }
    }

    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    pub fn method_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn method_name(&self, index: usize) -> Option<&Arc<str>> {
        self.methods.get(index).map(|m| &m.name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.name_to_index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

pub struct ServiceDescriptorBuilder {
    service_name: String,
    names: Vec<(String, bool)>,
}

impl ServiceDescriptorBuilder {
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.names.push((name.into(), false));
        self
    }

    pub fn oneway_method(mut self, name: impl Into<String>) -> Self {
        self.names.push((name.into(), true));
        self
    }

    pub fn build(self) -> ServiceDescriptor {
        let mut methods = Vec::with_capacity(self.names.len());
        let mut name_to_index = HashMap::with_capacity(self.names.len());
        for (index, (name, is_oneway)) in self.names.into_iter().enumerate() {
            let name: Arc<str> = Arc::from(name.into_boxed_str());
            name_to_index.insert(name.clone(), index);
            methods.push(MethodDescriptor { name, index, is_oneway });
        }
        ServiceDescriptor {
            service_name: self.service_name,
            methods,
            name_to_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_ordered_indexed_methods() {
        let desc = ServiceDescriptor::builder("svc").method("foo").method("bar").build();
        assert_eq!(desc.method_index("foo"), Some(0));
        assert_eq!(desc.method_index("bar"), Some(1));
        assert_eq!(desc.method_name(0).map(|s| s.as_ref()), Some("foo"));
        assert_eq!(desc.method_index("missing"), None);
    }
}
