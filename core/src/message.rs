use std::any::Any;
use std::sync::Arc;

/// An opaque, type-erased message body. The schema (what types exist, how
/// they serialize) is owned by the external stub generator; this core only
/// needs to carry a value from the codec to a handler and back.
#[derive(Clone)]
pub struct Message {
    inner: Arc<dyn Any + Send + Sync>,
}

impl Message {
    pub fn new<T: Send + Sync + 'static>(value: T) -> Self {
        Message { inner: Arc::new(value) }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message").finish_non_exhaustive()
    }
}
