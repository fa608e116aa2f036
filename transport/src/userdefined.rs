use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rpc_wire::Frame;

use crate::TransportError;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type SendHook = Arc<dyn Fn(Frame) -> BoxFuture<Result<(), TransportError>> + Send + Sync>;
type RecvHook = Arc<dyn Fn() -> BoxFuture<Result<Frame, TransportError>> + Send + Sync>;
type CloseHook = Arc<dyn Fn() + Send + Sync>;
type CongestedHook = Arc<dyn Fn() -> bool + Send + Sync>;

fn unsupported_send() -> SendHook {
    Arc::new(|_frame| Box::pin(async { Err(TransportError::Unsupported("send_frame")) }))
}

fn unsupported_recv() -> RecvHook {
    Arc::new(|| Box::pin(async { Err(TransportError::Unsupported("recv_frame")) }))
}

/// Every capability is a mandatory, caller-supplied hook; hooks not
/// provided by the embedder default to returning `Unsupported` rather than
/// ever calling through a null function pointer.
#[derive(Clone)]
pub struct UserdefinedTransport {
    send: SendHook,
    recv: RecvHook,
    on_close: CloseHook,
    congested: CongestedHook,
    closed: Arc<AtomicBool>,
    tport_id: String,
}

impl UserdefinedTransport {
    pub fn new(tport_id: impl Into<String>) -> Self {
        UserdefinedTransport {
            send: unsupported_send(),
            recv: unsupported_recv(),
            on_close: Arc::new(|| {}),
            congested: Arc::new(|| false),
            closed: Arc::new(AtomicBool::new(false)),
            tport_id: tport_id.into(),
        }
    }

    pub fn with_send<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TransportError>> + Send + 'static,
    {
        self.send = Arc::new(move |frame| Box::pin(f(frame)));
        self
    }

    pub fn with_recv<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Frame, TransportError>> + Send + 'static,
    {
        self.recv = Arc::new(move || Box::pin(f()));
        self
    }

    pub fn with_on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Arc::new(f);
        self
    }

    pub fn with_congested(mut self, f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.congested = Arc::new(f);
        self
    }

    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        (self.send)(frame).await
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyClosed);
        }
        (self.recv)().await
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            (self.on_close)();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_congested(&self) -> bool {
        (self.congested)()
    }

    pub fn send_can_block_enable(&self, _enable: bool) {}

    pub fn tport_id(&self) -> String {
        self.tport_id.clone()
    }
}

impl std::fmt::Debug for UserdefinedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserdefinedTransport")
            .field("tport_id", &self.tport_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpc_wire::{MsgType, StatusCode};

    #[tokio::test]
    async fn default_hooks_are_unsupported_not_panicking() {
        let t = UserdefinedTransport::new("userdefined:test");
        let f = Frame::empty(MsgType::EchoReq, StatusCode::Unset);
        assert!(matches!(t.send_frame(f).await, Err(TransportError::Unsupported(_))));
        assert!(matches!(t.recv_frame().await, Err(TransportError::Unsupported(_))));
    }

    #[tokio::test]
    async fn custom_hooks_are_invoked() {
        let t = UserdefinedTransport::new("userdefined:test")
            .with_send(|_frame| async { Ok(()) })
            .with_congested(|| true);
        let f = Frame::empty(MsgType::EchoReq, StatusCode::Unset);
        t.send_frame(f).await.unwrap();
        assert!(t.is_congested());
    }
}
