use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// Error a handler returns to trigger an error-reply on the wire").
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// `Ok(Some(reply))` sends `reply`; `Ok(None)` sends nothing (used by
/// response-type handlers that hand off to RPC waiters); `Err(e)` sends an
/// error Message built from `e`.
pub type HandlerResult = Result<Option<Message>, HandlerError>;

type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A function registered under a pattern string, producing a reply Message
/// (or an error) from an inbound Message. Handlers receive a cancellation
/// context so they can cooperate with shutdown.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, cancel: CancellationToken, msg: Message) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, cancel: CancellationToken, msg: Message) -> HandlerFuture {
        Box::pin(self(cancel, msg))
    }
}

/// Mapping from pattern string (a message-type name or a request-method id)
/// to handler. Re-registering a pattern replaces the existing entry.
///
/// Guarded by a readers-writer lock: registration happens at startup and is
/// rare; lookup happens on every inbound message and is hot. The lock is
/// never held across an `.await` — callers clone the `Arc<dyn Handler>` out
/// from under the guard before invoking it.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, pattern: impl Into<String>, handler: impl Handler) {
        let mut guard = self.handlers.write().expect("handler registry poisoned");
        guard.insert(pattern.into(), Arc::new(handler));
    }

    /// Looks up a handler for `msg`: responses/errors key on `type` first,
    /// falling back to `id`;
    /// everything else keys on `id` first, falling back to `type`.
    pub fn resolve(&self, msg: &Message) -> Option<Arc<dyn Handler>> {
        let guard = self.handlers.read().expect("handler registry poisoned");
        msg.lookup_order()
            .into_iter()
            .find_map(|pattern| guard.get(pattern).cloned())
    }

    pub fn is_registered(&self, pattern: &str) -> bool {
        self.handlers
            .read()
            .expect("handler registry poisoned")
            .contains_key(pattern)
    }
}
