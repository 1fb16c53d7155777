//! Event registry: event name to an ordered list of handlers.
//!
//! Everything runs on one thread, so the registry uses `RefCell` and never
//! holds a borrow while a handler runs. Emission iterates over a snapshot of
//! the handler list, so handlers may register or remove handlers (even on the
//! event being emitted) without disturbing the emission in progress.

use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

/// Event names modules register for and emit.
pub mod event {
    pub const SEARCH: &str = "search";
    pub const MUSIC_URL: &str = "musicUrl";
    pub const LYRIC: &str = "lyric";
    pub const ALBUM: &str = "album";
    pub const ARTIST: &str = "artist";
    pub const RECOMMEND: &str = "recommend";
    /// Multiplexed action event; the dispatcher routes every operation here.
    pub const REQUEST: &str = "request";
    /// Readiness signal; the only event `notify` forwards to the protocol stream.
    pub const INITED: &str = lxbridge_plugin::READY_EVENT;
}

pub type HandlerResult = Result<Value, String>;

/// What a handler hands back: a value now, or one later.
pub enum Reply {
    Ready(HandlerResult),
    Deferred(LocalBoxFuture<'static, HandlerResult>),
}

impl Reply {
    pub fn ok(value: impl Into<Value>) -> Self {
        Reply::Ready(Ok(value.into()))
    }

    pub fn err(message: impl Into<String>) -> Self {
        Reply::Ready(Err(message.into()))
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = HandlerResult> + 'static,
    {
        Reply::Deferred(Box::pin(future))
    }
}

impl From<HandlerResult> for Reply {
    fn from(result: HandlerResult) -> Self {
        Reply::Ready(result)
    }
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reply::Ready(result) => f.debug_tuple("Ready").field(result).finish(),
            Reply::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

pub type Handler = Rc<dyn Fn(Value) -> Reply>;

/// Returned by registration; pass it back to remove that handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
pub struct EventRegistry {
    slots: RefCell<HashMap<String, Vec<(HandlerId, Handler)>>>,
    next_id: Cell<u64>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the slot for `event`. No deduplication.
    pub fn on(&self, event: &str, handler: Handler) -> HandlerId {
        let id = HandlerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove(&self, event: &str, id: HandlerId) -> bool {
        let mut slots = self.slots.borrow_mut();
        let Some(handlers) = slots.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(handler_id, _)| *handler_id != id);
        before != handlers.len()
    }

    /// Handlers for `event` in registration order, detached from the live list.
    pub fn snapshot(&self, event: &str) -> Vec<Handler> {
        self.slots
            .borrow()
            .get(event)
            .map(|handlers| handlers.iter().map(|(_, h)| Rc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// First registrant wins for dispatch.
    pub fn first(&self, event: &str) -> Option<Handler> {
        self.slots
            .borrow()
            .get(event)
            .and_then(|handlers| handlers.first())
            .map(|(_, h)| Rc::clone(h))
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.slots.borrow().get(event).map_or(0, Vec::len)
    }

    /// Drops every handler. Handlers often capture the context that owns this
    /// registry; clearing breaks that cycle at shutdown.
    pub fn clear(&self) {
        let drained: Vec<_> = self.slots.borrow_mut().drain().collect();
        drop(drained);
    }

    /// Invokes every handler for `event`, in order, over a snapshot.
    ///
    /// Failures are logged and do not stop the remaining handlers. Deferred
    /// replies are spawned on the current `LocalSet`. Returns the number of
    /// handlers invoked.
    pub fn emit(&self, event: &str, data: &Value) -> usize {
        let handlers = self.snapshot(event);
        for (index, handler) in handlers.iter().enumerate() {
            match invoke(handler, data.clone()) {
                Reply::Ready(Ok(_)) => {}
                Reply::Ready(Err(message)) => {
                    tracing::error!(event, index, "Event handler failed: {message}");
                }
                Reply::Deferred(future) => {
                    let event = event.to_string();
                    tokio::task::spawn_local(async move {
                        if let Err(message) = settle(future).await {
                            tracing::error!(event, index, "Event handler failed: {message}");
                        }
                    });
                }
            }
        }
        handlers.len()
    }
}

/// Calls a handler, turning a panic into an error reply.
pub(crate) fn invoke(handler: &Handler, data: Value) -> Reply {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(data))) {
        Ok(reply) => reply,
        Err(payload) => Reply::Ready(Err(panic_message(payload.as_ref()))),
    }
}

/// Awaits a deferred reply, turning a panic into an error.
pub(crate) async fn settle(future: LocalBoxFuture<'static, HandlerResult>) -> HandlerResult {
    use futures::FutureExt;
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {detail}")
}
