//! The capability surface handed to a loaded module.
//!
//! A module sees nothing of the host beyond [`HostContext`]: event
//! registration and emission, notifications, outbound HTTP, timers and the
//! path of its own manifest. One context is built per bridge and shared by
//! cloning; there is no global instance.

use crate::fetch::{FetchError, FetchOptions, FetchResponse, Fetcher};
use crate::output::ProtocolSink;
use crate::registry::{event, EventRegistry, HandlerId, Reply};
use lxbridge_core::BridgeConfig;
use serde_json::Value;
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone)]
pub struct HostContext {
    inner: Rc<Inner>,
}

struct Inner {
    registry: EventRegistry,
    outbound: ProtocolSink,
    fetcher: Fetcher,
    module_path: RefCell<Option<PathBuf>>,
    /// `inited` payloads held back while a load is in progress.
    held: RefCell<Option<Vec<Value>>>,
}

impl HostContext {
    pub fn new(outbound: ProtocolSink, config: &BridgeConfig) -> Result<Self, FetchError> {
        Ok(Self {
            inner: Rc::new(Inner {
                registry: EventRegistry::new(),
                outbound,
                fetcher: Fetcher::new(config.fetch_timeout())?,
                module_path: RefCell::new(None),
                held: RefCell::new(None),
            }),
        })
    }

    /// Registers `handler` for `event`. Handlers run in registration order.
    pub fn on<F>(&self, event: &str, handler: F) -> HandlerId
    where
        F: Fn(Value) -> Reply + 'static,
    {
        tracing::debug!(event, "handler registered");
        self.inner.registry.on(event, Rc::new(handler))
    }

    pub fn remove(&self, event: &str, id: HandlerId) -> bool {
        self.inner.registry.remove(event, id)
    }

    /// Fans `data` out to every handler of `event`; see [`EventRegistry::emit`].
    pub fn emit(&self, event: &str, data: Value) -> usize {
        self.inner.registry.emit(event, &data)
    }

    /// Module-to-host signal. `inited` goes to the protocol stream as an event
    /// line; anything else is only logged.
    ///
    /// During loading, `inited` lines are held until the load outcome is known
    /// and dropped if it fails.
    pub fn notify(&self, event: &str, data: Value) {
        if event == event::INITED {
            tracing::info!("module reported inited");
            if let Some(held) = self.inner.held.borrow_mut().as_mut() {
                held.push(data);
                return;
            }
            self.inner.outbound.event(event, data);
        } else {
            tracing::info!(event, data = %data, "module notification");
        }
    }

    pub async fn fetch(&self, url: &str, options: FetchOptions) -> Result<FetchResponse, FetchError> {
        self.inner.fetcher.fetch(url, options).await
    }

    pub fn sleep(&self, duration: Duration) -> tokio::time::Sleep {
        tokio::time::sleep(duration)
    }

    /// Manifest path of the loaded module, once loading has started.
    pub fn module_path(&self) -> Option<PathBuf> {
        self.inner.module_path.borrow().clone()
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.inner.registry
    }

    pub(crate) fn set_module_path(&self, path: &Path) {
        *self.inner.module_path.borrow_mut() = Some(path.to_path_buf());
    }

    pub(crate) fn hold_announcements(&self) {
        *self.inner.held.borrow_mut() = Some(Vec::new());
    }

    /// Ends holding: publishes what was held when `publish`, discards it otherwise.
    pub(crate) fn release_announcements(&self, publish: bool) {
        let held = self.inner.held.borrow_mut().take().unwrap_or_default();
        if !publish {
            if !held.is_empty() {
                tracing::debug!(count = held.len(), "discarding inited from failed load");
            }
            return;
        }
        for data in held {
            self.inner.outbound.event(event::INITED, data);
        }
    }

    /// Drops all handlers so closures holding clones of this context are freed.
    pub fn shutdown(&self) {
        self.inner.registry.clear();
    }
}


#[cfg(test)]
mod tests {
    use super::testing::context;
    use super::*;
    use serde_json::json;
    use std::cell::Cell;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn only_inited_reaches_protocol_stream() {
        let (ctx, writer, mut client) = context();
        ctx.notify("status", json!({"msg": "warming up"}));
        ctx.notify(event::INITED, json!({"sources": {"kw": {}}}));
        drop(ctx);

        assert_eq!(writer.run().await.unwrap(), 1);
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(output, "{\"event\":\"inited\",\"data\":{\"sources\":{\"kw\":{}}}}\n");
    }

    #[tokio::test]
    async fn held_inited_is_published_or_dropped() {
        let (ctx, writer, mut client) = context();
        ctx.hold_announcements();
        ctx.notify(event::INITED, json!({"attempt": 1}));
        ctx.release_announcements(false);

        ctx.hold_announcements();
        ctx.notify(event::INITED, json!({"attempt": 2}));
        ctx.release_announcements(true);
        ctx.notify(event::INITED, json!({"attempt": 3}));
        drop(ctx);

        assert_eq!(writer.run().await.unwrap(), 2);
        let mut output = String::new();
        client.read_to_string(&mut output).await.unwrap();
        assert_eq!(
            output,
            concat!(
                "{\"event\":\"inited\",\"data\":{\"attempt\":2}}\n",
                "{\"event\":\"inited\",\"data\":{\"attempt\":3}}\n",
            )
        );
    }

    #[tokio::test]
    async fn handlers_can_capture_context() {
        let (ctx, _writer, _client) = context();
        let hits = Rc::new(Cell::new(0));

        let inner = ctx.clone();
        let counter = Rc::clone(&hits);
        ctx.on("ping", move |_| {
            counter.set(counter.get() + 1);
            inner.emit("pong", Value::Null);
            Reply::ok(Value::Null)
        });
        let counter = Rc::clone(&hits);
        ctx.on("pong", move |_| {
            counter.set(counter.get() + 10);
            Reply::ok(Value::Null)
        });

        assert_eq!(ctx.emit("ping", Value::Null), 1);
        assert_eq!(hits.get(), 11);

        ctx.shutdown();
        assert_eq!(ctx.registry().handler_count("ping"), 0);
    }

    #[tokio::test]
    async fn deferred_emit_runs_on_local_set() {
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let (ctx, _writer, _client) = context();
                let done = Rc::new(Cell::new(false));
                let flag = Rc::clone(&done);
                let timer = ctx.clone();
                ctx.on("later", move |_| {
                    let flag = Rc::clone(&flag);
                    let sleep = timer.sleep(Duration::from_millis(10));
                    Reply::deferred(async move {
                        sleep.await;
                        flag.set(true);
                        Ok(Value::Null)
                    })
                });

                ctx.emit("later", Value::Null);
                assert!(!done.get());
                tokio::time::sleep(Duration::from_millis(50)).await;
                assert!(done.get());
            })
            .await;
    }

    #[tokio::test]
    async fn module_path_is_set_by_loader() {
        let (ctx, _writer, _client) = context();
        assert!(ctx.module_path().is_none());
        ctx.set_module_path(Path::new("/tmp/demo.toml"));
        assert_eq!(ctx.module_path(), Some(PathBuf::from("/tmp/demo.toml")));
    }
}
