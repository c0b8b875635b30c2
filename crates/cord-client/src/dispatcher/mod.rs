//! Event dispatcher
//!
//! Routes each [`Event`] to one-shot waiters (synchronously, in
//! registration order) and then to the persistent `on_<name>` handlers, each
//! of which runs in its own task. Handler failures, returned or panicked, go
//! to a single error hook.

mod waiter;

pub use waiter::{WaitError, Waiter};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::events::Event;
use waiter::PendingWaiter;

/// Error type returned by handlers and predicates
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// A persistent event handler
pub type Handler = Arc<dyn Fn(Arc<Event>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Receives `(handler_name, error)` for every failed handler
pub type ErrorHook = Arc<dyn Fn(&str, &HandlerError) + Send + Sync>;

pub(crate) type Predicate = Box<dyn Fn(&Event) -> Result<bool, HandlerError> + Send + Sync>;

/// Identifies a listener added with [`Dispatcher::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct HandlerSet {
    /// Set by `event`; replaced on re-registration
    primary: Option<Handler>,
    extra: Vec<(ListenerId, Handler)>,
}

impl HandlerSet {
    fn all(&self) -> Vec<Handler> {
        self.primary
            .iter()
            .cloned()
            .chain(self.extra.iter().map(|(_, h)| Arc::clone(h)))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.primary.is_none() && self.extra.is_empty()
    }
}

pub(crate) struct DispatcherInner {
    waiters: DashMap<String, Vec<PendingWaiter>>,
    handlers: DashMap<String, HandlerSet>,
    error_hook: RwLock<ErrorHook>,
    next_id: AtomicU64,
}

impl DispatcherInner {
    pub(crate) fn remove_waiter(&self, event: &str, id: u64) {
        if let Some(mut waiters) = self.waiters.get_mut(event) {
            waiters.retain(|w| w.id != id);
        }
        self.waiters.remove_if(event, |_, waiters| waiters.is_empty());
    }
}

fn default_error_hook() -> ErrorHook {
    Arc::new(|method: &str, error: &HandlerError| {
        tracing::error!(event = %method, error = %error, "Ignoring exception in event handler");
    })
}

/// `message` and `on_message` both name the `on_message` handler
fn handler_name(event: &str) -> String {
    let event = event.trim().to_lowercase();
    if event.starts_with("on_") {
        event
    } else {
        format!("on_{event}")
    }
}

fn waiter_key(event: &str) -> String {
    let event = event.trim().to_lowercase();
    match event.strip_prefix("on_") {
        Some(stripped) => stripped.to_string(),
        None => event,
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {s}")
    } else {
        "handler panicked".to_string()
    }
}

/// Event router shared by the client and its parsers
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                waiters: DashMap::new(),
                handlers: DashMap::new(),
                error_hook: RwLock::new(default_error_hook()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    // === Waiters ===

    /// Register a one-shot waiter for `event`.
    ///
    /// The predicate runs on the dispatching task while the dispatcher's
    /// waiter list is locked; it must not call back into the dispatcher.
    pub fn register_listener<P>(&self, event: &str, predicate: P, timeout: Option<Duration>) -> Waiter
    where
        P: Fn(&Event) -> Result<bool, HandlerError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        let key = waiter_key(event);
        let (sender, receiver) = tokio::sync::oneshot::channel();

        self.inner
            .waiters
            .entry(key.clone())
            .or_default()
            .push(PendingWaiter {
                id,
                predicate: Box::new(predicate),
                sender,
            });

        Waiter::new(id, key, timeout, receiver, Arc::downgrade(&self.inner))
    }

    /// Number of waiters registered for `event`
    pub fn waiter_count(&self, event: &str) -> usize {
        self.inner
            .waiters
            .get(&waiter_key(event))
            .map_or(0, |w| w.len())
    }

    // === Handlers ===

    /// Set the primary `on_<event>` handler, replacing any previous one
    pub fn event<F, Fut>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let name = handler_name(event);
        tracing::debug!(handler = %name, "Registered event handler");
        self.inner.handlers.entry(name).or_default().primary = Some(boxed(handler));
    }

    /// Add a handler alongside any others for `event`
    pub fn add_listener<F, Fut>(&self, event: &str, handler: F) -> ListenerId
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let id = ListenerId(self.next_id());
        self.inner
            .handlers
            .entry(handler_name(event))
            .or_default()
            .extra
            .push((id, boxed(handler)));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        let name = handler_name(event);
        let removed = match self.inner.handlers.get_mut(&name) {
            Some(mut set) => {
                let before = set.extra.len();
                set.extra.retain(|(listener, _)| *listener != id);
                set.extra.len() != before
            }
            None => false,
        };
        self.inner.handlers.remove_if(&name, |_, set| set.is_empty());
        removed
    }

    /// Remove the primary handler for `event`
    pub fn remove_event(&self, event: &str) -> bool {
        let name = handler_name(event);
        let removed = self
            .inner
            .handlers
            .get_mut(&name)
            .and_then(|mut set| set.primary.take())
            .is_some();
        self.inner.handlers.remove_if(&name, |_, set| set.is_empty());
        removed
    }

    pub fn has_handlers(&self, event: &str) -> bool {
        self.inner.handlers.contains_key(&handler_name(event))
    }

    /// Replace the hook that receives handler failures
    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&str, &HandlerError) + Send + Sync + 'static,
    {
        *self.inner.error_hook.write() = Arc::new(hook);
    }

    // === Dispatch ===

    /// Deliver `event` to waiters, then spawn its handlers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        let name = event.name().to_string();
        tracing::debug!(event = %name, "Dispatching event");

        self.resolve_waiters(&name, &event);

        let method = handler_name(&name);
        let handlers = self
            .inner
            .handlers
            .get(&method)
            .map(|set| set.all())
            .unwrap_or_default();

        for handler in handlers {
            self.spawn_handler(method.clone(), handler, Arc::clone(&event));
        }
    }

    fn resolve_waiters(&self, name: &str, event: &Arc<Event>) {
        let Some(mut waiters) = self.inner.waiters.get_mut(name) else {
            return;
        };

        let pending = std::mem::take(&mut *waiters);
        for waiter in pending {
            if waiter.sender.is_closed() {
                continue;
            }
            match (waiter.predicate)(event.as_ref()) {
                Ok(true) => {
                    let _ = waiter.sender.send(Ok(Arc::clone(event)));
                }
                Ok(false) => waiters.push(waiter),
                Err(e) => {
                    let _ = waiter.sender.send(Err(WaitError::Predicate(e)));
                }
            }
        }
        drop(waiters);

        self.inner.waiters.remove_if(name, |_, waiters| waiters.is_empty());
    }

    fn spawn_handler(&self, method: String, handler: Handler, event: Arc<Event>) {
        let hook = Arc::clone(&*self.inner.error_hook.read());
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { handler(event).await })
                .catch_unwind()
                .await;
            let error: HandlerError = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(panic) => panic_message(panic).into(),
            };
            hook(&method, &error);
        });
    }
}

fn boxed<F, Fut>(handler: F) -> Handler
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |event: Arc<Event>| handler(event).boxed())
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("waiters", &self.inner.waiters.len())
            .field("handlers", &self.inner.handlers.len())
            .finish()
    }
}
