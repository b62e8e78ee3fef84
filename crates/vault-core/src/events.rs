//! Event infrastructure for vault-core.
//!
//! `EventBus` fans typed events out to synchronous listeners; feeds, archives
//! and in-memory filesystems each own one. `EventStream` is the caller-facing
//! end of a subscription: a queue of events plus every listener handle that
//! feeds it, all released together by `close()`.

use futures::Stream;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// A listener callback registered on an `EventBus`.
pub type Listener<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or call `cancel`) to unsubscribe.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A subscription with nothing attached.
    pub fn noop() -> Self {
        Self { unsubscribe: None }
    }

    /// Detach now. Equivalent to dropping the handle.
    pub fn cancel(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Event bus for publishing events to synchronous listeners.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Listener<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    ///
    /// Requires `self` to be wrapped in `Arc`.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(E) + Send + Sync + 'static) -> Subscription {
        self.subscribe_listener(Arc::new(callback))
    }

    pub fn subscribe_listener(self: &Arc<Self>, listener: Listener<E>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, listener));

        let bus = Arc::downgrade(self);
        Subscription::new(move || {
            if let Some(bus) = bus.upgrade() {
                bus.unsubscribe(id);
            }
        })
    }

    fn unsubscribe(&self, id: usize) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list so listeners may subscribe or unsubscribe
        // while the event is being delivered.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[derive(Default)]
struct GuardState {
    closed: bool,
    subscriptions: Vec<Subscription>,
    task: Option<JoinHandle<()>>,
}

/// Owns everything a live subscription has attached: listener handles and
/// the processing task, if any. Closing is one-way and idempotent.
#[derive(Default)]
pub(crate) struct StreamGuard {
    state: Mutex<GuardState>,
}

impl StreamGuard {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keep `subscription` attached until close. Returns `false` and detaches
    /// it immediately when the stream is already closed.
    pub(crate) fn hold(&self, subscription: Subscription) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            drop(state);
            drop(subscription);
            return false;
        }
        state.subscriptions.push(subscription);
        true
    }

    pub(crate) fn set_task(&self, task: JoinHandle<()>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.closed {
            task.abort();
            return;
        }
        state.task = Some(task);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub(crate) fn close(&self) {
        let (subscriptions, task) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.closed {
                return;
            }
            state.closed = true;
            (std::mem::take(&mut state.subscriptions), state.task.take())
        };

        debug!("Closing subscription ({} listener(s))", subscriptions.len());
        drop(subscriptions);
        if let Some(task) = task {
            task.abort();
        }
    }
}

/// Sending half of an `EventStream`. Sends after close are dropped.
pub(crate) struct EventSink<E> {
    tx: mpsc::UnboundedSender<E>,
    guard: Arc<StreamGuard>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            guard: Arc::clone(&self.guard),
        }
    }
}

impl<E> EventSink<E> {
    pub(crate) fn send(&self, event: E) {
        if self.guard.is_closed() {
            return;
        }
        if self.tx.send(event).is_err() {
            debug!("Event dropped: subscriber went away");
        }
    }

    pub(crate) fn guard(&self) -> &Arc<StreamGuard> {
        &self.guard
    }
}

/// Create a connected sink/stream pair sharing one guard.
pub(crate) fn channel<E>() -> (EventSink<E>, EventStream<E>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let guard = StreamGuard::new();
    (
        EventSink {
            tx,
            guard: Arc::clone(&guard),
        },
        EventStream { rx, guard },
    )
}

/// Cancelable sequence of events produced by a subscription.
///
/// Yields events until `close()` is called or the stream is dropped. Closing
/// detaches every underlying listener, may be called any number of times,
/// and never fails.
pub struct EventStream<E> {
    rx: mpsc::UnboundedReceiver<E>,
    guard: Arc<StreamGuard>,
}

impl<E> EventStream<E> {
    /// Wait for the next event. Returns `None` once closed.
    pub async fn recv(&mut self) -> Option<E> {
        if self.guard.is_closed() {
            return None;
        }
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<E> {
        if self.guard.is_closed() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.guard.close();
        self.rx.close();
    }

    pub fn is_closed(&self) -> bool {
        self.guard.is_closed()
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        if self.guard.is_closed() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl<E> Drop for EventStream<E> {
    fn drop(&mut self) {
        self.guard.close();
    }
}
