//! Publish side of the event system.

use crate::error::{EventError, EventResult};
use crate::registry::{Event, EventRegistry};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Called with the handler name whenever a handler fails or panics.
pub type FailureHook = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Counters describing bus activity since creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EventBusStats {
    pub published: u64,
    pub dispatched: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// In-process publish/subscribe over an immutable [`EventRegistry`].
///
/// Every handler runs on its own detached task. Handler errors and panics
/// are logged and contained; the publisher only learns how many handlers
/// were dispatched.
pub struct EventBus {
    registry: Arc<EventRegistry>,
    tracker: TaskTracker,
    // Held for reading across check-and-spawn, so once shutdown has taken
    // it for writing no publish can add a task behind its wait
    closed: RwLock<bool>,
    // Serializes the close/wait/reopen cycle of drain and shutdown
    wait_lock: tokio::sync::Mutex<()>,
    counters: Arc<Counters>,
    on_failure: Option<FailureHook>,
}

impl EventBus {
    pub fn new(registry: EventRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            tracker: TaskTracker::new(),
            closed: RwLock::new(false),
            wait_lock: tokio::sync::Mutex::new(()),
            counters: Arc::new(Counters::default()),
            on_failure: None,
        }
    }

    /// Install a hook invoked for each failed handler run.
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Dispatch `event` to every handler registered for its type.
    ///
    /// Must be called from within a tokio runtime. Returns the number of
    /// handlers dispatched; an event type with no handlers dispatches none.
    pub fn publish<E: Event>(&self, event: E) -> EventResult<usize> {
        self.dispatch(event, None)
    }

    /// Like [`publish`](Self::publish), but returns `Cancelled` without
    /// dispatching anything if `cancel` has already fired. Handlers already
    /// spawned are not affected by later cancellation.
    pub fn publish_with_cancel<E: Event>(
        &self,
        event: E,
        cancel: &CancellationToken,
    ) -> EventResult<usize> {
        self.dispatch(event, Some(cancel))
    }

    fn dispatch<E: Event>(&self, event: E, cancel: Option<&CancellationToken>) -> EventResult<usize> {
        let closed = self.closed.read().unwrap_or_else(PoisonError::into_inner);
        if *closed {
            return Err(EventError::Closed);
        }
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(EventError::Cancelled);
        }

        let event_name = event.name();
        let registrations = self.registry.registrations(std::any::TypeId::of::<E>());
        self.counters.published.fetch_add(1, Ordering::Relaxed);
        if registrations.is_empty() {
            tracing::trace!(event = event_name, "no handlers registered");
            return Ok(0);
        }

        let event: Arc<dyn Any + Send + Sync> = Arc::new(event);
        let mut dispatched = 0;
        for registration in registrations {
            let handler = registration.handler_name();
            let Some(run) = registration.prepare(event.clone()) else {
                continue;
            };

            let counters = self.counters.clone();
            let on_failure = self.on_failure.clone();
            self.tracker.spawn(async move {
                let failed = match AssertUnwindSafe(run).catch_unwind().await {
                    Ok(Ok(())) => {
                        tracing::debug!(event = event_name, handler, "event handler completed");
                        false
                    }
                    Ok(Err(err)) => {
                        tracing::error!(
                            event = event_name,
                            handler,
                            error = %err,
                            "event handler failed"
                        );
                        true
                    }
                    Err(panic) => {
                        tracing::error!(
                            event = event_name,
                            handler,
                            panic = panic_message(panic.as_ref()),
                            "event handler panicked"
                        );
                        true
                    }
                };
                if failed {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    if let Some(hook) = on_failure {
                        hook(handler);
                    }
                }
            });
            dispatched += 1;
        }

        self.counters
            .dispatched
            .fetch_add(dispatched as u64, Ordering::Relaxed);
        tracing::debug!(event = event_name, handlers = dispatched, "event published");
        Ok(dispatched)
    }

    /// Handler tasks still running.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every handler dispatched so far has finished.
    ///
    /// Publishing stays open; handlers spawned while draining are awaited too.
    pub async fn drain(&self) {
        let _guard = self.wait_lock.lock().await;
        self.tracker.close();
        self.tracker.wait().await;
        if !self.is_closed() {
            self.tracker.reopen();
        }
    }

    /// Refuse new publishes and wait up to `timeout` for in-flight handlers.
    ///
    /// Returns `true` if every handler finished in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        *self.closed.write().unwrap_or_else(PoisonError::into_inner) = true;
        let _guard = self.wait_lock.lock().await;
        self.tracker.close();
        let pending = self.tracker.len();
        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => {
                tracing::info!(drained = pending, "event bus shut down");
                true
            }
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    timeout_secs = timeout.as_secs(),
                    "event bus shutdown timed out with handlers still running"
                );
                false
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            published: self.counters.published.load(Ordering::Relaxed),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("registry", &self.registry)
            .field("in_flight", &self.tracker.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
