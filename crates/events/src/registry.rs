//! Event and handler traits, and the immutable registry mapping event types
//! to their handlers.

use crate::error::BoxError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// A domain event. Any `Send + Sync + 'static` type can be published.
pub trait Event: Any + Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str {
        type_name::<Self>()
    }
}

/// Reacts to one event type.
#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn run(&self, event: Arc<E>) -> Result<(), BoxError>;
}

pub(crate) type HandlerFuture = BoxFuture<'static, Result<(), BoxError>>;

/// Type-erased registration stored in the registry.
pub(crate) trait Registration: Send + Sync {
    fn handler_name(&self) -> &'static str;

    /// Prepare one dispatch. Returns `None` when the event is not the
    /// registered type.
    fn prepare(&self, event: Arc<dyn Any + Send + Sync>) -> Option<HandlerFuture>;
}

/// One handler instance shared by every dispatch.
struct Shared<E, H> {
    handler: Arc<H>,
    _event: PhantomData<fn(E)>,
}

impl<E: Event, H: EventHandler<E>> Registration for Shared<E, H> {
    fn handler_name(&self) -> &'static str {
        type_name::<H>()
    }

    fn prepare(&self, event: Arc<dyn Any + Send + Sync>) -> Option<HandlerFuture> {
        let event = event.downcast::<E>().ok()?;
        let handler = self.handler.clone();
        Some(Box::pin(async move { handler.run(event).await }))
    }
}

/// A factory building a fresh handler for every dispatch.
struct Scoped<E, H, F> {
    factory: F,
    _marker: PhantomData<fn(E) -> H>,
}

impl<E, H, F> Registration for Scoped<E, H, F>
where
    E: Event,
    H: EventHandler<E>,
    F: Fn() -> H + Send + Sync + 'static,
{
    fn handler_name(&self) -> &'static str {
        type_name::<H>()
    }

    fn prepare(&self, event: Arc<dyn Any + Send + Sync>) -> Option<HandlerFuture> {
        let event = event.downcast::<E>().ok()?;
        let handler = (self.factory)();
        Some(Box::pin(async move { handler.run(event).await }))
    }
}

/// Immutable map from event type to its ordered registrations.
///
/// Built once through [`EventRegistryBuilder`] and handed to the bus.
#[derive(Default)]
pub struct EventRegistry {
    handlers: HashMap<TypeId, Vec<Arc<dyn Registration>>>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Number of registrations for `E`.
    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Names of the handlers registered for `E`, in registration order.
    pub fn handler_names<E: Event>(&self) -> Vec<&'static str> {
        self.registrations(TypeId::of::<E>())
            .iter()
            .map(|r| r.handler_name())
            .collect()
    }

    pub(crate) fn registrations(&self, event_type: TypeId) -> &[Arc<dyn Registration>] {
        self.handlers
            .get(&event_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.handlers.len())
            .finish()
    }
}

/// Builder for [`EventRegistry`].
#[derive(Default)]
pub struct EventRegistryBuilder {
    handlers: HashMap<TypeId, Vec<Arc<dyn Registration>>>,
}

impl EventRegistryBuilder {
    /// Register a handler instance shared across dispatches.
    pub fn subscribe<E, H>(self, handler: H) -> Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.subscribe_arc::<E, H>(Arc::new(handler))
    }

    /// Register an already shared handler instance.
    pub fn subscribe_arc<E, H>(mut self, handler: Arc<H>) -> Self
    where
        E: Event,
        H: EventHandler<E>,
    {
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Arc::new(Shared::<E, H> {
                handler,
                _event: PhantomData,
            }));
        self
    }

    /// Register a factory that builds a fresh handler for each dispatch.
    pub fn subscribe_scoped<E, H, F>(mut self, factory: F) -> Self
    where
        E: Event,
        H: EventHandler<E>,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.handlers
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Arc::new(Scoped::<E, H, F> {
                factory,
                _marker: PhantomData,
            }));
        self
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    impl Event for Ping {}

    struct Pong;
    impl Event for Pong {}

    struct Noop;

    #[async_trait]
    impl EventHandler<Ping> for Noop {
        async fn run(&self, _event: Arc<Ping>) -> Result<(), BoxError> {
            Ok(())
        }
    }

    #[test]
    fn test_registrations_are_kept_per_event_type_in_order() {
        let registry = EventRegistry::builder()
            .subscribe::<Ping, _>(Noop)
            .subscribe_scoped::<Ping, _, _>(|| Noop)
            .build();

        assert_eq!(registry.handler_count::<Ping>(), 2);
        assert_eq!(registry.handler_count::<Pong>(), 0);
        assert!(registry.handler_names::<Ping>()[0].ends_with("Noop"));
    }

    #[test]
    fn test_prepare_rejects_other_event_types() {
        let registry = EventRegistry::builder().subscribe::<Ping, _>(Noop).build();
        let registration = &registry.registrations(TypeId::of::<Ping>())[0];
        assert!(registration.prepare(Arc::new(Pong)).is_none());
        assert!(registration.prepare(Arc::new(Ping)).is_some());
    }
}
