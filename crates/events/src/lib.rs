//! In-process event dispatch for the depot.
//!
//! Handlers are registered once in an immutable [`EventRegistry`]; the
//! [`EventBus`] runs each one on its own detached task and contains its
//! failures, so publishing never blocks on or fails because of a handler.

pub mod bus;
pub mod error;
pub mod registry;

pub use bus::{EventBus, EventBusStats, FailureHook};
pub use error::{BoxError, EventError, EventResult};
pub use registry::{Event, EventHandler, EventRegistry, EventRegistryBuilder};
