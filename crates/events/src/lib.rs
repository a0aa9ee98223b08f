//! Ledger domain events and their publication mechanics.
//!
//! Domain crates describe what happened as typed [`Event`]s. The infrastructure
//! layer wraps committed events into firm-scoped [`EventEnvelope`]s and
//! publishes them on an [`EventBus`] once the store transaction has committed.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EnvelopeHeader, EventEnvelope};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
