//! Event contracts mechanics and the bus abstraction shared by both services.
//!
//! Domain crates define their own event payloads; this crate only knows how to
//! name, wrap, ship and acknowledge them.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod projection;
pub mod subject;

pub use bus::{Acknowledger, BusError, Delivery, EventBus, Subscription};
pub use envelope::{EventEnvelope, RawEnvelope};
pub use event::Event;
pub use in_memory_bus::InMemoryEventBus;
pub use projection::Projection;
pub use subject::Subject;
