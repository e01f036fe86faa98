//! Security signals and the pub/sub plumbing that carries them.
//!
//! Signals are notifications about completed account operations (confirmation,
//! password reset, instructions mailed). Listeners use them for auditing and
//! tests use them to capture issued tokens.

pub mod bus;
pub mod event;
pub mod in_memory_bus;
pub mod signals;

pub use bus::{EventBus, Subscription, publish_best_effort};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use signals::SecurityEvent;
