//! Events and the event queue.

pub mod event;
pub mod queue;

pub use event::Event;
pub use queue::{EventQueue, QueuedItem};
