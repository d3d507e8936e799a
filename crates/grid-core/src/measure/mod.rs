//! Measurement: grabbers, grabber sets, and conditions.
//!
//! A grabber is a pure function from an object (plus optional state data)
//! to a scalar. Grabbers compose by arithmetic and registered functions;
//! conditions compare two grabber values with margin-based hysteresis.

pub mod bind;
pub mod condition;
pub mod grabber;
pub mod grabber_set;
pub mod state_grabber;

pub use bind::{make_condition, make_condition_from, make_grabber_set};
pub use condition::{CompoundCondition, CompoundMode, Condition, RelayCondition};
pub use grabber::{Grabber, GrabberSource};
pub use grabber_set::GrabberSet;
pub use state_grabber::{StatePartial, StateGrabber, StateSource};
