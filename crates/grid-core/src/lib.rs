//! The gridsim engine.
//!
//! A hybrid power-system simulation core: steady-state power flow plus
//! time-domain dynamics over a polymorphic component tree (areas, buses,
//! links, loads, generators, relays), with a measurement layer (grabbers
//! and conditions), an event queue, relay specializations, sensors with
//! filter-block chains, and a simulation driver.
//!
//! Concrete numerical integrators, model-file readers, and network
//! front-ends are external collaborators; the built-in stepper exists to
//! drive the event/relay machinery and the local bus convergence
//! operation end to end.

pub mod area;
pub mod blocks;
pub mod bus;
pub mod collector;
pub mod component;
pub mod events;
pub mod fields;
pub mod generator;
pub mod link;
pub mod load;
pub mod measure;
pub mod network;
pub mod object;
pub mod relay;
pub mod simulation;
pub mod solve;
pub mod stepper;

pub use area::Area;
pub use bus::{Bus, BusType, DynBusType};
pub use collector::Collector;
pub use component::{Component, ComponentKind};
pub use events::{Event, EventQueue};
pub use generator::Generator;
pub use link::Link;
pub use load::Load;
pub use network::Network;
pub use object::{ObjectId, ObjectInfo};
pub use relay::{RelayComponent, RelayKind};
pub use simulation::{SimClock, SimError, SimState, Simulation};

// Re-export the substrate so downstream users work against one crate.
pub use grid_base::{
    Alert, ChangeCode, ObjectError, OpFlags, PrintLevel, SolverMode, StateData, Time, Unit,
    NULL_VAL,
};
