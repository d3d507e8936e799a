//! Substrate types for the gridsim engine.
//!
//! Everything here is tree-agnostic: simulation time, solver modes, state
//! views, offset bookkeeping, change codes and alerts, operational flags,
//! units, fault types, matrix sinks, and the value predictor. The component
//! tree itself lives in `grid-core`.

pub mod change;
pub mod error;
pub mod flags;
pub mod matrix;
pub mod offsets;
pub mod predictor;
pub mod solver;
pub mod state;
pub mod time;
pub mod units;

pub use change::{Alert, ChangeCode, PrintLevel};
pub use error::ObjectError;
pub use flags::OpFlags;
pub use matrix::{MatrixSink, SparseTriplets};
pub use offsets::{ModeOffsets, OffsetTable, StateSizes, NULL_LOCATION};
pub use predictor::ValuePredictor;
pub use solver::SolverMode;
pub use state::StateData;
pub use time::Time;
pub use units::Unit;

/// Sentinel for "no value available". Grabbers and `get` return this for
/// unknown fields or dead targets; the solver path writes it to mark an
/// invalid entry without throwing.
pub const NULL_VAL: f64 = -1.456e47;

/// Check a value against the null sentinel.
pub fn is_null(value: f64) -> bool {
    value == NULL_VAL
}

/// A very large finite number used as an "effectively unbounded" limit.
pub const BIG_NUM: f64 = 1e49;
