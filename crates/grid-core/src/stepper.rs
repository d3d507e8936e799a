//! The pluggable stepper.
//!
//! Production integrators are external collaborators; the engine only
//! fixes the contract: advance the state arrays to a target time, honor
//! root interrupts, and report how far you got. The basic stepper drives
//! the quasi-static path (local bus convergence each step) so the event,
//! relay, and collector machinery can be exercised end to end.

use grid_base::{SolverMode, StateData, Time};

use crate::bus::ConvergeMode;
use crate::network::Network;
use crate::object::ObjectId;

/// Why the stepper stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Reached the requested time.
    ReachedTarget,
    /// Stopped early on a root interrupt; the driver runs the root checks
    /// and resumes.
    RootInterrupt,
}

/// A time-advancement engine over the global state arrays.
pub trait Stepper {
    fn advance(
        &mut self,
        net: &mut Network,
        root: ObjectId,
        state: &mut [f64],
        dstate: &mut [f64],
        from: Time,
        to: Time,
        seq: &mut u64,
    ) -> (Time, StepOutcome);
}

/// Fixed-step quasi-static driver.
pub struct BasicStepper {
    pub step: Time,
    pub tolerance: f64,
    pub mode: SolverMode,
}

impl BasicStepper {
    pub fn new(step: Time) -> BasicStepper {
        BasicStepper {
            step,
            tolerance: 1e-6,
            mode: SolverMode::DAE,
        }
    }
}

impl Stepper for BasicStepper {
    fn advance(
        &mut self,
        net: &mut Network,
        root: ObjectId,
        state: &mut [f64],
        dstate: &mut [f64],
        from: Time,
        to: Time,
        seq: &mut u64,
    ) -> (Time, StepOutcome) {
        let mut t = from;
        while t < to {
            let next = (t + self.step).min(to);
            t = next;
            *seq += 1;
            {
                let sd = StateData::new(t, state, dstate, *seq);
                net.update_caches(root, &sd, self.mode);
            }
            net.converge_tree(
                root,
                t,
                state,
                dstate,
                self.mode,
                ConvergeMode::LocalIteration,
                self.tolerance,
            );
            // zero-crossing scan over the relay roots
            let root_count = net.root_size(root, self.mode);
            if root_count > 0 {
                let mut roots = vec![0.0; root_count];
                let sd = StateData::new(t, state, dstate, *seq);
                net.root_test_tree(root, &sd, &mut roots, self.mode);
                let crossings = net.root_crossings(root, &roots, self.mode);
                if crossings.iter().any(|c| *c) {
                    return (t, StepOutcome::RootInterrupt);
                }
            }
        }
        (t, StepOutcome::ReachedTarget)
    }
}
