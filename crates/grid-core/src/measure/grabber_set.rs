//! Grabber sets.
//!
//! A grabber set pairs a value grabber with its state-space counterpart so
//! the same signal can be read both outside and inside the solver. When
//! no state grabber exists, state-side reads fall back to a linear
//! predictor over previously observed values, or to the last value.
//!
//! The interior cells are safe here: the core is single-threaded by
//! design, and condition evaluation must stay `&self` on the hot path.

use std::cell::{Cell, RefCell};

use grid_base::{is_null, SolverMode, StateData, ValuePredictor, NULL_VAL};

use crate::measure::grabber::Grabber;
use crate::measure::state_grabber::{StateGrabber, StatePartial};
use crate::network::Network;
use crate::object::ObjectId;

#[derive(Debug, Clone)]
pub struct GrabberSet {
    grab: Grabber,
    state: Option<StateGrabber>,
    predictor: Option<RefCell<ValuePredictor>>,
    last_value: Cell<f64>,
    description: Option<String>,
}

impl GrabberSet {
    pub fn new(grab: Grabber, state: Option<StateGrabber>) -> GrabberSet {
        let predictor = if state.is_none() {
            Some(RefCell::new(ValuePredictor::new(0.0, 0.0)))
        } else {
            None
        };
        GrabberSet {
            grab,
            state,
            predictor,
            last_value: Cell::new(NULL_VAL),
            description: None,
        }
    }

    pub fn with_description(mut self, desc: Option<String>) -> GrabberSet {
        self.description = desc;
        self
    }

    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.grab.desc)
    }

    pub fn set_description(&mut self, desc: String) {
        self.description = Some(desc);
    }

    /// Read the signal from live object members.
    pub fn grab_data(&self, net: &Network) -> f64 {
        let value = self.grab.grab(net);
        if !is_null(value) {
            self.last_value.set(value);
        }
        value
    }

    /// Record an observation at a known time so the predictor can stand in
    /// for a missing state grabber between samples.
    pub fn observe(&self, net: &Network, time: f64) -> f64 {
        let value = self.grab.grab(net);
        if !is_null(value) {
            self.last_value.set(value);
            if let Some(p) = &self.predictor {
                p.borrow_mut().update(time, value);
            }
        }
        value
    }

    /// Read the signal from a state snapshot. Falls back to the predictor
    /// (or the last observed value) when no state grabber exists.
    pub fn grab_state(&self, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        if let Some(state) = &self.state {
            return state.grab(net, sd, mode);
        }
        if let Some(p) = &self.predictor {
            return p.borrow().predict(sd.time.as_secs());
        }
        self.last_value.get()
    }

    pub fn state_capable(&self) -> bool {
        self.state.is_some()
    }

    pub fn has_jacobian(&self) -> bool {
        self.state.as_ref().map(|s| s.has_jacobian()).unwrap_or(false)
    }

    /// Partial derivatives of the signal with respect to state entries.
    pub fn partials(
        &self,
        net: &Network,
        mode: SolverMode,
        coeff: f64,
        out: &mut Vec<StatePartial>,
    ) {
        if let Some(state) = &self.state {
            state.partials(net, mode, coeff, out);
        }
    }

    pub fn object(&self) -> Option<ObjectId> {
        self.grab.object()
    }

    pub fn objects(&self, out: &mut Vec<ObjectId>) {
        self.grab.objects(out);
    }

    pub fn value_grabber(&self) -> &Grabber {
        &self.grab
    }

    /// Re-point every referenced object; all-or-nothing. Returns an error
    /// indication (false) without applying a partial retarget.
    pub fn retarget(&mut self, mapper: &mut dyn FnMut(ObjectId) -> Option<ObjectId>) -> bool {
        let mut trial = self.grab.clone();
        if !trial.retarget(mapper) {
            return false;
        }
        let mut state_trial = self.state.clone();
        if let Some(s) = &mut state_trial {
            if !s.retarget(mapper) {
                return false;
            }
        }
        self.grab = trial;
        self.state = state_trial;
        true
    }
}
