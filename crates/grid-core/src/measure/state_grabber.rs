//! State-space grabbers.
//!
//! The state grabber is the solver-side counterpart of a value grabber:
//! it reads from a state snapshot rather than component members so the
//! same signal is visible inside residual and root evaluation. Grabbers
//! that can also express their partial derivatives participate in the
//! Jacobian; the others are skipped in the derivative path.

use grid_base::{is_null, SolverMode, StateData, NULL_LOCATION, NULL_VAL};
use grid_expr::BinaryOp;

use crate::bus::{bus_angle, bus_voltage};
use crate::link;
use crate::network::Network;
use crate::object::ObjectId;

/// A (state-offset, d value / d state) pair.
pub type StatePartial = (usize, f64);

/// Which link quantity a state grabber reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkQuantity {
    Current(u8),
    RealCurrent(u8),
    ImagCurrent(u8),
    P(u8),
    Q(u8),
}

#[derive(Debug, Clone)]
pub enum StateSource {
    Constant,
    BusVoltage(ObjectId),
    BusAngle(ObjectId),
    /// Link terminal quantity, recomputed from the snapshot.
    Link { link: ObjectId, quantity: LinkQuantity },
    /// A relay's first differential state (breaker/fuse accumulators).
    RelayDiffState(ObjectId),
    Func1 {
        func: fn(f64) -> f64,
        arg: Box<StateGrabber>,
    },
    Func2 {
        func: fn(f64, f64) -> f64,
        a: Box<StateGrabber>,
        b: Box<StateGrabber>,
    },
    Op {
        op: BinaryOp,
        a: Box<StateGrabber>,
        b: Box<StateGrabber>,
    },
}

#[derive(Debug, Clone)]
pub struct StateGrabber {
    pub source: StateSource,
    pub gain: f64,
    pub bias: f64,
}

impl StateGrabber {
    pub fn constant(value: f64) -> StateGrabber {
        StateGrabber {
            source: StateSource::Constant,
            gain: 1.0,
            bias: value,
        }
    }

    pub fn bus_voltage(bus: ObjectId) -> StateGrabber {
        StateGrabber {
            source: StateSource::BusVoltage(bus),
            gain: 1.0,
            bias: 0.0,
        }
    }

    pub fn grab(&self, net: &Network, sd: &StateData, mode: SolverMode) -> f64 {
        let raw = match &self.source {
            StateSource::Constant => 0.0,
            StateSource::BusVoltage(bus) => bus_voltage(net, *bus, sd, mode),
            StateSource::BusAngle(bus) => bus_angle(net, *bus, sd, mode),
            StateSource::Link { link, quantity } => link_quantity(net, *link, *quantity, sd, mode),
            StateSource::RelayDiffState(relay) => {
                let Some(comp) = net.get(*relay) else {
                    return NULL_VAL;
                };
                let off = comp.offsets.get(mode).diff_offset;
                if off == NULL_LOCATION {
                    return NULL_VAL;
                }
                sd.state_or(off, NULL_VAL)
            }
            StateSource::Func1 { func, arg } => {
                let v = arg.grab(net, sd, mode);
                if is_null(v) {
                    return NULL_VAL;
                }
                func(v)
            }
            StateSource::Func2 { func, a, b } => {
                let va = a.grab(net, sd, mode);
                let vb = b.grab(net, sd, mode);
                if is_null(va) || is_null(vb) {
                    return NULL_VAL;
                }
                func(va, vb)
            }
            StateSource::Op { op, a, b } => {
                let va = a.grab(net, sd, mode);
                let vb = b.grab(net, sd, mode);
                if is_null(va) || is_null(vb) {
                    return NULL_VAL;
                }
                op.apply(va, vb)
            }
        };
        if is_null(raw) {
            return NULL_VAL;
        }
        raw * self.gain + self.bias
    }

    /// Whether this grabber contributes Jacobian entries. Linear
    /// combinations of direct state reads do; anything passing through a
    /// registered function or a product of states does not.
    pub fn has_jacobian(&self) -> bool {
        match &self.source {
            StateSource::BusVoltage(_)
            | StateSource::BusAngle(_)
            | StateSource::RelayDiffState(_) => true,
            StateSource::Constant | StateSource::Link { .. } => false,
            StateSource::Func1 { .. } | StateSource::Func2 { .. } => false,
            StateSource::Op { op, a, b } => match op {
                BinaryOp::Add | BinaryOp::Sub => a.has_jacobian() || b.has_jacobian(),
                _ => false,
            },
        }
    }

    /// Accumulate (offset, partial) pairs for d(value)/d(state), scaled
    /// by `coeff`. Only linear sources contribute; see `has_jacobian`.
    pub fn partials(
        &self,
        net: &Network,
        mode: SolverMode,
        coeff: f64,
        out: &mut Vec<StatePartial>,
    ) {
        let coeff = coeff * self.gain;
        match &self.source {
            StateSource::BusVoltage(bus) => {
                if let Some(comp) = net.get(*bus) {
                    let off = comp.offsets.get(mode).v_offset;
                    if off != NULL_LOCATION {
                        out.push((off, coeff));
                    }
                }
            }
            StateSource::BusAngle(bus) => {
                if let Some(comp) = net.get(*bus) {
                    let off = comp.offsets.get(mode).a_offset;
                    if off != NULL_LOCATION {
                        out.push((off, coeff));
                    }
                }
            }
            StateSource::RelayDiffState(relay) => {
                if let Some(comp) = net.get(*relay) {
                    let off = comp.offsets.get(mode).diff_offset;
                    if off != NULL_LOCATION {
                        out.push((off, coeff));
                    }
                }
            }
            StateSource::Op { op, a, b } => match op {
                BinaryOp::Add => {
                    a.partials(net, mode, coeff, out);
                    b.partials(net, mode, coeff, out);
                }
                BinaryOp::Sub => {
                    a.partials(net, mode, coeff, out);
                    b.partials(net, mode, -coeff, out);
                }
                _ => {}
            },
            _ => {}
        }
    }

    pub fn retarget(&mut self, mapper: &mut dyn FnMut(ObjectId) -> Option<ObjectId>) -> bool {
        match &mut self.source {
            StateSource::Constant => true,
            StateSource::BusVoltage(id)
            | StateSource::BusAngle(id)
            | StateSource::RelayDiffState(id) => match mapper(*id) {
                Some(new_id) => {
                    *id = new_id;
                    true
                }
                None => false,
            },
            StateSource::Link { link, .. } => match mapper(*link) {
                Some(new_id) => {
                    *link = new_id;
                    true
                }
                None => false,
            },
            StateSource::Func1 { arg, .. } => arg.retarget(mapper),
            StateSource::Func2 { a, b, .. } | StateSource::Op { a, b, .. } => {
                a.retarget(mapper) && b.retarget(mapper)
            }
        }
    }
}

fn link_quantity(
    net: &Network,
    link_id: ObjectId,
    quantity: LinkQuantity,
    sd: &StateData,
    mode: SolverMode,
) -> f64 {
    let terminal = match quantity {
        LinkQuantity::Current(t)
        | LinkQuantity::RealCurrent(t)
        | LinkQuantity::ImagCurrent(t)
        | LinkQuantity::P(t)
        | LinkQuantity::Q(t) => t,
    };
    let Some(lnk) = net.link(link_id) else {
        return NULL_VAL;
    };
    let bus = if terminal == 2 { lnk.bus2 } else { lnk.bus1 };
    let Some(uid) = bus.and_then(|b| net.get(b)).map(|c| c.info.uid) else {
        return NULL_VAL;
    };
    let Some(flow) = link::terminal_flow(net, link_id, uid, sd, mode) else {
        return NULL_VAL;
    };
    match quantity {
        LinkQuantity::Current(_) => flow.current(),
        LinkQuantity::RealCurrent(_) => flow.real_current,
        LinkQuantity::ImagCurrent(_) => flow.imag_current,
        LinkQuantity::P(_) => flow.p,
        LinkQuantity::Q(_) => flow.q,
    }
}
