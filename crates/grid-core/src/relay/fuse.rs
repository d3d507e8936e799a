//! Fuse relay.
//!
//! A fuse watches terminal current against its limit. With an I2t rating
//! it integrates `I^2 - limit^2` as a differential state and blows when
//! the accumulation crosses the rating; without one it blows after the
//! minimum blow time. A blown fuse never recloses.

use grid_base::{
    Alert, MatrixSink, ObjectError, OpFlags, SolverMode, StateData, Time, Unit, NULL_LOCATION,
    NULL_VAL,
};
use grid_expr::Comparison;
use tracing::{info, warn};

use crate::events::Event;
use crate::measure::state_grabber::StateSource;
use crate::measure::{
    make_condition_from, Condition, Grabber, GrabberSet, RelayCondition, StateGrabber,
};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::{
    self, get_condition_value_state, set_action_trigger, set_condition_status,
};
use crate::relay::{Action, ConditionStatus, RelayKind};

#[derive(Debug, Clone)]
pub struct Fuse {
    pub limit: f64,
    /// I2t rating; zero means a plain timed fuse.
    pub mp_i2t: f64,
    pub min_blow_time: Time,
    pub terminal: u8,
    /// Accumulated heating (the differential state).
    pub c_i2t: f64,
    pub use_i2t: bool,
}

impl Default for Fuse {
    fn default() -> Self {
        Fuse {
            limit: 1.0,
            mp_i2t: 0.0,
            min_blow_time: Time::ZERO,
            terminal: 1,
            c_i2t: 0.0,
            use_i2t: false,
        }
    }
}

fn fuse_ref(net: &Network, id: ObjectId) -> Option<&Fuse> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::Fuse(f)) => Some(f),
        _ => None,
    }
}

fn fuse_mut(net: &mut Network, id: ObjectId) -> Option<&mut Fuse> {
    match net.relay_mut(id).map(|r| &mut r.kind) {
        Some(RelayKind::Fuse(f)) => Some(f),
        _ => None,
    }
}

pub fn dyn_init(net: &mut Network, id: ObjectId, _time: Time) {
    if let Some(c) = net.get_mut(id) {
        c.info.flags.insert(OpFlags::CONTINUOUS);
    }
    let Some(relay) = net.relay(id) else { return };
    if !relay.core.conditions.is_empty() {
        return;
    }
    let source = relay.core.source;
    let sink = relay.core.sink.or(source);
    let (terminal, limit, i2t, min_blow) = fuse_ref(net, id)
        .map(|f| (f.terminal, f.limit, f.mp_i2t, f.min_blow_time))
        .unwrap_or((1, 1.0, 0.0, Time::ZERO));

    let Some(src) = source else {
        warn!(relay = %id, "fuse has no source object");
        return;
    };
    let (condition, blow_event) = if net.link(src).is_some() {
        let condition = match make_condition_from(
            &format!("current{terminal}"),
            Comparison::Ge,
            limit,
            net,
            src,
        ) {
            Ok(c) => c,
            Err(e) => {
                warn!(relay = %id, error = %e, "unable to build fuse condition");
                return;
            }
        };
        let event = Event::new(sink.unwrap_or(src), &format!("switch{terminal}"), 1.0);
        (condition, event)
    } else {
        if let Some(c) = net.get_mut(id) {
            c.info.flags.insert(OpFlags::NONLINK_SOURCE);
        }
        let condition =
            match make_condition_from("sqrt(p^2+q^2)/@bus:v", Comparison::Ge, limit, net, src) {
                Ok(c) => c,
                Err(e) => {
                    warn!(relay = %id, error = %e, "unable to build fuse condition");
                    return;
                }
            };
        let event = Event::new(sink.unwrap_or(src), "enabled", 0.0);
        (condition, event)
    };

    core::add_condition(net, id, RelayCondition::Single(condition));
    let blow_action = core::add_action(net, id, Action::Event(blow_event));

    if i2t <= 0.0 {
        // plain fuse: blow after the minimum blow time
        set_action_trigger(net, id, blow_action, 0, min_blow);
    } else {
        // heating fuse: accumulate, blow at the rating, cool back down
        let accum_set = || {
            let grab = Grabber::field(Some(id), "i2t", Unit::Def);
            let state = StateGrabber {
                source: StateSource::RelayDiffState(id),
                gain: 1.0,
                bias: 0.0,
            };
            GrabberSet::new(grab, Some(state))
        };
        let mut blow_cond = Condition::new(accum_set());
        blow_cond.set_comparison(Comparison::Gt);
        blow_cond.set_rhs_constant(i2t);
        let mut cool_cond = Condition::new(accum_set());
        cool_cond.set_comparison(Comparison::Lt);
        cool_cond.set_rhs_constant(-i2t / 2.0);
        core::add_condition(net, id, RelayCondition::Single(blow_cond));
        core::add_condition(net, id, RelayCondition::Single(cool_cond));
        set_condition_status(net, id, 1, ConditionStatus::Disabled);
        set_condition_status(net, id, 2, ConditionStatus::Disabled);
    }
}

pub fn condition_triggered(net: &mut Network, id: ObjectId, condition: usize, time: Time) {
    let blown = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::BLOWN))
        .unwrap_or(false);
    if blown {
        return;
    }
    match condition {
        0 => {
            let (i2t, min_blow) = fuse_ref(net, id)
                .map(|f| (f.mp_i2t, f.min_blow_time))
                .unwrap_or((0.0, Time::ZERO));
            if let Some(c) = net.get_mut(id) {
                c.info.flags.insert(OpFlags::OVERLIMIT);
            }
            if i2t > 0.0 {
                set_condition_status(net, id, 0, ConditionStatus::Disabled);
                set_condition_status(net, id, 1, ConditionStatus::Active);
                set_condition_status(net, id, 2, ConditionStatus::Active);
                if let Some(f) = fuse_mut(net, id) {
                    f.c_i2t = 0.0;
                    f.use_i2t = true;
                }
                net.alert(id, Alert::JacCountChange);
            } else if min_blow.as_secs() <= 1e-9 {
                blow_fuse(net, id, time);
            }
            // otherwise the registered action trigger handles the delay
        }
        1 => blow_fuse(net, id, time),
        2 => {
            set_condition_status(net, id, 1, ConditionStatus::Disabled);
            set_condition_status(net, id, 2, ConditionStatus::Disabled);
            set_condition_status(net, id, 0, ConditionStatus::Active);
            if let Some(c) = net.get_mut(id) {
                c.info.flags.remove(OpFlags::OVERLIMIT);
            }
            if let Some(f) = fuse_mut(net, id) {
                f.use_i2t = false;
            }
            net.alert(id, Alert::JacCountChange);
        }
        _ => {}
    }
}

fn blow_fuse(net: &mut Network, id: ObjectId, time: Time) {
    net.alert(id, Alert::FuseBlownCurrent);
    let name = net.full_name(id);
    info!(fuse = %name, time = %time, "fuse blown");
    core::execute_action(net, id, 0, 0, time);
    if let Some(c) = net.get_mut(id) {
        c.info.flags.insert(OpFlags::BLOWN);
    }
    if let Some(f) = fuse_mut(net, id) {
        f.use_i2t = false;
    }
    // a blown fuse watches nothing further
    let count = net.relay(id).map(|r| r.core.conditions.len()).unwrap_or(0);
    for k in 0..count {
        set_condition_status(net, id, k, ConditionStatus::Disabled);
    }
}

// ============================================================================
// Solver path (heating state)
// ============================================================================

pub fn residual(net: &Network, id: ObjectId, sd: &StateData, resid: &mut [f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let Some(f) = fuse_ref(net, id) else { return };
    if f.use_i2t {
        let i = get_condition_value_state(net, id, 0, sd, mode);
        if grid_base::is_null(i) {
            return;
        }
        resid[offset] = (i * i - f.limit * f.limit) - sd.dstate_or_zero(offset);
    } else {
        resid[offset] = sd.dstate_or_zero(offset);
    }
}

pub fn jacobian(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    sink: &mut dyn MatrixSink,
    mode: SolverMode,
) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let Some(f) = fuse_ref(net, id) else { return };
    if f.use_i2t {
        sink.assign(offset, offset, -sd.cj);
    } else {
        sink.assign(offset, offset, sd.cj);
    }
}

pub fn guess_state(
    net: &Network,
    id: ObjectId,
    state: &mut [f64],
    dstate: &mut [f64],
    mode: SolverMode,
) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let Some(f) = fuse_ref(net, id) else { return };
    if f.use_i2t {
        let i = core::get_condition_value(net, id, 0);
        state[offset] = f.c_i2t;
        dstate[offset] = i * i - f.limit * f.limit;
    } else {
        state[offset] = 0.0;
        dstate[offset] = 0.0;
    }
}

pub fn set_state(net: &mut Network, id: ObjectId, _time: Time, state: &[f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let value = state.get(offset).copied();
    if let Some(f) = fuse_mut(net, id) {
        if f.use_i2t {
            if let Some(v) = value {
                f.c_i2t = v;
            }
        }
    }
}

// ============================================================================
// Parameter surface
// ============================================================================

pub fn field(f: &Fuse, field: &str) -> f64 {
    match field {
        "limit" => f.limit,
        "i2t" => f.c_i2t,
        "rating" => f.mp_i2t,
        "minblowtime" => f.min_blow_time.as_secs(),
        "terminal" => f.terminal as f64,
        _ => NULL_VAL,
    }
}

pub fn set_value(f: &mut Fuse, param: &str, value: f64, _units: Unit) -> Result<bool, ObjectError> {
    match param {
        "limit" => f.limit = value,
        "i2t" => f.mp_i2t = value,
        "minblowtime" => {
            if value < 0.0 {
                return Err(ObjectError::InvalidParameterValue(
                    param.to_string(),
                    "blow time must be non-negative".to_string(),
                ));
            }
            f.min_blow_time = Time::seconds(value);
        }
        "terminal" => f.terminal = value as u8,
        _ => return Ok(false),
    }
    Ok(true)
}
