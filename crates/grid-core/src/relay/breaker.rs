//! Breaker relay.
//!
//! Watches the current at one link terminal (or the apparent current of a
//! secondary) against a trip limit. With a recloser tap the breaker
//! integrates an inverse-time accumulator as a differential state instead
//! of tripping instantly; trips open the switch, reclose attempts close
//! it again after the configured delays until the attempt budget runs
//! out.

use grid_base::{
    Alert, ChangeCode, MatrixSink, ObjectError, OpFlags, SolverMode, StateData, Time, Unit,
    NULL_LOCATION, NULL_VAL,
};
use grid_expr::Comparison;
use tracing::{info, warn};

use crate::events::Event;
use crate::measure::{
    make_condition_from, Condition, Grabber, GrabberSet, RelayCondition, StateGrabber,
};
use crate::measure::state_grabber::StateSource;
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::{
    self, check_condition, execute_action, get_condition_value_state, schedule_update,
    set_condition_status, update_a_core,
};
use crate::relay::{Action, ConditionStatus, RelayKind};

const TIME_EPS: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct Breaker {
    /// Trip threshold (puA).
    pub limit: f64,
    pub min_clearing_time: Time,
    /// Inverse-time recloser tap; zero disables the accumulator.
    pub recloser_tap: f64,
    pub reclose_time1: Time,
    pub reclose_time2: Time,
    pub recloser_reset_time: Time,
    pub max_reclose_attempts: u16,
    pub reclose_attempts: u16,
    pub last_reclose_time: Time,
    pub terminal: u8,
    /// Inverse-time accumulator (the differential state).
    pub cti: f64,
    pub use_cti: bool,
    pub bus: Option<ObjectId>,
}

impl Default for Breaker {
    fn default() -> Self {
        Breaker {
            limit: 1.0,
            min_clearing_time: Time::ZERO,
            recloser_tap: 0.0,
            reclose_time1: Time::seconds(1.0),
            reclose_time2: Time::seconds(5.0),
            recloser_reset_time: Time::seconds(60.0),
            max_reclose_attempts: 0,
            reclose_attempts: 0,
            last_reclose_time: Time::NEG,
            terminal: 1,
            cti: 0.0,
            use_cti: false,
            bus: None,
        }
    }
}

fn breaker_ref(net: &Network, id: ObjectId) -> Option<&Breaker> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::Breaker(b)) => Some(b),
        _ => None,
    }
}

fn breaker_mut(net: &mut Network, id: ObjectId) -> Option<&mut Breaker> {
    match net.relay_mut(id).map(|r| &mut r.kind) {
        Some(RelayKind::Breaker(b)) => Some(b),
        _ => None,
    }
}

// ============================================================================
// Initialization
// ============================================================================

pub fn dyn_init(net: &mut Network, id: ObjectId, _time: Time) {
    if let Some(c) = net.get_mut(id) {
        c.info.flags.insert(OpFlags::CONTINUOUS);
    }
    let Some(relay) = net.relay(id) else { return };
    if !relay.core.conditions.is_empty() {
        return; // already configured
    }
    let source = relay.core.source;
    let sink = relay.core.sink.or(source);
    let (terminal, limit) = breaker_ref(net, id)
        .map(|b| (b.terminal, b.limit))
        .unwrap_or((1, 1.0));

    let source_is_link = source.and_then(|s| net.link(s)).is_some();
    let (condition, trip_event, reclose_event, watched_bus) = if let (Some(src), true) =
        (source, source_is_link)
    {
        let field = format!("current{terminal}");
        let condition = match make_condition_from(&field, Comparison::Ge, limit, net, src) {
            Ok(c) => c,
            Err(e) => {
                warn!(relay = %id, error = %e, "unable to build breaker condition");
                return;
            }
        };
        let switch_field = format!("switch{terminal}");
        let target = sink.unwrap_or(src);
        let trip = Event::new(target, &switch_field, 1.0);
        let reclose = Event::new(target, &switch_field, 0.0);
        let bus = net.link(src).and_then(|l| {
            if terminal == 2 {
                l.bus2
            } else {
                l.bus1
            }
        });
        (condition, trip, reclose, bus)
    } else if let Some(src) = source {
        if let Some(c) = net.get_mut(id) {
            c.info.flags.insert(OpFlags::NONLINK_SOURCE);
        }
        let condition =
            match make_condition_from("sqrt(p^2+q^2)/@bus:v", Comparison::Ge, limit, net, src) {
                Ok(c) => c,
                Err(e) => {
                    warn!(relay = %id, error = %e, "unable to build breaker condition");
                    return;
                }
            };
        let target = sink.unwrap_or(src);
        let trip = Event::new(target, "enabled", 0.0);
        let reclose = Event::new(target, "enabled", 1.0);
        let bus = net.attached_bus(src);
        (condition, trip, reclose, bus)
    } else {
        warn!(relay = %id, "breaker has no source object");
        return;
    };

    core::add_condition(net, id, RelayCondition::Single(condition));
    core::add_action(net, id, Action::Event(trip_event));
    core::add_action(net, id, Action::Event(reclose_event));
    if let Some(b) = breaker_mut(net, id) {
        b.bus = watched_bus;
    }

    // inverse-time accumulator conditions, armed only while timing
    let accum_set = || {
        let grab = Grabber::field(Some(id), "i2t", Unit::Def);
        let state = StateGrabber {
            source: StateSource::RelayDiffState(id),
            gain: 1.0,
            bias: 0.0,
        };
        GrabberSet::new(grab, Some(state))
    };
    let mut trip_cond = Condition::new(accum_set());
    trip_cond.set_comparison(Comparison::Gt);
    trip_cond.set_rhs_constant(1.0);
    let mut reset_cond = Condition::new(accum_set());
    reset_cond.set_comparison(Comparison::Lt);
    reset_cond.set_rhs_constant(-0.5);
    core::add_condition(net, id, RelayCondition::Single(trip_cond));
    core::add_condition(net, id, RelayCondition::Single(reset_cond));
    set_condition_status(net, id, 1, ConditionStatus::Disabled);
    set_condition_status(net, id, 2, ConditionStatus::Disabled);
}

// ============================================================================
// Trigger handling
// ============================================================================

pub fn condition_triggered(net: &mut Network, id: ObjectId, condition: usize, time: Time) {
    match condition {
        0 => {
            if let Some(c) = net.get_mut(id) {
                c.info.flags.insert(OpFlags::OVERLIMIT);
            }
            set_condition_status(net, id, 0, ConditionStatus::Disabled);
            let (tap, min_clear) = breaker_ref(net, id)
                .map(|b| (b.recloser_tap, b.min_clearing_time))
                .unwrap_or((0.0, Time::ZERO));
            if tap == 0.0 {
                if min_clear.as_secs() <= TIME_EPS {
                    trip_breaker(net, id, time);
                } else {
                    schedule_update(net, id, time + min_clear);
                }
            } else {
                if let Some(b) = breaker_mut(net, id) {
                    b.cti = 0.0;
                    b.use_cti = true;
                }
                set_condition_status(net, id, 1, ConditionStatus::Active);
                set_condition_status(net, id, 2, ConditionStatus::Active);
                net.alert(id, Alert::JacCountChange);
            }
        }
        1 => {
            trip_breaker(net, id, time);
        }
        2 => {
            set_condition_status(net, id, 1, ConditionStatus::Disabled);
            set_condition_status(net, id, 2, ConditionStatus::Disabled);
            set_condition_status(net, id, 0, ConditionStatus::Active);
            if let Some(c) = net.get_mut(id) {
                c.info.flags.remove(OpFlags::OVERLIMIT);
            }
            if let Some(b) = breaker_mut(net, id) {
                b.use_cti = false;
            }
            net.alert(id, Alert::JacCountChange);
        }
        _ => {}
    }
}

pub fn update_a(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    let mut code = ChangeCode::NoChange;
    let (tripped, overlimit, next) = match net.get(id) {
        Some(c) => (
            c.info.flags.contains(OpFlags::BREAKER_TRIPPED),
            c.info.flags.contains(OpFlags::OVERLIMIT),
            c.info.next_update_time,
        ),
        None => return code,
    };
    if tripped {
        if time >= next {
            code.absorb(reset_breaker(net, id, time));
        }
    } else if overlimit {
        if time >= next {
            if check_condition(net, id, 0) {
                // still over the limit past the clearing window
                code.absorb(trip_breaker(net, id, time));
            } else {
                if let Some(c) = net.get_mut(id) {
                    c.info.flags.remove(OpFlags::OVERLIMIT);
                }
                set_condition_status(net, id, 0, ConditionStatus::Active);
                if let Some(c) = net.get_mut(id) {
                    c.info.next_update_time = Time::MAX;
                }
            }
        }
    } else {
        code.absorb(update_a_core(net, id, time));
    }
    if let Some(c) = net.get_mut(id) {
        c.info.last_update_time = time;
    }
    code
}

fn trip_breaker(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    net.alert(id, Alert::BreakerTripCurrent);
    let name = net.full_name(id);
    info!(breaker = %name, time = %time, "breaker tripped");
    let code = execute_action(net, id, 0, 0, time);
    if let Some(c) = net.get_mut(id) {
        c.info.flags.insert(OpFlags::BREAKER_TRIPPED);
        c.info.next_update_time = Time::MAX;
    }
    let (mut attempts, max, last_reclose, reset, rt1, rt2) = match breaker_ref(net, id) {
        Some(b) => (
            b.reclose_attempts,
            b.max_reclose_attempts,
            b.last_reclose_time,
            b.recloser_reset_time,
            b.reclose_time1,
            b.reclose_time2,
        ),
        None => return code,
    };
    if let Some(b) = breaker_mut(net, id) {
        b.use_cti = false;
        if time > last_reclose + reset {
            b.reclose_attempts = 0;
            attempts = 0;
        }
    }
    if attempts == 0 && max > 0 {
        schedule_update(net, id, time + rt1);
    } else if attempts < max {
        schedule_update(net, id, time + rt2);
    }
    code
}

fn reset_breaker(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    if let Some(b) = breaker_mut(net, id) {
        b.reclose_attempts += 1;
        b.last_reclose_time = time;
    }
    net.alert(id, Alert::BreakerReclose);
    let name = net.full_name(id);
    info!(breaker = %name, time = %time, "breaker reclosed");
    if let Some(c) = net.get_mut(id) {
        c.info.flags.remove(OpFlags::BREAKER_TRIPPED);
        c.info.next_update_time = Time::MAX;
    }
    let mut code = execute_action(net, id, 1, 0, time);

    let (attempts, max, tap, min_clear) = match breaker_ref(net, id) {
        Some(b) => (
            b.reclose_attempts,
            b.max_reclose_attempts,
            b.recloser_tap,
            b.min_clearing_time,
        ),
        None => return code,
    };

    if check_condition(net, id, 0) {
        if attempts < max {
            if tap <= TIME_EPS {
                if min_clear.as_secs() <= TIME_EPS {
                    code.absorb(trip_breaker(net, id, time));
                } else {
                    schedule_update(net, id, time + min_clear);
                }
            } else {
                if let Some(b) = breaker_mut(net, id) {
                    b.cti = 0.0;
                    b.use_cti = true;
                }
                set_condition_status(net, id, 1, ConditionStatus::Active);
                set_condition_status(net, id, 2, ConditionStatus::Active);
                net.alert(id, Alert::JacCountChange);
            }
        } else {
            // attempt budget exhausted: stay closed, stop watching
            warn!(breaker = %name, "over limit after final reclose attempt, giving up");
            set_condition_status(net, id, 0, ConditionStatus::Disabled);
        }
    } else {
        if let Some(c) = net.get_mut(id) {
            c.info.flags.remove(OpFlags::OVERLIMIT);
        }
        set_condition_status(net, id, 0, ConditionStatus::Active);
        if let Some(b) = breaker_mut(net, id) {
            b.use_cti = false;
        }
    }
    net.alert(id, Alert::UpdateTimeChange);
    code
}

// ============================================================================
// Solver path (inverse-time accumulator state)
// ============================================================================

/// Accumulator growth rate at observed current `i`. The sign asymmetry
/// and the 1e-8 guard around the threshold are load-bearing; tests pin
/// them.
fn accumulation_rate(tap: f64, min_clear: f64, limit: f64, i: f64) -> f64 {
    if i > limit {
        1.0 / (tap / (i - limit).powf(1.5) + min_clear)
    } else {
        -1.0 / (tap / (limit - i + 1e-8).powf(1.5) + min_clear)
    }
}

fn rate_derivative(tap: f64, min_clear: f64, limit: f64, i: f64) -> f64 {
    if i > limit {
        (tap / (i - limit).powf(1.5) + min_clear).powi(-2) * (1.5 * tap / (i - limit).powf(2.5))
    } else {
        -(tap / (limit - i + 1e-8).powf(1.5) + min_clear).powi(-2)
            * (1.5 * tap / (limit - i + 1e-8).powf(2.5))
    }
}

pub fn residual(net: &Network, id: ObjectId, sd: &StateData, resid: &mut [f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let Some(b) = breaker_ref(net, id) else { return };
    if b.use_cti {
        let i = get_condition_value_state(net, id, 0, sd, mode);
        if grid_base::is_null(i) {
            return;
        }
        let rate = accumulation_rate(
            b.recloser_tap,
            b.min_clearing_time.as_secs(),
            b.limit,
            i,
        );
        resid[offset] = rate - sd.dstate_or_zero(offset);
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
    let Some(b) = breaker_ref(net, id) else { return };
    if b.use_cti {
        let i = get_condition_value_state(net, id, 0, sd, mode);
        let v_offset = b
            .bus
            .and_then(|bus| net.get(bus))
            .map(|c| c.offsets.get(mode).v_offset)
            .unwrap_or(NULL_LOCATION);
        if !grid_base::is_null(i) && v_offset != NULL_LOCATION {
            let voltage = b
                .bus
                .map(|bus| crate::bus::bus_voltage(net, bus, sd, mode))
                .unwrap_or(1.0);
            let drdi = rate_derivative(
                b.recloser_tap,
                b.min_clearing_time.as_secs(),
                b.limit,
                i,
            );
            // I = S/V, so dI/dV carries the -S/V^2 factor
            let apparent = i * voltage;
            sink.assign_checked(offset, v_offset, drdi * (-apparent / (voltage * voltage)));
        }
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
    let Some(b) = breaker_ref(net, id) else { return };
    if b.use_cti {
        let i = core::get_condition_value(net, id, 0);
        state[offset] = b.cti;
        dstate[offset] = accumulation_rate(
            b.recloser_tap,
            b.min_clearing_time.as_secs(),
            b.limit,
            i,
        );
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
    if let Some(b) = breaker_mut(net, id) {
        if b.use_cti {
            if let Some(v) = value {
                b.cti = v;
            }
        }
    }
}

// ============================================================================
// Parameter surface
// ============================================================================

pub fn field(b: &Breaker, field: &str) -> f64 {
    match field {
        "limit" => b.limit,
        "i2t" | "cti" | "trigger_proximity" => b.cti,
        "recloseattempts" => b.reclose_attempts as f64,
        "maxrecloseattempts" | "reclosers" => b.max_reclose_attempts as f64,
        "reclosetime1" => b.reclose_time1.as_secs(),
        "reclosetime2" => b.reclose_time2.as_secs(),
        "minclearingtime" => b.min_clearing_time.as_secs(),
        "reclosertap" | "tap" => b.recloser_tap,
        "terminal" => b.terminal as f64,
        _ => NULL_VAL,
    }
}

pub fn set_value(
    b: &mut Breaker,
    param: &str,
    value: f64,
    _units: Unit,
) -> Result<bool, ObjectError> {
    match param {
        "reclosetime" => {
            b.reclose_time1 = Time::seconds(value);
            b.reclose_time2 = Time::seconds(value);
        }
        "reclosetime1" => b.reclose_time1 = Time::seconds(value),
        "reclosetime2" => b.reclose_time2 = Time::seconds(value),
        "maxrecloseattempts" | "reclosers" => b.max_reclose_attempts = value as u16,
        "minclearingtime" | "cleartime" => b.min_clearing_time = Time::seconds(value),
        "limit" => b.limit = value,
        "reclosertap" | "tap" => b.recloser_tap = value,
        "terminal" => {
            if value == 1.0 || value == 2.0 {
                b.terminal = value as u8;
            } else {
                return Err(ObjectError::InvalidParameterValue(
                    param.to_string(),
                    "terminal must be 1 or 2".to_string(),
                ));
            }
        }
        "recloserresettime" | "resettime" => b.recloser_reset_time = Time::seconds(value),
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation_rate_sign_asymmetry() {
        let tap = 0.5;
        let clear = 0.1;
        let limit = 1.0;
        assert!(accumulation_rate(tap, clear, limit, 1.5) > 0.0);
        assert!(accumulation_rate(tap, clear, limit, 0.5) < 0.0);
        // just below the limit the 1e-8 guard keeps the rate finite
        let near = accumulation_rate(tap, clear, limit, limit);
        assert!(near.is_finite());
        assert!(near < 0.0);
    }

    #[test]
    fn rate_derivative_matches_slope() {
        let tap = 0.4;
        let clear = 0.05;
        let limit = 1.0;
        for i in [1.3, 0.6] {
            let h = 1e-7;
            let numeric = (accumulation_rate(tap, clear, limit, i + h)
                - accumulation_rate(tap, clear, limit, i - h))
                / (2.0 * h);
            let analytic = rate_derivative(tap, clear, limit, i);
            assert!(
                (numeric - analytic).abs() < 1e-3 * analytic.abs().max(1.0),
                "i={i}: numeric {numeric} vs analytic {analytic}"
            );
        }
    }
}
