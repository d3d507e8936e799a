//! Differential protection relay.
//!
//! Compares the current entering a link's two terminals; a mismatch
//! beyond the allowed differential that persists through the delay trips
//! the sink. Relative mode normalizes by the larger terminal current and
//! can gate on a minimum absolute level so light-load noise cannot trip.
//! Pointed at a bus instead, the relay watches the bus power balance.

use grid_base::{ObjectError, OpFlags, Time, NULL_VAL};
use grid_expr::Comparison;
use tracing::warn;

use crate::events::Event;
use crate::measure::{make_condition_from, RelayCondition};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::{self, set_action_trigger, set_multi_trigger};
use crate::relay::{Action, RelayKind};

#[derive(Debug, Clone)]
pub struct DifferentialRelay {
    /// Maximum allowable terminal differential (pu).
    pub max_differential: f64,
    /// Time the differential must persist before the trip.
    pub delay_time: Time,
    /// Hysteresis margin for clearing a fault.
    pub reset_margin: f64,
    /// Minimum absolute current for relative mode to arm.
    pub min_level: f64,
    /// Normalize the differential by the larger terminal current.
    pub relative: bool,
}

impl Default for DifferentialRelay {
    fn default() -> Self {
        DifferentialRelay {
            max_differential: 0.2,
            delay_time: Time::seconds(0.08),
            reset_margin: 0.01,
            min_level: 0.01,
            relative: false,
        }
    }
}

fn relay_ref(net: &Network, id: ObjectId) -> Option<&DifferentialRelay> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::Differential(d)) => Some(d),
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
    let params = match relay_ref(net, id) {
        Some(d) => d.clone(),
        None => return,
    };
    let Some(src) = source else {
        warn!(relay = %id, "differential relay has no source object");
        return;
    };
    let Some(target) = sink else { return };

    let mut min_level_gate = false;
    if net.link(src).is_some() {
        let expression = if params.relative {
            "abs(current1-current2)/max(abs(current1),abs(current2))"
        } else {
            "abs(current1-current2)"
        };
        let built = make_condition_from(
            expression,
            Comparison::Gt,
            params.max_differential,
            net,
            src,
        );
        match built {
            Ok(mut condition) => {
                condition.set_margin(params.reset_margin);
                core::add_condition(net, id, RelayCondition::Single(condition));
            }
            Err(e) => {
                warn!(relay = %id, error = %e, "unable to build differential condition");
                return;
            }
        }
        if params.relative && params.min_level > 0.0 {
            match make_condition_from(
                "max(abs(current1),abs(current2))",
                Comparison::Gt,
                params.min_level,
                net,
                src,
            ) {
                Ok(condition) => {
                    core::add_condition(net, id, RelayCondition::Single(condition));
                    min_level_gate = true;
                }
                Err(e) => warn!(relay = %id, error = %e, "unable to build level condition"),
            }
        }
    } else if net.bus(src).is_some() {
        // bus mode watches the power balance instead of terminal currents
        match make_condition_from(
            "abs(load)",
            Comparison::Le,
            params.max_differential,
            net,
            src,
        ) {
            Ok(mut condition) => {
                condition.set_margin(params.reset_margin);
                core::add_condition(net, id, RelayCondition::Single(condition));
            }
            Err(e) => {
                warn!(relay = %id, error = %e, "unable to build bus differential condition");
                return;
            }
        }
    } else {
        warn!(relay = %id, "differential relay source is neither a link nor a bus");
        return;
    }

    let trip = core::add_action(net, id, Action::Event(Event::new(target, "enabled", 0.0)));
    if min_level_gate {
        // both the differential and the level gate must hold for the delay
        set_multi_trigger(net, id, trip, &[0, 1], params.delay_time);
    } else {
        set_action_trigger(net, id, trip, 0, params.delay_time);
    }
}

pub fn field(d: &DifferentialRelay, field: &str) -> f64 {
    match field {
        "level" | "max_difference" | "maxdifference" => d.max_differential,
        "delay" => d.delay_time.as_secs(),
        "reset_margin" | "resetmargin" => d.reset_margin,
        "minlevel" => d.min_level,
        _ => NULL_VAL,
    }
}

pub fn set_value(
    d: &mut DifferentialRelay,
    param: &str,
    value: f64,
) -> Result<bool, ObjectError> {
    match param {
        "delay" => {
            if value < 0.0 {
                return Err(ObjectError::InvalidParameterValue(
                    param.to_string(),
                    "delay must be non-negative".to_string(),
                ));
            }
            d.delay_time = Time::seconds(value);
        }
        "level" | "max_difference" | "maxdifference" => d.max_differential = value,
        "reset_margin" | "resetmargin" => d.reset_margin = value,
        "minlevel" => d.min_level = value,
        _ => return Ok(false),
    }
    Ok(true)
}

pub fn set_flag(d: &mut DifferentialRelay, flag: &str, value: bool) -> Option<()> {
    match flag {
        "relative" => d.relative = value,
        "absolute" => d.relative = !value,
        _ => return None,
    }
    Some(())
}
