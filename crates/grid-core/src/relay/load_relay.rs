//! Load-shedding relay.
//!
//! Watches the bus feeding a load for undervoltage and underfrequency
//! and disconnects the load after the configured delays. A cutout level
//! of two per-unit or more means "not armed": that condition starts
//! disabled, matching how shedding schemes leave one axis unused.

use grid_base::{ObjectError, OpFlags, Time, NULL_VAL};
use grid_expr::Comparison;
use tracing::warn;

use crate::events::Event;
use crate::measure::{make_condition_from, RelayCondition};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::{self, set_action_trigger, set_condition_status};
use crate::relay::{Action, ConditionStatus, RelayKind};

#[derive(Debug, Clone)]
pub struct LoadRelay {
    /// Undervoltage cutout (pu); >= 2.0 leaves the voltage axis unarmed.
    pub cutout_voltage: f64,
    /// Underfrequency cutout (pu); >= 2.0 leaves the frequency axis unarmed.
    pub cutout_frequency: f64,
    pub voltage_delay: Time,
    pub frequency_delay: Time,
    /// Reconnection hold-off once shed; kept for schemes that restore.
    pub off_time: Time,
}

impl Default for LoadRelay {
    fn default() -> Self {
        LoadRelay {
            cutout_voltage: 2.0,
            cutout_frequency: 2.0,
            voltage_delay: Time::ZERO,
            frequency_delay: Time::ZERO,
            off_time: Time::MAX,
        }
    }
}

fn relay_ref(net: &Network, id: ObjectId) -> Option<&LoadRelay> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::LoadRelay(l)) => Some(l),
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
        Some(l) => l.clone(),
        None => return,
    };
    let Some(src) = source else {
        warn!(relay = %id, "load relay has no source load");
        return;
    };
    let Some(target) = sink else { return };

    let shed = core::add_action(net, id, Action::Event(Event::new(target, "enabled", 0.0)));

    // conditions read the bus the load attaches to
    match make_condition_from("@bus:voltage", Comparison::Lt, params.cutout_voltage, net, src) {
        Ok(condition) => {
            let index = core::add_condition(net, id, RelayCondition::Single(condition));
            if params.cutout_voltage < 2.0 {
                set_action_trigger(net, id, shed, index, params.voltage_delay);
            } else {
                set_condition_status(net, id, index, ConditionStatus::Disabled);
            }
        }
        Err(e) => warn!(relay = %id, error = %e, "unable to build voltage condition"),
    }
    match make_condition_from(
        "@bus:freq",
        Comparison::Lt,
        params.cutout_frequency,
        net,
        src,
    ) {
        Ok(condition) => {
            let index = core::add_condition(net, id, RelayCondition::Single(condition));
            if params.cutout_frequency < 2.0 {
                set_action_trigger(net, id, shed, index, params.frequency_delay);
            } else {
                set_condition_status(net, id, index, ConditionStatus::Disabled);
            }
        }
        Err(e) => warn!(relay = %id, error = %e, "unable to build frequency condition"),
    }
}

pub fn field(l: &LoadRelay, field: &str) -> f64 {
    match field {
        "cutoutvoltage" | "voltagelimit" => l.cutout_voltage,
        "cutoutfrequency" | "freqlimit" => l.cutout_frequency,
        "voltagedelay" => l.voltage_delay.as_secs(),
        "frequencydelay" => l.frequency_delay.as_secs(),
        "offtime" => l.off_time.as_secs(),
        _ => NULL_VAL,
    }
}

pub fn set_value(l: &mut LoadRelay, param: &str, value: f64) -> Result<bool, ObjectError> {
    match param {
        "cutoutvoltage" | "voltagelimit" => l.cutout_voltage = value,
        "cutoutfrequency" | "freqlimit" => l.cutout_frequency = value,
        "delay" => {
            l.voltage_delay = Time::seconds(value);
            l.frequency_delay = Time::seconds(value);
        }
        "voltagedelay" => l.voltage_delay = Time::seconds(value),
        "frequencydelay" => l.frequency_delay = Time::seconds(value),
        "offtime" => l.off_time = Time::seconds(value),
        _ => return Ok(false),
    }
    Ok(true)
}
