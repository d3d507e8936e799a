//! Bus protection relay.
//!
//! Watches a bus for undervoltage and underfrequency; either condition
//! holding past its clearing delay disables the sink object.

use grid_base::{ObjectError, OpFlags, Time, NULL_VAL};
use grid_expr::Comparison;
use tracing::warn;

use crate::events::Event;
use crate::measure::{make_condition_from, RelayCondition};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::{self, set_action_trigger};
use crate::relay::{Action, RelayKind};

#[derive(Debug, Clone)]
pub struct BusRelay {
    pub cut_out_voltage: f64,
    /// In per-unit frequency.
    pub cut_out_frequency: f64,
    pub voltage_delay: Time,
    pub frequency_delay: Time,
}

impl Default for BusRelay {
    fn default() -> Self {
        BusRelay {
            cut_out_voltage: 0.0,
            cut_out_frequency: 0.0,
            voltage_delay: Time::ZERO,
            frequency_delay: Time::ZERO,
        }
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
    let params = match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::BusRelay(b)) => b.clone(),
        _ => return,
    };
    let Some(src) = source else {
        warn!(relay = %id, "bus relay has no source bus");
        return;
    };
    let Some(target) = sink else { return };

    let trip = core::add_action(net, id, Action::Event(Event::new(target, "enabled", 0.0)));

    if params.cut_out_voltage > 0.0 {
        match make_condition_from("voltage", Comparison::Lt, params.cut_out_voltage, net, src) {
            Ok(condition) => {
                let index = core::add_condition(net, id, RelayCondition::Single(condition));
                set_action_trigger(net, id, trip, index, params.voltage_delay);
            }
            Err(e) => warn!(relay = %id, error = %e, "unable to build voltage condition"),
        }
    }
    if params.cut_out_frequency > 0.0 {
        match make_condition_from("freq", Comparison::Lt, params.cut_out_frequency, net, src) {
            Ok(condition) => {
                let index = core::add_condition(net, id, RelayCondition::Single(condition));
                set_action_trigger(net, id, trip, index, params.frequency_delay);
            }
            Err(e) => warn!(relay = %id, error = %e, "unable to build frequency condition"),
        }
    }
}

pub fn field(b: &BusRelay, field: &str) -> f64 {
    match field {
        "cutoutvoltage" | "lowv" => b.cut_out_voltage,
        "cutoutfrequency" | "lowfreq" => b.cut_out_frequency,
        "voltagedelay" => b.voltage_delay.as_secs(),
        "frequencydelay" => b.frequency_delay.as_secs(),
        _ => NULL_VAL,
    }
}

pub fn set_value(b: &mut BusRelay, param: &str, value: f64) -> Result<bool, ObjectError> {
    match param {
        "cutoutvoltage" | "lowv" => b.cut_out_voltage = value,
        "cutoutfrequency" | "lowfreq" => b.cut_out_frequency = value,
        "voltagedelay" | "delay" => b.voltage_delay = Time::seconds(value),
        "frequencydelay" => b.frequency_delay = Time::seconds(value),
        _ => return Ok(false),
    }
    Ok(true)
}
