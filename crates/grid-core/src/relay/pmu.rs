//! Phasor measurement unit.
//!
//! A sensor specialization sampling a bus: voltage and angle pass through
//! measurement lags with their own time constants, frequency passes
//! straight through, and a washout on the frequency input supplies the
//! rate of change. Outputs are named `voltage`, `angle`, `frequency`,
//! `rocof`. Network transmission of the phasor stream is an external
//! collaborator; the transmit flag and rate are carried for it.

use grid_base::{ObjectError, OpFlags, Time};
use tracing::warn;

use crate::blocks::FilterBlock;
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::sensor::{self, Sensor};
use crate::relay::RelayKind;

#[derive(Debug, Clone)]
pub struct Pmu {
    /// Voltage measurement time constant (s).
    pub tv: f64,
    /// Angle measurement time constant (s).
    pub ttheta: f64,
    /// Sampling rate (Hz).
    pub sample_rate: f64,
    /// Phasor stream transmission rate (Hz), for the comm layer.
    pub transmission_rate: f64,
    pub transmit_active: bool,
    pub sensor: Sensor,
}

impl Default for Pmu {
    fn default() -> Self {
        Pmu {
            tv: 0.1,
            ttheta: 0.4,
            sample_rate: 720.0,
            transmission_rate: 30.0,
            transmit_active: false,
            sensor: Sensor::new(),
        }
    }
}

fn pmu_ref(net: &Network, id: ObjectId) -> Option<&Pmu> {
    match net.relay(id).map(|r| &r.kind) {
        Some(RelayKind::Pmu(p)) => Some(p),
        _ => None,
    }
}

fn pmu_mut(net: &mut Network, id: ObjectId) -> Option<&mut Pmu> {
    match net.relay_mut(id).map(|r| &mut r.kind) {
        Some(RelayKind::Pmu(p)) => Some(p),
        _ => None,
    }
}

pub fn dyn_init(net: &mut Network, id: ObjectId, time: Time) {
    let Some(pmu) = pmu_ref(net, id) else { return };
    if pmu.sensor.initialized {
        return;
    }
    let (tv, ttheta, sample_rate) = (pmu.tv, pmu.ttheta, pmu.sample_rate);
    if net.relay(id).and_then(|r| r.core.source).is_none() {
        warn!(relay = %id, "pmu has no source bus");
    }

    // the pmu samples; it never participates in root finding
    if let Some(c) = net.get_mut(id) {
        c.info.flags.remove(OpFlags::CONTINUOUS);
        if sample_rate > 0.0 {
            c.info.update_period = Time::seconds(1.0 / sample_rate);
        }
    }

    if let Some(pmu) = pmu_mut(net, id) {
        let sensor = &mut pmu.sensor;
        if sensor.input_specs.is_empty() {
            sensor.input_specs = vec![
                "voltage".to_string(),
                "angle".to_string(),
                "freq".to_string(),
            ];
        }
        if sensor.blocks.is_empty() {
            sensor.blocks = vec![
                FilterBlock::delay(tv, 1.0),
                FilterBlock::delay(ttheta, 1.0),
                FilterBlock::derivative(ttheta),
            ];
            sensor.block_inputs = vec![Some(0), Some(1), Some(2)];
        }
        if sensor.output_specs.is_empty() {
            sensor.output_specs = vec![
                "block0".to_string(),
                "block1".to_string(),
                "input2".to_string(),
                "block2".to_string(),
            ];
        }
        if sensor.output_names.is_empty() {
            sensor.output_names = vec![
                "voltage".to_string(),
                "angle".to_string(),
                "frequency".to_string(),
                "rocof".to_string(),
            ];
        }
    }

    sensor::dyn_init(net, id, time);
}

pub fn field(p: &Pmu, field: &str) -> Option<f64> {
    match field {
        "tv" | "voltagedelay" => Some(p.tv),
        "ttheta" | "tangle" | "angledelay" => Some(p.ttheta),
        "transmitrate" | "rate" => Some(p.transmission_rate),
        "samplerate" => Some(p.sample_rate),
        _ => None,
    }
}

pub fn set_value(p: &mut Pmu, param: &str, value: f64) -> Result<bool, ObjectError> {
    match param {
        "tv" | "voltagedelay" => p.tv = value,
        "ttheta" | "tangle" | "angledelay" => p.ttheta = value,
        "transmitrate" | "rate" => p.transmission_rate = value,
        "samplerate" => {
            if value <= 0.0 {
                return Err(ObjectError::InvalidParameterValue(
                    param.to_string(),
                    "sample rate must be positive".to_string(),
                ));
            }
            p.sample_rate = value;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

pub fn set_flag(p: &mut Pmu, flag: &str, value: bool) -> Option<()> {
    match flag {
        "transmit" | "transmitactive" | "transmit_active" => p.transmit_active = value,
        _ => return None,
    }
    Some(())
}
