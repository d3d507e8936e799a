//! Sensor relay.
//!
//! A sensor composes measured signals: input grabbers feed filter blocks,
//! and outputs re-expose inputs, block outputs, block derivatives, or
//! processed expressions over the sensor itself. Sensors carry no
//! triggers by default; conditions added on top of one can watch its
//! outputs like any other field.

use std::collections::HashMap;

use grid_base::{
    ChangeCode, MatrixSink, ObjectError, OpFlags, SolverMode, StateData, Time, Unit,
    NULL_LOCATION, NULL_VAL,
};
use tracing::warn;

use crate::blocks::FilterBlock;
use crate::measure::{make_grabber_set, GrabberSet};
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core::update_a_core;

/// Where one sensor output comes from.
#[derive(Debug, Clone)]
pub enum OutputDef {
    /// Pass input k through unchanged.
    Direct(usize),
    /// Filter block k's output.
    Block(usize),
    /// Time derivative of block k's output.
    BlockDeriv(usize),
    /// An expression evaluated over the sensor itself.
    Processed(GrabberSet),
}

#[derive(Debug, Clone, Default)]
pub struct Sensor {
    pub input_specs: Vec<String>,
    pub inputs: Vec<GrabberSet>,
    pub blocks: Vec<FilterBlock>,
    /// Which input drives each block; defaults to the matching index.
    pub block_inputs: Vec<Option<usize>>,
    /// Raw output specifications, resolved at initialization.
    pub output_specs: Vec<String>,
    pub outputs: Vec<OutputDef>,
    pub output_names: Vec<String>,
    pub initialized: bool,
}

impl Sensor {
    pub fn new() -> Sensor {
        Sensor::default()
    }

    pub fn remap(&mut self, mapping: &HashMap<ObjectId, ObjectId>) {
        let mut mapper = |id: ObjectId| Some(mapping.get(&id).copied().unwrap_or(id));
        for input in &mut self.inputs {
            input.retarget(&mut mapper);
        }
        for output in &mut self.outputs {
            if let OutputDef::Processed(set) = output {
                set.retarget(&mut mapper);
            }
        }
    }

    pub fn set_value(&mut self, param: &str, value: f64) -> Result<bool, ObjectError> {
        if let Some(index) = indexed(param, "process").or_else(|| indexed(param, "blockinput")) {
            let slot = index.unwrap_or(self.block_inputs.len());
            ensure_len(&mut self.block_inputs, slot + 1, None);
            self.block_inputs[slot] = Some(value as usize);
            return Ok(true);
        }
        Ok(false)
    }
}

fn sensor_ref(net: &Network, id: ObjectId) -> Option<&Sensor> {
    net.relay(id).and_then(|r| r.as_sensor())
}

fn sensor_mut(net: &mut Network, id: ObjectId) -> Option<&mut Sensor> {
    net.relay_mut(id).and_then(|r| r.as_sensor_mut())
}

fn ensure_len<T: Clone>(v: &mut Vec<T>, len: usize, fill: T) {
    if v.len() < len {
        v.resize(len, fill);
    }
}

/// Split `input3` into `Some(Some(3))`, `input` into `Some(None)`.
fn indexed(param: &str, prefix: &str) -> Option<Option<usize>> {
    let rest = param.strip_prefix(prefix)?;
    if rest.is_empty() {
        return Some(None);
    }
    rest.parse::<usize>().ok().map(Some)
}

// ============================================================================
// Configuration
// ============================================================================

/// String configuration: `input N`, `filter N`, `output N`,
/// `outputname N`. Returns true when handled.
pub fn set_string(
    net: &mut Network,
    id: ObjectId,
    param: &str,
    value: &str,
) -> Result<bool, ObjectError> {
    if sensor_ref(net, id).is_none() {
        return Ok(false);
    }
    if let Some(index) = indexed(param, "input") {
        if let Some(sensor) = sensor_mut(net, id) {
            let slot = index.unwrap_or(sensor.input_specs.len());
            ensure_len(&mut sensor.input_specs, slot + 1, String::new());
            sensor.input_specs[slot] = value.to_string();
        }
        return Ok(true);
    }
    if let Some(index) = indexed(param, "filter") {
        let block = FilterBlock::from_spec(value)?;
        if let Some(sensor) = sensor_mut(net, id) {
            let slot = index.unwrap_or(sensor.blocks.len());
            ensure_len(&mut sensor.blocks, slot + 1, FilterBlock::integral(1.0));
            sensor.blocks[slot] = block;
            ensure_len(&mut sensor.block_inputs, slot + 1, None);
        }
        return Ok(true);
    }
    if let Some(index) = indexed(param, "outputname") {
        if let Some(sensor) = sensor_mut(net, id) {
            let slot = index.unwrap_or(sensor.output_names.len());
            ensure_len(&mut sensor.output_names, slot + 1, String::new());
            sensor.output_names[slot] = value.to_string();
        }
        return Ok(true);
    }
    if let Some(index) = indexed(param, "output") {
        let (slot, initialized) = match sensor_mut(net, id) {
            Some(sensor) => {
                let slot = index.unwrap_or(sensor.output_specs.len());
                ensure_len(&mut sensor.output_specs, slot + 1, String::new());
                sensor.output_specs[slot] = value.to_string();
                (slot, sensor.initialized)
            }
            None => return Ok(false),
        };
        if initialized {
            resolve_output(net, id, slot)?;
        }
        return Ok(true);
    }
    if let Some(index) = indexed(param, "process").or_else(|| indexed(param, "blockinput")) {
        let parsed: usize = value.trim().parse().map_err(|_| {
            ObjectError::InvalidParameterValue(
                param.to_string(),
                format!("expected an input index, got '{value}'"),
            )
        })?;
        if let Some(sensor) = sensor_mut(net, id) {
            let slot = index.unwrap_or(sensor.block_inputs.len());
            ensure_len(&mut sensor.block_inputs, slot + 1, None);
            sensor.block_inputs[slot] = Some(parsed);
        }
        return Ok(true);
    }
    Ok(false)
}

/// Resolve one output spec into an `OutputDef`.
fn resolve_output(net: &mut Network, id: ObjectId, slot: usize) -> Result<(), ObjectError> {
    let spec = sensor_ref(net, id)
        .and_then(|s| s.output_specs.get(slot).cloned())
        .unwrap_or_default();
    let lowered = spec.trim().to_ascii_lowercase();
    let def = if let Some(Some(k)) = indexed(&lowered, "blockderiv") {
        OutputDef::BlockDeriv(k)
    } else if let Some(Some(k)) = indexed(&lowered, "block") {
        OutputDef::Block(k)
    } else if let Some(Some(k)) = indexed(&lowered, "input") {
        OutputDef::Direct(k)
    } else {
        // processed: an expression over the sensor itself
        let set = make_grabber_set(&spec, net, id)?;
        OutputDef::Processed(set)
    };
    if let Some(sensor) = sensor_mut(net, id) {
        ensure_len(&mut sensor.outputs, slot + 1, OutputDef::Direct(0));
        sensor.outputs[slot] = def;
    }
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

pub fn dyn_init(net: &mut Network, id: ObjectId, _time: Time) {
    let Some(sensor) = sensor_ref(net, id) else { return };
    if sensor.initialized {
        return;
    }
    let base = net
        .relay(id)
        .and_then(|r| r.core.source)
        .or_else(|| net.get(id).and_then(|c| c.info.parent))
        .unwrap_or(id);

    // bind the input grabbers
    let specs = sensor.input_specs.clone();
    let mut bound = Vec::with_capacity(specs.len());
    for spec in &specs {
        match make_grabber_set(spec, net, base) {
            Ok(set) => bound.push(set),
            Err(e) => {
                warn!(sensor = %id, input = %spec, error = %e, "unable to bind sensor input");
                bound.push(GrabberSet::new(
                    crate::measure::Grabber::constant(NULL_VAL),
                    None,
                ));
            }
        }
    }

    // default wiring: block k takes input k
    let block_count = sensor_ref(net, id).map(|s| s.blocks.len()).unwrap_or(0);
    if let Some(sensor) = sensor_mut(net, id) {
        sensor.inputs = bound;
        ensure_len(&mut sensor.block_inputs, block_count, None);
        for (k, input) in sensor.block_inputs.iter_mut().enumerate() {
            if input.is_none() {
                *input = Some(k);
            }
        }
    }

    // default outputs: every block, or every input when there are no blocks
    let needs_default = sensor_ref(net, id)
        .map(|s| s.output_specs.is_empty())
        .unwrap_or(false);
    if needs_default {
        if let Some(sensor) = sensor_mut(net, id) {
            if sensor.blocks.is_empty() {
                for k in 0..sensor.inputs.len() {
                    sensor.outputs.push(OutputDef::Direct(k));
                }
            } else {
                for k in 0..sensor.blocks.len() {
                    sensor.outputs.push(OutputDef::Block(k));
                }
            }
        }
    } else {
        let count = sensor_ref(net, id).map(|s| s.output_specs.len()).unwrap_or(0);
        for slot in 0..count {
            if let Err(e) = resolve_output(net, id, slot) {
                warn!(sensor = %id, slot, error = %e, "unable to resolve sensor output");
            }
        }
    }

    // start blocks in steady state at the current inputs
    let us = block_input_values(net, id);
    if let Some(sensor) = sensor_mut(net, id) {
        for (k, block) in sensor.blocks.iter_mut().enumerate() {
            block.init(us.get(k).copied().unwrap_or(0.0));
        }
        sensor.initialized = true;
    }
}

/// Current value of each block's input.
fn block_input_values(net: &Network, id: ObjectId) -> Vec<f64> {
    let Some(sensor) = sensor_ref(net, id) else {
        return Vec::new();
    };
    sensor
        .blocks
        .iter()
        .enumerate()
        .map(|(k, _)| {
            let input = sensor.block_inputs.get(k).copied().flatten().unwrap_or(k);
            sensor
                .inputs
                .get(input)
                .map(|g| g.grab_data(net))
                .unwrap_or(NULL_VAL)
        })
        .collect()
}

fn block_input_values_state(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    mode: SolverMode,
) -> Vec<f64> {
    let Some(sensor) = sensor_ref(net, id) else {
        return Vec::new();
    };
    sensor
        .blocks
        .iter()
        .enumerate()
        .map(|(k, _)| {
            let input = sensor.block_inputs.get(k).copied().flatten().unwrap_or(k);
            sensor
                .inputs
                .get(input)
                .map(|g| g.grab_state(net, sd, mode))
                .unwrap_or(NULL_VAL)
        })
        .collect()
}

// ============================================================================
// Sampled stepping
// ============================================================================

pub fn update_a(net: &mut Network, id: ObjectId, time: Time) -> ChangeCode {
    let continuous = net
        .get(id)
        .map(|c| c.info.flags.contains(OpFlags::CONTINUOUS))
        .unwrap_or(true);
    if !continuous {
        let due = net
            .relay(id)
            .map(|r| time >= r.core.next_sample_time)
            .unwrap_or(false);
        if due {
            let period = net
                .get(id)
                .map(|c| c.info.update_period)
                .unwrap_or(Time::MAX);
            let dt = period.as_secs();
            // observe inputs so predictors track the sampled signal
            if let Some(sensor) = sensor_ref(net, id) {
                for input in &sensor.inputs {
                    input.observe(net, time.as_secs());
                }
            }
            let us = block_input_values(net, id);
            if let Some(sensor) = sensor_mut(net, id) {
                for (k, block) in sensor.blocks.iter_mut().enumerate() {
                    block.step(dt, us.get(k).copied().unwrap_or(0.0));
                }
            }
        }
    }
    update_a_core(net, id, time)
}

// ============================================================================
// Outputs
// ============================================================================

/// Read output `index` from live members.
pub fn get_output(net: &Network, id: ObjectId, index: usize) -> f64 {
    let Some(sensor) = sensor_ref(net, id) else {
        return NULL_VAL;
    };
    match sensor.outputs.get(index) {
        Some(OutputDef::Direct(k)) => sensor
            .inputs
            .get(*k)
            .map(|g| g.grab_data(net))
            .unwrap_or(NULL_VAL),
        Some(OutputDef::Block(k)) => block_output(net, id, *k),
        Some(OutputDef::BlockDeriv(k)) => block_deriv_output(net, id, *k),
        Some(OutputDef::Processed(set)) => set.grab_data(net),
        None => NULL_VAL,
    }
}

/// Read output `index` from a state snapshot.
pub fn get_output_state(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    mode: SolverMode,
    index: usize,
) -> f64 {
    let Some(sensor) = sensor_ref(net, id) else {
        return NULL_VAL;
    };
    match sensor.outputs.get(index) {
        Some(OutputDef::Direct(k)) => sensor
            .inputs
            .get(*k)
            .map(|g| g.grab_state(net, sd, mode))
            .unwrap_or(NULL_VAL),
        Some(OutputDef::Block(k)) => block_output_state(net, id, sd, mode, *k),
        Some(OutputDef::BlockDeriv(k)) => {
            let us = block_input_values_state(net, id, sd, mode);
            let x = block_state_value(net, id, sd, mode, *k);
            sensor
                .blocks
                .get(*k)
                .map(|b| b.output_derivative(us.get(*k).copied().unwrap_or(0.0), x))
                .unwrap_or(NULL_VAL)
        }
        Some(OutputDef::Processed(set)) => set.grab_state(net, sd, mode),
        None => NULL_VAL,
    }
}

fn block_output(net: &Network, id: ObjectId, k: usize) -> f64 {
    let Some(sensor) = sensor_ref(net, id) else {
        return NULL_VAL;
    };
    let us = block_input_values(net, id);
    sensor
        .blocks
        .get(k)
        .map(|b| b.output_local(us.get(k).copied().unwrap_or(0.0)))
        .unwrap_or(NULL_VAL)
}

fn block_deriv_output(net: &Network, id: ObjectId, k: usize) -> f64 {
    let Some(sensor) = sensor_ref(net, id) else {
        return NULL_VAL;
    };
    let us = block_input_values(net, id);
    sensor
        .blocks
        .get(k)
        .map(|b| b.output_derivative(us.get(k).copied().unwrap_or(0.0), b.state()))
        .unwrap_or(NULL_VAL)
}

/// Block state from the snapshot in continuous mode, from the block
/// itself otherwise.
fn block_state_value(net: &Network, id: ObjectId, sd: &StateData, mode: SolverMode, k: usize) -> f64 {
    let Some(comp) = net.get(id) else {
        return NULL_VAL;
    };
    let continuous = comp.info.flags.contains(OpFlags::CONTINUOUS);
    let block_state = comp
        .kind
        .as_relay()
        .and_then(|r| r.as_sensor())
        .and_then(|s| s.blocks.get(k))
        .map(|b| b.state())
        .unwrap_or(NULL_VAL);
    if !continuous || sd.is_empty() {
        return block_state;
    }
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return block_state;
    }
    sd.state_or(offset + k, block_state)
}

fn block_output_state(net: &Network, id: ObjectId, sd: &StateData, mode: SolverMode, k: usize) -> f64 {
    let us = block_input_values_state(net, id, sd, mode);
    let x = block_state_value(net, id, sd, mode, k);
    sensor_ref(net, id)
        .and_then(|s| s.blocks.get(k))
        .map(|b| b.output_from(us.get(k).copied().unwrap_or(0.0), x))
        .unwrap_or(NULL_VAL)
}

// ============================================================================
// Solver path (continuous blocks)
// ============================================================================

pub fn residual(net: &Network, id: ObjectId, sd: &StateData, resid: &mut [f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let Some(sensor) = comp.kind.as_relay().and_then(|r| r.as_sensor()) else {
        return;
    };
    let us = block_input_values_state(net, id, sd, mode);
    for (k, block) in sensor.blocks.iter().enumerate() {
        let x = sd.state_or(offset + k, block.state());
        let u = us.get(k).copied().unwrap_or(0.0);
        if offset + k < resid.len() {
            resid[offset + k] = block.residual(u, x, sd.dstate_or_zero(offset + k));
        }
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
    let Some(sensor) = comp.kind.as_relay().and_then(|r| r.as_sensor()) else {
        return;
    };
    for (k, block) in sensor.blocks.iter().enumerate() {
        let row = offset + k;
        let (dr_dx, dr_du, dr_dxp) = block.jacobian_terms();
        sink.assign(row, row, dr_dx + dr_dxp * sd.cj);
        // chain rule through the input grabber's partials
        let input = sensor.block_inputs.get(k).copied().flatten().unwrap_or(k);
        if let Some(grabber) = sensor.inputs.get(input) {
            let mut partials = Vec::new();
            grabber.partials(net, mode, dr_du, &mut partials);
            for (col, value) in partials {
                sink.assign_checked(row, col, value);
            }
        }
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
    let Some(sensor) = comp.kind.as_relay().and_then(|r| r.as_sensor()) else {
        return;
    };
    let us = block_input_values(net, id);
    for (k, block) in sensor.blocks.iter().enumerate() {
        if offset + k < state.len() {
            state[offset + k] = block.state();
            dstate[offset + k] = block.state_derivative(us.get(k).copied().unwrap_or(0.0), block.state());
        }
    }
}

pub fn set_state(net: &mut Network, id: ObjectId, _time: Time, state: &[f64], mode: SolverMode) {
    let Some(comp) = net.get(id) else { return };
    let offset = comp.offsets.get(mode).diff_offset;
    if offset == NULL_LOCATION {
        return;
    }
    let count = sensor_ref(net, id).map(|s| s.blocks.len()).unwrap_or(0);
    let values: Vec<Option<f64>> = (0..count).map(|k| state.get(offset + k).copied()).collect();
    if let Some(sensor) = sensor_mut(net, id) {
        for (k, block) in sensor.blocks.iter_mut().enumerate() {
            if let Some(Some(v)) = values.get(k) {
                block.set_state(*v);
            }
        }
    }
}

// ============================================================================
// Field surface
// ============================================================================

pub fn field(net: &Network, id: ObjectId, field: &str, _units: Unit) -> f64 {
    let Some(sensor) = sensor_ref(net, id) else {
        return NULL_VAL;
    };
    if let Some(Some(k)) = indexed(field, "blockderiv") {
        return block_deriv_output(net, id, k);
    }
    if let Some(Some(k)) = indexed(field, "block") {
        return block_output(net, id, k);
    }
    if let Some(Some(k)) = indexed(field, "input") {
        return sensor
            .inputs
            .get(k)
            .map(|g| g.grab_data(net))
            .unwrap_or(NULL_VAL);
    }
    if let Some(Some(k)) = indexed(field, "output") {
        return get_output(net, id, k);
    }
    // named outputs
    if let Some(pos) = sensor.output_names.iter().position(|n| n == field) {
        return get_output(net, id, pos);
    }
    NULL_VAL
}
