//! AC buses.
//!
//! A bus exposes voltage and angle as outputs, enforces its bus-type
//! equations in the power-flow residual, and hosts loads and generators.
//! Electrically tied buses are merged under a master that owns the shared
//! voltage/angle locations.

use grid_base::{
    Alert, ChangeCode, MatrixSink, OpFlags, SolverMode, StateData, Time, BIG_NUM, NULL_LOCATION,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::link;
use crate::network::Network;
use crate::object::ObjectId;

/// Power-flow bus classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusType {
    #[default]
    Pq,
    Pv,
    Slk,
    Afix,
}

/// Dynamic-mode bus classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynBusType {
    #[default]
    Normal,
    FixAngle,
    FixVoltage,
    DynSlk,
}

/// Cached power sums at a bus, keyed by the state snapshot that produced
/// them.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PowerSums {
    pub load_p: f64,
    pub load_q: f64,
    pub gen_p: f64,
    pub gen_q: f64,
    pub link_p: f64,
    pub link_q: f64,
    pub seq_id: u64,
}

impl PowerSums {
    /// Net real-power injection; zero at solution.
    pub fn sum_p(&self) -> f64 {
        self.gen_p - self.load_p - self.link_p
    }

    pub fn sum_q(&self) -> f64 {
        self.gen_q - self.load_q - self.link_q
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    pub voltage: f64,
    pub angle: f64,
    pub freq: f64,
    pub bus_type: BusType,
    pub prev_type: BusType,
    pub dyn_type: DynBusType,
    pub prev_dyn_type: DynBusType,
    pub v_target: f64,
    pub a_target: f64,
    pub q_max: f64,
    pub q_min: f64,
    pub p_max: f64,
    pub p_min: f64,
    pub v_max: f64,
    pub v_min: f64,
    /// Base voltage in kV for unit conversions at this bus.
    pub base_voltage: f64,
    /// Bound on PQ<->PV flip-flopping during power-flow adjustment.
    pub osc_count: u32,
    pub low_v_time: Time,
    /// Threshold for the very-low-voltage alert.
    pub low_voltage_limit: f64,
    pub sums: PowerSums,
    pub loads: Vec<ObjectId>,
    pub generators: Vec<ObjectId>,
    /// Attached links; held weakly, owned by the containing area.
    pub links: Vec<ObjectId>,
    /// Set when this bus is a merge slave.
    pub master: Option<ObjectId>,
    pub slaves: Vec<ObjectId>,
    /// Infinite bus: fixed voltage and angle, no equations.
    pub infinite: bool,
}

impl Default for Bus {
    fn default() -> Self {
        Bus {
            voltage: 1.0,
            angle: 0.0,
            freq: 1.0,
            bus_type: BusType::Pq,
            prev_type: BusType::Pq,
            dyn_type: DynBusType::Normal,
            prev_dyn_type: DynBusType::Normal,
            v_target: 1.0,
            a_target: 0.0,
            q_max: BIG_NUM,
            q_min: -BIG_NUM,
            p_max: BIG_NUM,
            p_min: -BIG_NUM,
            v_max: 1.25,
            v_min: 0.0,
            base_voltage: 120.0,
            osc_count: 0,
            low_v_time: Time::NEG,
            low_voltage_limit: 0.05,
            sums: PowerSums::default(),
            loads: Vec::new(),
            generators: Vec::new(),
            links: Vec::new(),
            master: None,
            slaves: Vec::new(),
            infinite: false,
        }
    }
}

impl Bus {
    pub fn new() -> Bus {
        Bus::default()
    }

    pub fn infinite() -> Bus {
        Bus {
            infinite: true,
            bus_type: BusType::Slk,
            prev_type: BusType::Slk,
            ..Bus::default()
        }
    }

    pub fn set_voltage_angle(&mut self, voltage: f64, angle: f64) {
        self.voltage = voltage;
        self.angle = angle;
    }

    pub fn is_slave(&self) -> bool {
        self.master.is_some()
    }

    /// Which equations this bus contributes: both P and Q, P only (PV),
    /// Q only (afix), or neither (SLK / infinite).
    pub fn equation_mode(&self) -> (bool, bool) {
        if self.infinite {
            return (false, false);
        }
        match self.bus_type {
            BusType::Pq => (true, true),
            BusType::Pv => (true, false),
            BusType::Afix => (false, true),
            BusType::Slk => (false, false),
        }
    }
}

// ============================================================================
// State access
// ============================================================================

/// Read a bus voltage from a snapshot, falling back to the member value.
/// Slave buses read through their master's location.
pub fn bus_voltage(net: &Network, id: ObjectId, sd: &StateData, mode: SolverMode) -> f64 {
    let Some(comp) = net.get(id) else {
        return 0.0;
    };
    let Some(bus) = comp.kind.as_bus() else {
        return 0.0;
    };
    if let Some(master) = bus.master {
        return bus_voltage(net, master, sd, mode);
    }
    if sd.is_empty() || mode.is_local() {
        return bus.voltage;
    }
    let off = comp.offsets.get(mode).v_offset;
    if off == NULL_LOCATION {
        bus.voltage
    } else {
        sd.state_or(off, bus.voltage)
    }
}

/// Read a bus angle from a snapshot, falling back to the member value.
pub fn bus_angle(net: &Network, id: ObjectId, sd: &StateData, mode: SolverMode) -> f64 {
    let Some(comp) = net.get(id) else {
        return 0.0;
    };
    let Some(bus) = comp.kind.as_bus() else {
        return 0.0;
    };
    if let Some(master) = bus.master {
        return bus_angle(net, master, sd, mode);
    }
    if sd.is_empty() || mode.is_local() {
        return bus.angle;
    }
    let off = comp.offsets.get(mode).a_offset;
    if off == NULL_LOCATION {
        bus.angle
    } else {
        sd.state_or(off, bus.angle)
    }
}

// ============================================================================
// Local cache
// ============================================================================

/// Recompute the bus power sums from attached loads, generators, and link
/// caches. A cache whose seq id matches the snapshot is left alone.
pub fn update_bus_cache(net: &mut Network, id: ObjectId, sd: &StateData, mode: SolverMode) {
    let Some(bus) = net.bus(id) else { return };
    if !sd.is_empty() && bus.sums.seq_id == sd.seq_id && sd.seq_id != 0 {
        return;
    }
    let sums = bus_sums_snapshot(net, id, sd, mode);
    let voltage = bus_voltage(net, id, sd, mode);
    if let Some(bus) = net.bus_mut(id) {
        bus.sums = sums;
    }
    low_voltage_check(net, id, voltage, sd.time);
}

/// Raise the very-low-voltage alert once per excursion, recording when
/// the voltage first sagged.
fn low_voltage_check(net: &mut Network, id: ObjectId, voltage: f64, time: Time) {
    let (check, already, limit, enabled) = match net.get(id) {
        Some(c) => match c.kind.as_bus() {
            Some(b) => (
                c.info.flags.contains(OpFlags::LOW_VOLTAGE_CHECK),
                c.info.flags.contains(OpFlags::PREV_LOW_VOLTAGE_ALERT),
                b.low_voltage_limit,
                c.info.is_enabled() && !c.info.is_disconnected(),
            ),
            None => return,
        },
        None => return,
    };
    if !check || !enabled {
        return;
    }
    if voltage < limit {
        if !already {
            if let Some(c) = net.get_mut(id) {
                c.info.flags.insert(OpFlags::PREV_LOW_VOLTAGE_ALERT);
            }
            if let Some(b) = net.bus_mut(id) {
                b.low_v_time = time;
            }
            net.alert(id, Alert::VeryLowVoltage);
        }
    } else if already {
        if let Some(c) = net.get_mut(id) {
            c.info.flags.remove(OpFlags::PREV_LOW_VOLTAGE_ALERT);
        }
    }
}

// ============================================================================
// Residual and Jacobian
// ============================================================================

/// Write this bus's residual entries for the given mode.
pub fn bus_residual(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    resid: &mut [f64],
    mode: SolverMode,
) {
    let Some(comp) = net.get(id) else { return };
    let Some(bus) = comp.kind.as_bus() else {
        return;
    };
    if bus.is_slave() || bus.infinite {
        return;
    }
    let off = comp.offsets.get(mode);
    let (v_off, a_off) = (off.v_offset, off.a_offset);
    if v_off == NULL_LOCATION || a_off == NULL_LOCATION {
        return;
    }
    let v = bus_voltage(net, id, sd, mode);
    let a = bus_angle(net, id, sd, mode);

    if comp.info.is_disconnected() {
        resid[v_off] = v;
        resid[a_off] = a;
        return;
    }

    let sums = bus_sums_snapshot(net, id, sd, mode);
    let (p_eq, q_eq) = bus.equation_mode();
    resid[a_off] = if p_eq { sums.sum_p() } else { a - bus.a_target };
    resid[v_off] = if q_eq { sums.sum_q() } else { v - bus.v_target };
}

/// Power sums for one bus; trusts the cache when its seq id
/// matches the snapshot, otherwise recomputes without touching the cache.
pub fn bus_sums_snapshot(net: &Network, id: ObjectId, sd: &StateData, mode: SolverMode) -> PowerSums {
    let Some(bus) = net.bus(id) else {
        return PowerSums::default();
    };
    if !sd.is_empty() && bus.sums.seq_id == sd.seq_id && sd.seq_id != 0 {
        return bus.sums;
    }
    let voltage = bus_voltage(net, id, sd, mode);
    let mut sums = PowerSums {
        seq_id: sd.seq_id,
        ..PowerSums::default()
    };
    let mut members = vec![id];
    members.extend(bus.slaves.iter().copied());
    for bid in members {
        let Some(b) = net.bus(bid) else { continue };
        let bus_uid = net.get(bid).map(|c| c.info.uid).unwrap_or(0);
        for lid in &b.loads {
            if let Some((p, q)) = crate::load::load_power(net, *lid, voltage) {
                sums.load_p += p;
                sums.load_q += q;
            }
        }
        for gid in &b.generators {
            if let Some((p, q)) = crate::generator::generator_power(net, *gid) {
                sums.gen_p += p;
                sums.gen_q += q;
            }
        }
        for lid in &b.links {
            if let Some(flow) = link::terminal_flow(net, *lid, bus_uid, sd, mode) {
                sums.link_p += flow.p;
                sums.link_q += flow.q;
            }
        }
    }
    sums
}

/// Write the bus's Jacobian entries: the four partials of its two
/// equations with respect to its own (angle, voltage), plus cross terms
/// toward every connected remote bus.
pub fn bus_jacobian(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    sink: &mut dyn MatrixSink,
    mode: SolverMode,
) {
    let Some(comp) = net.get(id) else { return };
    let Some(bus) = comp.kind.as_bus() else {
        return;
    };
    if bus.is_slave() || bus.infinite {
        return;
    }
    let off = comp.offsets.get(mode);
    let (v_off, a_off) = (off.v_offset, off.a_offset);
    if v_off == NULL_LOCATION || a_off == NULL_LOCATION {
        return;
    }

    if comp.info.is_disconnected() {
        sink.assign(v_off, v_off, 1.0);
        sink.assign(a_off, a_off, 1.0);
        return;
    }

    let (p_eq, q_eq) = bus.equation_mode();
    let voltage = bus_voltage(net, id, sd, mode);

    if !p_eq {
        sink.assign(a_off, a_off, 1.0);
    }
    if !q_eq {
        sink.assign(v_off, v_off, 1.0);
    }

    let mut members = vec![id];
    members.extend(bus.slaves.iter().copied());
    for bid in members {
        let Some(b) = net.bus(bid) else { continue };
        let bus_uid = net.get(bid).map(|c| c.info.uid).unwrap_or(0);

        // loads contribute dP/dV and dQ/dV through the translation layer
        if q_eq || p_eq {
            for lid in &b.loads {
                if let Some((dp_dv, dq_dv)) = crate::load::load_partials(net, *lid, voltage) {
                    if p_eq {
                        sink.assign(a_off, v_off, -dp_dv);
                    }
                    if q_eq {
                        sink.assign(v_off, v_off, -dq_dv);
                    }
                }
            }
        }

        for lid in &b.links {
            let Some(partials) = link::terminal_partials(net, *lid, bus_uid, sd, mode) else {
                continue;
            };
            // local terms
            if p_eq {
                sink.assign(a_off, a_off, -partials.dp_da_local);
                sink.assign(a_off, v_off, -partials.dp_dv_local);
            }
            if q_eq {
                sink.assign(v_off, a_off, -partials.dq_da_local);
                sink.assign(v_off, v_off, -partials.dq_dv_local);
            }
            // remote terms, addressed to the other end's locations
            if let Some(remote) = partials.remote_bus {
                let Some(rcomp) = net.get(remote) else {
                    continue;
                };
                let r_off = rcomp.offsets.get(mode);
                if p_eq {
                    sink.assign_checked(a_off, r_off.a_offset, -partials.dp_da_remote);
                    sink.assign_checked(a_off, r_off.v_offset, -partials.dp_dv_remote);
                }
                if q_eq {
                    sink.assign_checked(v_off, r_off.a_offset, -partials.dq_da_remote);
                    sink.assign_checked(v_off, r_off.v_offset, -partials.dq_dv_remote);
                }
            }
        }
    }
}

// ============================================================================
// Local convergence
// ============================================================================

/// How aggressively `converge` iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergeMode {
    SingleIteration,
    LocalIteration,
    StrongIteration,
    VoltageOnly,
    ForceVoltageOnly,
    HighErrorOnly,
}

const MAX_ANGLE_STEP: f64 = std::f64::consts::PI / 8.0;
const MAX_VOLTAGE_RISE: f64 = 0.2;

/// Local Newton-like correction of this bus's (V, angle) against its own
/// power balance. Writes corrected values directly into `state`.
pub fn converge(
    net: &mut Network,
    id: ObjectId,
    time: Time,
    state: &mut [f64],
    dstate_dt: &[f64],
    mode: SolverMode,
    cmode: ConvergeMode,
    tol: f64,
) {
    let (v_off, a_off, enabled, disconnected, slave, v_target, p_eq, q_eq) = {
        let Some(comp) = net.get(id) else { return };
        let Some(bus) = comp.kind.as_bus() else {
            return;
        };
        let (p_eq, q_eq) = bus.equation_mode();
        let off = comp.offsets.get(mode);
        (
            off.v_offset,
            off.a_offset,
            comp.info.is_enabled(),
            comp.info.is_disconnected(),
            bus.is_slave(),
            bus.v_target,
            p_eq,
            q_eq,
        )
    };
    if !enabled || disconnected || slave || mode.is_differential_only() {
        return;
    }
    // fixed-voltage/fixed-angle buses have nothing to converge locally
    if !p_eq && !q_eq {
        return;
    }
    if v_off == NULL_LOCATION || a_off == NULL_LOCATION {
        return;
    }

    let mut cmode = cmode;
    let low_v_limit = 0.02 * v_target;
    if state[v_off] < 1e-6 {
        warn!(bus = %id, "voltage collapsed below 1 micro-pu, disconnecting");
        disconnect_bus(net, id);
        return;
    }
    if state[v_off] < low_v_limit && cmode != ConvergeMode::ForceVoltageOnly {
        cmode = ConvergeMode::VoltageOnly;
    }

    let mut iteration = 0usize;
    loop {
        iteration += 1;
        let sd = StateData::new(time, state, dstate_dt, 0);
        let sums = bus_sums_snapshot(net, id, &sd, mode);
        let dp = sums.sum_p();
        let dq = sums.sum_q();
        let err = dp.abs() + dq.abs();
        if err <= tol {
            break;
        }
        if cmode == ConvergeMode::HighErrorOnly && err < 0.5 {
            break;
        }

        let v1 = state[v_off];
        let a1 = state[a_off];

        // assemble the local 2x2; the residual convention negates the
        // flow partials, so the Newton step solves J * [da, dv] = [dp, dq]
        let (dpda, dpdv, dqda, dqdv) = local_derivatives(net, id, &sd, mode, v1);

        let voltage_only =
            matches!(cmode, ConvergeMode::VoltageOnly | ConvergeMode::ForceVoltageOnly);
        let (mut dv, mut da) = if voltage_only || !p_eq {
            // angle pinned (afix) or voltage-only fallback: 1-D on Q
            if dqdv.abs() < 1e-12 {
                break;
            }
            (-dq / dqdv, 0.0)
        } else if !q_eq {
            // PV bus: voltage pinned, 1-D on P over the angle
            if dpda.abs() < 1e-12 {
                break;
            }
            (0.0, -dp / dpda)
        } else {
            let det = dpda * dqdv - dpdv * dqda;
            if det.abs() < 1e-12 {
                if dqdv.abs() < 1e-12 {
                    break;
                }
                (-dq / dqdv, 0.0)
            } else {
                let da = (-dp * dqdv + dq * dpdv) / det;
                let dv = (-dq * dpda + dp * dqda) / det;
                (dv, da)
            }
        };

        // clamp the step: voltage moves at most 75% down, 0.2 pu up
        if -dv > 0.75 * v1 {
            dv = -0.75 * v1;
        }
        if dv > MAX_VOLTAGE_RISE {
            dv = MAX_VOLTAGE_RISE;
        }
        da = da.clamp(-MAX_ANGLE_STEP, MAX_ANGLE_STEP);

        state[v_off] = v1 + dv;
        state[a_off] = a1 + da;

        if state[v_off] < 1e-6 {
            warn!(bus = %id, "voltage collapsed during convergence, disconnecting");
            disconnect_bus(net, id);
            return;
        }

        let stalled = dv.abs() < 1e-9 && da.abs() < 1e-9;
        let single = matches!(cmode, ConvergeMode::SingleIteration);
        if stalled || single || iteration >= 10 {
            break;
        }
    }
}

/// The four local partial derivatives of (P, Q) with respect to
/// (angle, voltage) at this bus.
fn local_derivatives(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    mode: SolverMode,
    voltage: f64,
) -> (f64, f64, f64, f64) {
    let Some(bus) = net.bus(id) else {
        return (0.0, 0.0, 0.0, 0.0);
    };
    let mut dpda = 0.0;
    let mut dpdv = 0.0;
    let mut dqda = 0.0;
    let mut dqdv = 0.0;
    let mut members = vec![id];
    members.extend(bus.slaves.iter().copied());
    for bid in members {
        let Some(b) = net.bus(bid) else { continue };
        let bus_uid = net.get(bid).map(|c| c.info.uid).unwrap_or(0);
        for lid in &b.links {
            if let Some(p) = link::terminal_partials(net, *lid, bus_uid, sd, mode) {
                dpda -= p.dp_da_local;
                dpdv -= p.dp_dv_local;
                dqda -= p.dq_da_local;
                dqdv -= p.dq_dv_local;
            }
        }
        for lid in &b.loads {
            if let Some((dp_dv, dq_dv)) = crate::load::load_partials(net, *lid, voltage) {
                dpdv -= dp_dv;
                dqdv -= dq_dv;
            }
        }
    }
    (dpda, dpdv, dqda, dqdv)
}

/// Disconnect a bus: it stops contributing equations beyond pinning its
/// own state to zero.
pub fn disconnect_bus(net: &mut Network, id: ObjectId) {
    let Some(comp) = net.get_mut(id) else { return };
    if comp.info.flags.contains(OpFlags::DISCONNECTED) {
        return;
    }
    comp.info.flags.insert(OpFlags::DISCONNECTED);
    if let Some(bus) = comp.kind.as_bus_mut() {
        bus.voltage = 0.0;
    }
    net.alert(id, Alert::JacCountChange);
}

// ============================================================================
// Power-flow adjustment
// ============================================================================

/// Depth of limit checking requested by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
    ReversableOnly,
    FullCheck,
    LowVoltageCheck,
}

/// Enforce generator Q (and P) limits by switching the bus type, bounded
/// by the oscillation counter. Returns the worst change produced.
pub fn power_flow_adjust(
    net: &mut Network,
    id: ObjectId,
    ignore_bus_limits: bool,
    level: CheckLevel,
) -> ChangeCode {
    let mut out = ChangeCode::NoChange;

    if level == CheckLevel::LowVoltageCheck {
        let Some(comp) = net.get(id) else { return out };
        let Some(bus) = comp.kind.as_bus() else {
            return out;
        };
        if comp.info.is_disconnected() || !comp.info.is_enabled() {
            return out;
        }
        let prev_alert = comp.info.flags.contains(OpFlags::PREV_LOW_VOLTAGE_ALERT);
        if bus.voltage < 1e-8 || prev_alert {
            disconnect_bus(net, id);
            if let Some(c) = net.get_mut(id) {
                c.info.flags.remove(OpFlags::PREV_LOW_VOLTAGE_ALERT);
            }
            out = ChangeCode::JacobianChange;
        }
        return out;
    }

    if ignore_bus_limits {
        return out;
    }

    // refresh the generation totals before checking limits
    let sd = StateData::empty(Time::ZERO);
    update_bus_cache(net, id, &sd, SolverMode::LOCAL);

    let Some(bus) = net.bus(id) else { return out };
    let (bus_type, prev_type, voltage, v_target) =
        (bus.bus_type, bus.prev_type, bus.voltage, bus.v_target);
    let (q_min, q_max, p_min, p_max, osc_count) =
        (bus.q_min, bus.q_max, bus.p_min, bus.p_max, bus.osc_count);
    let gen_q = bus.sums.gen_q;
    let gen_p = bus.sums.gen_p;

    let mut new_type = bus_type;
    let mut clamp_q: Option<f64> = None;
    let mut clamp_p: Option<f64> = None;
    let mut set_voltage: Option<f64> = None;
    let mut bump_osc = false;
    let mut slack_change = false;

    match bus_type {
        BusType::Slk => {
            if gen_q < q_min {
                clamp_q = Some(q_min);
                new_type = BusType::Afix;
            } else if gen_q > q_max {
                clamp_q = Some(q_max);
                new_type = BusType::Afix;
            }
        }
        BusType::Pv => {
            if gen_q < q_min {
                clamp_q = Some(q_min);
                new_type = BusType::Pq;
            } else if gen_q > q_max {
                clamp_q = Some(q_max);
                new_type = BusType::Pq;
            }
        }
        BusType::Pq => {
            // reverse transition back toward the regulating type, bounded
            // by the oscillation counter
            if matches!(prev_type, BusType::Pv | BusType::Slk) && osc_count < 5 {
                let at_min = (gen_q - q_min).abs() < 1e-5;
                let drifted = if at_min {
                    voltage < v_target
                } else {
                    voltage > v_target
                };
                if drifted {
                    set_voltage = Some(v_target);
                    new_type = prev_type;
                    bump_osc = true;
                    debug!(bus = %id, "restoring regulating bus type after voltage drift");
                }
            }
        }
        BusType::Afix => {
            if prev_type == BusType::Slk && osc_count < 5 {
                let at_min = (gen_q - q_min).abs() < 1e-5;
                let drifted = if at_min {
                    voltage < v_target
                } else {
                    voltage > v_target
                };
                if drifted {
                    set_voltage = Some(v_target);
                    new_type = BusType::Slk;
                    bump_osc = true;
                }
            }
            if gen_p < p_min {
                clamp_p = Some(p_min);
                new_type = BusType::Pq;
                slack_change = prev_type == BusType::Slk;
            } else if gen_p > p_max {
                clamp_p = Some(p_max);
                new_type = BusType::Pq;
                slack_change = prev_type == BusType::Slk;
            }
        }
    }

    if new_type != bus_type || clamp_q.is_some() || clamp_p.is_some() {
        if let Some(b) = net.bus_mut(id) {
            if let Some(q) = clamp_q {
                b.sums.gen_q = q;
            }
            if let Some(p) = clamp_p {
                b.sums.gen_p = p;
            }
            if let Some(v) = set_voltage {
                b.voltage = v;
            }
            if bump_osc {
                b.osc_count += 1;
            }
            if new_type != bus_type {
                b.prev_type = bus_type;
                b.bus_type = new_type;
            }
        }
        // clamped generators get told which bound they sit at
        if let Some(q) = clamp_q {
            distribute_q_limit(net, id, q);
        }
        if new_type != bus_type {
            net.alert(id, Alert::JacCountChange);
            if slack_change {
                net.alert(id, Alert::SlackBusChange);
            }
            out = ChangeCode::JacobianChange;
        }
    }

    out
}

/// Tell regulating generators at this bus that their Q hit a bound.
fn distribute_q_limit(net: &mut Network, id: ObjectId, q_total: f64) {
    let gens: Vec<ObjectId> = match net.bus(id) {
        Some(b) => b.generators.clone(),
        None => return,
    };
    if gens.is_empty() {
        return;
    }
    let share = q_total / gens.len() as f64;
    for gid in gens {
        if let Some(g) = net.generator_mut(gid) {
            g.qset = share;
        }
    }
}

/// Reset a bus after a failed or completed solve.
pub fn reset_bus(net: &mut Network, id: ObjectId) {
    let mut alert = false;
    if let Some(bus) = net.bus_mut(id) {
        bus.osc_count = 0;
        if bus.prev_type != bus.bus_type {
            bus.bus_type = bus.prev_type;
            alert = true;
        }
    }
    if alert {
        net.alert(id, Alert::JacCountChange);
    }
}

// ============================================================================
// Bus merging
// ============================================================================

/// Electrically tie two buses so they share voltage/angle locations. The
/// bus with the lower unique id becomes the master; merges forward through
/// existing masters and promote existing slaves transitively.
pub fn merge_buses(net: &mut Network, a: ObjectId, b: ObjectId) {
    let (Some(ca), Some(cb)) = (net.get(a), net.get(b)) else {
        return;
    };
    if ca.kind.as_bus().is_none() || cb.kind.as_bus().is_none() {
        return;
    }
    let (uid_a, uid_b) = (ca.info.uid, cb.info.uid);
    if uid_a == uid_b {
        return;
    }
    let a_master = net.bus(a).and_then(|x| x.master);
    let b_master = net.bus(b).and_then(|x| x.master);

    if uid_a < uid_b {
        if let Some(master) = a_master {
            // already a slave, forward the merge to the master
            merge_buses(net, master, b);
        } else if let Some(b_m) = b_master {
            if b_m != a {
                merge_buses(net, a, b_m);
            }
        } else {
            // a becomes the master of b and inherits b's slaves
            let promoted: Vec<ObjectId> = net
                .bus(b)
                .map(|x| x.slaves.clone())
                .unwrap_or_default();
            if let Some(bus_b) = net.bus_mut(b) {
                bus_b.master = Some(a);
                bus_b.slaves.clear();
            }
            if let Some(bus_a) = net.bus_mut(a) {
                bus_a.slaves.push(b);
                bus_a.slaves.extend(promoted.iter().copied());
            }
            for sid in promoted {
                if let Some(s) = net.bus_mut(sid) {
                    s.master = Some(a);
                }
            }
            if let Some(c) = net.get_mut(b) {
                c.info.flags.insert(OpFlags::SLAVE_BUS);
            }
            net.alert(b, Alert::JacCountChange);
        }
    } else {
        // flip so the lower-id bus ends up the master
        merge_buses(net, b, a);
    }
}

/// Undo a merge between two buses. Unmerging a master from any one of its
/// slaves releases all of them, mirroring how the merge promoted them.
pub fn unmerge_buses(net: &mut Network, a: ObjectId, b: ObjectId) {
    let a_master = net.bus(a).and_then(|x| x.master);
    let b_master = net.bus(b).and_then(|x| x.master);

    match (a_master, b_master) {
        (Some(ma), Some(mb)) => {
            if ma == mb {
                unmerge_buses(net, ma, b);
            }
        }
        (Some(ma), None) => {
            if ma == b {
                unmerge_buses(net, b, a);
            }
        }
        (None, Some(mb)) => {
            if mb != a {
                return;
            }
            // a is the master; release every slave
            let slaves: Vec<ObjectId> = net
                .bus(a)
                .map(|x| x.slaves.clone())
                .unwrap_or_default();
            for sid in &slaves {
                if let Some(s) = net.bus_mut(*sid) {
                    s.master = None;
                }
                if let Some(c) = net.get_mut(*sid) {
                    c.info.flags.remove(OpFlags::SLAVE_BUS);
                }
            }
            if let Some(bus_a) = net.bus_mut(a) {
                bus_a.slaves.clear();
            }
            for sid in slaves {
                net.alert(sid, Alert::JacCountChange);
            }
        }
        (None, None) => {}
    }
}
