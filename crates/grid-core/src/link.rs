//! Transmission links.
//!
//! A link connects two buses through a series impedance with a switch at
//! each terminal. Per-terminal voltages/angles and P/Q are cached against
//! the state snapshot's seq id; any mismatch forces a recompute. The
//! zero-impedance breaker variant carries no impedance at all: closing it
//! merges its buses, opening it unmerges them.

use grid_base::{Alert, SolverMode, StateData, BIG_NUM};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bus::{bus_angle, bus_voltage, merge_buses, unmerge_buses};
use crate::network::Network;
use crate::object::ObjectId;

/// Seq-id keyed cache of terminal quantities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinkCache {
    pub seq_id: u64,
    pub valid: bool,
    pub v1: f64,
    pub a1: f64,
    pub v2: f64,
    pub a2: f64,
    pub p1: f64,
    pub q1: f64,
    pub p2: f64,
    pub q2: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub bus1: Option<ObjectId>,
    pub bus2: Option<ObjectId>,
    /// Series resistance (pu).
    pub r: f64,
    /// Series reactance (pu).
    pub x: f64,
    /// Total shunt susceptance (pu), split across the terminals.
    pub b: f64,
    /// Shunt conductance (pu).
    pub g: f64,
    pub switch1_open: bool,
    pub switch2_open: bool,
    /// Zero-impedance breaker link: switch state merges/unmerges buses.
    pub is_breaker: bool,
    pub rating: f64,
    pub cache: LinkCache,
}

impl Default for Link {
    fn default() -> Self {
        Link {
            bus1: None,
            bus2: None,
            r: 0.0,
            x: 0.00000001,
            b: 0.0,
            g: 0.0,
            switch1_open: false,
            switch2_open: false,
            is_breaker: false,
            rating: BIG_NUM,
            cache: LinkCache::default(),
        }
    }
}

impl Link {
    pub fn new(r: f64, x: f64) -> Link {
        Link {
            r,
            x,
            ..Link::default()
        }
    }

    pub fn breaker() -> Link {
        Link {
            is_breaker: true,
            r: 0.0,
            x: 0.0,
            ..Link::default()
        }
    }

    /// Both switches closed and nothing disabled.
    pub fn is_connected(&self) -> bool {
        !self.switch1_open && !self.switch2_open
    }

    /// Series admittance (g, b).
    pub fn admittance(&self) -> (f64, f64) {
        let z2 = self.r * self.r + self.x * self.x;
        if z2 == 0.0 {
            return (0.0, 0.0);
        }
        (self.r / z2, -self.x / z2)
    }
}

/// P/Q and current flowing from a bus into one link terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalFlow {
    pub p: f64,
    pub q: f64,
    pub voltage: f64,
    pub real_current: f64,
    pub imag_current: f64,
}

impl TerminalFlow {
    /// Apparent current magnitude at the terminal.
    pub fn current(&self) -> f64 {
        if self.voltage <= 0.0 {
            return 0.0;
        }
        (self.p * self.p + self.q * self.q).sqrt() / self.voltage
    }
}

/// Partial derivatives of one terminal's (P, Q) with respect to the local
/// and remote bus (angle, voltage).
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPartials {
    pub dp_da_local: f64,
    pub dp_dv_local: f64,
    pub dq_da_local: f64,
    pub dq_dv_local: f64,
    pub dp_da_remote: f64,
    pub dp_dv_remote: f64,
    pub dq_da_remote: f64,
    pub dq_dv_remote: f64,
    pub remote_bus: Option<ObjectId>,
}

// ============================================================================
// Flow computation
// ============================================================================

/// Compute both terminals' flows from a state snapshot (or member values
/// when the snapshot is empty). Pure; does not touch the cache.
pub fn compute_flows(
    net: &Network,
    id: ObjectId,
    sd: &StateData,
    mode: SolverMode,
) -> Option<LinkCache> {
    let comp = net.get(id)?;
    let lnk = comp.kind.as_link()?;
    let (b1, b2) = (lnk.bus1?, lnk.bus2?);
    let v1 = bus_voltage(net, b1, sd, mode);
    let a1 = bus_angle(net, b1, sd, mode);
    let v2 = bus_voltage(net, b2, sd, mode);
    let a2 = bus_angle(net, b2, sd, mode);

    let mut cache = LinkCache {
        seq_id: sd.seq_id,
        valid: true,
        v1,
        a1,
        v2,
        a2,
        ..LinkCache::default()
    };

    if !lnk.is_connected() || lnk.is_breaker || !comp.info.is_enabled() {
        return Some(cache);
    }

    let (gs, bs) = lnk.admittance();
    let gsh = lnk.g / 2.0;
    let bsh = lnk.b / 2.0;
    let t12 = a1 - a2;
    let (sin12, cos12) = t12.sin_cos();

    cache.p1 = v1 * v1 * (gs + gsh) - v1 * v2 * (gs * cos12 + bs * sin12);
    cache.q1 = -v1 * v1 * (bs + bsh) - v1 * v2 * (gs * sin12 - bs * cos12);
    cache.p2 = v2 * v2 * (gs + gsh) - v1 * v2 * (gs * cos12 - bs * sin12);
    cache.q2 = -v2 * v2 * (bs + bsh) + v1 * v2 * (gs * sin12 + bs * cos12);
    Some(cache)
}

/// Refresh the link's cache when the seq id is stale.
pub fn update_link_cache(net: &mut Network, id: ObjectId, sd: &StateData, mode: SolverMode) {
    let stale = match net.link(id) {
        Some(l) => !l.cache.valid || l.cache.seq_id != sd.seq_id || sd.seq_id == 0,
        None => false,
    };
    if !stale {
        return;
    }
    if let Some(flows) = compute_flows(net, id, sd, mode) {
        if let Some(l) = net.link_mut(id) {
            l.cache = flows;
        }
    }
}

/// Flow from the bus identified by `bus_uid` into this link. Uses the
/// cache when it matches the snapshot's seq id.
pub fn terminal_flow(
    net: &Network,
    id: ObjectId,
    bus_uid: u64,
    sd: &StateData,
    mode: SolverMode,
) -> Option<TerminalFlow> {
    let comp = net.get(id)?;
    let lnk = comp.kind.as_link()?;
    let cache = if lnk.cache.valid && lnk.cache.seq_id == sd.seq_id && sd.seq_id != 0 {
        lnk.cache
    } else {
        compute_flows(net, id, sd, mode)?
    };

    let uid1 = lnk.bus1.and_then(|b| net.get(b)).map(|c| c.info.uid);
    let uid2 = lnk.bus2.and_then(|b| net.get(b)).map(|c| c.info.uid);
    let (p, q, v, a, remote_v, remote_a) = if uid1 == Some(bus_uid) {
        (cache.p1, cache.q1, cache.v1, cache.a1, cache.v2, cache.a2)
    } else if uid2 == Some(bus_uid) {
        (cache.p2, cache.q2, cache.v2, cache.a2, cache.v1, cache.a1)
    } else {
        return None;
    };

    // rectangular current at the terminal in the network frame
    let (gs, bs) = lnk.admittance();
    let (vr, vi) = (v * a.cos(), v * a.sin());
    let (wr, wi) = (remote_v * remote_a.cos(), remote_v * remote_a.sin());
    let (dr, di) = (vr - wr, vi - wi);
    let real_current = gs * dr - bs * di + lnk.g / 2.0 * vr - lnk.b / 2.0 * vi;
    let imag_current = gs * di + bs * dr + lnk.g / 2.0 * vi + lnk.b / 2.0 * vr;

    Some(TerminalFlow {
        p,
        q,
        voltage: v,
        real_current,
        imag_current,
    })
}

/// Partial derivatives of the terminal at `bus_uid`, addressed to that bus
/// end rather than the link's own indexing.
pub fn terminal_partials(
    net: &Network,
    id: ObjectId,
    bus_uid: u64,
    sd: &StateData,
    mode: SolverMode,
) -> Option<TerminalPartials> {
    let comp = net.get(id)?;
    let lnk = comp.kind.as_link()?;
    if !lnk.is_connected() || lnk.is_breaker || !comp.info.is_enabled() {
        return None;
    }
    let (b1, b2) = (lnk.bus1?, lnk.bus2?);
    let uid1 = net.get(b1).map(|c| c.info.uid);
    let uid2 = net.get(b2).map(|c| c.info.uid);

    let (local, remote) = if uid1 == Some(bus_uid) {
        (b1, b2)
    } else if uid2 == Some(bus_uid) {
        (b2, b1)
    } else {
        return None;
    };

    let vl = bus_voltage(net, local, sd, mode);
    let al = bus_angle(net, local, sd, mode);
    let vr = bus_voltage(net, remote, sd, mode);
    let ar = bus_angle(net, remote, sd, mode);
    let (gs, bs) = lnk.admittance();
    let gsh = lnk.g / 2.0;
    let bsh = lnk.b / 2.0;
    let t = al - ar;
    let (sin_t, cos_t) = t.sin_cos();

    Some(TerminalPartials {
        dp_da_local: vl * vr * (gs * sin_t - bs * cos_t),
        dp_dv_local: 2.0 * vl * (gs + gsh) - vr * (gs * cos_t + bs * sin_t),
        dq_da_local: -vl * vr * (gs * cos_t + bs * sin_t),
        dq_dv_local: -2.0 * vl * (bs + bsh) - vr * (gs * sin_t - bs * cos_t),
        dp_da_remote: -vl * vr * (gs * sin_t - bs * cos_t),
        dp_dv_remote: -vl * (gs * cos_t + bs * sin_t),
        dq_da_remote: vl * vr * (gs * cos_t + bs * sin_t),
        dq_dv_remote: -vl * (gs * sin_t - bs * cos_t),
        remote_bus: Some(remote),
    })
}

// ============================================================================
// Switching
// ============================================================================

/// Change one switch. Opening forces a topology alert; on a breaker link
/// the switch state drives a bus merge or unmerge.
pub fn set_switch(net: &mut Network, id: ObjectId, terminal: u8, open: bool) {
    let (was_open, is_breaker, b1, b2) = match net.link(id) {
        Some(l) => (
            if terminal == 2 {
                l.switch2_open
            } else {
                l.switch1_open
            },
            l.is_breaker,
            l.bus1,
            l.bus2,
        ),
        None => return,
    };
    if was_open == open {
        return;
    }
    if let Some(l) = net.link_mut(id) {
        if terminal == 2 {
            l.switch2_open = open;
        } else {
            l.switch1_open = open;
        }
        l.cache.valid = false;
    }

    let switch_alert = match (terminal, open) {
        (2, true) => Alert::Switch2Open,
        (2, false) => Alert::Switch2Close,
        (_, true) => Alert::Switch1Open,
        (_, false) => Alert::Switch1Close,
    };
    net.alert(id, switch_alert);
    net.alert(id, Alert::JacCountChange);

    if is_breaker {
        if let (Some(b1), Some(b2)) = (b1, b2) {
            let connected = net.link(id).map(|l| l.is_connected()).unwrap_or(false);
            if connected {
                debug!(link = %id, "breaker closed, merging buses");
                merge_buses(net, b1, b2);
            } else {
                debug!(link = %id, "breaker opened, unmerging buses");
                unmerge_buses(net, b1, b2);
            }
        }
    }
}

/// Re-evaluate breaker merge state after enable/disable changes.
pub fn check_merge(net: &mut Network, id: ObjectId) {
    let (is_breaker, connected, enabled, b1, b2) = match (net.link(id), net.get(id)) {
        (Some(l), Some(c)) => (
            l.is_breaker,
            l.is_connected(),
            c.info.is_enabled(),
            l.bus1,
            l.bus2,
        ),
        _ => return,
    };
    if !is_breaker {
        return;
    }
    if let (Some(b1), Some(b2)) = (b1, b2) {
        if connected && enabled {
            merge_buses(net, b1, b2);
        } else {
            unmerge_buses(net, b1, b2);
        }
    }
}

/// Adjust the series impedance so the measured terminal sees (P, Q).
///
/// The series line scales its impedance magnitude toward the target
/// apparent power; concrete link types with taps or phase shifters replace
/// this with their own parameter adjustment.
pub fn fix_power(
    net: &mut Network,
    id: ObjectId,
    p: f64,
    q: f64,
    measure_terminal: u8,
) -> bool {
    let sd = StateData::empty(grid_base::Time::ZERO);
    let flows = match compute_flows(net, id, &sd, SolverMode::LOCAL) {
        Some(f) => f,
        None => return false,
    };
    let (cur_p, cur_q) = if measure_terminal == 2 {
        (flows.p2, flows.q2)
    } else {
        (flows.p1, flows.q1)
    };
    let target = (p * p + q * q).sqrt();
    let current = (cur_p * cur_p + cur_q * cur_q).sqrt();
    if target <= 0.0 || current <= 0.0 {
        return false;
    }
    let scale = current / target;
    if let Some(l) = net.link_mut(id) {
        l.r *= scale;
        l.x *= scale;
        l.cache.valid = false;
        true
    } else {
        false
    }
}
