//! Solver plumbing: state layout and tree-wide dispatch.
//!
//! The parent assigns offsets depth-first when a mode's layout is loaded;
//! any topology alert unloads the layout and the next solver entry
//! re-allocates. Residual/Jacobian/root calls fan out over the subtree in
//! the same order the offsets were assigned.

use grid_base::{
    ChangeCode, MatrixSink, SolverMode, StateData, StateSizes, Time, NULL_LOCATION,
};

use crate::bus::{self, CheckLevel, ConvergeMode};
use crate::component::ComponentKind;
use crate::link;
use crate::network::Network;
use crate::object::ObjectId;
use crate::relay::core as relay_core;

impl Network {
    /// Total state size of a subtree for a mode, computed live:
    /// `local_alg + local_diff + sum(child sizes)`.
    pub fn state_size(&self, id: ObjectId, mode: SolverMode) -> usize {
        let Some(comp) = self.get(id) else { return 0 };
        let local = comp.local_state_sizes(mode);
        let mut total = local.total();
        for child in self.children(id) {
            total += self.state_size(child, mode);
        }
        total
    }

    /// Total root count of a subtree for a mode.
    pub fn root_size(&self, id: ObjectId, mode: SolverMode) -> usize {
        let Some(comp) = self.get(id) else { return 0 };
        let mut total = comp.local_state_sizes(mode).alg_roots;
        for child in self.children(id) {
            total += self.root_size(child, mode);
        }
        total
    }

    /// Lay out the global state vector for a mode, assigning absolute
    /// offsets depth-first. Returns the subtree's total sizes.
    pub fn allocate_states(&mut self, root: ObjectId, mode: SolverMode) -> StateSizes {
        let mut next_state = 0usize;
        let mut next_root = 0usize;
        let total = self.allocate_inner(root, mode, &mut next_state, &mut next_root);
        // merged slaves read through their master's locations
        self.point_slaves_at_masters(root, mode);
        total
    }

    fn allocate_inner(
        &mut self,
        id: ObjectId,
        mode: SolverMode,
        next_state: &mut usize,
        next_root: &mut usize,
    ) -> StateSizes {
        let Some(comp) = self.get(id) else {
            return StateSizes::default();
        };
        let local = comp.local_state_sizes(mode);
        let is_bus = matches!(comp.kind, ComponentKind::Bus(_));

        {
            let Some(comp) = self.get_mut(id) else {
                return StateSizes::default();
            };
            let slot = comp.offsets.get_mut(mode);
            slot.local = local;
            slot.alg_offset = if local.alg > 0 {
                *next_state
            } else {
                NULL_LOCATION
            };
        }
        if local.alg > 0 && is_bus {
            let base = *next_state;
            if let Some(comp) = self.get_mut(id) {
                let slot = comp.offsets.get_mut(mode);
                slot.v_offset = base;
                slot.a_offset = base + 1;
            }
        }
        *next_state += local.alg;
        {
            let Some(comp) = self.get_mut(id) else {
                return StateSizes::default();
            };
            let slot = comp.offsets.get_mut(mode);
            slot.diff_offset = if local.diff > 0 {
                *next_state
            } else {
                NULL_LOCATION
            };
        }
        *next_state += local.diff;
        {
            let Some(comp) = self.get_mut(id) else {
                return StateSizes::default();
            };
            let slot = comp.offsets.get_mut(mode);
            slot.root_offset = if local.alg_roots > 0 {
                *next_root
            } else {
                NULL_LOCATION
            };
        }
        *next_root += local.alg_roots;

        let mut total = local;
        for child in self.children(id) {
            let child_total = self.allocate_inner(child, mode, next_state, next_root);
            total.add(&child_total);
        }
        if let Some(comp) = self.get_mut(id) {
            let slot = comp.offsets.get_mut(mode);
            slot.total = total;
            slot.state_loaded = true;
            slot.root_loaded = true;
        }
        total
    }

    fn point_slaves_at_masters(&mut self, root: ObjectId, mode: SolverMode) {
        for id in self.subtree(root) {
            let master = self.bus(id).and_then(|b| b.master);
            if let Some(master) = master {
                let (v, a) = match self.get(master) {
                    Some(m) => {
                        let slot = m.offsets.get(mode);
                        (slot.v_offset, slot.a_offset)
                    }
                    None => (NULL_LOCATION, NULL_LOCATION),
                };
                if let Some(c) = self.get_mut(id) {
                    let slot = c.offsets.get_mut(mode);
                    slot.v_offset = v;
                    slot.a_offset = a;
                }
            }
        }
    }

    /// Every id in the subtree, depth-first, parents before children.
    pub fn subtree(&self, root: ObjectId) -> Vec<ObjectId> {
        let mut order = vec![root];
        let mut i = 0;
        while i < order.len() {
            order.extend(self.children(order[i]));
            i += 1;
        }
        order
    }

    /// Every link owned by areas in the subtree.
    pub fn subtree_links(&self, root: ObjectId) -> Vec<ObjectId> {
        self.subtree(root)
            .into_iter()
            .filter(|id| self.link(*id).is_some())
            .collect()
    }

    /// Seed the state arrays from component members.
    pub fn guess_state(
        &self,
        root: ObjectId,
        state: &mut [f64],
        dstate: &mut [f64],
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            let Some(comp) = self.get(id) else { continue };
            match &comp.kind {
                ComponentKind::Bus(b) => {
                    if b.is_slave() {
                        continue;
                    }
                    let slot = comp.offsets.get(mode);
                    if slot.v_offset != NULL_LOCATION && slot.v_offset < state.len() {
                        state[slot.v_offset] = b.voltage;
                    }
                    if slot.a_offset != NULL_LOCATION && slot.a_offset < state.len() {
                        state[slot.a_offset] = b.angle;
                    }
                }
                ComponentKind::Relay(_) => {
                    relay_core::relay_guess_state(self, id, state, dstate, mode);
                }
                _ => {}
            }
        }
    }

    /// Write solved state back into component members.
    pub fn set_state(
        &mut self,
        root: ObjectId,
        time: Time,
        state: &[f64],
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            let kind_is_bus = self.bus(id).is_some();
            if kind_is_bus {
                let (v_off, a_off) = {
                    let comp = self.get(id).unwrap();
                    let slot = comp.offsets.get(mode);
                    (slot.v_offset, slot.a_offset)
                };
                let v = state.get(v_off).copied();
                let a = state.get(a_off).copied();
                if let Some(b) = self.bus_mut(id) {
                    if let Some(v) = v {
                        b.voltage = v;
                    }
                    if let Some(a) = a {
                        b.angle = a;
                    }
                }
                if let Some(c) = self.get_mut(id) {
                    c.info.prev_time = time;
                }
            } else if self.relay(id).is_some() {
                relay_core::relay_set_state(self, id, time, state, mode);
            }
        }
    }

    /// Refresh every seq-keyed cache against a snapshot: links first, then
    /// the bus power sums that read them.
    pub fn update_caches(&mut self, root: ObjectId, sd: &StateData, mode: SolverMode) {
        for id in self.subtree_links(root) {
            link::update_link_cache(self, id, sd, mode);
        }
        let buses: Vec<ObjectId> = self
            .subtree(root)
            .into_iter()
            .filter(|id| self.bus(*id).is_some())
            .collect();
        for id in buses {
            bus::update_bus_cache(self, id, sd, mode);
        }
    }

    /// Assemble the full residual for the subtree.
    pub fn residual_tree(
        &self,
        root: ObjectId,
        sd: &StateData,
        resid: &mut [f64],
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            let Some(comp) = self.get(id) else { continue };
            match &comp.kind {
                ComponentKind::Bus(_) => bus::bus_residual(self, id, sd, resid, mode),
                ComponentKind::Relay(_) => {
                    relay_core::relay_residual(self, id, sd, resid, mode)
                }
                _ => {}
            }
        }
    }

    /// Assemble the full Jacobian for the subtree.
    pub fn jacobian_tree(
        &self,
        root: ObjectId,
        sd: &StateData,
        sink: &mut dyn MatrixSink,
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            let Some(comp) = self.get(id) else { continue };
            match &comp.kind {
                ComponentKind::Bus(_) => bus::bus_jacobian(self, id, sd, sink, mode),
                ComponentKind::Relay(_) => {
                    relay_core::relay_jacobian(self, id, sd, sink, mode)
                }
                _ => {}
            }
        }
    }

    /// Collect root residuals across the subtree.
    pub fn root_test_tree(
        &self,
        root: ObjectId,
        sd: &StateData,
        roots: &mut [f64],
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            if self.relay(id).is_some() {
                relay_core::root_test(self, id, sd, roots, mode);
            }
        }
    }

    /// Classify root residuals into crossings: an active condition fires
    /// when its residual goes negative, a resettable triggered one when it
    /// comes back positive.
    pub fn root_crossings(
        &self,
        root: ObjectId,
        roots: &[f64],
        mode: SolverMode,
    ) -> Vec<bool> {
        use crate::relay::ConditionStatus;
        let mut mask = vec![false; roots.len()];
        for id in self.subtree(root) {
            let Some(comp) = self.get(id) else { continue };
            let Some(relay) = comp.kind.as_relay() else {
                continue;
            };
            let ro = comp.offsets.get(mode).root_offset;
            if ro == NULL_LOCATION {
                continue;
            }
            let resettable = comp
                .info
                .flags
                .contains(grid_base::OpFlags::RESETTABLE);
            let mut offset = ro;
            for cond in &relay.core.conditions_with_roots {
                let status = relay
                    .core
                    .c_states
                    .get(*cond)
                    .copied()
                    .unwrap_or(ConditionStatus::Disabled);
                match status {
                    ConditionStatus::Active => {
                        if let Some(r) = roots.get(offset) {
                            mask[offset] = *r < 0.0;
                        }
                        offset += 1;
                    }
                    ConditionStatus::Triggered if resettable => {
                        if let Some(r) = roots.get(offset) {
                            mask[offset] = *r > 0.0;
                        }
                        offset += 1;
                    }
                    _ => {}
                }
            }
        }
        mask
    }

    /// Dispatch zero-crossings to the owning relays.
    pub fn root_trigger_tree(
        &mut self,
        root: ObjectId,
        time: Time,
        mask: &[bool],
        mode: SolverMode,
    ) {
        for id in self.subtree(root) {
            if self.relay(id).is_some() {
                relay_core::root_trigger(self, id, time, mask, mode);
            }
        }
    }

    /// Discrete root check across the subtree.
    pub fn root_check_tree(
        &mut self,
        root: ObjectId,
        sd: &StateData,
        mode: SolverMode,
    ) -> ChangeCode {
        let mut code = ChangeCode::NoChange;
        for id in self.subtree(root) {
            if self.relay(id).is_some() {
                code.absorb(relay_core::root_check(self, id, sd, mode));
            }
        }
        code
    }

    /// Locally converge every bus in the subtree.
    pub fn converge_tree(
        &mut self,
        root: ObjectId,
        time: Time,
        state: &mut [f64],
        dstate: &[f64],
        mode: SolverMode,
        cmode: ConvergeMode,
        tol: f64,
    ) {
        let buses: Vec<ObjectId> = self
            .subtree(root)
            .into_iter()
            .filter(|id| self.bus(*id).is_some())
            .collect();
        for id in buses {
            bus::converge(self, id, time, state, dstate, mode, cmode, tol);
        }
    }

    /// Power-flow limit adjustment across buses and opted-in relays.
    pub fn power_flow_adjust_tree(
        &mut self,
        root: ObjectId,
        ignore_bus_limits: bool,
        level: CheckLevel,
    ) -> ChangeCode {
        let mut code = ChangeCode::NoChange;
        for id in self.subtree(root) {
            if self.bus(id).is_some() {
                code.absorb(bus::power_flow_adjust(self, id, ignore_bus_limits, level));
            } else if self.relay(id).is_some() {
                let opted_in = self
                    .get(id)
                    .map(|c| {
                        c.info
                            .flags
                            .contains(grid_base::OpFlags::HAS_POWERFLOW_ADJUSTMENTS)
                    })
                    .unwrap_or(false);
                if opted_in {
                    code.absorb(relay_core::power_flow_adjust_relay(
                        self,
                        id,
                        level >= CheckLevel::FullCheck,
                    ));
                }
            }
        }
        code
    }

    /// Power-flow initialization across the subtree: aggregate loads
    /// absorb and distribute their totals before the first solve.
    pub fn pflow_init_tree(&mut self, root: ObjectId) {
        let aggregates: Vec<ObjectId> = self
            .subtree(root)
            .into_iter()
            .filter(|id| {
                self.load(*id)
                    .map(|l| l.aggregate.is_some())
                    .unwrap_or(false)
            })
            .collect();
        for id in aggregates {
            crate::load::initialize_aggregate(self, id);
        }
    }

    /// Dynamic initialization across the subtree (relay condition/action
    /// construction, block steady-state setup).
    pub fn dyn_init_tree(&mut self, root: ObjectId, time: Time) {
        for id in self.subtree(root) {
            if self.relay(id).is_some() {
                relay_core::dyn_init(self, id, time);
            } else if let Some(c) = self.get_mut(id) {
                c.info.prev_time = time;
            }
        }
    }

    /// Advance component-local time without solver involvement.
    pub fn timestep_tree(&mut self, root: ObjectId, time: Time) {
        for id in self.subtree(root) {
            if let Some(c) = self.get_mut(id) {
                c.info.prev_time = time;
            }
        }
    }

    /// Reset after a failed or completed solve: bus types fall back to
    /// their configured values and oscillation counters clear.
    pub fn reset_tree(&mut self, root: ObjectId) {
        let buses: Vec<ObjectId> = self
            .subtree(root)
            .into_iter()
            .filter(|id| self.bus(*id).is_some())
            .collect();
        for id in buses {
            bus::reset_bus(self, id);
        }
    }
}
