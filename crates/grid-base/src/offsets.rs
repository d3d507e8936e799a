//! Per-mode state sizing and offset bookkeeping.
//!
//! Each component stores, for every solver-mode slot, its local state sizes
//! and the absolute offsets its parent assigned when the global vector was
//! laid out. Offsets are only valid while the mode's layout is loaded; any
//! topology change unloads them and the next solver entry re-allocates.

use crate::solver::{SolverMode, MODE_SLOT_COUNT};
use serde::{Deserialize, Serialize};

/// Sentinel for "this variable has no location in the global vector".
pub const NULL_LOCATION: usize = usize::MAX;

/// Counts of a component's local variables for one mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSizes {
    pub alg: usize,
    pub diff: usize,
    pub alg_roots: usize,
    pub jac: usize,
}

impl StateSizes {
    pub fn total(&self) -> usize {
        self.alg + self.diff
    }

    pub fn add(&mut self, other: &StateSizes) {
        self.alg += other.alg;
        self.diff += other.diff;
        self.alg_roots += other.alg_roots;
        self.jac += other.jac;
    }
}

/// Offsets and sizes for one solver-mode slot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeOffsets {
    pub alg_offset: usize,
    pub diff_offset: usize,
    pub root_offset: usize,
    /// Fast-path voltage location (buses).
    pub v_offset: usize,
    /// Fast-path angle location (buses).
    pub a_offset: usize,
    pub local: StateSizes,
    /// Local plus all subobjects.
    pub total: StateSizes,
    pub state_loaded: bool,
    pub root_loaded: bool,
}

impl Default for ModeOffsets {
    fn default() -> Self {
        ModeOffsets {
            alg_offset: NULL_LOCATION,
            diff_offset: NULL_LOCATION,
            root_offset: NULL_LOCATION,
            v_offset: NULL_LOCATION,
            a_offset: NULL_LOCATION,
            local: StateSizes::default(),
            total: StateSizes::default(),
            state_loaded: false,
            root_loaded: false,
        }
    }
}

impl ModeOffsets {
    pub fn unload(&mut self) {
        *self = ModeOffsets {
            local: self.local,
            ..ModeOffsets::default()
        };
    }
}

/// A component's full offset table, one slot per solver mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OffsetTable {
    modes: [ModeOffsets; MODE_SLOT_COUNT],
}

impl OffsetTable {
    pub fn get(&self, mode: SolverMode) -> &ModeOffsets {
        &self.modes[mode.slot]
    }

    pub fn get_mut(&mut self, mode: SolverMode) -> &mut ModeOffsets {
        &mut self.modes[mode.slot]
    }

    /// The local slot used for component-member evaluation.
    pub fn local(&self) -> &ModeOffsets {
        &self.modes[SolverMode::LOCAL.slot]
    }

    pub fn local_mut(&mut self) -> &mut ModeOffsets {
        &mut self.modes[SolverMode::LOCAL.slot]
    }

    /// Forget every assigned offset; sizes are kept, locations dropped.
    /// Called on any topology change.
    pub fn unload(&mut self) {
        for m in &mut self.modes {
            m.unload();
        }
    }

    /// Forget root locations only (root-count changes).
    pub fn root_unload(&mut self) {
        for m in &mut self.modes {
            m.root_loaded = false;
            m.root_offset = NULL_LOCATION;
        }
    }

    pub fn is_loaded(&self, mode: SolverMode) -> bool {
        self.modes[mode.slot].state_loaded
    }

    /// Total state size (local + subobjects) for a mode.
    pub fn state_size(&self, mode: SolverMode) -> usize {
        self.modes[mode.slot].total.total()
    }

    pub fn root_size(&self, mode: SolverMode) -> usize {
        self.modes[mode.slot].total.alg_roots
    }

    /// Effective state sizes for a mode after masking by the mode's
    /// algebraic/differential participation.
    pub fn masked_sizes(local: StateSizes, mode: SolverMode) -> StateSizes {
        let mut sizes = local;
        if mode.is_algebraic_only() {
            sizes.diff = 0;
        }
        if mode.is_differential_only() {
            sizes.alg = 0;
            sizes.alg_roots = 0;
        }
        sizes
    }
}
