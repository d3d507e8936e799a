//! Solver modes.
//!
//! A solver mode identifies which equation set the caller is assembling:
//! power-flow vs. dynamic, whether differential states participate, DC-only
//! operation, and the paired-offset slot used by predictor/corrector
//! schemes. Components keep one offset-table slot per mode.

use serde::{Deserialize, Serialize};

/// Number of offset-table slots a component carries.
pub const MODE_SLOT_COUNT: usize = 5;

/// Parameterization of a state-vector layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverMode {
    /// Offset-table slot this mode's layout is stored under.
    pub slot: usize,
    /// Dynamic simulation (false = power flow).
    pub dynamic: bool,
    /// Only algebraic states participate.
    pub algebraic_only: bool,
    /// Only differential states participate.
    pub differential_only: bool,
    /// Local per-component evaluation (no global vector).
    pub local: bool,
    /// DC-only variable set.
    pub dc: bool,
    /// Paired slot for predictor/corrector schemes.
    pub pair: Option<usize>,
}

impl SolverMode {
    /// Local evaluation against a component's own members.
    pub const LOCAL: SolverMode = SolverMode {
        slot: 0,
        dynamic: false,
        algebraic_only: true,
        differential_only: false,
        local: true,
        dc: false,
        pair: None,
    };

    /// Steady-state power flow.
    pub const POWER_FLOW: SolverMode = SolverMode {
        slot: 1,
        dynamic: false,
        algebraic_only: true,
        differential_only: false,
        local: false,
        dc: false,
        pair: None,
    };

    /// Full differential-algebraic dynamic mode.
    pub const DAE: SolverMode = SolverMode {
        slot: 2,
        dynamic: true,
        algebraic_only: false,
        differential_only: false,
        local: false,
        dc: false,
        pair: None,
    };

    /// Dynamic, algebraic partition only (paired with DYN_DIFF).
    pub const DYN_ALG: SolverMode = SolverMode {
        slot: 3,
        dynamic: true,
        algebraic_only: true,
        differential_only: false,
        local: false,
        dc: false,
        pair: Some(4),
    };

    /// Dynamic, differential partition only (paired with DYN_ALG).
    pub const DYN_DIFF: SolverMode = SolverMode {
        slot: 4,
        dynamic: true,
        algebraic_only: false,
        differential_only: true,
        local: false,
        dc: false,
        pair: Some(3),
    };

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn is_power_flow(&self) -> bool {
        !self.dynamic
    }

    pub fn is_algebraic_only(&self) -> bool {
        self.algebraic_only
    }

    pub fn is_differential_only(&self) -> bool {
        self.differential_only
    }

    pub fn is_dae(&self) -> bool {
        self.dynamic && !self.algebraic_only && !self.differential_only
    }

    pub fn is_local(&self) -> bool {
        self.local
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_modes_have_distinct_slots() {
        let slots = [
            SolverMode::LOCAL.slot,
            SolverMode::POWER_FLOW.slot,
            SolverMode::DAE.slot,
            SolverMode::DYN_ALG.slot,
            SolverMode::DYN_DIFF.slot,
        ];
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                assert_ne!(a, b);
            }
            assert!(*a < MODE_SLOT_COUNT);
        }
    }

    #[test]
    fn mode_predicates() {
        assert!(SolverMode::POWER_FLOW.is_power_flow());
        assert!(SolverMode::DAE.is_dae());
        assert!(!SolverMode::DYN_ALG.is_dae());
        assert!(SolverMode::DYN_DIFF.is_differential_only());
        assert_eq!(SolverMode::DYN_ALG.pair, Some(SolverMode::DYN_DIFF.slot));
    }
}
