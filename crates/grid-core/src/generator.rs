//! Generators.
//!
//! Generators are algebraic injections at this level: real/reactive
//! setpoints plus the Q limits the bus consults during power-flow
//! adjustment. Machine internals (exciters, governors) live behind the
//! same interface in concrete models and are out of scope here.

use grid_base::BIG_NUM;
use serde::{Deserialize, Serialize};

use crate::network::Network;
use crate::object::ObjectId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    /// Real-power setpoint (pu).
    pub pset: f64,
    /// Reactive-power setpoint (pu); adjusted by the bus when regulating.
    pub qset: f64,
    pub q_max: f64,
    pub q_min: f64,
    pub p_max: f64,
    pub p_min: f64,
    /// Participates in bus voltage regulation.
    pub regulating: bool,
    pub v_target: f64,
}

impl Default for Generator {
    fn default() -> Self {
        Generator {
            pset: 0.0,
            qset: 0.0,
            q_max: BIG_NUM,
            q_min: -BIG_NUM,
            p_max: BIG_NUM,
            p_min: -BIG_NUM,
            regulating: false,
            v_target: 1.0,
        }
    }
}

impl Generator {
    pub fn with_setpoint(p: f64, q: f64) -> Generator {
        Generator {
            pset: p,
            qset: q,
            ..Generator::default()
        }
    }
}

/// Injected power of a generator component, honoring enable state.
pub fn generator_power(net: &Network, id: ObjectId) -> Option<(f64, f64)> {
    let comp = net.get(id)?;
    if !comp.info.is_enabled() || comp.info.is_disconnected() {
        return Some((0.0, 0.0));
    }
    let gen = comp.kind.as_generator()?;
    Some((gen.pset, gen.qset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let g = Generator::default();
        assert!(g.q_max > 1e40);
        assert!(g.q_min < -1e40);
        assert!(!g.regulating);
    }

    #[test]
    fn setpoint_constructor() {
        let g = Generator::with_setpoint(0.8, 0.2);
        assert_eq!(g.pset, 0.8);
        assert_eq!(g.qset, 0.2);
    }
}
