//! Relays: conditions, actions, triggers, and their specializations.
//!
//! The relay engine watches conditions over source objects and fires
//! actions against sink objects, with per-trigger delays, multi-condition
//! rules, root-finding participation in continuous mode, and periodic
//! polling in sampled mode. Specializations (breaker, fuse, bus relay,
//! sensor, thermal model) layer behavior over the same core.

pub mod breaker;
pub mod bus_relay;
pub mod core;
pub mod differential;
pub mod fuse;
pub mod load_relay;
pub mod pmu;
pub mod sensor;
pub mod thermal;

pub use self::core::{
    add_action, add_condition, check_condition, condition_status, dyn_init,
    execute_action, get_condition_value, power_flow_adjust_relay, relay_field, root_check,
    root_test, root_trigger, set_action_trigger, set_condition_status, set_multi_trigger,
    set_relay_flag, set_relay_string, set_relay_value, set_sink, set_source, trigger_action,
    trigger_condition, update_a, update_component, update_object, update_root_count,
};
pub use breaker::Breaker;
pub use bus_relay::BusRelay;
pub use differential::DifferentialRelay;
pub use fuse::Fuse;
pub use load_relay::LoadRelay;
pub use pmu::Pmu;
pub use sensor::{OutputDef, Sensor};
pub use thermal::ThermalModel;

use grid_base::{ChangeCode, OpFlags, SolverMode, StateSizes, Time};
use std::collections::HashMap;
use tracing::warn;

use crate::events::Event;
use crate::measure::RelayCondition;
use crate::network::Network;
use crate::object::{ObjectId, ObjectInfo};

/// Lifecycle state of one relay condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    #[default]
    Active,
    Triggered,
    Disabled,
}

/// An action a relay can take.
#[derive(Debug, Clone)]
pub enum Action {
    /// Assign a field on a target object.
    Event(Event),
    /// Send an alarm code over the communication layer.
    Alarm { code: u32 },
}

impl Action {
    /// Run the action. Alarms without a communication link are recorded
    /// as execution failures rather than thrown.
    pub fn execute(&self, net: &mut Network, relay: ObjectId, time: Time) -> ChangeCode {
        match self {
            Action::Event(event) => {
                // relay actions re-fire; run the assignment directly
                // rather than consuming the event's armed state
                let mut working = event.clone();
                working.armed = true;
                working.execute(net, time)
            }
            Action::Alarm { code } => {
                net.alert(relay, grid_base::Alert::AlarmTrigger(*code));
                warn!(relay = %relay, code, "alarm raised with no communication link");
                ChangeCode::ExecutionFailure
            }
        }
    }
}

/// A per-condition trigger: run `action` after `delay` once the condition
/// has held.
#[derive(Debug, Clone, Copy)]
pub struct ActionTrigger {
    pub action: usize,
    pub delay: Time,
}

/// A trigger requiring several conditions to be simultaneously triggered.
#[derive(Debug, Clone)]
pub struct MultiTrigger {
    pub action: usize,
    pub conditions: Vec<usize>,
    pub delay: Time,
}

/// A pending delayed check of a triggered condition.
#[derive(Debug, Clone, Copy)]
pub struct CondCheck {
    pub condition: usize,
    /// Action index (plain) or multi-trigger index (multi).
    pub action: usize,
    pub test_time: Time,
    pub multi: bool,
}

/// Shared relay state.
#[derive(Debug, Clone, Default)]
pub struct RelayCore {
    pub source: Option<ObjectId>,
    pub sink: Option<ObjectId>,
    pub conditions: Vec<RelayCondition>,
    pub actions: Vec<Action>,
    pub action_triggers: Vec<Vec<ActionTrigger>>,
    pub multi_triggers: Vec<Vec<MultiTrigger>>,
    pub c_states: Vec<ConditionStatus>,
    pub trigger_times: Vec<Time>,
    pub cond_checks: Vec<CondCheck>,
    pub conditions_with_roots: Vec<usize>,
    pub trigger_count: u64,
    pub actions_taken: u64,
    pub next_sample_time: Time,
}

impl RelayCore {
    pub fn push_condition(&mut self, condition: RelayCondition) {
        self.conditions.push(condition);
        self.action_triggers.resize(self.conditions.len(), Vec::new());
        self.multi_triggers.resize(self.conditions.len(), Vec::new());
        self.c_states.resize(self.conditions.len(), ConditionStatus::Active);
        self.trigger_times.resize(self.conditions.len(), Time::NEG);
    }

    /// Live root count: active conditions plus (when resettable)
    /// triggered ones.
    pub fn root_count(&self) -> usize {
        self.conditions_with_roots.len()
    }
}

/// A relay component: the shared core plus a behavior specialization.
#[derive(Debug, Clone)]
pub struct RelayComponent {
    pub core: RelayCore,
    pub kind: RelayKind,
}

#[derive(Debug, Clone)]
pub enum RelayKind {
    Basic,
    Breaker(Breaker),
    Fuse(Fuse),
    BusRelay(BusRelay),
    Differential(DifferentialRelay),
    LoadRelay(LoadRelay),
    Sensor(Sensor),
    Pmu(Pmu),
    Thermal(ThermalModel),
}

impl RelayComponent {
    pub fn basic() -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Basic,
        }
    }

    pub fn breaker(breaker: Breaker) -> RelayComponent {
        let mut rc = RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Breaker(breaker),
        };
        rc.core.next_sample_time = Time::MAX;
        rc
    }

    pub fn fuse(fuse: Fuse) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Fuse(fuse),
        }
    }

    pub fn bus_relay(relay: BusRelay) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::BusRelay(relay),
        }
    }

    pub fn differential(relay: DifferentialRelay) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Differential(relay),
        }
    }

    pub fn load_relay(relay: LoadRelay) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::LoadRelay(relay),
        }
    }

    pub fn sensor(sensor: Sensor) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Sensor(sensor),
        }
    }

    pub fn pmu(pmu: Pmu) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Pmu(pmu),
        }
    }

    pub fn thermal(model: ThermalModel) -> RelayComponent {
        RelayComponent {
            core: RelayCore::default(),
            kind: RelayKind::Thermal(model),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            RelayKind::Basic => "relay",
            RelayKind::Breaker(_) => "breaker",
            RelayKind::Fuse(_) => "fuse",
            RelayKind::BusRelay(_) => "busrelay",
            RelayKind::Differential(_) => "differential",
            RelayKind::LoadRelay(_) => "loadrelay",
            RelayKind::Sensor(_) => "sensor",
            RelayKind::Pmu(_) => "pmu",
            RelayKind::Thermal(_) => "thermalmodel",
        }
    }

    /// The sensor surface, for sensors proper and the specializations
    /// built on one.
    pub fn as_sensor(&self) -> Option<&Sensor> {
        match &self.kind {
            RelayKind::Sensor(s) => Some(s),
            RelayKind::Pmu(p) => Some(&p.sensor),
            _ => None,
        }
    }

    pub fn as_sensor_mut(&mut self) -> Option<&mut Sensor> {
        match &mut self.kind {
            RelayKind::Sensor(s) => Some(s),
            RelayKind::Pmu(p) => Some(&mut p.sensor),
            _ => None,
        }
    }

    /// Local state sizes by specialization and mode.
    pub fn local_state_sizes(&self, info: &ObjectInfo, mode: SolverMode) -> StateSizes {
        let mut sizes = StateSizes::default();
        if info.flags.contains(OpFlags::CONTINUOUS) {
            sizes.alg_roots = self.core.root_count();
        }
        match &self.kind {
            RelayKind::Breaker(breaker) => {
                if breaker.recloser_tap > 0.0 && mode.is_dynamic() && !mode.is_algebraic_only() {
                    sizes.diff = 1;
                    sizes.jac = 12;
                }
            }
            RelayKind::Fuse(fuse) => {
                if fuse.mp_i2t > 0.0 && mode.is_dynamic() && !mode.is_algebraic_only() {
                    sizes.diff = 1;
                    sizes.jac = 4;
                }
            }
            RelayKind::Sensor(_) | RelayKind::Pmu(_) => {
                let blocks = self
                    .as_sensor()
                    .map(|s| s.blocks.len())
                    .unwrap_or(0);
                if info.flags.contains(OpFlags::CONTINUOUS)
                    && mode.is_dynamic()
                    && !mode.is_algebraic_only()
                {
                    sizes.diff = blocks;
                    sizes.jac = 3 * blocks;
                }
            }
            _ => {}
        }
        sizes
    }

    /// Re-point every cross-reference through a clone mapping.
    pub fn remap(&mut self, mapping: &HashMap<ObjectId, ObjectId>) {
        let mut mapper = |id: ObjectId| Some(mapping.get(&id).copied().unwrap_or(id));
        self.core.source = self.core.source.map(|s| mapping.get(&s).copied().unwrap_or(s));
        self.core.sink = self.core.sink.map(|s| mapping.get(&s).copied().unwrap_or(s));
        for condition in &mut self.core.conditions {
            condition.retarget(&mut mapper);
        }
        for action in &mut self.core.actions {
            if let Action::Event(ev) = action {
                ev.target = ev.target.map(|t| mapping.get(&t).copied().unwrap_or(t));
            }
        }
        if let RelayKind::Breaker(b) = &mut self.kind {
            b.bus = b.bus.map(|x| mapping.get(&x).copied().unwrap_or(x));
        }
        if let Some(s) = self.as_sensor_mut() {
            s.remap(mapping);
        }
    }

    /// Comparator for clone verification.
    pub fn equivalent(&self, other: &RelayComponent) -> bool {
        if self.core.conditions.len() != other.core.conditions.len()
            || self.core.actions.len() != other.core.actions.len()
        {
            return false;
        }
        match (&self.kind, &other.kind) {
            (RelayKind::Basic, RelayKind::Basic) => true,
            (RelayKind::Breaker(a), RelayKind::Breaker(b)) => {
                a.limit == b.limit
                    && a.recloser_tap == b.recloser_tap
                    && a.max_reclose_attempts == b.max_reclose_attempts
            }
            (RelayKind::Fuse(a), RelayKind::Fuse(b)) => {
                a.limit == b.limit && a.mp_i2t == b.mp_i2t
            }
            (RelayKind::BusRelay(a), RelayKind::BusRelay(b)) => {
                a.cut_out_voltage == b.cut_out_voltage
                    && a.cut_out_frequency == b.cut_out_frequency
            }
            (RelayKind::Differential(a), RelayKind::Differential(b)) => {
                a.max_differential == b.max_differential && a.relative == b.relative
            }
            (RelayKind::LoadRelay(a), RelayKind::LoadRelay(b)) => {
                a.cutout_voltage == b.cutout_voltage
                    && a.cutout_frequency == b.cutout_frequency
            }
            (RelayKind::Sensor(a), RelayKind::Sensor(b)) => {
                a.blocks.len() == b.blocks.len() && a.input_specs == b.input_specs
            }
            (RelayKind::Pmu(a), RelayKind::Pmu(b)) => {
                a.tv == b.tv && a.ttheta == b.ttheta && a.sample_rate == b.sample_rate
            }
            (RelayKind::Thermal(a), RelayKind::Thermal(b)) => a.rating == b.rating,
            _ => false,
        }
    }
}
