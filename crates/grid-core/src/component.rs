//! The component: identity + offsets + kind payload.

use grid_base::{OffsetTable, OpFlags, SolverMode, StateSizes};

use crate::area::Area;
use crate::bus::Bus;
use crate::generator::Generator;
use crate::link::Link;
use crate::load::Load;
use crate::object::{ObjectId, ObjectInfo};
use crate::relay::RelayComponent;

/// One modeled entity in the network arena.
#[derive(Debug, Clone)]
pub struct Component {
    pub info: ObjectInfo,
    pub offsets: OffsetTable,
    pub kind: ComponentKind,
}

/// The polymorphic payload.
#[derive(Debug, Clone)]
pub enum ComponentKind {
    Area(Area),
    Bus(Bus),
    Link(Link),
    Load(Load),
    Generator(Generator),
    Relay(RelayComponent),
}

macro_rules! kind_accessors {
    ($get:ident, $get_mut:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self) -> Option<&$ty> {
            match self {
                ComponentKind::$variant(inner) => Some(inner),
                _ => None,
            }
        }

        pub fn $get_mut(&mut self) -> Option<&mut $ty> {
            match self {
                ComponentKind::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl ComponentKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ComponentKind::Area(_) => "area",
            ComponentKind::Bus(_) => "bus",
            ComponentKind::Link(_) => "link",
            ComponentKind::Load(_) => "load",
            ComponentKind::Generator(_) => "generator",
            ComponentKind::Relay(r) => r.type_name(),
        }
    }

    /// Primaries attach to the topology; secondaries attach to a bus.
    pub fn is_primary(&self) -> bool {
        matches!(
            self,
            ComponentKind::Area(_)
                | ComponentKind::Bus(_)
                | ComponentKind::Link(_)
                | ComponentKind::Relay(_)
        )
    }

    pub fn is_secondary(&self) -> bool {
        matches!(self, ComponentKind::Load(_) | ComponentKind::Generator(_))
    }

    kind_accessors!(as_area, as_area_mut, Area, Area);
    kind_accessors!(as_bus, as_bus_mut, Bus, Bus);
    kind_accessors!(as_link, as_link_mut, Link, Link);
    kind_accessors!(as_load, as_load_mut, Load, Load);
    kind_accessors!(as_generator, as_generator_mut, Generator, Generator);
    kind_accessors!(as_relay, as_relay_mut, Relay, RelayComponent);
}

impl Component {
    pub fn new(info: ObjectInfo, kind: ComponentKind) -> Component {
        Component {
            info,
            offsets: OffsetTable::default(),
            kind,
        }
    }

    /// Local state sizes for a mode, before adding subobjects.
    pub fn local_state_sizes(&self, mode: SolverMode) -> StateSizes {
        let mut sizes = StateSizes::default();
        if !self.info.is_enabled() {
            return sizes;
        }
        match &self.kind {
            ComponentKind::Bus(bus) => {
                if bus.is_slave() || bus.infinite {
                    return sizes;
                }
                sizes.alg = 2;
                sizes.jac = 8;
                if self.info.flags.contains(OpFlags::COMPUTE_FREQUENCY)
                    && mode.is_dynamic()
                    && !mode.is_algebraic_only()
                {
                    sizes.diff = 1;
                }
            }
            ComponentKind::Relay(relay) => {
                sizes = relay.local_state_sizes(&self.info, mode);
            }
            // links, loads, generators, and areas carry no local state here
            _ => {}
        }
        OffsetTable::masked_sizes(sizes, mode)
    }

    /// Owned subobjects in insertion order.
    pub fn sub_objects(&self) -> Vec<ObjectId> {
        match &self.kind {
            ComponentKind::Area(area) => area.primaries.clone(),
            ComponentKind::Bus(bus) => {
                let mut out = bus.loads.clone();
                out.extend(bus.generators.iter().copied());
                out
            }
            ComponentKind::Load(load) => load
                .aggregate
                .as_ref()
                .map(|part| part.sub_loads.clone())
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Component-defined equivalence for clone verification: identity
    /// fields differ between an original and its clone, parameters and
    /// kind-specific state must not.
    pub fn equivalent(&self, other: &Component) -> bool {
        if self.info.flags != other.info.flags {
            return false;
        }
        match (&self.kind, &other.kind) {
            (ComponentKind::Area(a), ComponentKind::Area(b)) => {
                a.primaries.len() == b.primaries.len()
            }
            (ComponentKind::Bus(a), ComponentKind::Bus(b)) => {
                a.voltage == b.voltage
                    && a.angle == b.angle
                    && a.bus_type == b.bus_type
                    && a.v_target == b.v_target
                    && a.a_target == b.a_target
                    && a.q_max == b.q_max
                    && a.q_min == b.q_min
                    && a.loads.len() == b.loads.len()
                    && a.generators.len() == b.generators.len()
            }
            (ComponentKind::Link(a), ComponentKind::Link(b)) => {
                a.r == b.r
                    && a.x == b.x
                    && a.b == b.b
                    && a.switch1_open == b.switch1_open
                    && a.switch2_open == b.switch2_open
                    && a.is_breaker == b.is_breaker
            }
            (ComponentKind::Load(a), ComponentKind::Load(b)) => {
                let subs = |l: &crate::load::Load| {
                    l.aggregate.as_ref().map(|p| p.sub_loads.len()).unwrap_or(0)
                };
                a.p == b.p && a.q == b.q && a.ip == b.ip && a.yp == b.yp && subs(a) == subs(b)
            }
            (ComponentKind::Generator(a), ComponentKind::Generator(b)) => {
                a.pset == b.pset && a.qset == b.qset && a.q_max == b.q_max && a.q_min == b.q_min
            }
            (ComponentKind::Relay(a), ComponentKind::Relay(b)) => a.equivalent(b),
            _ => false,
        }
    }
}
