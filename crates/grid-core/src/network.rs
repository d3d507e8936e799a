//! The component arena and tree operations.
//!
//! Ownership is the arena slot: areas list their primaries, buses list
//! their secondaries, but every cross-reference is a generation-counted
//! `ObjectId`. Removing a component bumps its slot generation so stale
//! handles read as dead instead of aliasing a newcomer.

use std::collections::HashMap;

use grid_base::{
    units::{UnitBases, DEFAULT_BASE_FREQUENCY, DEFAULT_BASE_POWER},
    Alert, ObjectError,
};
use tracing::trace;

use crate::area::Area;
use crate::bus::Bus;
use crate::component::{Component, ComponentKind};
use crate::object::{ObjectId, ObjectInfo};

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    entry: Option<Component>,
}

/// The arena holding every component of one simulation.
#[derive(Debug, Default)]
pub struct Network {
    slots: Vec<Slot>,
    free: Vec<u32>,
    next_uid: u64,
    name_counters: HashMap<&'static str, u32>,
    base_power: f64,
    base_frequency: f64,
    pending_alerts: Vec<(ObjectId, Alert)>,
}

impl Network {
    pub fn new() -> Network {
        Network {
            base_power: DEFAULT_BASE_POWER,
            base_frequency: DEFAULT_BASE_FREQUENCY,
            next_uid: 1,
            ..Network::default()
        }
    }

    pub fn base_power(&self) -> f64 {
        self.base_power
    }

    pub fn set_base_power(&mut self, mva: f64) {
        self.base_power = mva;
    }

    pub fn base_frequency(&self) -> f64 {
        self.base_frequency
    }

    /// Unit bases for conversions at a given object (bus voltage base
    /// where one is attached, system defaults otherwise).
    pub fn bases_for(&self, id: ObjectId) -> UnitBases {
        let voltage = self
            .bus(id)
            .map(|b| b.base_voltage)
            .or_else(|| {
                self.get(id)
                    .and_then(|c| c.info.parent)
                    .and_then(|p| self.bus(p))
                    .map(|b| b.base_voltage)
            })
            .unwrap_or(120.0);
        UnitBases {
            power: self.base_power,
            voltage,
            frequency: self.base_frequency,
        }
    }

    // ========================================================================
    // Slot management
    // ========================================================================

    /// Insert a free-standing component; attach it to a parent separately.
    pub fn insert(&mut self, kind: ComponentKind, name: Option<String>) -> ObjectId {
        let uid = self.next_uid;
        self.next_uid += 1;
        let type_name = kind.type_name();
        let counter = self.name_counters.entry(type_name).or_insert(0);
        *counter += 1;
        let user_id = *counter;
        let name = name.unwrap_or_else(|| format!("{type_name}_{user_id}"));

        let mut info = ObjectInfo::new(uid, name);
        info.user_id = user_id;
        let component = Component::new(info, kind);

        let id = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.entry = Some(component);
                ObjectId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    entry: Some(component),
                });
                ObjectId {
                    index,
                    generation: 0,
                }
            }
        };
        trace!(object = %id, name = %self.get(id).map(|c| c.info.name.as_str()).unwrap_or(""), "inserted component");
        id
    }

    /// Insert and attach in one step.
    pub fn add_child(
        &mut self,
        parent: ObjectId,
        kind: ComponentKind,
        name: Option<String>,
    ) -> Result<ObjectId, ObjectError> {
        let id = self.insert(kind, name);
        match self.attach(parent, id) {
            Ok(()) => Ok(id),
            Err(e) => {
                self.release(id);
                Err(e)
            }
        }
    }

    /// Wire an existing component under a parent. Rejects type mismatches
    /// and duplicate names within the same container.
    pub fn attach(&mut self, parent: ObjectId, child: ObjectId) -> Result<(), ObjectError> {
        let child_name = match self.get(child) {
            Some(c) => {
                if c.info.parent.is_some() {
                    return Err(ObjectError::AddFailure(
                        "object already has a parent".to_string(),
                    ));
                }
                c.info.name.clone()
            }
            None => return Err(ObjectError::StaleHandle),
        };
        let child_is_primary = self
            .get(child)
            .map(|c| c.kind.is_primary())
            .unwrap_or(false);
        let child_type = self
            .get(child)
            .map(|c| c.kind.type_name())
            .unwrap_or("unknown");

        // duplicate-name check within the container
        for sib in self.children(parent) {
            if let Some(s) = self.get(sib) {
                if s.info.name == child_name {
                    return Err(ObjectError::AddFailure(format!(
                        "duplicate name '{child_name}'"
                    )));
                }
            }
        }

        let parent_tag = match self.get(parent) {
            Some(c) => c.kind.type_name(),
            None => return Err(ObjectError::StaleHandle),
        };
        match parent_tag {
            "area" => {
                if !child_is_primary {
                    return Err(ObjectError::UnrecognizedObject(child_type.to_string()));
                }
                if let Some(area) = self.area_mut(parent) {
                    area.primaries.push(child);
                }
            }
            "bus" => match child_type {
                "load" => {
                    if let Some(bus) = self.bus_mut(parent) {
                        bus.loads.push(child);
                    }
                }
                "generator" => {
                    if let Some(bus) = self.bus_mut(parent) {
                        bus.generators.push(child);
                    }
                }
                _ => return Err(ObjectError::UnrecognizedObject(child_type.to_string())),
            },
            _ => return Err(ObjectError::UnrecognizedObject(child_type.to_string())),
        }

        if let Some(c) = self.get_mut(child) {
            c.info.parent = Some(parent);
        }
        self.alert(parent, Alert::StateCountChange);
        Ok(())
    }

    /// Unlink a component from its parent and drop it and its subtree.
    pub fn remove(&mut self, id: ObjectId) -> Result<(), ObjectError> {
        let parent = match self.get(id) {
            Some(c) => c.info.parent,
            None => return Err(ObjectError::StaleHandle),
        };
        if let Some(parent) = parent {
            match self.get_mut(parent).map(|c| &mut c.kind) {
                Some(ComponentKind::Area(area)) => area.primaries.retain(|x| *x != id),
                Some(ComponentKind::Bus(bus)) => {
                    bus.loads.retain(|x| *x != id);
                    bus.generators.retain(|x| *x != id);
                }
                Some(ComponentKind::Load(load)) => {
                    if let Some(part) = &mut load.aggregate {
                        if let Some(pos) = part.sub_loads.iter().position(|x| *x == id) {
                            part.sub_loads.remove(pos);
                            part.fractions.remove(pos);
                        }
                    }
                }
                _ => {}
            }
            self.alert(parent, Alert::StateCountChange);
        }
        // drop the whole subtree
        for child in self.children(id) {
            let _ = self.remove(child);
        }
        self.release(id);
        Ok(())
    }

    fn release(&mut self, id: ObjectId) {
        if let Some(slot) = self.slots.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.entry.is_some() {
                slot.entry = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Component> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Component> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    /// Every live component id.
    pub fn ids(&self) -> Vec<ObjectId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.entry.is_some())
            .map(|(i, s)| ObjectId {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    // typed accessors ---------------------------------------------------------

    pub fn bus(&self, id: ObjectId) -> Option<&Bus> {
        self.get(id).and_then(|c| c.kind.as_bus())
    }

    pub fn bus_mut(&mut self, id: ObjectId) -> Option<&mut Bus> {
        self.get_mut(id).and_then(|c| c.kind.as_bus_mut())
    }

    pub fn link(&self, id: ObjectId) -> Option<&crate::link::Link> {
        self.get(id).and_then(|c| c.kind.as_link())
    }

    pub fn link_mut(&mut self, id: ObjectId) -> Option<&mut crate::link::Link> {
        self.get_mut(id).and_then(|c| c.kind.as_link_mut())
    }

    pub fn load(&self, id: ObjectId) -> Option<&crate::load::Load> {
        self.get(id).and_then(|c| c.kind.as_load())
    }

    pub fn load_mut(&mut self, id: ObjectId) -> Option<&mut crate::load::Load> {
        self.get_mut(id).and_then(|c| c.kind.as_load_mut())
    }

    pub fn generator(&self, id: ObjectId) -> Option<&crate::generator::Generator> {
        self.get(id).and_then(|c| c.kind.as_generator())
    }

    pub fn generator_mut(&mut self, id: ObjectId) -> Option<&mut crate::generator::Generator> {
        self.get_mut(id).and_then(|c| c.kind.as_generator_mut())
    }

    pub fn area(&self, id: ObjectId) -> Option<&Area> {
        self.get(id).and_then(|c| c.kind.as_area())
    }

    pub fn area_mut(&mut self, id: ObjectId) -> Option<&mut Area> {
        self.get_mut(id).and_then(|c| c.kind.as_area_mut())
    }

    pub fn relay(&self, id: ObjectId) -> Option<&crate::relay::RelayComponent> {
        self.get(id).and_then(|c| c.kind.as_relay())
    }

    pub fn relay_mut(&mut self, id: ObjectId) -> Option<&mut crate::relay::RelayComponent> {
        self.get_mut(id).and_then(|c| c.kind.as_relay_mut())
    }

    /// Owned subobjects of a component.
    pub fn children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.get(id).map(|c| c.sub_objects()).unwrap_or_default()
    }

    // ========================================================================
    // Links into the topology
    // ========================================================================

    /// Register a link's terminals at two buses.
    pub fn connect_link(
        &mut self,
        link: ObjectId,
        bus1: ObjectId,
        bus2: ObjectId,
    ) -> Result<(), ObjectError> {
        if self.link(link).is_none() {
            return Err(ObjectError::UnrecognizedObject("link expected".to_string()));
        }
        if self.bus(bus1).is_none() || self.bus(bus2).is_none() {
            return Err(ObjectError::UnrecognizedObject("bus expected".to_string()));
        }
        if let Some(l) = self.link_mut(link) {
            l.bus1 = Some(bus1);
            l.bus2 = Some(bus2);
        }
        if let Some(b) = self.bus_mut(bus1) {
            if !b.links.contains(&link) {
                b.links.push(link);
            }
        }
        if let Some(b) = self.bus_mut(bus2) {
            if !b.links.contains(&link) {
                b.links.push(link);
            }
        }
        self.alert(link, Alert::JacCountChange);
        Ok(())
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    /// Depth-first name search through the subtree rooted at `base`.
    pub fn find(&self, base: ObjectId, name: &str) -> Option<ObjectId> {
        let comp = self.get(base)?;
        if comp.info.name == name {
            return Some(base);
        }
        for child in self.search_children(base) {
            if let Some(found) = self.find(child, name) {
                return Some(found);
            }
        }
        None
    }

    /// Children for search purposes: owned subobjects plus, for areas, the
    /// links held by their buses (links are weak from the bus side).
    fn search_children(&self, id: ObjectId) -> Vec<ObjectId> {
        self.children(id)
    }

    /// Type-scoped user-id lookup across the whole arena.
    pub fn find_by_user_id(&self, type_name: &str, user_id: u32) -> Option<ObjectId> {
        self.ids().into_iter().find(|id| {
            self.get(*id)
                .map(|c| c.kind.type_name() == type_name && c.info.user_id == user_id)
                .unwrap_or(false)
        })
    }

    /// Resolve an object path from a base object. Handles the special
    /// names `target`/`self`, `parent`, and `bus` (the bus a secondary or
    /// link terminal attaches to), a leading `@` marker, sibling and
    /// ancestor lookup, and `:`-separated descent.
    pub fn locate(&self, path: &str, base: ObjectId) -> Option<ObjectId> {
        let mut current = base;
        for (i, raw_segment) in path.split(':').enumerate() {
            let segment = raw_segment.trim_start_matches('@');
            if segment.is_empty() {
                continue;
            }
            let next = self.locate_segment(segment, current, i == 0)?;
            current = next;
        }
        Some(current)
    }

    fn locate_segment(&self, segment: &str, base: ObjectId, first: bool) -> Option<ObjectId> {
        match segment {
            "target" | "self" => return Some(base),
            "parent" => return self.get(base)?.info.parent,
            "bus" => return self.attached_bus(base),
            _ => {}
        }
        let comp = self.get(base)?;
        if comp.info.name == segment {
            return Some(base);
        }
        // direct children
        for child in self.children(base) {
            if self.get(child).map(|c| c.info.name == *segment) == Some(true) {
                return Some(child);
            }
        }
        if first {
            // siblings, then anywhere below the root
            if let Some(parent) = comp.info.parent {
                for sib in self.children(parent) {
                    if self.get(sib).map(|c| c.info.name == *segment) == Some(true) {
                        return Some(sib);
                    }
                }
            }
            let root = self.root_of(base);
            return self.find(root, segment);
        }
        None
    }

    /// The bus associated with an object: itself for buses, the parent for
    /// secondaries, terminal one for links, the source's bus for relays.
    pub fn attached_bus(&self, id: ObjectId) -> Option<ObjectId> {
        let comp = self.get(id)?;
        match &comp.kind {
            ComponentKind::Bus(_) => Some(id),
            ComponentKind::Load(_) | ComponentKind::Generator(_) => comp.info.parent,
            ComponentKind::Link(l) => l.bus1,
            ComponentKind::Relay(r) => r.core.source.and_then(|s| self.attached_bus(s)),
            ComponentKind::Area(_) => None,
        }
    }

    pub fn root_of(&self, id: ObjectId) -> ObjectId {
        let mut current = id;
        while let Some(parent) = self.get(current).and_then(|c| c.info.parent) {
            current = parent;
        }
        current
    }

    /// `area1::bus_3` style display name.
    pub fn full_name(&self, id: ObjectId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            match self.get(cid) {
                Some(c) => {
                    parts.push(c.info.name.clone());
                    current = c.info.parent;
                }
                None => break,
            }
        }
        parts.reverse();
        parts.join("::")
    }

    // ========================================================================
    // Alerts
    // ========================================================================

    /// Bottom-up alert. Structural alerts unload offset tables from the
    /// source to the root synchronously; all alerts are queued for the
    /// driver to act on (event-queue rechecks, logging).
    pub fn alert(&mut self, source: ObjectId, alert: Alert) {
        if alert.is_structural() {
            let mut current = Some(source);
            while let Some(id) = current {
                match self.get_mut(id) {
                    Some(c) => {
                        if alert == Alert::RootCountChange {
                            c.offsets.root_unload();
                        } else {
                            c.offsets.unload();
                        }
                        current = c.info.parent;
                    }
                    None => break,
                }
            }
        }
        self.pending_alerts.push((source, alert));
    }

    pub fn drain_alerts(&mut self) -> Vec<(ObjectId, Alert)> {
        std::mem::take(&mut self.pending_alerts)
    }

    pub fn has_pending_alerts(&self) -> bool {
        !self.pending_alerts.is_empty()
    }

    // ========================================================================
    // Cloning
    // ========================================================================

    /// Clone the subtree rooted at `id`. Intra-subtree references (parent
    /// links, bus attachment lists, link terminals, relay source/sink and
    /// grabber targets) are remapped onto the clones; references to
    /// objects outside the subtree are kept as-is.
    pub fn clone_subtree(&mut self, id: ObjectId) -> Result<ObjectId, ObjectError> {
        let mut mapping: HashMap<ObjectId, ObjectId> = HashMap::new();
        let order = self.subtree_order(id);

        for old in &order {
            let component = match self.get(*old) {
                Some(c) => c.clone(),
                None => return Err(ObjectError::CloneFailure("stale source".to_string())),
            };
            let name = format!("{}_clone", component.info.name);
            let new_id = self.insert(component.kind.clone(), Some(name));
            // carry over parameters while keeping the fresh identity
            if let Some(target) = self.get_mut(new_id) {
                target.info.flags = component.info.flags;
                target.info.update_period = component.info.update_period;
                target.kind = component.kind;
            }
            mapping.insert(*old, new_id);
        }

        // remap references
        for (old, new) in &mapping {
            let old_parent = self.get(*old).and_then(|c| c.info.parent);
            let mapped_parent = old_parent.and_then(|p| mapping.get(&p).copied());
            if let Some(c) = self.get_mut(*new) {
                c.info.parent = mapped_parent;
            }
            let remap = |x: ObjectId| mapping.get(&x).copied().unwrap_or(x);
            let Some(c) = self.get_mut(*new) else { continue };
            match &mut c.kind {
                ComponentKind::Area(area) => {
                    for p in &mut area.primaries {
                        *p = remap(*p);
                    }
                }
                ComponentKind::Bus(bus) => {
                    for x in bus
                        .loads
                        .iter_mut()
                        .chain(bus.generators.iter_mut())
                        .chain(bus.links.iter_mut())
                        .chain(bus.slaves.iter_mut())
                    {
                        *x = remap(*x);
                    }
                    bus.master = bus.master.map(remap);
                }
                ComponentKind::Link(link) => {
                    link.bus1 = link.bus1.map(remap);
                    link.bus2 = link.bus2.map(remap);
                }
                ComponentKind::Load(load) => {
                    if let Some(part) = &mut load.aggregate {
                        for sub in &mut part.sub_loads {
                            *sub = remap(*sub);
                        }
                    }
                }
                ComponentKind::Relay(relay) => relay.remap(&mapping),
                _ => {}
            }
        }

        mapping
            .get(&id)
            .copied()
            .ok_or_else(|| ObjectError::CloneFailure("root not cloned".to_string()))
    }

    fn subtree_order(&self, id: ObjectId) -> Vec<ObjectId> {
        let mut order = vec![id];
        let mut i = 0;
        while i < order.len() {
            let current = order[i];
            order.extend(self.children(current));
            // areas also own their relays and links through the primary list,
            // which children() already covers
            i += 1;
        }
        order
    }

    /// Structural equivalence of two subtrees, using the component
    /// comparators.
    pub fn equivalent_subtree(&self, a: ObjectId, b: ObjectId) -> bool {
        let (Some(ca), Some(cb)) = (self.get(a), self.get(b)) else {
            return false;
        };
        if !ca.equivalent(cb) {
            return false;
        }
        let ka = self.children(a);
        let kb = self.children(b);
        if ka.len() != kb.len() {
            return false;
        }
        ka.iter()
            .zip(kb.iter())
            .all(|(x, y)| self.equivalent_subtree(*x, *y))
    }
}
