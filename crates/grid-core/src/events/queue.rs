//! The event queue.
//!
//! Entries are ordered by next-due time with ties broken by insertion
//! order. `execute_events(t)` runs every entry due at or before `t` at
//! most once per scheduled time, aggregates the worst change code,
//! re-inserts periodic entries, and discards spent ones.

use grid_base::{ChangeCode, Time};

use crate::events::event::Event;
use crate::network::Network;
use crate::object::ObjectId;

/// What a queue slot holds.
#[derive(Debug)]
pub enum QueuedItem {
    Event(Event),
    /// A component that asked for scheduled update calls; its due time is
    /// read live from the component so UPDATE_TIME_CHANGE needs no
    /// explicit resync beyond a `recheck`.
    ObjectUpdate(ObjectId),
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    item: QueuedItem,
    last_executed: Option<Time>,
}

impl Entry {
    fn next_time(&self, net: &Network) -> Time {
        match &self.item {
            QueuedItem::Event(ev) => ev.next_time(),
            QueuedItem::ObjectUpdate(id) => net
                .get(*id)
                .map(|c| c.info.next_update_time)
                .unwrap_or(Time::MAX),
        }
    }
}

#[derive(Debug, Default)]
pub struct EventQueue {
    entries: Vec<Entry>,
    next_seq: u64,
}

impl EventQueue {
    pub fn new() -> EventQueue {
        EventQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            seq,
            item: QueuedItem::Event(event),
            last_executed: None,
        });
    }

    /// Register a component for scheduled updates; one entry per object.
    pub fn insert_object(&mut self, id: ObjectId) {
        let exists = self
            .entries
            .iter()
            .any(|e| matches!(e.item, QueuedItem::ObjectUpdate(x) if x == id));
        if exists {
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry {
            seq,
            item: QueuedItem::ObjectUpdate(id),
            last_executed: None,
        });
    }

    /// Earliest due time across live entries.
    pub fn next_time(&self, net: &Network) -> Time {
        let mut best = Time::MAX;
        for entry in &self.entries {
            let nt = entry.next_time(net);
            if nt < best {
                best = nt;
            }
        }
        best
    }

    /// Execute everything due at or before `t`.
    pub fn execute_events(&mut self, net: &mut Network, t: Time) -> ChangeCode {
        let mut code = ChangeCode::NoChange;
        loop {
            // pick the due entry with the smallest (time, seq)
            let mut best: Option<(Time, u64, usize)> = None;
            for (i, entry) in self.entries.iter().enumerate() {
                let nt = entry.next_time(net);
                if nt > t {
                    continue;
                }
                if entry.last_executed == Some(nt) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((bt, bs, _)) => {
                        matches!(nt.total_cmp(&bt), std::cmp::Ordering::Less)
                            || (nt == bt && entry.seq < bs)
                    }
                };
                if better {
                    best = Some((nt, entry.seq, i));
                }
            }
            let Some((nt, _, index)) = best else { break };

            let entry = &mut self.entries[index];
            entry.last_executed = Some(nt);
            let (result, spent) = match &mut entry.item {
                QueuedItem::Event(ev) => {
                    let result = ev.execute(net, t);
                    (result, !ev.armed)
                }
                QueuedItem::ObjectUpdate(id) => {
                    let id = *id;
                    let result = crate::relay::update_component(net, id, t);
                    let gone = net.get(id).is_none();
                    (result, gone)
                }
            };
            code.absorb(result);
            if spent {
                self.entries.remove(index);
            }
        }
        code
    }

    /// Drop dead entries after update times changed. Due times are read
    /// live, so the main effect is pruning disarmed events and stale
    /// object handles.
    pub fn recheck(&mut self, net: &Network) {
        self.entries.retain(|entry| match &entry.item {
            QueuedItem::Event(ev) => ev.armed,
            QueuedItem::ObjectUpdate(id) => net.get(*id).is_some(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::component::ComponentKind;

    fn simple_net() -> (Network, ObjectId) {
        let mut net = Network::new();
        let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("bus1".to_string()));
        (net, bus)
    }

    #[test]
    fn events_fire_in_time_then_insertion_order() {
        let (mut net, bus) = simple_net();
        let mut queue = EventQueue::new();
        // inserted later but due earlier
        queue.insert(Event::new(bus, "voltage", 0.9).with_time(Time::seconds(2.0)));
        queue.insert(Event::new(bus, "voltage", 0.8).with_time(Time::seconds(1.0)));
        // same time as the first: insertion order decides, so 0.95 lands last
        queue.insert(Event::new(bus, "voltage", 0.95).with_time(Time::seconds(2.0)));

        queue.execute_events(&mut net, Time::seconds(1.5));
        assert_eq!(net.bus(bus).unwrap().voltage, 0.8);

        queue.execute_events(&mut net, Time::seconds(2.5));
        assert_eq!(net.bus(bus).unwrap().voltage, 0.95);
        assert!(queue.is_empty());
    }

    #[test]
    fn surviving_entries_are_in_the_future() {
        let (mut net, bus) = simple_net();
        let mut queue = EventQueue::new();
        for i in 0..5 {
            queue.insert(
                Event::new(bus, "voltage", 1.0).with_time(Time::seconds(i as f64)),
            );
        }
        queue.execute_events(&mut net, Time::seconds(2.0));
        let next = queue.next_time(&net);
        assert!(next > Time::seconds(2.0));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn periodic_events_reschedule() {
        let (mut net, bus) = simple_net();
        let mut queue = EventQueue::new();
        queue.insert(
            Event::new(bus, "voltage", 1.01)
                .with_time(Time::seconds(1.0))
                .with_period(Time::seconds(1.0)),
        );
        queue.execute_events(&mut net, Time::seconds(1.0));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next_time(&net), Time::seconds(2.0));
    }

    #[test]
    fn disarmed_events_never_fire() {
        let (mut net, bus) = simple_net();
        let mut queue = EventQueue::new();
        let mut ev = Event::new(bus, "voltage", 0.5).with_time(Time::seconds(1.0));
        ev.disarm();
        queue.insert(ev);
        let code = queue.execute_events(&mut net, Time::seconds(5.0));
        assert_eq!(code, ChangeCode::NoChange);
        assert_eq!(net.bus(bus).unwrap().voltage, 1.0);
        queue.recheck(&net);
        assert!(queue.is_empty());
    }

    #[test]
    fn worst_change_code_wins() {
        let (mut net, bus) = simple_net();
        let mut queue = EventQueue::new();
        queue.insert(Event::new(bus, "vtarget", 1.02).with_time(Time::ZERO)); // parameter change
        queue.insert(Event::new(bus, "voltage", 0.97).with_time(Time::ZERO)); // state change
        let code = queue.execute_events(&mut net, Time::ZERO);
        assert_eq!(code, ChangeCode::StateChange);
    }
}
