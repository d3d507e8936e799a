//! Subtree cloning and comparison.

use pretty_assertions::assert_eq;

use grid_core::area::Area;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::generator::Generator;
use grid_core::link::Link;
use grid_core::load::Load;
use grid_core::network::Network;
use grid_core::relay::{self, Breaker, RelayComponent};

#[test]
fn cloned_subtree_compares_equal() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    net.bus_mut(bus).unwrap().set_voltage_angle(1.03, 0.2);
    net.add_child(bus, ComponentKind::Load(Load::constant_power(0.4, 0.1)), None)
        .unwrap();
    net.add_child(
        bus,
        ComponentKind::Generator(Generator::with_setpoint(0.5, 0.0)),
        None,
    )
    .unwrap();

    let copy = net.clone_subtree(bus).unwrap();
    assert!(net.equivalent_subtree(bus, copy));

    // diverging a parameter breaks equivalence
    net.bus_mut(copy).unwrap().voltage = 0.5;
    assert!(!net.equivalent_subtree(bus, copy));
}

#[test]
fn clone_does_not_alias_children() {
    let mut net = Network::new();
    let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("b".to_string()));
    let load = net
        .add_child(bus, ComponentKind::Load(Load::constant_power(0.2, 0.0)), None)
        .unwrap();

    let copy = net.clone_subtree(bus).unwrap();
    let copy_load = net.bus(copy).unwrap().loads[0];
    assert_ne!(copy_load, load);

    // mutating the clone's load leaves the original alone
    net.load_mut(copy_load).unwrap().p = 0.9;
    assert_eq!(net.load(load).unwrap().p, 0.2);
    assert!(!net.equivalent_subtree(bus, copy));
}

#[test]
fn relay_clone_keeps_parameters_and_counts() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let mut breaker = Breaker::default();
    breaker.limit = 2.5;
    breaker.max_reclose_attempts = 3;
    let relay_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::breaker(breaker)),
            Some("cb".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay_id, bus);
    net.set_string(relay_id, "condition", "voltage < 0.5").unwrap();

    let copy = net.clone_subtree(relay_id).unwrap();
    assert!(net.equivalent_subtree(relay_id, copy));
    let copied = net.relay(copy).unwrap();
    assert_eq!(copied.core.conditions.len(), 1);
    match &copied.kind {
        grid_core::relay::RelayKind::Breaker(b) => {
            assert_eq!(b.limit, 2.5);
            assert_eq!(b.max_reclose_attempts, 3);
        }
        other => panic!("expected a breaker clone, got {other:?}"),
    }
}

#[test]
fn cloned_link_references_stay_outside_subtree() {
    // cloning a link alone keeps its bus references pointing at the
    // original buses (they are outside the cloned subtree)
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let b1 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let b2 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b2".to_string()))
        .unwrap();
    let link = net
        .add_child(area, ComponentKind::Link(Link::new(0.01, 0.1)), None)
        .unwrap();
    net.connect_link(link, b1, b2).unwrap();

    let copy = net.clone_subtree(link).unwrap();
    let cloned = net.link(copy).unwrap();
    assert_eq!(cloned.bus1, Some(b1));
    assert_eq!(cloned.bus2, Some(b2));
}
