//! Differential, load-shedding, and PMU relays.

use grid_base::{Time, Unit};
use grid_core::area::Area;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::link::Link;
use grid_core::load::Load;
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_core::relay::{
    self, ConditionStatus, DifferentialRelay, LoadRelay, Pmu, RelayComponent,
};

fn grid_with_link(shunt_g: f64) -> (Network, ObjectId, ObjectId) {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let b1 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let b2 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b2".to_string()))
        .unwrap();
    net.bus_mut(b1).unwrap().set_voltage_angle(1.0, 0.1);
    net.bus_mut(b2).unwrap().set_voltage_angle(0.98, -0.1);
    let mut line = Link::new(0.01, 0.1);
    line.g = shunt_g;
    let link = net
        .add_child(area, ComponentKind::Link(line), Some("line".to_string()))
        .unwrap();
    net.connect_link(link, b1, b2).unwrap();
    (net, area, link)
}

#[test]
fn differential_relay_trips_on_terminal_mismatch() {
    let (mut net, area, link) = grid_with_link(0.05);
    let mut params = DifferentialRelay::default();
    params.max_differential = 0.01;
    params.delay_time = Time::seconds(0.1);
    let relay_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::differential(params)),
            Some("diff".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay_id, link);
    relay::set_sink(&mut net, relay_id, link);
    relay::dyn_init(&mut net, relay_id, Time::ZERO);

    // the shunt makes the terminal currents genuinely differ
    let c1 = net.get_value(link, "current1", Unit::Def);
    let c2 = net.get_value(link, "current2", Unit::Def);
    assert!((c1 - c2).abs() > 0.01, "rig differential {}", (c1 - c2).abs());

    // mismatch observed, trip delayed
    relay::update_a(&mut net, relay_id, Time::seconds(1.0));
    assert!(net.get(link).unwrap().info.is_enabled());
    assert!(matches!(
        relay::condition_status(&net, relay_id, 0),
        ConditionStatus::Triggered
    ));

    // still mismatched after the delay: the sink disconnects
    relay::update_a(&mut net, relay_id, Time::seconds(1.1));
    assert!(!net.get(link).unwrap().info.is_enabled());
}

#[test]
fn relative_mode_gates_on_minimum_level() {
    let (mut net, area, link) = grid_with_link(0.05);
    let mut params = DifferentialRelay::default();
    params.relative = true;
    params.max_differential = 0.001;
    params.min_level = 10.0; // far above any current in this rig
    params.delay_time = Time::seconds(0.1);
    let relay_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::differential(params)),
            Some("diff".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay_id, link);
    relay::set_sink(&mut net, relay_id, link);
    relay::dyn_init(&mut net, relay_id, Time::ZERO);

    // two conditions: the normalized differential and the level gate
    assert_eq!(net.relay(relay_id).unwrap().core.conditions.len(), 2);

    // the differential fires, the level gate never does, so no trip
    for t in [1.0, 1.1, 1.5, 2.0] {
        relay::update_a(&mut net, relay_id, Time::seconds(t));
    }
    assert!(net.get(link).unwrap().info.is_enabled());
    assert!(matches!(
        relay::condition_status(&net, relay_id, 1),
        ConditionStatus::Active
    ));
}

#[test]
fn differential_relay_flag_surface() {
    let (mut net, area, link) = grid_with_link(0.0);
    let relay_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::differential(DifferentialRelay::default())),
            Some("diff".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay_id, link);
    net.set_flag(relay_id, "relative", true).unwrap();
    net.set_value(relay_id, "max_difference", 0.3, Unit::Def)
        .unwrap();
    assert_eq!(net.get_value(relay_id, "level", Unit::Def), 0.3);
}

#[test]
fn load_relay_sheds_on_undervoltage_only_when_armed() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let load = net
        .add_child(bus, ComponentKind::Load(Load::constant_power(0.4, 0.1)), None)
        .unwrap();
    let mut params = LoadRelay::default();
    params.cutout_voltage = 0.8;
    params.voltage_delay = Time::seconds(0.5);
    // frequency axis left at the unarmed default
    let relay_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::load_relay(params)),
            Some("shed".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay_id, load);
    relay::set_sink(&mut net, relay_id, load);
    relay::dyn_init(&mut net, relay_id, Time::ZERO);

    // the frequency condition starts disabled
    assert!(matches!(
        relay::condition_status(&net, relay_id, 1),
        ConditionStatus::Disabled
    ));

    // healthy voltage: nothing happens
    relay::update_a(&mut net, relay_id, Time::seconds(0.5));
    assert!(net.get(load).unwrap().info.is_enabled());

    // sag below the cutout: shed after the delay
    net.bus_mut(bus).unwrap().voltage = 0.7;
    relay::update_a(&mut net, relay_id, Time::seconds(1.0));
    assert!(net.get(load).unwrap().info.is_enabled());
    relay::update_a(&mut net, relay_id, Time::seconds(1.5));
    assert!(!net.get(load).unwrap().info.is_enabled());
}

#[test]
fn pmu_exposes_filtered_phasor_outputs() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    net.bus_mut(bus).unwrap().set_voltage_angle(1.02, 0.3);
    let pmu_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::pmu(Pmu::default())),
            Some("pmu1".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, pmu_id, bus);
    net.set_value(pmu_id, "samplerate", 10.0, Unit::Def).unwrap();
    relay::dyn_init(&mut net, pmu_id, Time::ZERO);

    // steady state at initialization: measurements equal the bus values
    assert!((net.get_value(pmu_id, "voltage", Unit::Def) - 1.02).abs() < 1e-9);
    assert!((net.get_value(pmu_id, "angle", Unit::Def) - 0.3).abs() < 1e-9);
    assert!((net.get_value(pmu_id, "frequency", Unit::Def) - 1.0).abs() < 1e-9);
    assert!(net.get_value(pmu_id, "rocof", Unit::Def).abs() < 1e-9);

    // the sampling period follows the sample rate
    assert!(
        (net.get(pmu_id).unwrap().info.update_period.as_secs() - 0.1).abs() < 1e-12
    );

    // a voltage step settles through the measurement lag
    net.bus_mut(bus).unwrap().voltage = 0.9;
    for k in 1..=50 {
        relay::update_component(&mut net, pmu_id, Time::seconds(k as f64 * 0.1));
    }
    let measured = net.get_value(pmu_id, "voltage", Unit::Def);
    assert!(
        (measured - 0.9).abs() < 1e-6,
        "voltage lag should settle, got {measured}"
    );

    // parameter surface
    assert_eq!(net.get_value(pmu_id, "samplerate", Unit::Def), 10.0);
    net.set_flag(pmu_id, "transmit", true).unwrap();
}
