//! Sensors: input/filter/output wiring and the integrator-trip scenario.

use grid_base::{Time, Unit};
use grid_core::area::Area;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::events::Event;
use grid_core::link::Link;
use grid_core::measure::{make_condition_from, RelayCondition};
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_core::relay::{self, Action, RelayComponent, RelayKind, Sensor, ThermalModel};
use grid_expr::Comparison;

struct Rig {
    net: Network,
    link: ObjectId,
    thermal: ObjectId,
    sensor: ObjectId,
}

/// A link with a thermal model exposing `hot_spot`, and a sampled sensor
/// integrating that signal.
fn rig(integrator_gain: f64) -> Rig {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let b1 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let b2 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b2".to_string()))
        .unwrap();
    net.bus_mut(b1).unwrap().set_voltage_angle(1.0, 0.1);
    net.bus_mut(b2).unwrap().set_voltage_angle(1.0, -0.1);
    let link = net
        .add_child(
            area,
            ComponentKind::Link(Link::new(0.01, 0.1)),
            Some("line".to_string()),
        )
        .unwrap();
    net.connect_link(link, b1, b2).unwrap();

    let thermal = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::thermal(ThermalModel::default())),
            Some("tx1".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, thermal, link);

    let sensor = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::sensor(Sensor::new())),
            Some("heatwatch".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, sensor, thermal);
    net.set_string(sensor, "input0", "hot_spot").unwrap();
    net.set_string(
        sensor,
        "filter0",
        &format!("integral(gain={integrator_gain})"),
    )
    .unwrap();
    net.set_string(sensor, "output0", "block0").unwrap();
    net.set_flag(sensor, "sampled", true).unwrap();
    net.set_value(sensor, "period", 1.0, Unit::Def).unwrap();

    Rig {
        net,
        link,
        thermal,
        sensor,
    }
}

fn set_hot_spot(net: &mut Network, thermal: ObjectId, value: f64) {
    if let Some(RelayKind::Thermal(t)) = net.relay_mut(thermal).map(|r| &mut r.kind) {
        t.hot_spot = value;
        // pin the lags so sampled updates keep the plateau
        t.dtempdt = 0.0;
    }
}

#[test]
fn integrator_accumulates_the_input() {
    let mut rig = rig(1.0 / 3600.0);
    set_hot_spot(&mut rig.net, rig.thermal, 90.0);
    relay::dyn_init(&mut rig.net, rig.sensor, Time::ZERO);

    // hold the thermal output constant and step for an hour
    for t in 1..=3600 {
        set_hot_spot(&mut rig.net, rig.thermal, 90.0);
        relay::update_component(&mut rig.net, rig.sensor, Time::seconds(t as f64));
    }
    let output = rig.net.get_value(rig.sensor, "output0", Unit::Def);
    assert!(
        (output - 90.0).abs() < 1e-6,
        "integral of 90 degC over 3600s at 1/3600 gain, got {output}"
    );
    // block and output modes agree
    let block = rig.net.get_value(rig.sensor, "block0", Unit::Def);
    assert_eq!(output, block);
}

#[test]
fn integrator_feeds_a_trip() {
    let gain = 1.0 / 3600.0;
    let mut rig = rig(gain);
    let h = 7200.0;
    set_hot_spot(&mut rig.net, rig.thermal, h);
    relay::dyn_init(&mut rig.net, rig.sensor, Time::ZERO);

    // condition: accumulated heat crosses the threshold; action: open the
    // breaker switch on the line
    let threshold = 3.0;
    let cond =
        make_condition_from("block0", Comparison::Gt, threshold, &rig.net, rig.sensor).unwrap();
    let c = relay::add_condition(&mut rig.net, rig.sensor, RelayCondition::Single(cond));
    let a = relay::add_action(
        &mut rig.net,
        rig.sensor,
        Action::Event(Event::new(rig.link, "switch1", 1.0)),
    );
    relay::set_action_trigger(&mut rig.net, rig.sensor, a, c, Time::ZERO);

    // h/3600 = 2.0 heat units per sampled second
    set_hot_spot(&mut rig.net, rig.thermal, h);
    relay::update_component(&mut rig.net, rig.sensor, Time::seconds(1.0));
    assert!(
        !rig.net.link(rig.link).unwrap().switch1_open,
        "2.0 accumulated, below threshold"
    );

    set_hot_spot(&mut rig.net, rig.thermal, h);
    relay::update_component(&mut rig.net, rig.sensor, Time::seconds(2.0));
    assert!(
        rig.net.link(rig.link).unwrap().switch1_open,
        "4.0 accumulated, action should open switch1"
    );
}

#[test]
fn direct_and_processed_outputs() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    net.bus_mut(bus).unwrap().voltage = 1.04;

    let sensor = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::sensor(Sensor::new())),
            Some("vmeter".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, sensor, bus);
    net.set_string(sensor, "input0", "voltage").unwrap();
    net.set_string(sensor, "output0", "input0").unwrap();
    // a processed output: an expression over the sensor itself
    net.set_string(sensor, "output1", "input0 * 2 - 1").unwrap();
    relay::dyn_init(&mut net, sensor, Time::ZERO);

    assert!((net.get_value(sensor, "output0", Unit::Def) - 1.04).abs() < 1e-12);
    assert!((net.get_value(sensor, "output1", Unit::Def) - 1.08).abs() < 1e-9);

    // named outputs resolve through the field surface
    net.set_string(sensor, "outputname0", "vmag").unwrap();
    assert!((net.get_value(sensor, "vmag", Unit::Def) - 1.04).abs() < 1e-12);
}

#[test]
fn default_outputs_follow_blocks() {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let sensor = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::sensor(Sensor::new())),
            Some("s".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, sensor, bus);
    net.set_string(sensor, "input0", "voltage").unwrap();
    net.set_string(sensor, "filter0", "delay(t=0.5)").unwrap();
    net.set_flag(sensor, "sampled", true).unwrap();
    net.set_value(sensor, "period", 0.1, Unit::Def).unwrap();
    relay::dyn_init(&mut net, sensor, Time::ZERO);

    // with no explicit outputs, output 0 is block 0, initialized in
    // steady state at the input
    let out = net.get_value(sensor, "output0", Unit::Def);
    assert!((out - 1.0).abs() < 1e-9);
}

#[test]
fn thermal_model_heats_toward_load() {
    let mut rig = rig(1.0);
    relay::dyn_init(&mut rig.net, rig.thermal, Time::ZERO);
    let initial = match rig.net.relay(rig.thermal).map(|r| &r.kind) {
        Some(RelayKind::Thermal(t)) => (t.top_oil, t.hot_spot),
        _ => panic!("expected thermal model"),
    };
    // initialized at steady state for the present loading
    assert!(initial.0 > 20.0);
    assert!(initial.1 >= initial.0);

    let hot_spot = rig.net.get_value(rig.thermal, "hot_spot", Unit::Def);
    assert_eq!(hot_spot, initial.1);
}
