//! Grabber composition and binding.

use grid_base::{is_null, Unit};
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::measure::make_grabber_set;
use grid_core::network::Network;
use grid_core::object::ObjectId;
use proptest::prelude::*;

fn bus_net(voltage: f64) -> (Network, ObjectId) {
    let mut net = Network::new();
    let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("bus1".to_string()));
    net.bus_mut(bus).unwrap().voltage = voltage;
    (net, bus)
}

#[test]
fn gain_and_bias_absorption() {
    let (net, bus) = bus_net(1.1);

    // constants on either side fold into gain/bias of the field grabber
    let set = make_grabber_set("voltage * 2 + 0.5", &net, bus).unwrap();
    assert!((set.grab_data(&net) - (1.1 * 2.0 + 0.5)).abs() < 1e-12);

    let set = make_grabber_set("3 - voltage", &net, bus).unwrap();
    assert!((set.grab_data(&net) - (3.0 - 1.1)).abs() < 1e-12);

    let set = make_grabber_set("voltage / 4", &net, bus).unwrap();
    assert!((set.grab_data(&net) - (1.1 / 4.0)).abs() < 1e-12);
}

#[test]
fn function_evaluation() {
    let (net, bus) = bus_net(0.81);
    let set = make_grabber_set("sqrt(voltage)", &net, bus).unwrap();
    assert!((set.grab_data(&net) - 0.9).abs() < 1e-12);

    let set = make_grabber_set("pow(voltage, 2)", &net, bus).unwrap();
    assert!((set.grab_data(&net) - 0.81f64.powi(2)).abs() < 1e-12);
}

#[test]
fn description_override() {
    let (net, bus) = bus_net(1.0);
    let set = make_grabber_set("voltage as magnitude", &net, bus).unwrap();
    assert_eq!(set.description(), "magnitude");

    let set = make_grabber_set("voltage-0.4", &net, bus).unwrap();
    assert_eq!(set.description(), "voltage-0.4");
}

#[test]
fn unknown_field_is_null() {
    let (net, bus) = bus_net(1.0);
    let set = make_grabber_set("flux_capacitance", &net, bus).unwrap();
    assert!(is_null(set.grab_data(&net)));

    // null propagates through compositions
    let set = make_grabber_set("flux_capacitance + 2", &net, bus).unwrap();
    assert!(is_null(set.grab_data(&net)));
}

#[test]
fn unit_annotation_converts() {
    let (mut net, bus) = bus_net(1.0);
    net.bus_mut(bus).unwrap().angle = std::f64::consts::PI / 4.0;
    let set = make_grabber_set("angle(deg)", &net, bus).unwrap();
    assert!((set.grab_data(&net) - 45.0).abs() < 1e-9);
}

#[test]
fn object_path_resolution() {
    let mut net = Network::new();
    let area = net.insert(
        ComponentKind::Area(grid_core::area::Area::new()),
        Some("top".to_string()),
    );
    let b1 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let b2 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b2".to_string()))
        .unwrap();
    net.bus_mut(b1).unwrap().voltage = 1.0;
    net.bus_mut(b2).unwrap().voltage = 1.05;

    // resolve a sibling by name from b1
    let set = make_grabber_set("b2:voltage - voltage", &net, b1).unwrap();
    assert!((set.grab_data(&net) - 0.05).abs() < 1e-12);
}

#[test]
fn state_side_tracks_value_side() {
    use grid_base::{SolverMode, StateData, Time};
    let mut net = Network::new();
    let area = net.insert(
        ComponentKind::Area(grid_core::area::Area::new()),
        Some("a".to_string()),
    );
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b".to_string()))
        .unwrap();
    net.bus_mut(bus).unwrap().set_voltage_angle(0.98, 0.1);

    let mode = SolverMode::POWER_FLOW;
    net.allocate_states(area, mode);
    let mut state = vec![0.0; net.state_size(area, mode)];
    let mut dstate = vec![0.0; state.len()];
    net.guess_state(area, &mut state, &mut dstate, mode);

    let set = make_grabber_set("voltage * 2", &net, bus).unwrap();
    assert!(set.state_capable());

    let sd = StateData::new(Time::ZERO, &state, &dstate, 1);
    assert!((set.grab_state(&net, &sd, mode) - 1.96).abs() < 1e-12);

    // the state side reads the vector, not the member
    let v_off = net.get(bus).unwrap().offsets.get(mode).v_offset;
    state[v_off] = 1.02;
    let sd = StateData::new(Time::ZERO, &state, &dstate, 2);
    assert!((set.grab_state(&net, &sd, mode) - 2.04).abs() < 1e-12);
}

#[test]
fn predictor_fallback_without_state_grabber() {
    use grid_base::{SolverMode, StateData, Time};
    let (net, bus) = bus_net(1.0);
    // gencount has no state-space representation
    let set = make_grabber_set("gencount", &net, bus).unwrap();
    assert!(!set.state_capable());

    set.observe(&net, 0.0);
    let sd = StateData::empty(Time::seconds(5.0));
    // flat history predicts the last value
    assert_eq!(set.grab_state(&net, &sd, SolverMode::DAE), 0.0);
}

proptest! {
    /// value == field * gain + bias for arbitrary gains and biases.
    #[test]
    fn grabber_linearity(voltage in 0.1f64..2.0, gain in -5.0f64..5.0, bias in -5.0f64..5.0) {
        let (net, bus) = bus_net(voltage);
        let expr = format!("voltage * {gain} + {bias}");
        let set = make_grabber_set(&expr, &net, bus).unwrap();
        let expected = voltage * gain + bias;
        prop_assert!((set.grab_data(&net) - expected).abs() < 1e-9);
    }
}
