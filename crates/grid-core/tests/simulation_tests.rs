//! End-to-end driver runs: power flow, events, collectors.

use grid_base::{Time, Unit};
use grid_core::bus::{Bus, BusType};
use grid_core::collector::Collector;
use grid_core::component::ComponentKind;
use grid_core::events::Event;
use grid_core::generator::Generator;
use grid_core::link::Link;
use grid_core::load::Load;
use grid_core::measure::make_grabber_set;
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_core::simulation::{SimState, Simulation};

struct System {
    sim: Simulation,
    slack: ObjectId,
    load_bus: ObjectId,
    load: ObjectId,
    line: ObjectId,
}

/// A slack bus feeding a PQ load bus over one line.
fn two_bus_system(load_p: f64, load_q: f64) -> System {
    let mut sim = Simulation::new();
    let root = sim.root;
    let slack = sim
        .net
        .add_child(root, ComponentKind::Bus(Bus::new()), Some("slack".to_string()))
        .unwrap();
    {
        let b = sim.net.bus_mut(slack).unwrap();
        b.bus_type = BusType::Slk;
        b.prev_type = BusType::Slk;
    }
    sim.net
        .add_child(
            slack,
            ComponentKind::Generator(Generator::with_setpoint(0.0, 0.0)),
            None,
        )
        .unwrap();
    let load_bus = sim
        .net
        .add_child(root, ComponentKind::Bus(Bus::new()), Some("loadbus".to_string()))
        .unwrap();
    let load = sim
        .net
        .add_child(
            load_bus,
            ComponentKind::Load(Load::constant_power(load_p, load_q)),
            None,
        )
        .unwrap();
    let line = sim
        .net
        .add_child(
            root,
            ComponentKind::Link(Link::new(0.01, 0.1)),
            Some("line".to_string()),
        )
        .unwrap();
    sim.net.connect_link(line, slack, load_bus).unwrap();
    System {
        sim,
        slack,
        load_bus,
        load,
        line,
    }
}

#[test]
fn power_flow_balances_the_load() {
    let mut system = two_bus_system(0.5, 0.1);
    system.sim.power_flow().unwrap();
    assert_eq!(system.sim.sim_state(), SimState::PowerflowComplete);

    let v2 = system.sim.net.bus(system.load_bus).unwrap().voltage;
    let a2 = system.sim.net.bus(system.load_bus).unwrap().angle;
    // the load bus sags below the slack and lags it
    assert!(v2 < 1.0 && v2 > 0.85, "load bus voltage {v2}");
    assert!(a2 < 0.0, "load bus angle {a2}");

    // the line delivers the load power (plus losses) from the slack side
    let p1 = system.sim.net.get_value(system.line, "p1", Unit::Def);
    assert!(p1 > 0.5 && p1 < 0.6, "slack side power {p1}");

    // the slack bus stays pinned
    assert!((system.sim.net.bus(system.slack).unwrap().voltage - 1.0).abs() < 1e-9);
}

#[test]
fn power_flow_with_zero_load_is_flat() {
    let mut system = two_bus_system(0.0, 0.0);
    system.sim.power_flow().unwrap();
    let v2 = system.sim.net.bus(system.load_bus).unwrap().voltage;
    let a2 = system.sim.net.bus(system.load_bus).unwrap().angle;
    assert!((v2 - 1.0).abs() < 1e-4);
    assert!(a2.abs() < 1e-4);
}

#[test]
fn dynamic_run_executes_events_and_collects() {
    let mut system = two_bus_system(0.4, 0.05);
    system.sim.set("steptime", 0.05).unwrap();

    // halve the load at t = 1.0
    system.sim.add_event(
        Event::new(system.load, "p", 0.2).with_time(Time::seconds(1.0)),
    );

    // record the load-bus voltage every 0.5 s
    let mut collector = Collector::new("loadbus_v", Time::seconds(0.5));
    let grabber = make_grabber_set("voltage", &system.sim.net, system.load_bus).unwrap();
    collector.add_point(grabber, "v2");
    system.sim.add_collector(collector);

    system.sim.run(Time::seconds(2.0)).unwrap();
    assert_eq!(system.sim.sim_state(), SimState::DynamicComplete);
    assert_eq!(system.sim.current_time(), Time::seconds(2.0));

    // the event landed
    assert_eq!(system.sim.net.load(system.load).unwrap().p, 0.2);

    let collector = system.sim.find_collector("loadbus_v").unwrap();
    assert!(collector.row_count() >= 4, "rows: {}", collector.row_count());
    let rows = collector.rows();
    let first = rows.first().unwrap().values[0];
    let last = rows.last().unwrap().values[0];
    // lighter load means the voltage recovers
    assert!(last > first, "voltage should rise after load drop: {first} -> {last}");
}

#[test]
fn breaker_trips_during_a_run() {
    use grid_core::relay::{self, Breaker, RelayComponent};

    let mut system = two_bus_system(0.3, 0.05);
    let root = system.sim.root;
    let mut breaker = Breaker::default();
    breaker.limit = 1.0;
    let cb = system
        .sim
        .net
        .add_child(
            root,
            ComponentKind::Relay(RelayComponent::breaker(breaker)),
            Some("cb".to_string()),
        )
        .unwrap();
    relay::set_source(&mut system.sim.net, cb, system.line);
    relay::set_sink(&mut system.sim.net, cb, system.line);

    system.sim.set("steptime", 0.05).unwrap();
    // a fault: the load jumps far beyond the line's limit at t=0.5
    system.sim.add_event(
        Event::new(system.load, "p", 1.6).with_time(Time::seconds(0.5)),
    );

    system.sim.run(Time::seconds(2.0)).unwrap();

    assert!(
        system.sim.net.link(system.line).unwrap().switch1_open,
        "breaker should have opened the line"
    );
    assert!(system.sim.alert_count() > 0);
}

#[test]
fn observer_clock_follows_the_run() {
    let mut system = two_bus_system(0.1, 0.0);
    let observer = system.sim.clock();
    system.sim.run(Time::seconds(1.0)).unwrap();
    assert_eq!(observer.now(), Time::seconds(1.0));
}
