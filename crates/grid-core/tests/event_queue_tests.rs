//! Event queue ordering and the event string surface.

use grid_base::{Time, Unit};
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::events::{Event, EventQueue};
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_expr::{parse_event, EventSpec};
use proptest::prelude::*;

fn bus_net() -> (Network, ObjectId) {
    let mut net = Network::new();
    let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("bus1".to_string()));
    (net, bus)
}

#[test]
fn event_string_builds_executable_event() {
    let (mut net, bus) = bus_net();
    let spec = parse_event("voltage = 0.93 @ 2.0").unwrap();
    let mut event = Event::from_spec(&spec, &net, bus).unwrap();
    assert_eq!(event.next_time(), Time::seconds(2.0));

    event.execute(&mut net, Time::seconds(2.0));
    assert_eq!(net.bus(bus).unwrap().voltage, 0.93);
    // one-shot events disarm after execution
    assert_eq!(event.next_time(), Time::MAX);
}

#[test]
fn event_with_units_converts() {
    let (mut net, bus) = bus_net();
    let spec = parse_event("angle(deg) = 45").unwrap();
    let mut event = Event::from_spec(&spec, &net, bus).unwrap();
    event.execute(&mut net, Time::ZERO);
    let angle = net.bus(bus).unwrap().angle;
    assert!((angle - std::f64::consts::FRAC_PI_4).abs() < 1e-9);
}

#[test]
fn alarm_spec_is_not_an_event() {
    let (net, bus) = bus_net();
    let spec = parse_event("alarm overtemp").unwrap();
    assert!(matches!(spec, EventSpec::Alarm { .. }));
    assert!(Event::from_spec(&spec, &net, bus).is_err());
}

#[test]
fn unknown_target_field_is_execution_failure() {
    let (mut net, bus) = bus_net();
    let mut event = Event::new(bus, "warpfield", 1.0);
    let code = event.execute(&mut net, Time::ZERO);
    assert_eq!(code, grid_base::ChangeCode::ExecutionFailure);
}

proptest! {
    /// After execute_events(t), every surviving entry is strictly in the
    /// future.
    #[test]
    fn queue_survivors_are_future(times in prop::collection::vec(0.0f64..100.0, 1..40), cut in 0.0f64..100.0) {
        let (mut net, bus) = bus_net();
        let mut queue = EventQueue::new();
        for t in &times {
            queue.insert(Event::new(bus, "vtarget", 1.0).with_time(Time::seconds(*t)));
        }
        queue.execute_events(&mut net, Time::seconds(cut));
        let next = queue.next_time(&net);
        prop_assert!(next > Time::seconds(cut));
        let expected_left = times.iter().filter(|t| **t > cut).count();
        prop_assert_eq!(queue.len(), expected_left);
    }

    /// Ties at the same due time execute in insertion order.
    #[test]
    fn ties_break_by_insertion(values in prop::collection::vec(0.1f64..2.0, 2..8)) {
        let (mut net, bus) = bus_net();
        let mut queue = EventQueue::new();
        for v in &values {
            queue.insert(Event::new(bus, "voltage", *v).with_time(Time::seconds(1.0)));
        }
        queue.execute_events(&mut net, Time::seconds(1.0));
        // the last inserted assignment wins
        let last = *values.last().unwrap();
        prop_assert_eq!(net.bus(bus).unwrap().voltage, last);
    }
}

#[test]
fn periodic_adapter_respects_at_most_once_per_time() {
    let (mut net, bus) = bus_net();
    let mut queue = EventQueue::new();
    queue.insert(
        Event::new(bus, "voltage", 0.99)
            .with_time(Time::seconds(1.0))
            .with_period(Time::seconds(1.0)),
    );
    // a wide execute window fires each scheduled time exactly once
    queue.execute_events(&mut net, Time::seconds(3.5));
    assert_eq!(queue.next_time(&net), Time::seconds(4.0));
}

#[test]
fn set_get_surface_round_trip() {
    let (mut net, bus) = bus_net();
    net.set_value(bus, "Voltage", 1.04, Unit::Def).unwrap();
    assert_eq!(net.get_value(bus, "VOLTAGE", Unit::Def), 1.04);

    // unknown parameter errors without changing state
    let err = net.set_value(bus, "spread", -1.0, Unit::Def);
    assert!(matches!(err, Err(grid_base::ObjectError::UnknownParameter(_))));
    assert_eq!(net.get_value(bus, "voltage", Unit::Def), 1.04);

    // unknown get yields the null sentinel
    assert!(grid_base::is_null(net.get_value(bus, "spread", Unit::Def)));

    net.set_flag(bus, "Compute_Frequency", true).unwrap();
    assert!(net.get_flag(bus, "compute_frequency").unwrap());
}
