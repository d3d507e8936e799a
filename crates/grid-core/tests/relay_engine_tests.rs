//! The relay engine: triggers, delays, multi-condition rules, roots.

use grid_base::{OpFlags, SolverMode, StateData, Time};
use grid_core::area::Area;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::events::Event;
use grid_core::measure::{make_condition_from, RelayCondition};
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_core::relay::{self, Action, ConditionStatus, RelayComponent};
use grid_expr::Comparison;

struct Rig {
    net: Network,
    bus: ObjectId,
    target: ObjectId,
    relay: ObjectId,
}

/// A relay watching bus1's voltage with a disable action against bus2.
fn rig() -> Rig {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let bus = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("bus1".to_string()))
        .unwrap();
    let target = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("bus2".to_string()))
        .unwrap();
    let relay = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::basic()),
            Some("watcher".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, relay, bus);
    relay::set_sink(&mut net, relay, target);
    net.get_mut(relay)
        .unwrap()
        .info
        .flags
        .insert(OpFlags::CONTINUOUS);
    Rig {
        net,
        bus,
        target,
        relay,
    }
}

fn add_undervoltage_condition(rig: &mut Rig, level: f64) -> usize {
    let cond =
        make_condition_from("voltage", Comparison::Lt, level, &rig.net, rig.bus).unwrap();
    relay::add_condition(&mut rig.net, rig.relay, RelayCondition::Single(cond))
}

fn add_disable_action(rig: &mut Rig) -> usize {
    let event = Event::new(rig.target, "enabled", 0.0);
    relay::add_action(&mut rig.net, rig.relay, Action::Event(event))
}

#[test]
fn live_root_count_matches_condition_states() {
    let mut rig = rig();
    for _ in 0..3 {
        add_undervoltage_condition(&mut rig, 0.5);
    }
    relay::update_root_count(&mut rig.net, rig.relay, false);
    let count = |net: &Network, id| net.relay(id).unwrap().core.root_count();
    assert_eq!(count(&rig.net, rig.relay), 3);

    // triggered conditions only count while resettable
    relay::set_condition_status(&mut rig.net, rig.relay, 1, ConditionStatus::Triggered);
    assert_eq!(count(&rig.net, rig.relay), 2);

    rig.net
        .get_mut(rig.relay)
        .unwrap()
        .info
        .flags
        .insert(OpFlags::RESETTABLE);
    relay::update_root_count(&mut rig.net, rig.relay, true);
    assert_eq!(count(&rig.net, rig.relay), 3);

    relay::set_condition_status(&mut rig.net, rig.relay, 2, ConditionStatus::Disabled);
    assert_eq!(count(&rig.net, rig.relay), 2);
}

#[test]
fn immediate_trigger_executes_action() {
    let mut rig = rig();
    let c = add_undervoltage_condition(&mut rig, 0.7);
    let a = add_disable_action(&mut rig);
    relay::set_action_trigger(&mut rig.net, rig.relay, a, c, Time::ZERO);

    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.6;
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.0));

    assert!(!rig.net.get(rig.target).unwrap().info.is_enabled());
    assert!(matches!(
        relay::condition_status(&rig.net, rig.relay, c),
        ConditionStatus::Triggered
    ));
}

#[test]
fn delayed_action_fires_only_if_condition_holds() {
    let mut rig = rig();
    let c = add_undervoltage_condition(&mut rig, 0.7);
    let a = add_disable_action(&mut rig);
    relay::set_action_trigger(&mut rig.net, rig.relay, a, c, Time::seconds(0.5));

    // dips below the threshold at t=1
    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.6;
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.0));
    // not yet: the delay is pending
    assert!(rig.net.get(rig.target).unwrap().info.is_enabled());
    let next = rig.net.get(rig.relay).unwrap().info.next_update_time;
    assert_eq!(next, Time::seconds(1.5));

    // recovers before the recheck: the condition resets, no action
    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.9;
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.5));
    assert!(rig.net.get(rig.target).unwrap().info.is_enabled());
    assert!(matches!(
        relay::condition_status(&rig.net, rig.relay, c),
        ConditionStatus::Active
    ));

    // dips again and stays low through the delay: the action fires
    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.5;
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(2.0));
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(2.5));
    assert!(!rig.net.get(rig.target).unwrap().info.is_enabled());
}

#[test]
fn multi_condition_trigger_requires_all() {
    let mut rig = rig();
    let c0 = add_undervoltage_condition(&mut rig, 0.7);
    // second condition watches the angle
    let cond =
        make_condition_from("angle", Comparison::Gt, 0.2, &rig.net, rig.bus).unwrap();
    let c1 = relay::add_condition(&mut rig.net, rig.relay, RelayCondition::Single(cond));
    let a = add_disable_action(&mut rig);
    relay::set_multi_trigger(&mut rig.net, rig.relay, a, &[c0, c1], Time::ZERO);

    // only the voltage condition: no action
    rig.net.bus_mut(rig.bus).unwrap().set_voltage_angle(0.6, 0.0);
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.0));
    assert!(rig.net.get(rig.target).unwrap().info.is_enabled());

    // both conditions: the multi-trigger fires
    rig.net.bus_mut(rig.bus).unwrap().set_voltage_angle(0.6, 0.3);
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(2.0));
    assert!(!rig.net.get(rig.target).unwrap().info.is_enabled());
}

#[test]
fn sampled_mode_polls_on_the_grid() {
    let mut rig = rig();
    let c = add_undervoltage_condition(&mut rig, 0.7);
    let a = add_disable_action(&mut rig);
    relay::set_action_trigger(&mut rig.net, rig.relay, a, c, Time::ZERO);

    rig.net.set_flag(rig.relay, "sampled", true).unwrap();
    rig.net
        .set_value(rig.relay, "samplingperiod", 1.0, grid_base::Unit::Def)
        .unwrap();
    relay::dyn_init(&mut rig.net, rig.relay, Time::ZERO);

    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.5;
    // before the sample point nothing happens
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(0.25));
    assert!(rig.net.get(rig.target).unwrap().info.is_enabled());
    // at the sample point the poll catches it
    relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.0));
    assert!(!rig.net.get(rig.target).unwrap().info.is_enabled());
}

#[test]
fn root_test_emits_condition_residuals() {
    let mut rig = rig();
    add_undervoltage_condition(&mut rig, 0.7);
    relay::update_root_count(&mut rig.net, rig.relay, false);

    let area = rig.net.root_of(rig.relay);
    let mode = SolverMode::DAE;
    rig.net.allocate_states(area, mode);
    let size = rig.net.state_size(area, mode);
    let mut state = vec![0.0; size];
    let mut dstate = vec![0.0; size];
    rig.net.guess_state(area, &mut state, &mut dstate, mode);

    let roots_len = rig.net.root_size(area, mode);
    assert_eq!(roots_len, 1);
    let mut roots = vec![0.0; roots_len];
    let sd = StateData::new(Time::ZERO, &state, &dstate, 1);
    rig.net.root_test_tree(area, &sd, &mut roots, mode);
    // V=1.0 against `< 0.7`: residual a-b = 0.3, positive (not met)
    assert!((roots[0] - 0.3).abs() < 1e-9);

    // a root crossing triggers the condition
    let mask = vec![true];
    rig.net.root_trigger_tree(area, Time::seconds(1.0), &mask, mode);
    assert!(matches!(
        relay::condition_status(&rig.net, rig.relay, 0),
        ConditionStatus::Triggered
    ));
    // and the root count drops (relay is not resettable)
    assert_eq!(rig.net.relay(rig.relay).unwrap().core.root_count(), 0);
}

#[test]
fn alarm_without_comm_link_is_execution_failure() {
    let mut rig = rig();
    let c = add_undervoltage_condition(&mut rig, 0.7);
    rig.net
        .set_string(rig.relay, "action", "alarm 42")
        .unwrap();
    relay::set_action_trigger(&mut rig.net, rig.relay, 0, c, Time::ZERO);

    rig.net.bus_mut(rig.bus).unwrap().voltage = 0.5;
    let code = relay::update_a(&mut rig.net, rig.relay, Time::seconds(1.0));
    assert_eq!(code, grid_base::ChangeCode::ExecutionFailure);
    let alerts = rig.net.drain_alerts();
    assert!(alerts
        .iter()
        .any(|(_, al)| *al == grid_base::Alert::AlarmTrigger(42)));
}

#[test]
fn condition_string_surface() {
    let mut rig = rig();
    rig.net
        .set_string(rig.relay, "condition", "voltage < 0.7")
        .unwrap();
    assert_eq!(
        rig.net.relay(rig.relay).unwrap().core.conditions.len(),
        1
    );
    // the condition value reads through the relay surface
    assert!(
        (relay::get_condition_value(&rig.net, rig.relay, 0) - 1.0).abs() < 1e-9
    );
}

#[test]
fn update_object_remaps_or_rolls_back() {
    let mut rig = rig();
    add_undervoltage_condition(&mut rig, 0.7);

    // a parallel tree with matching names
    let area2 = rig
        .net
        .insert(ComponentKind::Area(Area::new()), Some("copy".to_string()));
    let bus2 = rig
        .net
        .add_child(
            area2,
            ComponentKind::Bus(Bus::new()),
            Some("bus1".to_string()),
        )
        .unwrap();
    let _sink2 = rig
        .net
        .add_child(
            area2,
            ComponentKind::Bus(Bus::new()),
            Some("bus2".to_string()),
        )
        .unwrap();
    rig.net.bus_mut(bus2).unwrap().voltage = 0.42;

    relay::update_object(&mut rig.net, rig.relay, area2).unwrap();
    // the condition now reads the new tree's bus
    assert!((relay::get_condition_value(&rig.net, rig.relay, 0) - 0.42).abs() < 1e-9);

    // a tree missing the named objects fails without changing anything
    let empty = rig
        .net
        .insert(ComponentKind::Area(Area::new()), Some("empty".to_string()));
    let err = relay::update_object(&mut rig.net, rig.relay, empty);
    assert!(err.is_err());
    assert!((relay::get_condition_value(&rig.net, rig.relay, 0) - 0.42).abs() < 1e-9);
}
