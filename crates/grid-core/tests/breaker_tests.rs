//! Breaker trip/reclose scenarios.

use grid_base::{Alert, OpFlags, Time, Unit};
use grid_core::area::Area;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::link::Link;
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_core::relay::{self, Breaker, ConditionStatus, RelayComponent, RelayKind};

struct Rig {
    net: Network,
    link: ObjectId,
    breaker: ObjectId,
}

/// Two buses joined by a line, watched by a breaker relay. The angle
/// spread is set high enough that the line current sits well above the
/// 1.0 puA trip limit while both switches are closed.
fn rig(max_reclose_attempts: u16) -> Rig {
    let mut net = Network::new();
    let area = net.insert(ComponentKind::Area(Area::new()), Some("top".to_string()));
    let b1 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b1".to_string()))
        .unwrap();
    let b2 = net
        .add_child(area, ComponentKind::Bus(Bus::new()), Some("b2".to_string()))
        .unwrap();
    net.bus_mut(b1).unwrap().set_voltage_angle(1.0, 0.5);
    net.bus_mut(b2).unwrap().set_voltage_angle(1.0, -0.5);
    let link = net
        .add_child(
            area,
            ComponentKind::Link(Link::new(0.01, 0.1)),
            Some("line".to_string()),
        )
        .unwrap();
    net.connect_link(link, b1, b2).unwrap();

    let mut breaker = Breaker::default();
    breaker.limit = 1.0;
    breaker.max_reclose_attempts = max_reclose_attempts;
    let breaker_id = net
        .add_child(
            area,
            ComponentKind::Relay(RelayComponent::breaker(breaker)),
            Some("cb1".to_string()),
        )
        .unwrap();
    relay::set_source(&mut net, breaker_id, link);
    relay::set_sink(&mut net, breaker_id, link);
    relay::dyn_init(&mut net, breaker_id, Time::ZERO);
    net.drain_alerts();
    Rig {
        net,
        link,
        breaker: breaker_id,
    }
}

fn trip_alert_count(alerts: &[(ObjectId, Alert)]) -> usize {
    alerts
        .iter()
        .filter(|(_, a)| *a == Alert::BreakerTripCurrent)
        .count()
}

#[test]
fn breaker_builds_its_conditions_and_actions() {
    let rig = rig(1);
    let relay = rig.net.relay(rig.breaker).unwrap();
    assert_eq!(relay.core.conditions.len(), 3);
    assert_eq!(relay.core.actions.len(), 2);
    assert!(matches!(
        relay::condition_status(&rig.net, rig.breaker, 1),
        ConditionStatus::Disabled
    ));
    // the observed current really is over the limit
    let current = rig.net.get_value(rig.link, "current1", Unit::Def);
    assert!(current > 1.0, "test rig current {current}");
}

#[test]
fn trip_and_reclose_with_exhausted_attempts() {
    let mut rig = rig(1);

    // over the limit at t=0.5: instant trip (no tap, no clearing time)
    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(0.5));
    assert!(rig.net.link(rig.link).unwrap().switch1_open, "breaker should open");
    let alerts = rig.net.drain_alerts();
    assert_eq!(trip_alert_count(&alerts), 1);
    assert!(rig
        .net
        .get(rig.breaker)
        .unwrap()
        .info
        .flags
        .contains(OpFlags::BREAKER_TRIPPED));
    // reclose scheduled at t = 0.5 + recloseTime1
    assert_eq!(
        rig.net.get(rig.breaker).unwrap().info.next_update_time,
        Time::seconds(1.5)
    );

    // the reclose fires at t=1.5; the over-limit persists, but the
    // attempt budget is spent, so no second trip occurs
    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(1.5));
    let alerts = rig.net.drain_alerts();
    assert!(alerts.iter().any(|(_, a)| *a == Alert::BreakerReclose));
    assert_eq!(trip_alert_count(&alerts), 0, "no second trip after final attempt");
    assert!(!rig.net.link(rig.link).unwrap().switch1_open, "breaker stays closed");

    // and nothing further happens
    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(3.0));
    let alerts = rig.net.drain_alerts();
    assert_eq!(trip_alert_count(&alerts), 0);
}

#[test]
fn retrip_when_attempts_remain() {
    let mut rig = rig(2);

    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(0.5));
    assert!(rig.net.link(rig.link).unwrap().switch1_open);
    rig.net.drain_alerts();

    // first reclose at 1.5: attempts remain, fault persists -> re-trip
    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(1.5));
    let alerts = rig.net.drain_alerts();
    assert!(alerts.iter().any(|(_, a)| *a == Alert::BreakerReclose));
    assert_eq!(trip_alert_count(&alerts), 1);
    assert!(rig.net.link(rig.link).unwrap().switch1_open);
    // the second reclose uses recloseTime2
    assert_eq!(
        rig.net.get(rig.breaker).unwrap().info.next_update_time,
        Time::seconds(6.5)
    );
}

#[test]
fn cleared_fault_resets_the_watch() {
    let mut rig = rig(1);

    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(0.5));
    assert!(rig.net.link(rig.link).unwrap().switch1_open);
    rig.net.drain_alerts();

    // remove the fault while the breaker is open
    let b1 = rig.net.find(rig.net.root_of(rig.link), "b1").unwrap();
    let b2 = rig.net.find(rig.net.root_of(rig.link), "b2").unwrap();
    rig.net.bus_mut(b1).unwrap().angle = 0.01;
    rig.net.bus_mut(b2).unwrap().angle = -0.01;

    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(1.5));
    let alerts = rig.net.drain_alerts();
    assert!(alerts.iter().any(|(_, a)| *a == Alert::BreakerReclose));
    assert!(!rig.net.link(rig.link).unwrap().switch1_open);
    // the watch is active again
    assert!(matches!(
        relay::condition_status(&rig.net, rig.breaker, 0),
        ConditionStatus::Active
    ));
    assert!(!rig
        .net
        .get(rig.breaker)
        .unwrap()
        .info
        .flags
        .contains(OpFlags::OVERLIMIT));
}

#[test]
fn recloser_tap_arms_the_accumulator_instead_of_tripping() {
    let mut rig = rig(1);
    if let Some(relay_comp) = rig.net.relay_mut(rig.breaker) {
        if let RelayKind::Breaker(b) = &mut relay_comp.kind {
            b.recloser_tap = 0.5;
        }
    }

    relay::update_a(&mut rig.net, rig.breaker, Time::seconds(0.5));
    // no trip: conditions 1 and 2 armed, accumulator running
    assert!(!rig.net.link(rig.link).unwrap().switch1_open);
    assert!(matches!(
        relay::condition_status(&rig.net, rig.breaker, 1),
        ConditionStatus::Active
    ));
    if let Some(RelayKind::Breaker(b)) = rig.net.relay(rig.breaker).map(|r| &r.kind) {
        assert!(b.use_cti);
        assert_eq!(b.cti, 0.0);
    } else {
        panic!("expected a breaker");
    }
    let alerts = rig.net.drain_alerts();
    assert!(alerts.iter().any(|(_, a)| *a == Alert::JacCountChange));
}
