//! Condition evaluation over buses and links.

use grid_base::Unit;
use grid_core::bus::Bus;
use grid_core::component::ComponentKind;
use grid_core::link::Link;
use grid_core::measure::{make_condition, make_condition_from};
use grid_core::network::Network;
use grid_core::object::ObjectId;
use grid_expr::Comparison;

fn single_bus(voltage: f64, angle: f64) -> (Network, ObjectId) {
    let mut net = Network::new();
    let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("bus1".to_string()));
    net.bus_mut(bus).unwrap().set_voltage_angle(voltage, angle);
    (net, bus)
}

#[test]
fn simple_voltage_condition() {
    let (net, bus) = single_bus(1.0, 0.05);

    let cond = make_condition_from("voltage", Comparison::Lt, 0.7, &net, bus).unwrap();

    assert!((cond.eval(&net) - 0.3).abs() < 1e-6);
    assert!(!cond.check(&net));
    assert!((cond.get_val(1, &net) - 1.0).abs() < 1e-6);
    assert!((cond.get_val(2, &net) - 0.7).abs() < 1e-6);
}

#[test]
fn condition_with_arithmetic() {
    let (net, bus) = single_bus(1.0, 0.05);

    let cond = make_condition("voltage-0.4 < 0.7", &net, bus).unwrap();

    assert!((cond.eval(&net) - (-0.1)).abs() < 1e-6);
    assert!(cond.check(&net));
    assert!((cond.get_val(1, &net) - 0.6).abs() < 1e-6);
    assert!((cond.get_val(2, &net) - 0.7).abs() < 1e-6);
}

fn two_bus_link() -> (Network, ObjectId) {
    let mut net = Network::new();
    let b1 = net.insert(ComponentKind::Bus(Bus::new()), Some("b1".to_string()));
    let b2 = net.insert(ComponentKind::Bus(Bus::new()), Some("b2".to_string()));
    net.bus_mut(b1).unwrap().set_voltage_angle(1.0, 0.05);
    net.bus_mut(b2).unwrap().set_voltage_angle(1.05, -0.05);
    let link = net.insert(
        ComponentKind::Link(Link::new(0.001, 0.01)),
        Some("line".to_string()),
    );
    net.connect_link(link, b1, b2).unwrap();
    (net, link)
}

#[test]
fn link_current_differential() {
    let (net, link) = two_bus_link();

    let c1 = net.get_value(link, "current1", Unit::Def);
    let c2 = net.get_value(link, "current2", Unit::Def);
    assert!(c1 > 0.0);

    let cond = make_condition("current1>current2", &net, link).unwrap();
    // greater-than residual is (rhs - lhs); |I1| - |I2| is its negation,
    // and for a pure series line both vanish together
    assert!((cond.eval(&net) - (c2 - c1)).abs() < 1e-4);
    assert!((cond.eval(&net).abs() - (c1 - c2).abs()).abs() < 1e-4);
    assert_eq!(cond.check(&net), c1 > c2);
    assert!((cond.get_val(1, &net) - c1).abs() < 1e-6);
    assert!((cond.get_val(2, &net) - c2).abs() < 1e-6);
}

#[test]
fn link_current_queries() {
    let (mut net, link) = two_bus_link();
    net.link_mut(link).unwrap().g = 0.05;

    let c1 = net.get_value(link, "current1", Unit::Def);
    let c2 = net.get_value(link, "current2", Unit::Def);

    let cond = make_condition("current1-current2 > 0.01", &net, link).unwrap();
    assert!((cond.get_val(1, &net) - (c1 - c2)).abs() < 1e-6);
    assert!((cond.get_val(2, &net) - 0.01).abs() < 1e-9);

    let squared = make_condition(
        "(current1-current2)*(current1-current2) > 0.01",
        &net,
        link,
    )
    .unwrap();
    let diff = c1 - c2;
    assert!((squared.get_val(1, &net) - diff * diff).abs() < 1e-9);
}

#[test]
fn link_current_function_composition() {
    let (mut net, link) = two_bus_link();
    net.link_mut(link).unwrap().g = 0.05;

    let r1 = net.get_value(link, "realcurrent1", Unit::Def);
    let r2 = net.get_value(link, "realcurrent2", Unit::Def);
    let i1 = net.get_value(link, "imagcurrent1", Unit::Def);
    let i2 = net.get_value(link, "imagcurrent2", Unit::Def);

    let cond = make_condition(
        "hypot(abs(realcurrent1-realcurrent2),abs(imagcurrent1-imagcurrent2)) > 0.01",
        &net,
        link,
    )
    .unwrap();
    let expected = ((r1 - r2).abs()).hypot((i1 - i2).abs());
    assert!((cond.get_val(1, &net) - expected).abs() < 1e-9);
}

#[test]
fn margin_gives_schmitt_behavior() {
    let (mut net, bus) = single_bus(1.0, 0.0);

    // a < b with margin m: while triggered, satisfied iff a < b + m
    let mut cond = make_condition_from("voltage", Comparison::Lt, 0.9, &net, bus).unwrap();
    cond.set_margin(0.05);

    // untriggered: margin disabled
    net.bus_mut(bus).unwrap().voltage = 0.92;
    assert!(!cond.check(&net));
    net.bus_mut(bus).unwrap().voltage = 0.89;
    assert!(cond.check(&net));

    // triggered: margin enabled, condition holds up to 0.95
    cond.use_margin(true);
    net.bus_mut(bus).unwrap().voltage = 0.92;
    assert!(cond.check(&net));
    net.bus_mut(bus).unwrap().voltage = 0.96;
    assert!(!cond.check(&net));

    // cleared again: back to the bare threshold
    cond.use_margin(false);
    net.bus_mut(bus).unwrap().voltage = 0.92;
    assert!(!cond.check(&net));
}

#[test]
fn comparison_sense_matrix() {
    let (mut net, bus) = single_bus(1.0, 0.0);
    for (cmp, v, expect) in [
        (Comparison::Lt, 0.5, true),
        (Comparison::Lt, 0.7, false),
        (Comparison::Le, 0.7, true),
        (Comparison::Gt, 0.9, true),
        (Comparison::Gt, 0.7, false),
        (Comparison::Ge, 0.7, true),
        (Comparison::Eq, 0.7, true),
        (Comparison::Eq, 0.701, false),
        (Comparison::Ne, 0.701, true),
    ] {
        net.bus_mut(bus).unwrap().voltage = v;
        let cond = make_condition_from("voltage", cmp, 0.7, &net, bus).unwrap();
        assert_eq!(cond.check(&net), expect, "cmp {cmp:?} at v={v}");
    }
}
