//! The enrichment pass: raw expression ASTs bound against the live tree.
//!
//! Mirrors the interpreter of the original system: constants on one side
//! of an arithmetic node are absorbed into the other side's gain/bias
//! rather than materialized as nodes, so `voltage - 0.4` is a single
//! field grabber with a bias of -0.4.

use grid_base::{ObjectError, Unit};
use grid_expr::{
    fold, function1, function2, parse_condition, parse_grabber, BinaryOp, Expr,
};

use crate::measure::condition::Condition;
use crate::measure::grabber::{Grabber, GrabberSource};
use crate::measure::grabber_set::GrabberSet;
use crate::measure::state_grabber::{LinkQuantity, StateGrabber, StateSource};
use crate::network::Network;
use crate::object::ObjectId;

/// Build a grabber set (value + state side) from an expression string.
pub fn make_grabber_set(
    input: &str,
    net: &Network,
    target: ObjectId,
) -> Result<GrabberSet, ObjectError> {
    let spec = parse_grabber(input).map_err(|e| ObjectError::Expression(e.to_string()))?;
    let expr = fold(spec.expr);
    let grab = bind_grabber(&expr, net, target)?;
    let state = bind_state_grabber(&expr, net, target);
    Ok(GrabberSet::new(grab, state).with_description(spec.description))
}

/// Build a condition from a full condition string (`a < b`).
pub fn make_condition(
    input: &str,
    net: &Network,
    target: ObjectId,
) -> Result<Condition, ObjectError> {
    let spec = parse_condition(input).map_err(|e| ObjectError::Expression(e.to_string()))?;
    let lhs_expr = fold(spec.lhs);
    let rhs_expr = fold(spec.rhs);

    let lhs_grab = bind_grabber(&lhs_expr, net, target)?;
    let lhs_state = bind_state_grabber(&lhs_expr, net, target);
    let mut condition = Condition::new(GrabberSet::new(lhs_grab, lhs_state));
    condition.set_comparison(spec.comparison);

    match rhs_expr.as_number() {
        Some(level) => condition.set_rhs_constant(level),
        None => {
            let rhs_grab = bind_grabber(&rhs_expr, net, target)?;
            let rhs_state = bind_state_grabber(&rhs_expr, net, target);
            condition.set_rhs_grabber(GrabberSet::new(rhs_grab, rhs_state));
        }
    }
    Ok(condition)
}

/// Build a condition from a field expression, comparison, and threshold.
pub fn make_condition_from(
    field: &str,
    comparison: grid_expr::Comparison,
    level: f64,
    net: &Network,
    target: ObjectId,
) -> Result<Condition, ObjectError> {
    let set = make_grabber_set(field, net, target)?;
    let mut condition = Condition::new(set);
    condition.set_comparison(comparison);
    condition.set_rhs_constant(level);
    Ok(condition)
}

// ============================================================================
// Value-side binding
// ============================================================================

/// Bind a folded expression to a value grabber.
pub fn bind_grabber(expr: &Expr, net: &Network, target: ObjectId) -> Result<Grabber, ObjectError> {
    let mut grabber = bind_grabber_inner(expr, net, target)?;
    grabber.desc = expr.describe();
    Ok(grabber)
}

fn bind_grabber_inner(
    expr: &Expr,
    net: &Network,
    target: ObjectId,
) -> Result<Grabber, ObjectError> {
    match expr {
        Expr::Number(v) => Ok(Grabber::constant(*v)),
        Expr::Field {
            object,
            field,
            units,
        } => {
            let resolved = match object {
                Some(path) => net.locate(path, target),
                None => Some(target),
            };
            let units = units
                .as_deref()
                .and_then(Unit::from_name)
                .unwrap_or(Unit::Def);
            Ok(Grabber::field(resolved, field, units))
        }
        Expr::Call { name, args } => match args.len() {
            1 => {
                let func = function1(name)
                    .ok_or_else(|| ObjectError::Expression(format!("unknown function '{name}'")))?;
                let arg = bind_grabber(&args[0], net, target)?;
                Ok(Grabber {
                    source: GrabberSource::Func1 {
                        name: name.clone(),
                        func,
                        arg: Box::new(arg),
                    },
                    gain: 1.0,
                    bias: 0.0,
                    desc: String::new(),
                })
            }
            2 => {
                let func = function2(name)
                    .ok_or_else(|| ObjectError::Expression(format!("unknown function '{name}'")))?;
                let a = bind_grabber(&args[0], net, target)?;
                let b = bind_grabber(&args[1], net, target)?;
                Ok(Grabber {
                    source: GrabberSource::Func2 {
                        name: name.clone(),
                        func,
                        a: Box::new(a),
                        b: Box::new(b),
                    },
                    gain: 1.0,
                    bias: 0.0,
                    desc: String::new(),
                })
            }
            n => Err(ObjectError::Expression(format!(
                "function '{name}' called with {n} arguments"
            ))),
        },
        Expr::Binary { op, lhs, rhs } => {
            let a = bind_grabber(lhs, net, target)?;
            let b = bind_grabber(rhs, net, target)?;
            Ok(compose(*op, a, b))
        }
    }
}

/// Compose two bound grabbers, absorbing a constant side into the other
/// side's gain/bias where the operation allows it.
fn compose(op: BinaryOp, a: Grabber, b: Grabber) -> Grabber {
    let a_const = constant_value(&a);
    let b_const = constant_value(&b);
    match (a_const, b_const) {
        (_, Some(vb)) => {
            let mut g = a;
            match op {
                BinaryOp::Add => {
                    g.bias += vb;
                    return g;
                }
                BinaryOp::Sub => {
                    g.bias -= vb;
                    return g;
                }
                BinaryOp::Mul => {
                    g.gain *= vb;
                    g.bias *= vb;
                    return g;
                }
                BinaryOp::Div => {
                    g.gain /= vb;
                    g.bias /= vb;
                    return g;
                }
                BinaryOp::Pow => {}
            }
            op_node(op, g, Grabber::constant(vb))
        }
        (Some(va), None) => {
            let mut g = b;
            match op {
                BinaryOp::Add => {
                    g.bias += va;
                    return g;
                }
                BinaryOp::Sub => {
                    g.gain = -g.gain;
                    g.bias = va - g.bias;
                    return g;
                }
                BinaryOp::Mul => {
                    g.gain *= va;
                    g.bias *= va;
                    return g;
                }
                BinaryOp::Div | BinaryOp::Pow => {}
            }
            op_node(op, Grabber::constant(va), g)
        }
        _ => op_node(op, a, b),
    }
}

fn op_node(op: BinaryOp, a: Grabber, b: Grabber) -> Grabber {
    Grabber {
        source: GrabberSource::Op {
            op,
            a: Box::new(a),
            b: Box::new(b),
        },
        gain: 1.0,
        bias: 0.0,
        desc: String::new(),
    }
}

fn constant_value(grabber: &Grabber) -> Option<f64> {
    match grabber.source {
        GrabberSource::Constant => Some(grabber.bias),
        _ => None,
    }
}

// ============================================================================
// State-side binding
// ============================================================================

/// Bind the state-space counterpart where one exists. Fields without a
/// state representation (and compositions containing them) return `None`;
/// the grabber set then falls back to its predictor.
pub fn bind_state_grabber(expr: &Expr, net: &Network, target: ObjectId) -> Option<StateGrabber> {
    match expr {
        Expr::Number(v) => Some(StateGrabber::constant(*v)),
        Expr::Field { object, field, .. } => {
            let resolved = match object {
                Some(path) => net.locate(path, target)?,
                None => target,
            };
            bind_state_field(net, resolved, field)
        }
        Expr::Call { name, args } => match args.len() {
            1 => {
                let func = function1(name)?;
                let arg = bind_state_grabber(&args[0], net, target)?;
                Some(StateGrabber {
                    source: StateSource::Func1 {
                        func,
                        arg: Box::new(arg),
                    },
                    gain: 1.0,
                    bias: 0.0,
                })
            }
            2 => {
                let func = function2(name)?;
                let a = bind_state_grabber(&args[0], net, target)?;
                let b = bind_state_grabber(&args[1], net, target)?;
                Some(StateGrabber {
                    source: StateSource::Func2 {
                        func,
                        a: Box::new(a),
                        b: Box::new(b),
                    },
                    gain: 1.0,
                    bias: 0.0,
                })
            }
            _ => None,
        },
        Expr::Binary { op, lhs, rhs } => {
            let a = bind_state_grabber(lhs, net, target)?;
            let b = bind_state_grabber(rhs, net, target)?;
            Some(compose_state(*op, a, b))
        }
    }
}

fn bind_state_field(net: &Network, id: ObjectId, field: &str) -> Option<StateGrabber> {
    let comp = net.get(id)?;
    let field = field.to_ascii_lowercase();
    let source = match comp.kind.type_name() {
        "bus" => match field.as_str() {
            "voltage" | "v" | "volt" => StateSource::BusVoltage(id),
            "angle" | "ang" | "theta" => StateSource::BusAngle(id),
            _ => return None,
        },
        "link" => {
            let quantity = match field.as_str() {
                "current" | "current1" => LinkQuantity::Current(1),
                "current2" => LinkQuantity::Current(2),
                "realcurrent1" => LinkQuantity::RealCurrent(1),
                "realcurrent2" => LinkQuantity::RealCurrent(2),
                "imagcurrent1" => LinkQuantity::ImagCurrent(1),
                "imagcurrent2" => LinkQuantity::ImagCurrent(2),
                "p" | "p1" => LinkQuantity::P(1),
                "p2" => LinkQuantity::P(2),
                "q" | "q1" => LinkQuantity::Q(1),
                "q2" => LinkQuantity::Q(2),
                _ => return None,
            };
            StateSource::Link { link: id, quantity }
        }
        _ => match field.as_str() {
            // relay accumulators read their own differential state
            "i2t" | "cti" | "trigger_proximity" if comp.kind.as_relay().is_some() => {
                StateSource::RelayDiffState(id)
            }
            _ => return None,
        },
    };
    Some(StateGrabber {
        source,
        gain: 1.0,
        bias: 0.0,
    })
}

fn compose_state(op: BinaryOp, a: StateGrabber, b: StateGrabber) -> StateGrabber {
    let a_const = matches!(a.source, StateSource::Constant).then_some(a.bias);
    let b_const = matches!(b.source, StateSource::Constant).then_some(b.bias);
    match (a_const, b_const) {
        (_, Some(vb)) => {
            let mut g = a;
            match op {
                BinaryOp::Add => {
                    g.bias += vb;
                    return g;
                }
                BinaryOp::Sub => {
                    g.bias -= vb;
                    return g;
                }
                BinaryOp::Mul => {
                    g.gain *= vb;
                    g.bias *= vb;
                    return g;
                }
                BinaryOp::Div => {
                    g.gain /= vb;
                    g.bias /= vb;
                    return g;
                }
                BinaryOp::Pow => {}
            }
            state_op_node(op, g, StateGrabber::constant(vb))
        }
        (Some(va), None) => {
            let mut g = b;
            match op {
                BinaryOp::Add => {
                    g.bias += va;
                    return g;
                }
                BinaryOp::Sub => {
                    g.gain = -g.gain;
                    g.bias = va - g.bias;
                    return g;
                }
                BinaryOp::Mul => {
                    g.gain *= va;
                    g.bias *= va;
                    return g;
                }
                BinaryOp::Div | BinaryOp::Pow => {}
            }
            state_op_node(op, StateGrabber::constant(va), g)
        }
        _ => state_op_node(op, a, b),
    }
}

fn state_op_node(op: BinaryOp, a: StateGrabber, b: StateGrabber) -> StateGrabber {
    StateGrabber {
        source: StateSource::Op {
            op,
            a: Box::new(a),
            b: Box::new(b),
        },
        gain: 1.0,
        bias: 0.0,
    }
}
