//! Single-value extractors over live objects.

use grid_base::{is_null, Unit, NULL_VAL};
use grid_expr::BinaryOp;

use crate::network::Network;
use crate::object::ObjectId;

/// Where a grabber's raw value comes from.
#[derive(Debug, Clone)]
pub enum GrabberSource {
    /// Raw value 0; the configured bias carries the constant.
    Constant,
    /// A named field on a target object.
    Field {
        target: Option<ObjectId>,
        field: String,
        units: Unit,
    },
    /// One-argument registered function.
    Func1 {
        name: String,
        func: fn(f64) -> f64,
        arg: Box<Grabber>,
    },
    /// Two-argument registered function.
    Func2 {
        name: String,
        func: fn(f64, f64) -> f64,
        a: Box<Grabber>,
        b: Box<Grabber>,
    },
    /// Arithmetic composition of two grabbers.
    Op {
        op: BinaryOp,
        a: Box<Grabber>,
        b: Box<Grabber>,
    },
}

/// A composable scalar extractor: `value = raw(target) * gain + bias`.
#[derive(Debug, Clone)]
pub struct Grabber {
    pub source: GrabberSource,
    pub gain: f64,
    pub bias: f64,
    pub desc: String,
}

impl Grabber {
    pub fn constant(value: f64) -> Grabber {
        Grabber {
            source: GrabberSource::Constant,
            gain: 1.0,
            bias: value,
            desc: format!("{value}"),
        }
    }

    pub fn field(target: Option<ObjectId>, field: &str, units: Unit) -> Grabber {
        Grabber {
            source: GrabberSource::Field {
                target,
                field: field.to_string(),
                units,
            },
            gain: 1.0,
            bias: 0.0,
            desc: field.to_string(),
        }
    }

    /// Fetch the value. Dead targets and unknown fields produce the null
    /// sentinel, which propagates through compositions.
    pub fn grab(&self, net: &Network) -> f64 {
        let raw = match &self.source {
            GrabberSource::Constant => 0.0,
            GrabberSource::Field {
                target,
                field,
                units,
            } => match target {
                Some(id) => net.get_value(*id, field, *units),
                None => NULL_VAL,
            },
            GrabberSource::Func1 { func, arg, .. } => {
                let v = arg.grab(net);
                if is_null(v) {
                    return NULL_VAL;
                }
                func(v)
            }
            GrabberSource::Func2 { func, a, b, .. } => {
                let va = a.grab(net);
                let vb = b.grab(net);
                if is_null(va) || is_null(vb) {
                    return NULL_VAL;
                }
                func(va, vb)
            }
            GrabberSource::Op { op, a, b } => {
                let va = a.grab(net);
                let vb = b.grab(net);
                if is_null(va) || is_null(vb) {
                    return NULL_VAL;
                }
                op.apply(va, vb)
            }
        };
        if is_null(raw) {
            return NULL_VAL;
        }
        raw * self.gain + self.bias
    }

    /// Whether the grabber currently resolves to a live target.
    pub fn is_loaded(&self, net: &Network) -> bool {
        match &self.source {
            GrabberSource::Constant => true,
            GrabberSource::Field { target, .. } => {
                target.map(|id| net.contains(id)).unwrap_or(false)
            }
            GrabberSource::Func1 { arg, .. } => arg.is_loaded(net),
            GrabberSource::Func2 { a, b, .. } | GrabberSource::Op { a, b, .. } => {
                a.is_loaded(net) && b.is_loaded(net)
            }
        }
    }

    /// The primary object this grabber reads, if there is exactly one
    /// natural choice (the left-most field target).
    pub fn object(&self) -> Option<ObjectId> {
        match &self.source {
            GrabberSource::Constant => None,
            GrabberSource::Field { target, .. } => *target,
            GrabberSource::Func1 { arg, .. } => arg.object(),
            GrabberSource::Func2 { a, b, .. } | GrabberSource::Op { a, b, .. } => {
                a.object().or_else(|| b.object())
            }
        }
    }

    /// Collect every object referenced by the composition.
    pub fn objects(&self, out: &mut Vec<ObjectId>) {
        match &self.source {
            GrabberSource::Constant => {}
            GrabberSource::Field { target, .. } => {
                if let Some(id) = target {
                    if !out.contains(id) {
                        out.push(*id);
                    }
                }
            }
            GrabberSource::Func1 { arg, .. } => arg.objects(out),
            GrabberSource::Func2 { a, b, .. } | GrabberSource::Op { a, b, .. } => {
                a.objects(out);
                b.objects(out);
            }
        }
    }

    /// Re-point every field target using the supplied mapper; used by
    /// clone remapping and `update_object`. Returns false if any mapping
    /// failed (caller rolls back).
    pub fn retarget(&mut self, mapper: &mut dyn FnMut(ObjectId) -> Option<ObjectId>) -> bool {
        match &mut self.source {
            GrabberSource::Constant => true,
            GrabberSource::Field { target, .. } => match target {
                Some(id) => match mapper(*id) {
                    Some(new_id) => {
                        *target = Some(new_id);
                        true
                    }
                    None => false,
                },
                None => true,
            },
            GrabberSource::Func1 { arg, .. } => arg.retarget(mapper),
            GrabberSource::Func2 { a, b, .. } | GrabberSource::Op { a, b, .. } => {
                a.retarget(mapper) && b.retarget(mapper)
            }
        }
    }
}
