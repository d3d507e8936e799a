//! Loads.
//!
//! The ZIP load combines constant-power, constant-current, and
//! constant-impedance terms. An aggregate load splits its totals across
//! owned sub-loads by fraction. The approximating load farms its P/Q out
//! to an external computation through an explicit submit/consume state
//! machine: the `A` half of each phase submits, the matching `B` half
//! blocks on the result.

use grid_base::{Alert, ObjectError, OpFlags};
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use tracing::debug;

use crate::network::Network;
use crate::object::ObjectId;

/// Aggregate bookkeeping: owned sub-loads and their share of the totals.
/// A fraction below zero means "unspecified"; initialization splits the
/// remainder evenly across those entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatePart {
    pub sub_loads: Vec<ObjectId>,
    pub fractions: Vec<f64>,
    /// Absorb the largest other load on the bus at initialization.
    pub consume_simple_load: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Load {
    /// Constant-power terms (pu).
    pub p: f64,
    pub q: f64,
    /// Constant-current coefficients.
    pub ip: f64,
    pub iq: f64,
    /// Constant-impedance coefficients.
    pub yp: f64,
    pub yq: f64,
    /// Present when this load aggregates component sub-loads.
    pub aggregate: Option<AggregatePart>,
    #[serde(skip)]
    pub approx: Option<ApproximatingLoad>,
}

impl Load {
    pub fn constant_power(p: f64, q: f64) -> Load {
        Load {
            p,
            q,
            ..Load::default()
        }
    }

    pub fn aggregate() -> Load {
        Load {
            aggregate: Some(AggregatePart::default()),
            ..Load::default()
        }
    }

    /// Power drawn at the given voltage.
    pub fn power_at(&self, voltage: f64) -> (f64, f64) {
        let p = self.p + self.ip * voltage + self.yp * voltage * voltage;
        let q = self.q + self.iq * voltage + self.yq * voltage * voltage;
        (p, q)
    }

    /// (dP/dV, dQ/dV) at the given voltage.
    pub fn partials_at(&self, voltage: f64) -> (f64, f64) {
        (
            self.ip + 2.0 * self.yp * voltage,
            self.iq + 2.0 * self.yq * voltage,
        )
    }
}

/// Power drawn by a load component at a voltage, honoring enable state.
/// Aggregate loads report the sum of their sub-loads.
pub fn load_power(net: &Network, id: ObjectId, voltage: f64) -> Option<(f64, f64)> {
    let comp = net.get(id)?;
    if !comp.info.is_enabled() || comp.info.is_disconnected() {
        return Some((0.0, 0.0));
    }
    let load = comp.kind.as_load()?;
    if let Some(part) = &load.aggregate {
        if !part.sub_loads.is_empty() {
            let mut total = (0.0, 0.0);
            for sub in &part.sub_loads {
                if let Some((p, q)) = load_power(net, *sub, voltage) {
                    total.0 += p;
                    total.1 += q;
                }
            }
            return Some(total);
        }
    }
    if let Some(approx) = &load.approx {
        if let Some((p, q)) = approx.last_result() {
            return Some((p, q));
        }
    }
    Some(load.power_at(voltage))
}

/// Voltage partials of a load component.
pub fn load_partials(net: &Network, id: ObjectId, voltage: f64) -> Option<(f64, f64)> {
    let comp = net.get(id)?;
    if !comp.info.is_enabled() || comp.info.is_disconnected() {
        return Some((0.0, 0.0));
    }
    let load = comp.kind.as_load()?;
    if let Some(part) = &load.aggregate {
        if !part.sub_loads.is_empty() {
            let mut total = (0.0, 0.0);
            for sub in &part.sub_loads {
                if let Some((dp, dq)) = load_partials(net, *sub, voltage) {
                    total.0 += dp;
                    total.1 += dq;
                }
            }
            return Some(total);
        }
    }
    Some(load.partials_at(voltage))
}

// ============================================================================
// Aggregate load
// ============================================================================

/// Attach a component sub-load under an aggregate load. A negative or
/// missing fraction marks the share as unspecified.
pub fn add_sub_load(
    net: &mut Network,
    aggregate: ObjectId,
    sub: ObjectId,
    fraction: Option<f64>,
) -> Result<(), ObjectError> {
    if net.load(sub).is_none() {
        return Err(ObjectError::UnrecognizedObject(
            net.get(sub)
                .map(|c| c.kind.type_name())
                .unwrap_or("unknown")
                .to_string(),
        ));
    }
    if net.get(sub).and_then(|c| c.info.parent).is_some() {
        return Err(ObjectError::AddFailure(
            "object already has a parent".to_string(),
        ));
    }
    {
        let Some(load) = net.load_mut(aggregate) else {
            return Err(ObjectError::StaleHandle);
        };
        let part = load.aggregate.get_or_insert_with(AggregatePart::default);
        part.sub_loads.push(sub);
        part.fractions.push(fraction.unwrap_or(-1.0));
    }
    if let Some(c) = net.get_mut(sub) {
        c.info.parent = Some(aggregate);
    }
    net.alert(aggregate, Alert::StateCountChange);
    Ok(())
}

/// Distribute the aggregate's totals across its sub-loads: explicit
/// fractions take their share, the remainder splits evenly across the
/// unspecified entries. With `consume_simple_load` set, the largest other
/// load on the bus is absorbed first and disabled.
pub fn initialize_aggregate(net: &mut Network, id: ObjectId) {
    let Some(part) = net.load(id).and_then(|l| l.aggregate.clone()) else {
        return;
    };

    if part.consume_simple_load {
        let bus = net.get(id).and_then(|c| c.info.parent);
        let siblings: Vec<ObjectId> = bus
            .and_then(|b| net.bus(b))
            .map(|b| b.loads.clone())
            .unwrap_or_default();
        let mut best: Option<(ObjectId, f64)> = None;
        for sib in siblings {
            if sib == id {
                continue;
            }
            let Some(sl) = net.load(sib) else { continue };
            let magnitude = sl.p.abs();
            if best.map(|(_, m)| magnitude > m).unwrap_or(magnitude > 0.0) {
                best = Some((sib, magnitude));
            }
        }
        if let Some((victim, _)) = best {
            let absorbed = net.load(victim).cloned();
            if let (Some(src), Some(dst)) = (absorbed, net.load_mut(id)) {
                dst.p = src.p;
                dst.q = src.q;
                dst.ip = src.ip;
                dst.iq = src.iq;
                dst.yp = src.yp;
                dst.yq = src.yq;
            }
            debug!(aggregate = %id, absorbed = %victim, "aggregate load absorbed simple load");
            if let Some(c) = net.get_mut(victim) {
                c.info.flags.remove(OpFlags::ENABLED);
            }
            net.alert(victim, Alert::StateCountChange);
        }
    }

    let Some(base) = net.load(id).cloned() else { return };
    let Some(part) = net.load(id).and_then(|l| l.aggregate.clone()) else {
        return;
    };

    let mut remainder = 1.0;
    for fraction in &part.fractions {
        if *fraction > 0.0 {
            remainder -= fraction;
        }
    }
    let unspecified = part.fractions.iter().filter(|f| **f < 0.0).count();
    let even_share = if unspecified > 0 {
        remainder / unspecified as f64
    } else {
        0.0
    };

    let mut resolved = part.fractions.clone();
    for (index, sub) in part.sub_loads.iter().enumerate() {
        let share = if resolved[index] > 0.0 {
            resolved[index]
        } else {
            resolved[index] = even_share;
            even_share
        };
        if let Some(sl) = net.load_mut(*sub) {
            sl.p = base.p * share;
            sl.q = base.q * share;
            sl.ip = base.ip * share;
            sl.iq = base.iq * share;
            sl.yp = base.yp * share;
            sl.yq = base.yq * share;
        }
    }
    if let Some(load) = net.load_mut(id) {
        if let Some(p) = &mut load.aggregate {
            p.fractions = resolved;
        }
    }
}

// ============================================================================
// Approximating load
// ============================================================================

type ApproxFn = Arc<dyn Fn(f64, f64) -> (f64, f64) + Send + Sync>;

enum ApproxJob {
    Compute {
        voltage: f64,
        angle: f64,
        reply: mpsc::Sender<(f64, f64)>,
    },
    Shutdown,
}

/// Handle to the worker that evaluates approximating-load requests.
#[derive(Clone)]
pub struct ApproxExecutor {
    tx: mpsc::Sender<ApproxJob>,
}

impl ApproxExecutor {
    /// Spawn a worker thread evaluating `func`.
    pub fn spawn(func: ApproxFn) -> ApproxExecutor {
        let (tx, rx) = mpsc::channel::<ApproxJob>();
        thread::spawn(move || {
            while let Ok(job) = rx.recv() {
                match job {
                    ApproxJob::Compute {
                        voltage,
                        angle,
                        reply,
                    } => {
                        let result = func(voltage, angle);
                        // receiver may be gone if the load was dropped
                        let _ = reply.send(result);
                    }
                    ApproxJob::Shutdown => break,
                }
            }
        });
        ApproxExecutor { tx }
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ApproxJob::Shutdown);
    }
}

/// Request lifecycle for one submit/consume pair.
enum RequestState {
    Idle,
    Pending(mpsc::Receiver<(f64, f64)>),
}

/// A load whose P/Q come from an externally computed approximation.
pub struct ApproximatingLoad {
    executor: ApproxExecutor,
    request: RequestState,
    last: Option<(f64, f64)>,
}

impl std::fmt::Debug for ApproximatingLoad {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApproximatingLoad")
            .field("pending", &matches!(self.request, RequestState::Pending(_)))
            .field("last", &self.last)
            .finish()
    }
}

impl Clone for ApproximatingLoad {
    fn clone(&self) -> Self {
        // pending requests do not survive a clone; the clone starts idle
        ApproximatingLoad {
            executor: self.executor.clone(),
            request: RequestState::Idle,
            last: self.last,
        }
    }
}

impl ApproximatingLoad {
    pub fn new(executor: ApproxExecutor) -> ApproximatingLoad {
        ApproximatingLoad {
            executor,
            request: RequestState::Idle,
            last: None,
        }
    }

    /// Submit the computation for the current operating point. Must be
    /// followed by `consume` before the next submit.
    pub fn submit(&mut self, voltage: f64, angle: f64) -> Result<(), ObjectError> {
        if matches!(self.request, RequestState::Pending(_)) {
            return Err(ObjectError::ExecutionFailure(
                "approximation already submitted".to_string(),
            ));
        }
        let (reply_tx, reply_rx) = mpsc::channel();
        self.executor
            .tx
            .send(ApproxJob::Compute {
                voltage,
                angle,
                reply: reply_tx,
            })
            .map_err(|_| ObjectError::ExecutionFailure("approximation worker gone".to_string()))?;
        self.request = RequestState::Pending(reply_rx);
        Ok(())
    }

    /// Block on the previously submitted computation. Calling without a
    /// matching `submit` is a contract violation and fails.
    pub fn consume(&mut self) -> Result<(f64, f64), ObjectError> {
        match std::mem::replace(&mut self.request, RequestState::Idle) {
            RequestState::Idle => Err(ObjectError::ExecutionFailure(
                "consume without a submitted approximation".to_string(),
            )),
            RequestState::Pending(rx) => {
                let result = rx.recv().map_err(|_| {
                    ObjectError::ExecutionFailure("approximation worker gone".to_string())
                })?;
                self.last = Some(result);
                Ok(result)
            }
        }
    }

    pub fn last_result(&self) -> Option<(f64, f64)> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_load_power() {
        let load = Load {
            p: 0.5,
            q: 0.1,
            ip: 0.2,
            iq: 0.0,
            yp: 0.1,
            yq: 0.05,
            approx: None,
        };
        let (p, q) = load.power_at(1.0);
        assert!((p - 0.8).abs() < 1e-12);
        assert!((q - 0.15).abs() < 1e-12);
        let (dp, dq) = load.partials_at(1.0);
        assert!((dp - 0.4).abs() < 1e-12);
        assert!((dq - 0.1).abs() < 1e-12);
    }

    #[test]
    fn approximating_load_round_trip() {
        let exec = ApproxExecutor::spawn(Arc::new(|v, a| (v * 2.0, a + 1.0)));
        let mut approx = ApproximatingLoad::new(exec.clone());
        approx.submit(0.5, 0.1).unwrap();
        let (p, q) = approx.consume().unwrap();
        assert_eq!(p, 1.0);
        assert!((q - 1.1).abs() < 1e-12);
        assert_eq!(approx.last_result(), Some((1.0, 1.1)));
        exec.shutdown();
    }

    #[test]
    fn consume_without_submit_fails() {
        let exec = ApproxExecutor::spawn(Arc::new(|v, _| (v, 0.0)));
        let mut approx = ApproximatingLoad::new(exec.clone());
        assert!(approx.consume().is_err());
        approx.submit(1.0, 0.0).unwrap();
        assert!(approx.submit(1.0, 0.0).is_err());
        approx.consume().unwrap();
        exec.shutdown();
    }

    mod aggregate {
        use super::super::*;
        use crate::bus::Bus;
        use crate::component::ComponentKind;

        fn bus_with_aggregate() -> (Network, ObjectId, ObjectId) {
            let mut net = Network::new();
            let bus = net.insert(ComponentKind::Bus(Bus::new()), Some("b".to_string()));
            let agg = net
                .add_child(bus, ComponentKind::Load(Load::aggregate()), None)
                .unwrap();
            (net, bus, agg)
        }

        #[test]
        fn fractions_distribute_and_remainder_splits_evenly() {
            let (mut net, _bus, agg) = bus_with_aggregate();
            {
                let l = net.load_mut(agg).unwrap();
                l.p = 1.0;
                l.q = 0.4;
            }
            let s1 = net.insert(ComponentKind::Load(Load::default()), None);
            let s2 = net.insert(ComponentKind::Load(Load::default()), None);
            let s3 = net.insert(ComponentKind::Load(Load::default()), None);
            add_sub_load(&mut net, agg, s1, Some(0.5)).unwrap();
            add_sub_load(&mut net, agg, s2, None).unwrap();
            add_sub_load(&mut net, agg, s3, None).unwrap();

            initialize_aggregate(&mut net, agg);

            assert!((net.load(s1).unwrap().p - 0.5).abs() < 1e-12);
            // the remaining half splits across the two unspecified entries
            assert!((net.load(s2).unwrap().p - 0.25).abs() < 1e-12);
            assert!((net.load(s3).unwrap().p - 0.25).abs() < 1e-12);
            assert!((net.load(s2).unwrap().q - 0.1).abs() < 1e-12);

            // the aggregate reports the sub-load total, not double
            let (p, q) = load_power(&net, agg, 1.0).unwrap();
            assert!((p - 1.0).abs() < 1e-12);
            assert!((q - 0.4).abs() < 1e-12);
        }

        #[test]
        fn consume_simple_load_absorbs_the_largest_sibling() {
            let (mut net, bus, agg) = bus_with_aggregate();
            net.load_mut(agg).unwrap().aggregate.as_mut().unwrap().consume_simple_load = true;
            let small = net
                .add_child(bus, ComponentKind::Load(Load::constant_power(0.1, 0.0)), None)
                .unwrap();
            let big = net
                .add_child(bus, ComponentKind::Load(Load::constant_power(0.8, 0.2)), None)
                .unwrap();
            let sub = net.insert(ComponentKind::Load(Load::default()), None);
            add_sub_load(&mut net, agg, sub, None).unwrap();

            initialize_aggregate(&mut net, agg);

            // absorbed the big load's totals and disabled it
            assert!((net.load(agg).unwrap().p - 0.8).abs() < 1e-12);
            assert!(!net.get(big).unwrap().info.is_enabled());
            assert!(net.get(small).unwrap().info.is_enabled());
            assert!((net.load(sub).unwrap().p - 0.8).abs() < 1e-12);
        }

        #[test]
        fn sub_load_attachment_rules() {
            let (mut net, bus, agg) = bus_with_aggregate();
            // only loads attach under an aggregate
            let gen = net.insert(
                ComponentKind::Generator(crate::generator::Generator::default()),
                None,
            );
            assert!(add_sub_load(&mut net, agg, gen, None).is_err());
            // an already-owned load is rejected
            let owned = net
                .add_child(bus, ComponentKind::Load(Load::default()), None)
                .unwrap();
            assert!(add_sub_load(&mut net, agg, owned, None).is_err());
        }
    }
}
