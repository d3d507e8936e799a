//! Field-assignment events.
//!
//! An event writes a value into a target field at a scheduled time.
//! Execution is idempotent per (time, field): a one-shot event disarms on
//! execution, and a cancelled (disarmed) event reports no change forever.

use grid_base::{ChangeCode, ObjectError, Time, Unit};
use grid_expr::EventSpec;
use tracing::warn;

use crate::network::Network;
use crate::object::ObjectId;

#[derive(Debug, Clone)]
pub struct Event {
    pub target: Option<ObjectId>,
    pub field: String,
    pub units: Unit,
    pub value: f64,
    pub time: Time,
    /// Zero = fire once.
    pub period: Time,
    pub armed: bool,
}

impl Event {
    pub fn new(target: ObjectId, field: &str, value: f64) -> Event {
        Event {
            target: Some(target),
            field: field.to_string(),
            units: Unit::Def,
            value,
            time: Time::ZERO,
            period: Time::ZERO,
            armed: true,
        }
    }

    /// Build from a parsed event string, resolving the object path from
    /// `default_target`.
    pub fn from_spec(
        spec: &EventSpec,
        net: &Network,
        default_target: ObjectId,
    ) -> Result<Event, ObjectError> {
        match spec {
            EventSpec::Assignment {
                object,
                field,
                units,
                value,
                time,
            } => {
                let target = match object {
                    Some(path) => net.locate(path, default_target),
                    None => Some(default_target),
                };
                if target.is_none() {
                    return Err(ObjectError::Expression(format!(
                        "cannot resolve event target '{}'",
                        object.as_deref().unwrap_or("")
                    )));
                }
                Ok(Event {
                    target,
                    field: field.clone(),
                    units: units
                        .as_deref()
                        .and_then(Unit::from_name)
                        .unwrap_or(Unit::Def),
                    value: *value,
                    time: time.map(Time::seconds).unwrap_or(Time::ZERO),
                    period: Time::ZERO,
                    armed: true,
                })
            }
            EventSpec::Alarm { .. } => Err(ObjectError::Expression(
                "alarm strings build relay actions, not events".to_string(),
            )),
        }
    }

    pub fn with_time(mut self, time: Time) -> Event {
        self.time = time;
        self
    }

    pub fn with_period(mut self, period: Time) -> Event {
        self.period = period;
        self
    }

    pub fn set_target(&mut self, target: ObjectId, field: &str) {
        self.target = Some(target);
        self.field = field.to_string();
    }

    pub fn set_value(&mut self, value: f64) {
        self.value = value;
    }

    /// Cancel in place; the next execute reports no change.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    pub fn next_time(&self) -> Time {
        if self.armed {
            self.time
        } else {
            Time::MAX
        }
    }

    /// Apply the assignment. Failures are captured as an execution-failure
    /// change code rather than propagated; the driver aggregates them.
    pub fn execute(&mut self, net: &mut Network, _time: Time) -> ChangeCode {
        if !self.armed {
            return ChangeCode::NoChange;
        }
        if self.period <= Time::ZERO {
            self.armed = false;
        } else {
            self.time += self.period;
        }
        let Some(target) = self.target else {
            return ChangeCode::ExecutionFailure;
        };
        match net.set_value(target, &self.field, self.value, self.units) {
            Ok(code) => code,
            Err(err) => {
                warn!(target = %target, field = %self.field, error = %err, "event execution failed");
                ChangeCode::ExecutionFailure
            }
        }
    }
}
