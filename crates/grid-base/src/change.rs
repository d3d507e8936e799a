//! Change codes, alerts, and print levels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregated outcome of an event or relay action.
///
/// Ordered by severity so a batch of actions can be folded with `max`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCode {
    NotTriggered,
    #[default]
    NoChange,
    NonStateChange,
    ParameterChange,
    StateChange,
    JacobianChange,
    ExecutionFailure,
}

impl ChangeCode {
    /// Fold another outcome in, keeping the worst.
    pub fn absorb(&mut self, other: ChangeCode) {
        if other > *self {
            *self = other;
        }
    }
}

/// Bottom-up notification from a component to its parents and ultimately
/// the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    // Structural change alerts; parents unload offsets on these.
    StateCountChange,
    JacCountChange,
    RootCountChange,
    ObjectCountChange,
    SlackBusChange,
    ConstraintCountChange,
    /// The residual path observed an invalid state.
    InvalidState,

    // Scheduling alerts; the simulation adjusts the event queue.
    UpdateTimeChange,
    UpdateRequired,
    UpdateNotRequired,

    // Named fault codes; logged at summary level.
    VeryLowVoltage,
    BusUnderVoltage,
    BusUnderFrequency,
    LoadTrip,
    Switch1Open,
    Switch1Close,
    Switch2Open,
    Switch2Close,
    BreakerTripCurrent,
    BreakerReclose,
    FuseBlownCurrent,
    FuseBlown,
    TemperatureAlarm1,
    TemperatureAlarm2,
    TemperatureCutout,
    /// Relay alarm with an application code.
    AlarmTrigger(u32),
}

impl Alert {
    /// True for alerts that invalidate state/Jacobian/root layouts.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Alert::StateCountChange
                | Alert::JacCountChange
                | Alert::RootCountChange
                | Alert::ObjectCountChange
                | Alert::SlackBusChange
                | Alert::ConstraintCountChange
        )
    }

    /// True for alerts that affect event-queue scheduling.
    pub fn is_scheduling(&self) -> bool {
        matches!(
            self,
            Alert::UpdateTimeChange | Alert::UpdateRequired | Alert::UpdateNotRequired
        )
    }

    /// Log string for fault-code alerts, mirroring the operator-facing
    /// summary messages.
    pub fn description(&self) -> Option<&'static str> {
        match self {
            Alert::VeryLowVoltage => Some("very low voltage"),
            Alert::BusUnderVoltage => Some("bus low voltage"),
            Alert::BusUnderFrequency => Some("bus under frequency"),
            Alert::LoadTrip => Some("load trip"),
            Alert::Switch1Open => Some("switch 1 open"),
            Alert::Switch1Close => Some("switch 1 close"),
            Alert::Switch2Open => Some("switch 2 open"),
            Alert::Switch2Close => Some("switch 2 close"),
            Alert::BreakerTripCurrent => Some("breaker trip from current limit"),
            Alert::BreakerReclose => Some("breaker reclose"),
            Alert::FuseBlownCurrent => Some("fuse blown from current limit"),
            Alert::FuseBlown => Some("fuse blown"),
            Alert::TemperatureAlarm1 => Some("temperature alarm level 1"),
            Alert::TemperatureAlarm2 => Some("temperature alarm level 2"),
            Alert::TemperatureCutout => Some("temperature cutout"),
            _ => None,
        }
    }
}

/// Log filtering levels, most severe first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PrintLevel {
    NoPrint,
    Error,
    Warning,
    #[default]
    Summary,
    Normal,
    Debug,
    Trace,
}

impl PrintLevel {
    pub fn from_name(name: &str) -> Option<PrintLevel> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "no_print" | "noprint" => Some(PrintLevel::NoPrint),
            "error" => Some(PrintLevel::Error),
            "warning" | "warn" => Some(PrintLevel::Warning),
            "summary" => Some(PrintLevel::Summary),
            "normal" => Some(PrintLevel::Normal),
            "debug" => Some(PrintLevel::Debug),
            "trace" => Some(PrintLevel::Trace),
            _ => None,
        }
    }
}

impl fmt::Display for PrintLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = format!("{self:?}").to_ascii_lowercase();
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_code_ordering() {
        assert!(ChangeCode::NoChange < ChangeCode::ParameterChange);
        assert!(ChangeCode::ParameterChange < ChangeCode::StateChange);
        assert!(ChangeCode::StateChange < ChangeCode::JacobianChange);
        assert!(ChangeCode::JacobianChange < ChangeCode::ExecutionFailure);
    }

    #[test]
    fn absorb_keeps_worst() {
        let mut code = ChangeCode::NoChange;
        code.absorb(ChangeCode::JacobianChange);
        code.absorb(ChangeCode::ParameterChange);
        assert_eq!(code, ChangeCode::JacobianChange);
    }

    #[test]
    fn alert_classification() {
        assert!(Alert::JacCountChange.is_structural());
        assert!(Alert::UpdateRequired.is_scheduling());
        assert!(!Alert::BreakerTripCurrent.is_structural());
        assert!(Alert::BreakerTripCurrent.description().is_some());
    }

    #[test]
    fn print_level_parse() {
        assert_eq!(PrintLevel::from_name("WARNING"), Some(PrintLevel::Warning));
        assert_eq!(PrintLevel::from_name("trace"), Some(PrintLevel::Trace));
        assert_eq!(PrintLevel::from_name("loud"), None);
        assert!(PrintLevel::Error < PrintLevel::Debug);
    }
}
