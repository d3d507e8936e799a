//! Measurement units for the set/get and grabber surfaces.
//!
//! The engine computes in per-unit throughout; units exist at the edges to
//! convert user-supplied parameters and grabber outputs. Conversions that
//! need a system base take it as an argument rather than from global state.

use serde::{Deserialize, Serialize};

/// Default system base power in MVA when none is configured.
pub const DEFAULT_BASE_POWER: f64 = 100.0;

/// Default system frequency in Hz.
pub const DEFAULT_BASE_FREQUENCY: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// No conversion requested.
    #[default]
    Def,
    PerUnit,
    Volt,
    Kilovolt,
    Megawatt,
    Megavar,
    Watt,
    PuAmp,
    Amp,
    Radian,
    Degree,
    Second,
    Minute,
    Hour,
    Hertz,
    PuHertz,
    Celsius,
}

impl Unit {
    pub fn from_name(name: &str) -> Option<Unit> {
        match name.to_ascii_lowercase().as_str() {
            "def" | "defunit" => Some(Unit::Def),
            "pu" | "perunit" | "puv" | "pumw" => Some(Unit::PerUnit),
            "v" | "volt" => Some(Unit::Volt),
            "kv" | "kilovolt" => Some(Unit::Kilovolt),
            "mw" | "megawatt" => Some(Unit::Megawatt),
            "mvar" | "megavar" => Some(Unit::Megavar),
            "w" | "watt" => Some(Unit::Watt),
            "pua" | "puamp" => Some(Unit::PuAmp),
            "a" | "amp" | "ampere" => Some(Unit::Amp),
            "rad" | "radian" => Some(Unit::Radian),
            "deg" | "degree" => Some(Unit::Degree),
            "s" | "sec" | "second" => Some(Unit::Second),
            "min" | "minute" => Some(Unit::Minute),
            "h" | "hour" => Some(Unit::Hour),
            "hz" | "hertz" => Some(Unit::Hertz),
            "puhz" => Some(Unit::PuHertz),
            "c" | "degc" | "celsius" => Some(Unit::Celsius),
            _ => None,
        }
    }
}

/// Bases needed by per-unit conversions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UnitBases {
    /// System base power in MVA.
    pub power: f64,
    /// Local base voltage in kV.
    pub voltage: f64,
    /// System frequency in Hz.
    pub frequency: f64,
}

impl Default for UnitBases {
    fn default() -> Self {
        UnitBases {
            power: DEFAULT_BASE_POWER,
            voltage: 120.0,
            frequency: DEFAULT_BASE_FREQUENCY,
        }
    }
}

/// Convert `value` from `from` to `to`. Unsupported pairs return the value
/// unchanged; callers validate unit kinds at the parameter surface.
pub fn convert(value: f64, from: Unit, to: Unit, bases: UnitBases) -> f64 {
    use Unit::*;
    if from == to || from == Def || to == Def {
        return value;
    }
    match (from, to) {
        // angle
        (Degree, Radian) => value.to_radians(),
        (Radian, Degree) => value.to_degrees(),
        // power
        (Megawatt, PerUnit) | (Megavar, PerUnit) => value / bases.power,
        (PerUnit, Megawatt) | (PerUnit, Megavar) => value * bases.power,
        (Watt, PerUnit) => value / (bases.power * 1e6),
        (PerUnit, Watt) => value * bases.power * 1e6,
        (Watt, Megawatt) => value / 1e6,
        (Megawatt, Watt) => value * 1e6,
        // voltage
        (Kilovolt, PerUnit) => value / bases.voltage,
        (PerUnit, Kilovolt) => value * bases.voltage,
        (Volt, Kilovolt) => value / 1000.0,
        (Kilovolt, Volt) => value * 1000.0,
        (Volt, PerUnit) => value / (bases.voltage * 1000.0),
        (PerUnit, Volt) => value * bases.voltage * 1000.0,
        // current: base current in kA is power / voltage
        (Amp, PuAmp) => value * bases.voltage / (bases.power * 1000.0),
        (PuAmp, Amp) => value * bases.power * 1000.0 / bases.voltage,
        (PerUnit, PuAmp) | (PuAmp, PerUnit) => value,
        // time
        (Minute, Second) => value * 60.0,
        (Second, Minute) => value / 60.0,
        (Hour, Second) => value * 3600.0,
        (Second, Hour) => value / 3600.0,
        (Hour, Minute) => value * 60.0,
        (Minute, Hour) => value / 60.0,
        // frequency
        (Hertz, PuHertz) => value / bases.frequency,
        (PuHertz, Hertz) => value * bases.frequency,
        (PerUnit, Hertz) => value * bases.frequency,
        (Hertz, PerUnit) => value / bases.frequency,
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_conversion() {
        let bases = UnitBases::default();
        let rad = convert(180.0, Unit::Degree, Unit::Radian, bases);
        assert!((rad - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn power_conversion() {
        let bases = UnitBases::default();
        assert_eq!(convert(50.0, Unit::Megawatt, Unit::PerUnit, bases), 0.5);
        assert_eq!(convert(0.5, Unit::PerUnit, Unit::Megawatt, bases), 50.0);
    }

    #[test]
    fn time_conversion() {
        let bases = UnitBases::default();
        assert_eq!(convert(2.0, Unit::Minute, Unit::Second, bases), 120.0);
        assert_eq!(convert(1.0, Unit::Hour, Unit::Minute, bases), 60.0);
    }

    #[test]
    fn def_passthrough() {
        let bases = UnitBases::default();
        assert_eq!(convert(3.5, Unit::Def, Unit::Megawatt, bases), 3.5);
        assert_eq!(convert(3.5, Unit::Kilovolt, Unit::Def, bases), 3.5);
    }

    #[test]
    fn unit_names() {
        assert_eq!(Unit::from_name("kV"), Some(Unit::Kilovolt));
        assert_eq!(Unit::from_name("deg"), Some(Unit::Degree));
        assert_eq!(Unit::from_name("furlong"), None);
    }
}
