//! Filter blocks for sensors.
//!
//! Each block is a single-state transfer element exposing the same
//! contract: an output, a state derivative, a residual contribution for
//! continuous operation, and a sampled `step`. The block math here covers
//! the three shapes the sensor chain needs (integrator, first-order lag,
//! washout derivative); richer transfer functions live behind the same
//! contract in concrete models.

use grid_base::ObjectError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FilterBlock {
    /// dx/dt = gain * u; output = x.
    Integral { gain: f64, state: f64 },
    /// dx/dt = (gain * u - x) / t1; output = x.
    Delay { t1: f64, gain: f64, state: f64 },
    /// Washout: output = (gain * u - x) / t1; dx/dt = output.
    Derivative { t1: f64, gain: f64, state: f64 },
}

impl FilterBlock {
    pub fn integral(gain: f64) -> FilterBlock {
        FilterBlock::Integral { gain, state: 0.0 }
    }

    pub fn delay(t1: f64, gain: f64) -> FilterBlock {
        FilterBlock::Delay {
            t1,
            gain,
            state: 0.0,
        }
    }

    pub fn derivative(t1: f64) -> FilterBlock {
        FilterBlock::Derivative {
            t1,
            gain: 1.0,
            state: 0.0,
        }
    }

    /// Parse a block specification: `integral(gain=0.5)`, `delay(t=0.2)`,
    /// `derivative(t=0.05, gain=2)`, or a bare block name.
    pub fn from_spec(spec: &str) -> Result<FilterBlock, ObjectError> {
        let spec = spec.trim();
        let (name, args) = match spec.split_once('(') {
            Some((name, rest)) => {
                let inner = rest.trim_end().strip_suffix(')').ok_or_else(|| {
                    ObjectError::InvalidParameterValue(
                        "filter".to_string(),
                        format!("unbalanced parenthesis in '{spec}'"),
                    )
                })?;
                (name.trim(), inner)
            }
            None => (spec, ""),
        };
        let mut gain = 1.0;
        let mut t1 = 1.0;
        for part in args.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part.split_once('=').ok_or_else(|| {
                ObjectError::InvalidParameterValue(
                    "filter".to_string(),
                    format!("expected key=value in '{part}'"),
                )
            })?;
            let value: f64 = value.trim().parse().map_err(|_| {
                ObjectError::InvalidParameterValue(
                    "filter".to_string(),
                    format!("bad number '{}'", value.trim()),
                )
            })?;
            match key.trim() {
                "gain" | "k" => gain = value,
                "t" | "t1" | "tau" => t1 = value,
                other => {
                    return Err(ObjectError::UnknownParameter(other.to_string()));
                }
            }
        }
        match name.to_ascii_lowercase().as_str() {
            "integral" | "integrator" => Ok(FilterBlock::integral(gain)),
            "delay" | "lag" => Ok(FilterBlock::Delay {
                t1,
                gain,
                state: 0.0,
            }),
            "derivative" | "washout" => Ok(FilterBlock::Derivative {
                t1,
                gain,
                state: 0.0,
            }),
            other => Err(ObjectError::UnrecognizedObject(other.to_string())),
        }
    }

    pub fn order(&self) -> usize {
        1
    }

    pub fn state(&self) -> f64 {
        match self {
            FilterBlock::Integral { state, .. }
            | FilterBlock::Delay { state, .. }
            | FilterBlock::Derivative { state, .. } => *state,
        }
    }

    pub fn set_state(&mut self, value: f64) {
        match self {
            FilterBlock::Integral { state, .. }
            | FilterBlock::Delay { state, .. }
            | FilterBlock::Derivative { state, .. } => *state = value,
        }
    }

    /// Block output given input `u` and state `x`.
    pub fn output_from(&self, u: f64, x: f64) -> f64 {
        match self {
            FilterBlock::Integral { .. } | FilterBlock::Delay { .. } => x,
            FilterBlock::Derivative { t1, gain, .. } => (gain * u - x) / t1,
        }
    }

    /// Output from the internally held state.
    pub fn output_local(&self, u: f64) -> f64 {
        self.output_from(u, self.state())
    }

    /// State derivative given input `u` and state `x`.
    pub fn state_derivative(&self, u: f64, x: f64) -> f64 {
        match self {
            FilterBlock::Integral { gain, .. } => gain * u,
            FilterBlock::Delay { t1, gain, .. } => (gain * u - x) / t1,
            FilterBlock::Derivative { t1, gain, .. } => (gain * u - x) / t1,
        }
    }

    /// Time derivative of the output.
    pub fn output_derivative(&self, u: f64, x: f64) -> f64 {
        match self {
            FilterBlock::Integral { gain, .. } => gain * u,
            FilterBlock::Delay { t1, gain, .. } => (gain * u - x) / t1,
            // the washout state chases gain*u, so its output decays
            FilterBlock::Derivative { t1, .. } => -self.output_from(u, x) / t1,
        }
    }

    /// Implicit-form residual `f(x, x') = x'_model - x'`.
    pub fn residual(&self, u: f64, x: f64, dx_dt: f64) -> f64 {
        self.state_derivative(u, x) - dx_dt
    }

    /// (d resid / d x, d resid / d u, d resid / d x') for the Jacobian.
    pub fn jacobian_terms(&self) -> (f64, f64, f64) {
        match self {
            FilterBlock::Integral { gain, .. } => (0.0, *gain, -1.0),
            FilterBlock::Delay { t1, gain, .. } | FilterBlock::Derivative { t1, gain, .. } => {
                (-1.0 / t1, gain / t1, -1.0)
            }
        }
    }

    /// Initialize the state so the block starts in steady state at `u0`.
    pub fn init(&mut self, u0: f64) {
        match self {
            FilterBlock::Integral { state, .. } => *state = 0.0,
            FilterBlock::Delay { t1: _, gain, state } => *state = *gain * u0,
            FilterBlock::Derivative { t1: _, gain, state } => *state = *gain * u0,
        }
    }

    /// Sampled advance by `dt` with held input `u`; returns the output.
    pub fn step(&mut self, dt: f64, u: f64) -> f64 {
        match self {
            FilterBlock::Integral { gain, state } => {
                *state += *gain * u * dt;
                *state
            }
            FilterBlock::Delay { t1, gain, state } => {
                // exact exponential update for the held input
                let alpha = (-dt / *t1).exp();
                *state = *gain * u + (*state - *gain * u) * alpha;
                *state
            }
            FilterBlock::Derivative { t1, gain, state } => {
                let alpha = (-dt / *t1).exp();
                let target = *gain * u;
                let out = (target - *state) / *t1 * alpha;
                *state = target + (*state - target) * alpha;
                out
            }
        }
    }
}
