//! Linear value prediction.
//!
//! Used by grabber sets that have no state-space counterpart: the last
//! observed (input, output) pair plus a slope extrapolates the signal when
//! the solver asks for a value between samples.

/// A linear extrapolator over (input, output) samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValuePredictor {
    last_input: f64,
    last_output: f64,
    slope: f64,
}

impl ValuePredictor {
    pub fn new(input0: f64, output0: f64) -> ValuePredictor {
        ValuePredictor {
            last_input: input0,
            last_output: output0,
            slope: 0.0,
        }
    }

    pub fn with_slope(input0: f64, output0: f64, slope0: f64) -> ValuePredictor {
        ValuePredictor {
            last_input: input0,
            last_output: output0,
            slope: slope0,
        }
    }

    /// Record a known sample. The slope only updates on a positive input
    /// step; repeated samples at the same input keep the previous slope.
    pub fn update(&mut self, input: f64, output: f64) {
        if input - self.last_input > 0.0 {
            self.slope = (output - self.last_output) / (input - self.last_input);
        }
        self.last_input = input;
        self.last_output = output;
    }

    pub fn set_slope(&mut self, slope: f64) {
        self.slope = slope;
    }

    pub fn predict(&self, input: f64) -> f64 {
        self.last_output + (input - self.last_input) * self.slope
    }

    pub fn known_input(&self) -> f64 {
        self.last_input
    }

    pub fn known_output(&self) -> f64 {
        self.last_output
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }
}
