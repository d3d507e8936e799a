//! Jacobian matrix sinks.
//!
//! Components write partial derivatives into a `MatrixSink` rather than a
//! concrete matrix so the solver owns storage. `SparseTriplets` is the
//! scratch implementation used for local assembly and for the row
//! scale/translate/merge routing the relay Jacobians need.

use crate::offsets::NULL_LOCATION;

/// Destination for Jacobian entries.
pub trait MatrixSink {
    /// Add `value` at (row, col); duplicate coordinates accumulate.
    fn assign(&mut self, row: usize, col: usize, value: f64);

    /// Like `assign`, but silently skips null locations.
    fn assign_checked(&mut self, row: usize, col: usize, value: f64) {
        if row != NULL_LOCATION && col != NULL_LOCATION {
            self.assign(row, col, value);
        }
    }
}

/// Triplet-list matrix scratch space.
#[derive(Debug, Clone, Default)]
pub struct SparseTriplets {
    entries: Vec<(usize, usize, f64)>,
}

impl SparseTriplets {
    pub fn new() -> SparseTriplets {
        SparseTriplets::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accumulated value at (row, col).
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.entries
            .iter()
            .filter(|(r, c, _)| *r == row && *c == col)
            .map(|(_, _, v)| v)
            .sum()
    }

    /// Multiply every entry in `row` by `factor`.
    pub fn scale_row(&mut self, row: usize, factor: f64) {
        for entry in &mut self.entries {
            if entry.0 == row {
                entry.2 *= factor;
            }
        }
    }

    /// Move every entry in `from` to row `to`.
    pub fn translate_row(&mut self, from: usize, to: usize) {
        for entry in &mut self.entries {
            if entry.0 == from {
                entry.0 = to;
            }
        }
    }

    /// Drain this scratch into another sink.
    pub fn merge_into(&mut self, sink: &mut dyn MatrixSink) {
        for (row, col, value) in self.entries.drain(..) {
            sink.assign_checked(row, col, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, usize, f64)> {
        self.entries.iter()
    }

    /// Largest row index present plus one, or zero when empty.
    pub fn row_span(&self) -> usize {
        self.entries
            .iter()
            .map(|(r, _, _)| r + 1)
            .max()
            .unwrap_or(0)
    }
}

impl MatrixSink for SparseTriplets {
    fn assign(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulation() {
        let mut m = SparseTriplets::new();
        m.assign(0, 1, 2.0);
        m.assign(0, 1, 3.0);
        assert_eq!(m.at(0, 1), 5.0);
        assert_eq!(m.at(1, 0), 0.0);
    }

    #[test]
    fn row_operations() {
        let mut m = SparseTriplets::new();
        m.assign(2, 0, 1.0);
        m.assign(2, 1, 4.0);
        m.assign(3, 0, 7.0);
        m.scale_row(2, 0.5);
        assert_eq!(m.at(2, 1), 2.0);
        assert_eq!(m.at(3, 0), 7.0);
        m.translate_row(2, 5);
        assert_eq!(m.at(5, 0), 0.5);
        assert_eq!(m.at(2, 0), 0.0);
    }

    #[test]
    fn checked_assign_skips_null() {
        let mut m = SparseTriplets::new();
        m.assign_checked(NULL_LOCATION, 0, 1.0);
        m.assign_checked(0, NULL_LOCATION, 1.0);
        m.assign_checked(0, 0, 1.0);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn merge() {
        let mut scratch = SparseTriplets::new();
        scratch.assign(0, 0, 1.0);
        scratch.assign(1, 1, 2.0);
        let mut out = SparseTriplets::new();
        scratch.merge_into(&mut out);
        assert!(scratch.is_empty());
        assert_eq!(out.at(1, 1), 2.0);
    }
}
