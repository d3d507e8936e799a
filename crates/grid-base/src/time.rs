//! Simulation time.
//!
//! Time is seconds on the simulation clock, not wall-clock time. The
//! newtype keeps event scheduling and state timestamps from mixing with
//! ordinary scalars, and carries the sentinel values the scheduler relies
//! on (`MAX` for "never", `NEG` for "before start").

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign};

/// A point (or span) on the simulation clock, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct Time(f64);

impl Time {
    pub const ZERO: Time = Time(0.0);
    /// Scheduler sentinel for "never fires".
    pub const MAX: Time = Time(1e47);
    /// Sentinel for "before the simulation started".
    pub const NEG: Time = Time(-1e47);

    pub fn seconds(secs: f64) -> Time {
        Time(secs)
    }

    pub fn minutes(mins: f64) -> Time {
        Time(mins * 60.0)
    }

    pub fn hours(hours: f64) -> Time {
        Time(hours * 3600.0)
    }

    pub fn as_secs(self) -> f64 {
        self.0
    }

    pub fn min(self, other: Time) -> Time {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }

    pub fn max(self, other: Time) -> Time {
        if other.0 > self.0 {
            other
        } else {
            self
        }
    }

    pub fn abs(self) -> Time {
        Time(self.0.abs())
    }

    /// Total ordering for queue sorting (NaN sorts last).
    pub fn total_cmp(&self, other: &Time) -> std::cmp::Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl From<f64> for Time {
    fn from(secs: f64) -> Time {
        Time(secs)
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Time {
    type Output = Time;
    fn add(self, rhs: Time) -> Time {
        Time(self.0 + rhs.0)
    }
}

impl Sub for Time {
    type Output = Time;
    fn sub(self, rhs: Time) -> Time {
        Time(self.0 - rhs.0)
    }
}

impl AddAssign for Time {
    fn add_assign(&mut self, rhs: Time) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Time {
    fn sub_assign(&mut self, rhs: Time) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for Time {
    type Output = Time;
    fn mul(self, rhs: f64) -> Time {
        Time(self.0 * rhs)
    }
}

impl Div<f64> for Time {
    type Output = Time;
    fn div(self, rhs: f64) -> Time {
        Time(self.0 / rhs)
    }
}

impl Neg for Time {
    type Output = Time;
    fn neg(self) -> Time {
        Time(-self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_ordering() {
        assert!(Time::NEG < Time::ZERO);
        assert!(Time::ZERO < Time::MAX);
        assert!(Time::seconds(1.5) < Time::seconds(2.0));
    }

    #[test]
    fn time_arithmetic() {
        let t = Time::seconds(1.0) + Time::seconds(0.5);
        assert_eq!(t.as_secs(), 1.5);
        assert_eq!(Time::minutes(2.0).as_secs(), 120.0);
        assert_eq!(Time::hours(1.0).as_secs(), 3600.0);
    }

    #[test]
    fn min_max() {
        let a = Time::seconds(1.0);
        let b = Time::seconds(2.0);
        assert_eq!(a.min(b), a);
        assert_eq!(a.max(b), b);
    }
}
