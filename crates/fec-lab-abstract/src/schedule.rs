use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FloatPoint {
    pub at: Duration,
    pub value: f64,
}

/// Piecewise-constant step function over virtual time, used for capacity and
/// loss-probability profiles. Transitions take effect at the point time, not
/// before.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FloatSchedule {
    points: Vec<FloatPoint>,
    default: f64,
}

impl FloatSchedule {
    pub fn new(default: f64, mut points: Vec<FloatPoint>) -> Self {
        points.sort_by_key(|p| p.at);
        Self { points, default }
    }

    /// A schedule with no points: `at` always returns `value`.
    pub fn flat(value: f64) -> Self {
        Self {
            points: Vec::new(),
            default: value,
        }
    }

    /// Value of the last point whose offset is <= `t`. Before the first point
    /// the first point's value applies; with no points at all, the default.
    pub fn at(&self, t: Duration) -> f64 {
        let Some(first) = self.points.first() else {
            return self.default;
        };
        let mut value = first.value;
        for p in &self.points {
            if p.at <= t {
                value = p.value;
            } else {
                break;
            }
        }
        value
    }
}
