//! Calibration curve: confidence buckets, pool-adjacent-violators pooling and
//! piecewise-linear application of the fitted curve.

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Outcomes of the trades whose raw confidence fell into one range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub range_low: f64,
    pub range_high: f64,
    pub sample_count: usize,
    pub wins: usize,
    /// Fraction of winning trades (0.0 - 1.0)
    pub win_rate: f64,
    /// Mean raw confidence of the trades in the bucket
    pub avg_confidence: f64,
}

impl ConfidenceBucket {
    /// Pool two adjacent buckets; rates are sample-count weighted
    fn merge(&self, other: &ConfidenceBucket) -> ConfidenceBucket {
        let n = self.sample_count + other.sample_count;
        let weighted = |a: f64, b: f64| {
            if n == 0 {
                0.0
            } else {
                (a * self.sample_count as f64 + b * other.sample_count as f64) / n as f64
            }
        };

        ConfidenceBucket {
            range_low: self.range_low.min(other.range_low),
            range_high: self.range_high.max(other.range_high),
            sample_count: n,
            wins: self.wins + other.wins,
            win_rate: weighted(self.win_rate, other.win_rate),
            avg_confidence: weighted(self.avg_confidence, other.avg_confidence),
        }
    }

    pub fn midpoint(&self) -> f64 {
        (self.range_low + self.range_high) / 2.0
    }
}

/// Pool Adjacent Violators.
///
/// Input must be ordered by ascending confidence. Empty buckets are dropped.
/// Whenever a block has a higher win rate than the block after it, the two
/// are merged and the merged block is re-checked against its predecessor, so
/// the output win rates are non-decreasing.
pub fn pool_adjacent_violators(buckets: &[ConfidenceBucket]) -> Vec<ConfidenceBucket> {
    let mut pooled: Vec<ConfidenceBucket> = Vec::with_capacity(buckets.len());

    for bucket in buckets.iter().filter(|b| b.sample_count > 0) {
        pooled.push(*bucket);

        while let [.., prev, last] = pooled.as_slice() {
            if prev.win_rate <= last.win_rate {
                break;
            }
            let merged = prev.merge(last);
            let n = pooled.len();
            pooled.truncate(n - 2);
            pooled.push(merged);
        }
    }

    pooled
}

/// One point of the raw -> calibrated mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
}

impl CalibrationPoint {
    pub fn new(raw_confidence: f64, calibrated_confidence: f64) -> Self {
        Self {
            raw_confidence,
            calibrated_confidence,
        }
    }
}

/// Curve (mapping raw -> calibrated).
///
/// Always sorted by raw confidence with non-decreasing calibrated values;
/// deserialization re-checks this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<CalibrationPoint>", into = "Vec<CalibrationPoint>")]
pub struct CalibrationCurve {
    points: Vec<CalibrationPoint>,
}

impl CalibrationCurve {
    pub fn new(points: Vec<CalibrationPoint>) -> Result<Self, EngineError> {
        for p in &points {
            if !p.raw_confidence.is_finite() || !p.calibrated_confidence.is_finite() {
                return Err(EngineError::InvalidInput(format!(
                    "calibration point ({}, {}) is not finite",
                    p.raw_confidence, p.calibrated_confidence
                )));
            }
        }
        for pair in points.windows(2) {
            if pair[0].raw_confidence > pair[1].raw_confidence {
                return Err(EngineError::InvalidInput(
                    "calibration points must be sorted by raw confidence".to_string(),
                ));
            }
            if pair[0].calibrated_confidence > pair[1].calibrated_confidence {
                return Err(EngineError::InvalidInput(format!(
                    "calibration curve is not monotonic at raw confidence {}",
                    pair[1].raw_confidence
                )));
            }
        }
        Ok(Self { points })
    }

    /// Anchored curve over pooled buckets: one point per block midpoint,
    /// plus 0.0 and 1.0 carrying the first and last pooled win rate.
    pub fn from_pooled(pooled: &[ConfidenceBucket]) -> Result<Self, EngineError> {
        let (first, last) = match (pooled.first(), pooled.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(Self::default()),
        };

        let mut points = Vec::with_capacity(pooled.len() + 2);
        points.push(CalibrationPoint::new(0.0, first.win_rate));
        points.extend(
            pooled
                .iter()
                .map(|b| CalibrationPoint::new(b.midpoint(), b.win_rate)),
        );
        points.push(CalibrationPoint::new(1.0, last.win_rate));

        Self::new(points)
    }

    pub fn points(&self) -> &[CalibrationPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Calibrate a raw confidence
    pub fn apply(&self, raw_confidence: f64) -> f64 {
        apply(raw_confidence, &self.points)
    }
}

impl TryFrom<Vec<CalibrationPoint>> for CalibrationCurve {
    type Error = EngineError;

    fn try_from(points: Vec<CalibrationPoint>) -> Result<Self, Self::Error> {
        Self::new(points)
    }
}

impl From<CalibrationCurve> for Vec<CalibrationPoint> {
    fn from(curve: CalibrationCurve) -> Self {
        curve.points
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Piecewise-linear interpolation over `points`.
///
/// Values outside the curve take the nearest end point (no extrapolation);
/// an exact hit returns the stored value. An empty curve passes the raw value
/// through, clamped to [0, 1].
pub fn apply(raw_confidence: f64, points: &[CalibrationPoint]) -> f64 {
    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (first, last),
        _ => return clamp_unit(raw_confidence),
    };

    let x = if raw_confidence.is_nan() {
        first.raw_confidence
    } else {
        raw_confidence
    };

    if x <= first.raw_confidence {
        return clamp_unit(first.calibrated_confidence);
    }
    if x >= last.raw_confidence {
        return clamp_unit(last.calibrated_confidence);
    }

    for pair in points.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if x == lo.raw_confidence {
            return clamp_unit(lo.calibrated_confidence);
        }
        if x < hi.raw_confidence {
            let span = hi.raw_confidence - lo.raw_confidence;
            if span <= 0.0 {
                return clamp_unit(lo.calibrated_confidence);
            }
            let t = (x - lo.raw_confidence) / span;
            return clamp_unit(
                lo.calibrated_confidence + t * (hi.calibrated_confidence - lo.calibrated_confidence),
            );
        }
    }

    clamp_unit(last.calibrated_confidence)
}
