//! Calibration - confidence calibration from realized trade outcomes
//!
//! Buckets closed trades by raw confidence, enforces monotonicity with
//! isotonic regression (PAVA) and stores the result as a curve that maps
//! raw model confidence to an empirical win rate.

pub mod curve;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EngineError, Result};
use crate::stats;
use crate::types::ClosedTrade;

pub use curve::{pool_adjacent_violators, CalibrationCurve, CalibrationPoint, ConfidenceBucket};

/// Calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationConfig {
    /// Lookback window used when computing a new curve
    pub window_days: u32,
    /// Minimum closed trades required to fit a curve
    pub min_samples: usize,
    /// Number of equal-width confidence buckets over [0, 1]
    pub bucket_count: usize,
    /// Raw confidence at or above this counts as "high confidence"
    pub high_conf_threshold: f64,
    /// Calibrations older than this are considered stale
    pub max_age_days: i64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            min_samples: 10,
            bucket_count: 10,
            high_conf_threshold: 0.7,
            max_age_days: 7,
        }
    }
}

/// Result of one calibration run for one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub market: String,
    pub window_days: u32,
    pub points: CalibrationCurve,
    pub sample_size: usize,
    /// Pearson r between raw confidence and `pnl_percent`
    pub correlation: f64,
    /// Win rate (0.0 - 1.0) of trades at or above the high-confidence threshold
    pub high_conf_win_rate: f64,
    /// Win rate (0.0 - 1.0) of trades below the threshold
    pub low_conf_win_rate: f64,
    pub computed_at: DateTime<Utc>,
    /// Non-empty buckets before pooling
    #[serde(default)]
    pub buckets: Vec<ConfidenceBucket>,
    #[serde(default)]
    pub expected_calibration_error: f64,
    #[serde(default)]
    pub brier_score: f64,
}

impl CalibrationData {
    /// Calibrate a raw confidence with this run's curve
    pub fn apply(&self, raw_confidence: f64) -> f64 {
        self.points.apply(raw_confidence)
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.computed_at
    }

    /// Staleness is a caller policy: callers fall back to raw confidence
    pub fn is_stale(&self, now: DateTime<Utc>, max_age_days: i64) -> bool {
        self.age(now) > Duration::days(max_age_days)
    }
}

/// Calibrate `raw_confidence` with a stored calibration
pub fn apply_calibration(raw_confidence: f64, calibration: &CalibrationData) -> f64 {
    calibration.apply(raw_confidence)
}

/// Fits calibration curves from closed trades
#[derive(Debug, Clone, Default)]
pub struct CalibrationComputer {
    config: CalibrationConfig,
}

impl CalibrationComputer {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Fit a curve for `market` from its closed trades.
    ///
    /// Output depends only on the arguments.
    pub fn compute(
        &self,
        market: &str,
        window_days: u32,
        trades: &[ClosedTrade],
        computed_at: DateTime<Utc>,
    ) -> Result<CalibrationData> {
        self.validate_config()?;

        if trades.len() < self.config.min_samples {
            return Err(EngineError::InsufficientData {
                market: market.to_string(),
                samples: trades.len(),
                required: self.config.min_samples,
            });
        }

        let confidences: Vec<f64> = trades.iter().map(ClosedTrade::calibration_input).collect();
        if let Some(bad) = confidences.iter().find(|c| !c.is_finite()) {
            return Err(EngineError::InvalidInput(format!(
                "{}: trade confidence {} is not finite",
                market, bad
            )));
        }

        let buckets = self.bucketize(trades);
        let pooled = pool_adjacent_violators(&buckets);
        let points = CalibrationCurve::from_pooled(&pooled)?;

        debug!(
            market = %market,
            buckets = buckets.len(),
            pooled = pooled.len(),
            "Pooled adjacent violators"
        );

        let returns: Vec<f64> = trades.iter().map(|t| t.pnl_percent).collect();
        let correlation = stats::pearson(&confidences, &returns);

        let threshold = self.config.high_conf_threshold;
        let high_conf_win_rate = stats::hit_rate(
            trades
                .iter()
                .filter(|t| t.calibration_input() >= threshold)
                .map(ClosedTrade::is_win),
        );
        let low_conf_win_rate = stats::hit_rate(
            trades
                .iter()
                .filter(|t| t.calibration_input() < threshold)
                .map(ClosedTrade::is_win),
        );

        let brier_score = trades
            .iter()
            .map(|t| {
                let y = if t.is_win() { 1.0 } else { 0.0 };
                (t.calibration_input().clamp(0.0, 1.0) - y).powi(2)
            })
            .sum::<f64>()
            / trades.len() as f64;

        let data = CalibrationData {
            market: market.to_string(),
            window_days,
            points,
            sample_size: trades.len(),
            correlation,
            high_conf_win_rate,
            low_conf_win_rate,
            computed_at,
            expected_calibration_error: expected_calibration_error(&buckets, trades.len()),
            brier_score,
            buckets,
        };

        info!(
            market = %market,
            samples = data.sample_size,
            points = data.points.points().len(),
            correlation = data.correlation,
            ece = data.expected_calibration_error,
            "🎯 Calibration computed"
        );

        Ok(data)
    }

    /// Group trades into equal-width buckets by raw confidence.
    ///
    /// Only non-empty buckets are returned, in ascending order.
    pub fn bucketize(&self, trades: &[ClosedTrade]) -> Vec<ConfidenceBucket> {
        let n = self.config.bucket_count.max(1);
        let width = 1.0 / n as f64;

        let mut counts = vec![(0usize, 0usize, 0.0f64); n];
        for trade in trades {
            let c = trade.calibration_input().clamp(0.0, 1.0);
            let idx = ((c * n as f64).floor() as usize).min(n - 1);
            let (count, wins, sum_conf) = &mut counts[idx];
            *count += 1;
            *wins += trade.is_win() as usize;
            *sum_conf += c;
        }

        counts
            .into_iter()
            .enumerate()
            .filter(|(_, (count, _, _))| *count > 0)
            .map(|(i, (count, wins, sum_conf))| ConfidenceBucket {
                range_low: i as f64 * width,
                range_high: if i + 1 == n { 1.0 } else { (i + 1) as f64 * width },
                sample_count: count,
                wins,
                win_rate: wins as f64 / count as f64,
                avg_confidence: sum_conf / count as f64,
            })
            .collect()
    }

    fn validate_config(&self) -> Result<()> {
        if self.config.bucket_count == 0 {
            return Err(EngineError::InvalidInput(
                "bucket_count must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.config.high_conf_threshold) {
            return Err(EngineError::InvalidInput(format!(
                "high_conf_threshold must be within [0, 1], got {}",
                self.config.high_conf_threshold
            )));
        }
        Ok(())
    }
}

/// Count-weighted gap between mean confidence and realized win rate
fn expected_calibration_error(buckets: &[ConfidenceBucket], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    buckets
        .iter()
        .map(|b| (b.sample_count as f64 / total as f64) * (b.avg_confidence - b.win_rate).abs())
        .sum()
}
