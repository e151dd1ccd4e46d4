//! Confidence Engine
//!
//! Async boundary around the synchronous core: pulls recommendations from a
//! `RecommendationStore`, runs simulation/calibration/backtests and stores
//! calibrations through a `CalibrationStore`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backtesting::{BacktestConfig, BacktestResult, Backtester, PositionSimulator};
use crate::calibration::{CalibrationComputer, CalibrationConfig, CalibrationData};
use crate::persistence::{CalibrationStore, RecommendationStore};
use crate::types::{ClosedTrade, Recommendation};

/// Engine settings, usually taken from `AppConfig`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSettings {
    pub backtest: BacktestConfig,
    pub calibration: CalibrationConfig,
}

/// Parameters of one backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub market: String,
    pub days: u32,
    pub capital_base: f64,
}

impl BacktestRequest {
    pub fn new(market: impl Into<String>, days: u32, capital_base: f64) -> Self {
        Self {
            market: market.into(),
            days,
            capital_base,
        }
    }
}

pub struct ConfidenceEngine {
    recommendations: Arc<dyn RecommendationStore>,
    calibrations: Arc<dyn CalibrationStore>,
    settings: EngineSettings,
}

impl ConfidenceEngine {
    pub fn new(
        recommendations: Arc<dyn RecommendationStore>,
        calibrations: Arc<dyn CalibrationStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            recommendations,
            calibrations,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn simulator(&self) -> PositionSimulator {
        PositionSimulator::new(self.settings.backtest.default_size_usd)
    }

    async fn load(&self, market: &str, days: u32, now: DateTime<Utc>) -> Result<Vec<Recommendation>> {
        let since = now - Duration::days(days as i64);
        let recs = self
            .recommendations
            .recommendations(market, Some(since))
            .await
            .with_context(|| format!("Failed to load recommendations for {}", market))?;
        debug!(market = %market, days, count = recs.len(), "Loaded recommendation window");
        Ok(recs)
    }

    /// Simulate the last `days` of recommendations for `market`
    pub async fn closed_trades(&self, market: &str, days: u32) -> Result<Vec<ClosedTrade>> {
        let recs = self.load(market, days, Utc::now()).await?;
        Ok(self.simulator().simulate(&recs)?)
    }

    /// Fit and persist a new calibration from the last `window_days` of trades
    pub async fn compute_calibration(&self, market: &str, window_days: u32) -> Result<CalibrationData> {
        self.compute_calibration_at(market, window_days, Utc::now()).await
    }

    pub async fn compute_calibration_at(
        &self,
        market: &str,
        window_days: u32,
        now: DateTime<Utc>,
    ) -> Result<CalibrationData> {
        let recs = self.load(market, window_days, now).await?;
        let trades = self.simulator().simulate(&recs)?;

        let data = CalibrationComputer::new(self.settings.calibration.clone()).compute(
            market,
            window_days,
            &trades,
            now,
        )?;

        self.calibrations
            .save(&data)
            .await
            .with_context(|| format!("Failed to persist calibration for {}", market))?;

        info!(
            "✅ Calibration for {} stored ({} trades, r = {:.3})",
            market, data.sample_size, data.correlation
        );
        Ok(data)
    }

    pub async fn latest_calibration(&self, market: &str) -> Result<Option<CalibrationData>> {
        self.calibrations
            .latest(market)
            .await
            .with_context(|| format!("Failed to load calibration for {}", market))
    }

    /// Latest calibration for `market` when it exists and is not stale
    pub async fn fresh_calibration(
        &self,
        market: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<CalibrationData>> {
        let max_age = self.settings.calibration.max_age_days;
        match self.latest_calibration(market).await? {
            Some(data) if !data.is_stale(now, max_age) => Ok(Some(data)),
            Some(data) => {
                warn!(
                    market = %market,
                    computed_at = %data.computed_at,
                    max_age_days = max_age,
                    "Calibration is stale, using raw confidence"
                );
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Calibrate a raw confidence for `market`; raw value passes through
    /// when no fresh calibration exists.
    pub async fn calibrate_confidence(
        &self,
        market: &str,
        raw_confidence: f64,
        now: DateTime<Utc>,
    ) -> Result<f64> {
        Ok(match self.fresh_calibration(market, now).await? {
            Some(data) => data.apply(raw_confidence),
            None => raw_confidence.clamp(0.0, 1.0),
        })
    }

    pub async fn run_backtest(&self, request: &BacktestRequest) -> Result<BacktestResult> {
        self.run_backtest_at(request, Utc::now()).await
    }

    pub async fn run_backtest_at(
        &self,
        request: &BacktestRequest,
        now: DateTime<Utc>,
    ) -> Result<BacktestResult> {
        let mut recs = self.load(&request.market, request.days, now).await?;

        if self.settings.backtest.apply_latest_calibration {
            if let Some(data) = self.fresh_calibration(&request.market, now).await? {
                let mut recalibrated = 0usize;
                for rec in recs.iter_mut() {
                    if let Some(raw) = rec.raw_confidence {
                        rec.confidence = data.apply(raw);
                        recalibrated += 1;
                    }
                }
                debug!(
                    market = %request.market,
                    recalibrated,
                    "Applied latest calibration to raw confidence"
                );
            }
        }

        let backtester = Backtester::new(
            self.settings.backtest.clone(),
            self.settings.calibration.high_conf_threshold,
        );
        Ok(backtester.run(&request.market, &recs, request.capital_base)?)
    }
}
