//! Backtesting Module
//!
//! Replays stored recommendations for one market and reports:
//! - Recommended-strategy vs buy-and-hold performance
//! - Per-action breakdown
//! - Calibrated and raw confidence analysis
//! - Improvement suggestions

pub mod metrics;
pub mod simulator;
pub mod suggestions;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::EngineError;
use crate::types::{ClosedTrade, Recommendation};

pub use metrics::{
    ActionBreakdown, ActionStats, ConfidenceAnalysis, PerformanceAnalyzer, PerformanceReport,
    StrategyPerformance,
};
pub use simulator::{PositionSimulator, PositionState};
pub use suggestions::{Suggestion, SuggestionEngine, SuggestionInputs, SuggestionKind};

/// Position size used when neither the recommendation nor the config provide one
pub const DEFAULT_POSITION_SIZE_USD: f64 = 1000.0;

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Lookback window in days
    pub days: u32,
    /// Capital the return percentage is measured against (<= 0 falls back to max trade size)
    pub capital_base: f64,
    /// Position size when a recommendation has no `size_usd`
    pub default_size_usd: f64,
    /// Recompute calibrated confidence from raw confidence with the latest fresh calibration
    pub apply_latest_calibration: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            days: 30,
            capital_base: 10_000.0,
            default_size_usd: DEFAULT_POSITION_SIZE_USD,
            apply_latest_calibration: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Full backtest report for one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub market: String,
    pub date_range: DateRange,
    pub total_recommendations: usize,
    pub capital_base: f64,
    pub recommended_strategy: StrategyPerformance,
    pub buy_and_hold_strategy: StrategyPerformance,
    pub by_action: ActionBreakdown,
    pub confidence_analysis: ConfidenceAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_confidence_analysis: Option<ConfidenceAnalysis>,
    pub improvement_suggestions: Vec<Suggestion>,
    /// Closed trades behind `recommended_strategy`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trades: Vec<ClosedTrade>,
}

/// Backtester
pub struct Backtester {
    config: BacktestConfig,
    simulator: PositionSimulator,
    analyzer: PerformanceAnalyzer,
    suggestions: SuggestionEngine,
}

impl Backtester {
    pub fn new(config: BacktestConfig, high_conf_threshold: f64) -> Self {
        Self {
            simulator: PositionSimulator::new(config.default_size_usd),
            analyzer: PerformanceAnalyzer::new(high_conf_threshold),
            suggestions: SuggestionEngine::new(),
            config,
        }
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest over one market's ordered recommendations
    pub fn run(
        &self,
        market: &str,
        recommendations: &[Recommendation],
        capital_base: f64,
    ) -> crate::error::Result<BacktestResult> {
        let (first, last) = match (recommendations.first(), recommendations.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(EngineError::InvalidInput(format!(
                    "{}: no recommendations to backtest",
                    market
                )))
            }
        };
        if let Some(other) = recommendations.iter().find(|r| r.market != market) {
            return Err(EngineError::InvalidInput(format!(
                "backtest for {} received a recommendation for {}",
                market, other.market
            )));
        }

        let trades = self.simulator.simulate(recommendations)?;
        let report = self.analyzer.analyze(&trades, recommendations, capital_base);

        let baseline_size = if capital_base > 0.0 {
            capital_base
        } else {
            self.config.default_size_usd
        };
        let baseline: Vec<ClosedTrade> = metrics::buy_and_hold(recommendations, baseline_size)
            .into_iter()
            .collect();
        let buy_and_hold_strategy = metrics::strategy_performance(&baseline, capital_base);

        let trade_sizes: Vec<f64> = trades.iter().map(|t| t.size_usd).collect();
        let improvement_suggestions = self.suggestions.evaluate(&SuggestionInputs {
            recommended: &report.strategy,
            buy_and_hold: &buy_and_hold_strategy,
            by_action: &report.by_action,
            confidence: &report.confidence,
            raw_confidence: report.raw_confidence.as_ref(),
            trade_sizes: &trade_sizes,
        });

        info!(
            market = %market,
            recommendations = recommendations.len(),
            trades = report.strategy.num_trades,
            pnl_usd = report.strategy.total_pnl_usd,
            win_rate = report.strategy.win_rate,
            suggestions = improvement_suggestions.len(),
            "📊 Backtest complete"
        );

        Ok(BacktestResult {
            market: market.to_string(),
            date_range: DateRange {
                start: first.timestamp,
                end: last.timestamp,
            },
            total_recommendations: recommendations.len(),
            capital_base,
            recommended_strategy: report.strategy,
            buy_and_hold_strategy,
            by_action: report.by_action,
            confidence_analysis: report.confidence,
            raw_confidence_analysis: report.raw_confidence,
            improvement_suggestions,
            trades,
        })
    }
}

/// Export trades to CSV format
pub fn export_trades_csv(trades: &[ClosedTrade]) -> Result<String> {
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
    for trade in trades {
        writer
            .serialize(trade)
            .context("Failed to write trade record")?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush trade CSV: {}", e))?;
    String::from_utf8(bytes).context("Trade CSV is not valid UTF-8")
}
