//! Performance Analyzer
//!
//! Aggregates closed trades and the recommendation stream into strategy
//! performance, per-action breakdowns and confidence/return analysis.
//! Win rates in this module are percentages (0 - 100).

use serde::{Deserialize, Serialize};

use crate::stats;
use crate::types::{Action, ClosedTrade, Direction, Recommendation};

/// Split between "high" and "low" confidence trades
pub const DEFAULT_HIGH_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Strategy performance metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    /// Sum of trade PnL in USD
    pub total_pnl_usd: f64,
    /// Total PnL relative to the capital base, in percent
    pub total_return_percent: f64,
    /// Percentage of trades with positive PnL
    pub win_rate: f64,
    pub avg_trade_return_usd: f64,
    pub avg_trade_return_percent: f64,
    pub num_trades: usize,
    pub wins: usize,
    pub losses: usize,
    /// Gross profit / gross loss; `None` when no trade lost money
    pub profit_factor: Option<f64>,
    /// Largest peak-to-trough drop of cumulative PnL, in USD
    pub max_drawdown_usd: f64,
}

/// Recommendation count and trade outcome for one action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionStats {
    /// Recommendations carrying this action
    pub count: usize,
    /// Closed trades in the matching direction
    pub trades: usize,
    pub win_rate: f64,
    pub avg_pnl: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionBreakdown {
    pub long: ActionStats,
    pub short: ActionStats,
    pub hold: ActionStats,
    pub close: ActionStats,
}

impl ActionBreakdown {
    pub fn get(&self, action: Action) -> &ActionStats {
        match action {
            Action::Long => &self.long,
            Action::Short => &self.short,
            Action::Hold => &self.hold,
            Action::Close => &self.close,
        }
    }

    fn get_mut(&mut self, action: Action) -> &mut ActionStats {
        match action {
            Action::Long => &mut self.long,
            Action::Short => &mut self.short,
            Action::Hold => &mut self.hold,
            Action::Close => &mut self.close,
        }
    }
}

/// How well confidence lines up with realized returns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceAnalysis {
    pub high_conf_win_rate: f64,
    pub low_conf_win_rate: f64,
    pub high_conf_trades: usize,
    pub low_conf_trades: usize,
    /// Pearson r between confidence and `pnl_percent`
    pub correlation: f64,
}

/// Everything `PerformanceAnalyzer::analyze` produces
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub strategy: StrategyPerformance,
    pub by_action: ActionBreakdown,
    pub confidence: ConfidenceAnalysis,
    pub raw_confidence: Option<ConfidenceAnalysis>,
}

#[derive(Debug, Clone)]
pub struct PerformanceAnalyzer {
    high_conf_threshold: f64,
}

impl Default for PerformanceAnalyzer {
    fn default() -> Self {
        Self::new(DEFAULT_HIGH_CONFIDENCE_THRESHOLD)
    }
}

impl PerformanceAnalyzer {
    pub fn new(high_conf_threshold: f64) -> Self {
        Self {
            high_conf_threshold,
        }
    }

    pub fn analyze(
        &self,
        trades: &[ClosedTrade],
        recommendations: &[Recommendation],
        capital_base: f64,
    ) -> PerformanceReport {
        let confidence = self.confidence_analysis(trades.iter().map(|t| (t.confidence, t)));

        let with_raw: Vec<(f64, &ClosedTrade)> = trades
            .iter()
            .filter_map(|t| t.raw_confidence.map(|raw| (raw, t)))
            .collect();
        let raw_confidence = if with_raw.is_empty() {
            None
        } else {
            Some(self.confidence_analysis(with_raw.into_iter()))
        };

        PerformanceReport {
            strategy: strategy_performance(trades, capital_base),
            by_action: action_breakdown(trades, recommendations),
            confidence,
            raw_confidence,
        }
    }

    fn confidence_analysis<'a, I>(&self, scored: I) -> ConfidenceAnalysis
    where
        I: Iterator<Item = (f64, &'a ClosedTrade)>,
    {
        let mut confidences = Vec::new();
        let mut returns = Vec::new();
        let mut high = Vec::new();
        let mut low = Vec::new();

        for (confidence, trade) in scored {
            confidences.push(confidence);
            returns.push(trade.pnl_percent);
            if confidence >= self.high_conf_threshold {
                high.push(trade.is_win());
            } else {
                low.push(trade.is_win());
            }
        }

        ConfidenceAnalysis {
            high_conf_win_rate: stats::hit_rate(high.iter().copied()) * 100.0,
            low_conf_win_rate: stats::hit_rate(low.iter().copied()) * 100.0,
            high_conf_trades: high.len(),
            low_conf_trades: low.len(),
            correlation: stats::pearson(&confidences, &returns),
        }
    }
}

/// Compute strategy-level metrics.
///
/// The return denominator is `capital_base` when positive; otherwise the
/// largest single trade size stands in for it, which assumes capital is
/// reused sequentially rather than tracked as a portfolio.
pub fn strategy_performance(trades: &[ClosedTrade], capital_base: f64) -> StrategyPerformance {
    if trades.is_empty() {
        return StrategyPerformance::default();
    }

    let num_trades = trades.len();
    let wins = trades.iter().filter(|t| t.is_win()).count();
    let total_pnl_usd: f64 = trades.iter().map(|t| t.pnl_usd).sum();

    let denominator = if capital_base > 0.0 {
        capital_base
    } else {
        trades.iter().map(|t| t.size_usd).fold(0.0, f64::max)
    };
    let total_return_percent = if denominator > 0.0 {
        total_pnl_usd / denominator * 100.0
    } else {
        0.0
    };

    let gross_profit: f64 = trades.iter().filter(|t| t.pnl_usd > 0.0).map(|t| t.pnl_usd).sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.pnl_usd < 0.0)
        .map(|t| t.pnl_usd.abs())
        .sum();
    let profit_factor = (gross_loss > 0.0).then(|| gross_profit / gross_loss);

    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut max_drawdown_usd: f64 = 0.0;
    for trade in trades {
        equity += trade.pnl_usd;
        peak = f64::max(peak, equity);
        max_drawdown_usd = max_drawdown_usd.max(peak - equity);
    }

    StrategyPerformance {
        total_pnl_usd,
        total_return_percent,
        win_rate: wins as f64 / num_trades as f64 * 100.0,
        avg_trade_return_usd: total_pnl_usd / num_trades as f64,
        avg_trade_return_percent: trades.iter().map(|t| t.pnl_percent).sum::<f64>()
            / num_trades as f64,
        num_trades,
        wins,
        losses: num_trades - wins,
        profit_factor,
        max_drawdown_usd,
    }
}

/// Count recommendations per action; long/short also get trade outcomes.
pub fn action_breakdown(trades: &[ClosedTrade], recommendations: &[Recommendation]) -> ActionBreakdown {
    let mut breakdown = ActionBreakdown::default();

    for rec in recommendations {
        breakdown.get_mut(rec.action).count += 1;
    }

    for (action, direction) in [(Action::Long, Direction::Long), (Action::Short, Direction::Short)] {
        let matching: Vec<&ClosedTrade> = trades.iter().filter(|t| t.direction == direction).collect();
        let stats = breakdown.get_mut(action);
        stats.trades = matching.len();
        if !matching.is_empty() {
            stats.win_rate = stats::hit_rate(matching.iter().map(|t| t.is_win())) * 100.0;
            stats.avg_pnl =
                matching.iter().map(|t| t.pnl_usd).sum::<f64>() / matching.len() as f64;
        }
    }

    breakdown
}

/// Synthetic long from the first to the last record.
///
/// Returns `None` for an empty stream.
pub fn buy_and_hold(recommendations: &[Recommendation], size_usd: f64) -> Option<ClosedTrade> {
    let first = recommendations.first()?;
    let last = recommendations.last()?;
    let ret = Direction::Long.return_fraction(first.price, last.price);

    Some(ClosedTrade {
        market: first.market.clone(),
        entry_time: first.timestamp,
        exit_time: last.timestamp,
        direction: Direction::Long,
        entry_price: first.price,
        exit_price: last.price,
        size_usd,
        confidence: first.confidence,
        raw_confidence: first.raw_confidence,
        pnl_usd: size_usd * ret,
        pnl_percent: ret * 100.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn trade(direction: Direction, pnl_usd: f64, confidence: f64, raw: Option<f64>) -> ClosedTrade {
        ClosedTrade {
            market: "BTC".to_string(),
            entry_time: t(0),
            exit_time: t(1),
            direction,
            entry_price: 100.0,
            exit_price: 100.0 + pnl_usd,
            size_usd: 100.0,
            confidence,
            raw_confidence: raw,
            pnl_usd,
            pnl_percent: pnl_usd,
        }
    }

    #[test]
    fn test_empty_analysis() {
        let report = PerformanceAnalyzer::default().analyze(&[], &[], 1000.0);
        assert_eq!(report.strategy.win_rate, 0.0);
        assert_eq!(report.strategy.num_trades, 0);
        assert_eq!(report.strategy.total_pnl_usd, 0.0);
        assert_eq!(report.strategy.total_return_percent, 0.0);
        assert!(report.raw_confidence.is_none());
    }

    #[test]
    fn test_strategy_performance() {
        let trades = vec![
            trade(Direction::Long, 10.0, 0.8, None),
            trade(Direction::Short, -5.0, 0.6, None),
            trade(Direction::Long, 15.0, 0.9, None),
        ];

        let perf = strategy_performance(&trades, 1000.0);
        assert_eq!(perf.num_trades, 3);
        assert_eq!(perf.wins, 2);
        assert!((perf.total_pnl_usd - 20.0).abs() < 1e-12);
        assert!((perf.total_return_percent - 2.0).abs() < 1e-12);
        assert!((perf.win_rate - 200.0 / 3.0).abs() < 1e-9);
        assert!((perf.profit_factor.unwrap() - 5.0).abs() < 1e-12);
        assert!((perf.max_drawdown_usd - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_return_falls_back_to_max_trade_size() {
        let mut big = trade(Direction::Long, 20.0, 0.8, None);
        big.size_usd = 400.0;
        let trades = vec![trade(Direction::Long, 20.0, 0.8, None), big];

        let perf = strategy_performance(&trades, 0.0);
        assert!((perf.total_return_percent - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_action_breakdown() {
        let recs: Vec<Recommendation> = [Action::Long, Action::Hold, Action::Short, Action::Close, Action::Hold]
            .iter()
            .enumerate()
            .map(|(i, a)| Recommendation::new(t(i as i64), "BTC", *a, 100.0, 0.5))
            .collect();
        let trades = vec![
            trade(Direction::Long, 10.0, 0.8, None),
            trade(Direction::Long, -4.0, 0.8, None),
            trade(Direction::Short, 2.0, 0.8, None),
        ];

        let breakdown = action_breakdown(&trades, &recs);
        assert_eq!(breakdown.long.count, 1);
        assert_eq!(breakdown.hold.count, 2);
        assert_eq!(breakdown.close.count, 1);
        assert_eq!(breakdown.long.trades, 2);
        assert!((breakdown.long.win_rate - 50.0).abs() < 1e-12);
        assert!((breakdown.long.avg_pnl - 3.0).abs() < 1e-12);
        assert!((breakdown.short.win_rate - 100.0).abs() < 1e-12);
        assert_eq!(breakdown.hold.win_rate, 0.0);
        assert_eq!(breakdown.close.avg_pnl, 0.0);
    }

    #[test]
    fn test_confidence_analysis_with_raw() {
        let trades = vec![
            trade(Direction::Long, 10.0, 0.9, Some(0.6)),
            trade(Direction::Long, 8.0, 0.8, Some(0.75)),
            trade(Direction::Long, -6.0, 0.4, Some(0.8)),
            trade(Direction::Long, -3.0, 0.3, None),
        ];

        let report = PerformanceAnalyzer::default().analyze(&trades, &[], 0.0);
        assert!((report.confidence.high_conf_win_rate - 100.0).abs() < 1e-12);
        assert_eq!(report.confidence.low_conf_win_rate, 0.0);
        assert!(report.confidence.correlation > 0.9);

        let raw = report.raw_confidence.unwrap();
        assert_eq!(raw.high_conf_trades + raw.low_conf_trades, 3);
        assert!((raw.high_conf_win_rate - 50.0).abs() < 1e-12);
        assert!(raw.correlation < 0.0);
    }

    #[test]
    fn test_buy_and_hold() {
        let recs = vec![
            Recommendation::new(t(0), "BTC", Action::Hold, 100.0, 0.5),
            Recommendation::new(t(1), "BTC", Action::Short, 90.0, 0.5),
            Recommendation::new(t(2), "BTC", Action::Hold, 110.0, 0.5),
        ];
        let baseline = buy_and_hold(&recs, 1000.0).unwrap();
        assert_eq!(baseline.direction, Direction::Long);
        assert!((baseline.pnl_usd - 100.0).abs() < 1e-9);
        assert!(buy_and_hold(&[], 1000.0).is_none());
    }
}
