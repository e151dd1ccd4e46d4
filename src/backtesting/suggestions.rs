//! Suggestion Engine
//!
//! Turns backtest metrics into human-readable improvement suggestions.
//! Rules are evaluated in a fixed priority order.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::metrics::{ActionBreakdown, ConfidenceAnalysis, StrategyPerformance};
use crate::stats;

/// At most this many suggestions are emitted
pub const MAX_SUGGESTIONS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionKind {
    CalibrationImproved,
    CalibrationDegraded,
    RecalibrationNeeded,
    ScaleWithConfidence,
    InvertConfidence,
    DirectionalBias,
    HoldWinnersLonger,
    RaiseConfidenceThreshold,
    NormalizeSizing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub kind: SuggestionKind,
    pub message: String,
}

impl Suggestion {
    fn new(kind: SuggestionKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for Suggestion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Inputs the rules look at
#[derive(Debug, Clone, Copy)]
pub struct SuggestionInputs<'a> {
    pub recommended: &'a StrategyPerformance,
    pub buy_and_hold: &'a StrategyPerformance,
    pub by_action: &'a ActionBreakdown,
    pub confidence: &'a ConfidenceAnalysis,
    pub raw_confidence: Option<&'a ConfidenceAnalysis>,
    pub trade_sizes: &'a [f64],
}

#[derive(Debug, Clone, Default)]
pub struct SuggestionEngine;

impl SuggestionEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, inputs: &SuggestionInputs<'_>) -> Vec<Suggestion> {
        let mut out = Vec::new();

        if let Some(raw) = inputs.raw_confidence {
            let delta = inputs.confidence.correlation - raw.correlation;
            if delta > 0.1 {
                out.push(Suggestion::new(
                    SuggestionKind::CalibrationImproved,
                    format!(
                        "Calibration is working: confidence/return correlation improved by {:+.2} ({:.2} raw -> {:.2} calibrated)",
                        delta, raw.correlation, inputs.confidence.correlation
                    ),
                ));
            } else if delta < -0.1 {
                out.push(Suggestion::new(
                    SuggestionKind::CalibrationDegraded,
                    format!(
                        "Calibration is hurting: correlation dropped by {:.2} ({:.2} raw -> {:.2} calibrated); review the calibration window",
                        -delta, raw.correlation, inputs.confidence.correlation
                    ),
                ));
            }
            if raw.correlation < 0.3 && delta < 0.05 {
                out.push(Suggestion::new(
                    SuggestionKind::RecalibrationNeeded,
                    format!(
                        "Raw confidence barely predicts returns (r = {:.2}) and calibration adds little; re-run calibration on a fresh window",
                        raw.correlation
                    ),
                ));
            }
        }

        let corr = inputs.confidence.correlation;
        if corr > 0.3 {
            out.push(Suggestion::new(
                SuggestionKind::ScaleWithConfidence,
                format!(
                    "Confidence correlates with returns (r = {:.2}); scale position size with confidence",
                    corr
                ),
            ));
        } else if corr < -0.3 {
            out.push(Suggestion::new(
                SuggestionKind::InvertConfidence,
                format!(
                    "Confidence is inversely correlated with returns (r = {:.2}); invert or discount confidence weighting",
                    corr
                ),
            ));
        }

        let long = &inputs.by_action.long;
        let short = &inputs.by_action.short;
        if (long.win_rate - short.win_rate).abs() > 10.0 {
            let (strong, weak) = if long.win_rate > short.win_rate {
                ("long", "short")
            } else {
                ("short", "long")
            };
            out.push(Suggestion::new(
                SuggestionKind::DirectionalBias,
                format!(
                    "Directional bias: long win rate {:.1}% vs short {:.1}%; {} side performs better, filter {} signals more strictly",
                    long.win_rate, short.win_rate, strong, weak
                ),
            ));
        }

        let bh_pnl = inputs.buy_and_hold.total_pnl_usd;
        if bh_pnl > 0.0 {
            let shortfall = (bh_pnl - inputs.recommended.total_pnl_usd) / bh_pnl;
            if shortfall > 0.2 {
                out.push(Suggestion::new(
                    SuggestionKind::HoldWinnersLonger,
                    format!(
                        "Buy-and-hold beat the strategy by {:.0}% (${:.2} vs ${:.2}); consider holding winning positions longer",
                        shortfall * 100.0,
                        bh_pnl,
                        inputs.recommended.total_pnl_usd
                    ),
                ));
            }
        }

        if inputs.recommended.win_rate < 50.0 {
            out.push(Suggestion::new(
                SuggestionKind::RaiseConfidenceThreshold,
                format!(
                    "Win rate is {:.1}%; raise the minimum confidence required to act",
                    inputs.recommended.win_rate
                ),
            ));
        }

        if !inputs.trade_sizes.is_empty() {
            let mean = stats::mean(inputs.trade_sizes);
            let sd = stats::std_dev(inputs.trade_sizes);
            if sd > 0.5 * mean {
                out.push(Suggestion::new(
                    SuggestionKind::NormalizeSizing,
                    format!(
                        "Position sizes vary widely (stdev ${:.2} vs mean ${:.2}); normalize position sizing",
                        sd, mean
                    ),
                ));
            }
        }

        out.truncate(MAX_SUGGESTIONS);
        out
    }
}
