//! Core types used throughout Calibot
//!
//! Defines recommendations, actions, directions and closed trades.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EngineError;

/// Action carried by a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Long,
    Short,
    Hold,
    Close,
}

impl Action {
    pub const ALL: [Action; 4] = [Action::Long, Action::Short, Action::Hold, Action::Close];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Long => "long",
            Action::Short => "short",
            Action::Hold => "hold",
            Action::Close => "close",
        }
    }
}

impl FromStr for Action {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "long" => Ok(Action::Long),
            "short" => Ok(Action::Short),
            "hold" => Ok(Action::Hold),
            "close" => Ok(Action::Close),
            other => Err(EngineError::InvalidInput(format!(
                "unrecognized action '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Direction of an open or closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Realized return as a fraction of the entry price
    pub fn return_fraction(&self, entry_price: f64, exit_price: f64) -> f64 {
        match self {
            Direction::Long => exit_price / entry_price - 1.0,
            Direction::Short => 1.0 - exit_price / entry_price,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Directional recommendation produced upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// When the recommendation was issued
    pub timestamp: DateTime<Utc>,
    /// Market identifier (e.g. "BTC")
    pub market: String,
    /// Recommended action
    pub action: Action,
    /// Reference price at issue time
    pub price: f64,
    /// Confidence after calibration (0.0 - 1.0)
    pub confidence: f64,
    /// Confidence as emitted by the model, before calibration
    #[serde(default)]
    pub raw_confidence: Option<f64>,
    /// Suggested position size in USD
    #[serde(default)]
    pub size_usd: Option<f64>,
}

impl Recommendation {
    pub fn new(
        timestamp: DateTime<Utc>,
        market: impl Into<String>,
        action: Action,
        price: f64,
        confidence: f64,
    ) -> Self {
        Self {
            timestamp,
            market: market.into(),
            action,
            price,
            confidence,
            raw_confidence: None,
            size_usd: None,
        }
    }

    pub fn with_raw_confidence(mut self, raw_confidence: f64) -> Self {
        self.raw_confidence = Some(raw_confidence);
        self
    }

    pub fn with_size(mut self, size_usd: f64) -> Self {
        self.size_usd = Some(size_usd);
        self
    }

    /// Check price, size and confidence ranges
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.price.is_finite() || self.price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "{} @ {}: price must be finite and positive, got {}",
                self.market, self.timestamp, self.price
            )));
        }
        if let Some(size) = self.size_usd {
            if !size.is_finite() || size <= 0.0 {
                return Err(EngineError::InvalidInput(format!(
                    "{} @ {}: size_usd must be finite and positive, got {}",
                    self.market, self.timestamp, size
                )));
            }
        }
        let confidences = std::iter::once(self.confidence).chain(self.raw_confidence);
        for c in confidences {
            if !(0.0..=1.0).contains(&c) {
                return Err(EngineError::InvalidInput(format!(
                    "{} @ {}: confidence must be within [0, 1], got {}",
                    self.market, self.timestamp, c
                )));
            }
        }
        Ok(())
    }
}

/// Closed trade result with PnL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Market traded
    pub market: String,
    /// Open timestamp
    pub entry_time: DateTime<Utc>,
    /// Close timestamp
    pub exit_time: DateTime<Utc>,
    /// Direction of the trade
    pub direction: Direction,
    /// Entry price
    pub entry_price: f64,
    /// Exit price
    pub exit_price: f64,
    /// Position size in USD
    pub size_usd: f64,
    /// Calibrated confidence of the opening recommendation
    pub confidence: f64,
    /// Raw confidence of the opening recommendation
    pub raw_confidence: Option<f64>,
    /// Profit/Loss in USD
    pub pnl_usd: f64,
    /// Profit/Loss as a percentage of entry
    pub pnl_percent: f64,
}

impl ClosedTrade {
    /// Is this a winning trade?
    pub fn is_win(&self) -> bool {
        self.pnl_usd > 0.0
    }

    /// Raw confidence when present, otherwise the calibrated one
    pub fn calibration_input(&self) -> f64 {
        self.raw_confidence.unwrap_or(self.confidence)
    }
}
