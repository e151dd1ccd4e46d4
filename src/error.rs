//! Error types for the calibration and backtesting core.

use thiserror::Error;

/// Result type alias using the engine error type.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by simulation, calibration and analysis.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Not enough closed trades to fit a calibration curve
    #[error(
        "insufficient data for {market}: {samples} closed trades, at least {required} required \
         (widen the window or gather more recommendations)"
    )]
    InsufficientData {
        market: String,
        samples: usize,
        required: usize,
    },

    /// Invalid input or request
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
