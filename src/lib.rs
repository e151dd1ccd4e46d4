//! Calibot Library
//!
//! Confidence calibration and backtesting for directional trade recommendations

pub mod backtesting;
pub mod calibration;
pub mod config;
pub mod engine;
pub mod error;
pub mod persistence;
pub mod stats;
pub mod types;

pub use error::{EngineError, Result};
