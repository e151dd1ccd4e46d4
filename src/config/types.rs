//! Engine-side configuration sections, re-exported for config consumers

pub use crate::backtesting::BacktestConfig;
pub use crate::calibration::CalibrationConfig;
pub use crate::engine::EngineSettings;
