//! Configuration management for Calibot
//!
//! Loads from config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub backtest: BacktestConfig,
    pub calibration: CalibrationConfig,
    pub persistence: PersistenceConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logging
    pub tag: String,
    /// Markets to calibrate and backtest
    pub markets: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Data directory
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();
        Self::load_from(Config::builder())
    }

    fn load_from(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self> {
        let defaults = EngineSettings::default();

        let config = builder
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.markets", vec!["BTC"])?
            // Backtest defaults
            .set_default("backtest.days", defaults.backtest.days as i64)?
            .set_default("backtest.capital_base", defaults.backtest.capital_base)?
            .set_default("backtest.default_size_usd", defaults.backtest.default_size_usd)?
            .set_default(
                "backtest.apply_latest_calibration",
                defaults.backtest.apply_latest_calibration,
            )?
            // Calibration defaults
            .set_default("calibration.window_days", defaults.calibration.window_days as i64)?
            .set_default("calibration.min_samples", defaults.calibration.min_samples as i64)?
            .set_default("calibration.bucket_count", defaults.calibration.bucket_count as i64)?
            .set_default(
                "calibration.high_conf_threshold",
                defaults.calibration.high_conf_threshold,
            )?
            .set_default("calibration.max_age_days", defaults.calibration.max_age_days)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("log.json", false)?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (CALIBOT__*)
            .add_source(
                Environment::with_prefix("CALIBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("bot.markets")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.bot.markets.is_empty() {
            bail!("bot.markets must list at least one market");
        }
        if !self.backtest.default_size_usd.is_finite() || self.backtest.default_size_usd <= 0.0 {
            bail!(
                "backtest.default_size_usd must be positive, got {}",
                self.backtest.default_size_usd
            );
        }
        if !self.backtest.capital_base.is_finite() {
            bail!("backtest.capital_base must be finite");
        }
        if self.calibration.bucket_count == 0 {
            bail!("calibration.bucket_count must be at least 1");
        }
        if self.calibration.min_samples == 0 {
            bail!("calibration.min_samples must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.calibration.high_conf_threshold) {
            bail!(
                "calibration.high_conf_threshold must be within [0, 1], got {}",
                self.calibration.high_conf_threshold
            );
        }
        if self.calibration.max_age_days < 0 {
            bail!("calibration.max_age_days must not be negative");
        }
        Ok(())
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            backtest: self.backtest.clone(),
            calibration: self.calibration.clone(),
        }
    }

    /// Generate a digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} markets={:?} days={} capital={:.2} window={}d buckets={} threshold={:.2} data_dir={}",
            self.bot.tag,
            self.bot.markets,
            self.backtest.days,
            self.backtest.capital_base,
            self.calibration.window_days,
            self.calibration.bucket_count,
            self.calibration.high_conf_threshold,
            self.persistence.data_dir
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
