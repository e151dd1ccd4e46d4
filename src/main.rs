//! Calibot
//!
//! Recomputes calibration curves and prints a backtest report for every
//! configured market.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use calibot::config::AppConfig;
use calibot::engine::{BacktestRequest, ConfidenceEngine};
use calibot::persistence::{CsvRecommendationStore, JsonCalibrationStore};
use calibot::EngineError;

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(config.log.json);

    info!("🚀 Calibot {}", config);

    let recommendations = Arc::new(CsvRecommendationStore::new(&config.persistence.data_dir)?);
    let calibrations = Arc::new(JsonCalibrationStore::new(&config.persistence.data_dir)?);
    let engine = ConfidenceEngine::new(recommendations, calibrations, config.engine_settings());

    for market in &config.bot.markets {
        match engine
            .compute_calibration(market, config.calibration.window_days)
            .await
        {
            Ok(data) => info!(
                market = %market,
                samples = data.sample_size,
                high = data.high_conf_win_rate,
                low = data.low_conf_win_rate,
                "Calibration refreshed"
            ),
            Err(e) => match e.downcast_ref::<EngineError>() {
                Some(EngineError::InsufficientData { .. }) => warn!("⚠️ {}", e),
                _ => error!(market = %market, "Calibration failed: {:#}", e),
            },
        }

        let request = BacktestRequest::new(
            market.clone(),
            config.backtest.days,
            config.backtest.capital_base,
        );
        match engine.run_backtest(&request).await {
            Ok(result) => println!("{}", serde_json::to_string_pretty(&result)?),
            Err(e) => error!(market = %market, "Backtest failed: {:#}", e),
        }
    }

    Ok(())
}
