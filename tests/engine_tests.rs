//! Tests for the calibration and backtesting engine

#[cfg(test)]
mod tests {
    use calibot::backtesting::metrics::PerformanceAnalyzer;
    use calibot::backtesting::{export_trades_csv, PositionSimulator};
    use calibot::calibration::{
        apply_calibration, pool_adjacent_violators, CalibrationComputer, CalibrationConfig,
    };
    use calibot::engine::{BacktestRequest, ConfidenceEngine, EngineSettings};
    use calibot::persistence::{
        CalibrationStore, CsvRecommendationStore, InMemoryCalibrationStore,
        InMemoryRecommendationStore, JsonCalibrationStore,
    };
    use calibot::types::{Action, ClosedTrade, Direction, Recommendation};
    use calibot::EngineError;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 1, 0, 0, 0).unwrap()
    }

    fn rec(hour: i64, action: Action, price: f64) -> Recommendation {
        Recommendation::new(base() + Duration::hours(hour), "BTC", action, price, 0.6)
    }

    /// Alternating long/close pairs whose outcome follows raw confidence
    fn history(pairs: usize) -> Vec<Recommendation> {
        let mut recs = Vec::new();
        for i in 0..pairs {
            let raw = 0.05 + (i % 10) as f64 * 0.1;
            let wins = raw >= 0.5 || i % 3 == 0;
            let entry = 100.0;
            let exit = if wins { 102.0 } else { 98.0 };
            let hour = (i * 2) as i64;
            recs.push(rec(hour, Action::Long, entry).with_raw_confidence(raw));
            recs.push(rec(hour + 1, Action::Close, exit));
        }
        recs
    }

    // ============================================================================
    // Simulation scenarios
    // ============================================================================

    #[test]
    fn test_simulation_scenarios() {
        let sim = PositionSimulator::new(1000.0);

        let trades = sim
            .simulate(&[rec(0, Action::Long, 100_000.0), rec(1, Action::Close, 101_000.0)])
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert!((trades[0].pnl_usd - 10.0).abs() < 0.005);
        assert!((trades[0].pnl_percent - 1.0).abs() < 0.005);

        let trades = sim
            .simulate(&[
                rec(0, Action::Long, 100_000.0),
                rec(1, Action::Short, 101_000.0),
                rec(2, Action::Close, 100_500.0),
            ])
            .unwrap();
        assert_eq!(trades.len(), 2);
        assert!((trades[0].pnl_usd - 10.0).abs() < 0.005);
        assert_eq!(trades[1].direction, Direction::Short);
        assert!((trades[1].pnl_usd - 4.95).abs() < 0.005);

        let trades = sim
            .simulate(&[rec(0, Action::Hold, 100_000.0), rec(1, Action::Hold, 101_000.0)])
            .unwrap();
        assert!(trades.is_empty());

        let trades = sim
            .simulate(&[
                rec(0, Action::Long, 100_000.0),
                rec(1, Action::Hold, 101_000.0),
                rec(2, Action::Hold, 102_000.0),
            ])
            .unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_price, 102_000.0);
        assert!((trades[0].pnl_usd - 20.0).abs() < 0.005);
    }

    #[test]
    fn test_exit_never_precedes_entry() {
        let trades = PositionSimulator::new(100.0).simulate(&history(25)).unwrap();
        assert_eq!(trades.len(), 25);
        assert!(trades.iter().all(|t| t.exit_time >= t.entry_time));
    }

    // ============================================================================
    // Calibration
    // ============================================================================

    #[test]
    fn test_calibration_from_simulated_history() {
        let trades = PositionSimulator::new(100.0).simulate(&history(40)).unwrap();
        let data = CalibrationComputer::new(CalibrationConfig::default())
            .compute("BTC", 30, &trades, base())
            .unwrap();

        let points = data.points.points();
        assert!(points
            .windows(2)
            .all(|w| w[0].calibrated_confidence <= w[1].calibrated_confidence));
        assert!(data.high_conf_win_rate >= data.low_conf_win_rate);
        assert!(data.correlation > 0.0 && data.correlation <= 1.0);

        // Boundaries clamp to the end points
        assert_eq!(apply_calibration(-0.5, &data), points[0].calibrated_confidence);
        assert_eq!(
            apply_calibration(1.5, &data),
            points[points.len() - 1].calibrated_confidence
        );
        for p in points {
            assert_eq!(apply_calibration(p.raw_confidence, &data), p.calibrated_confidence);
        }
    }

    #[test]
    fn test_pooled_buckets_are_a_fixed_point() {
        let trades = PositionSimulator::new(100.0).simulate(&history(40)).unwrap();
        let computer = CalibrationComputer::default();
        let buckets = computer.bucketize(&trades);

        let pooled = pool_adjacent_violators(&buckets);
        assert_eq!(pool_adjacent_violators(&pooled), pooled);
    }

    #[test]
    fn test_empty_analysis() {
        let report = PerformanceAnalyzer::default().analyze(&[], &[], 0.0);
        assert_eq!(report.strategy.win_rate, 0.0);
        assert_eq!(report.strategy.num_trades, 0);
        assert_eq!(report.strategy.total_pnl_usd, 0.0);
        assert_eq!(report.strategy.total_return_percent, 0.0);
    }

    // ============================================================================
    // Engine end to end
    // ============================================================================

    fn engine_with(recs: Vec<Recommendation>) -> (ConfidenceEngine, Arc<InMemoryCalibrationStore>) {
        let calibrations = Arc::new(InMemoryCalibrationStore::new());
        let engine = ConfidenceEngine::new(
            Arc::new(InMemoryRecommendationStore::with_records(recs)),
            calibrations.clone(),
            EngineSettings::default(),
        );
        (engine, calibrations)
    }

    #[tokio::test]
    async fn test_calibrate_then_backtest() {
        let now = base() + Duration::days(5);
        let (engine, store) = engine_with(history(40));

        let data = engine.compute_calibration_at("BTC", 30, now).await.unwrap();
        assert_eq!(data.sample_size, 40);
        assert_eq!(store.latest("BTC").await.unwrap(), Some(data.clone()));

        let calibrated = engine.calibrate_confidence("BTC", 0.95, now).await.unwrap();
        assert_eq!(calibrated, data.apply(0.95));

        let result = engine
            .run_backtest_at(&BacktestRequest::new("BTC", 30, 10_000.0), now)
            .await
            .unwrap();
        assert_eq!(result.market, "BTC");
        assert_eq!(result.total_recommendations, 80);
        assert_eq!(result.recommended_strategy.num_trades, 40);
        assert_eq!(result.by_action.long.count, 40);
        assert_eq!(result.by_action.close.count, 40);
        assert!(result.raw_confidence_analysis.is_some());
        assert!(result.improvement_suggestions.len() <= 6);
        assert_eq!(export_trades_csv(&result.trades).unwrap().lines().count(), 41);
    }

    #[tokio::test]
    async fn test_window_excludes_old_recommendations() {
        let now = base() + Duration::days(60);
        let (engine, _) = engine_with(history(40));

        let err = engine
            .run_backtest_at(&BacktestRequest::new("BTC", 7, 1000.0), now)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<EngineError>(),
            Some(EngineError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_insufficient_history() {
        let (engine, store) = engine_with(history(5));
        let err = engine
            .compute_calibration_at("BTC", 30, base() + Duration::days(1))
            .await
            .unwrap_err();

        match err.downcast_ref::<EngineError>() {
            Some(EngineError::InsufficientData {
                samples, required, ..
            }) => {
                assert_eq!(*samples, 5);
                assert_eq!(*required, 10);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(store.latest("BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_backed_stores() {
        let dir = tempfile::tempdir().unwrap();
        let recs = CsvRecommendationStore::new(dir.path()).unwrap();
        recs.append("BTC", &history(12)).await.unwrap();
        let cals = Arc::new(JsonCalibrationStore::new(dir.path()).unwrap());

        let engine = ConfidenceEngine::new(Arc::new(recs), cals.clone(), EngineSettings::default());
        let now = base() + Duration::days(2);
        let data = engine.compute_calibration_at("BTC", 30, now).await.unwrap();

        let stored = cals.latest("BTC").await.unwrap().unwrap();
        assert_eq!(stored.computed_at, now);
        assert_eq!(stored.sample_size, 12);
        assert_eq!(stored.points.points().len(), data.points.points().len());
        for (a, b) in stored.points.points().iter().zip(data.points.points()) {
            assert!((a.calibrated_confidence - b.calibrated_confidence).abs() < 1e-12);
        }
    }

    #[test]
    fn test_closed_trade_serializes_lowercase_direction() {
        let trade = ClosedTrade {
            market: "BTC".to_string(),
            entry_time: base(),
            exit_time: base(),
            direction: Direction::Short,
            entry_price: 1.0,
            exit_price: 1.0,
            size_usd: 1.0,
            confidence: 0.5,
            raw_confidence: None,
            pnl_usd: 0.0,
            pnl_percent: 0.0,
        };
        let json = serde_json::to_string(&trade).unwrap();
        assert!(json.contains("\"direction\":\"short\""));
    }
}
