//! Position Simulator
//!
//! Replays a recommendation stream through a flat/long/short state machine
//! and emits closed trades with realized PnL.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::types::{Action, ClosedTrade, Direction, Recommendation};

/// Position opened by a recommendation and not yet closed
#[derive(Debug, Clone, PartialEq)]
pub struct OpenPosition {
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub size_usd: f64,
    pub confidence: f64,
    pub raw_confidence: Option<f64>,
}

impl OpenPosition {
    fn open(rec: &Recommendation, size_usd: f64) -> Self {
        Self {
            entry_time: rec.timestamp,
            entry_price: rec.price,
            size_usd,
            confidence: rec.confidence,
            raw_confidence: rec.raw_confidence,
        }
    }

    fn close(self, direction: Direction, exit: &Recommendation) -> ClosedTrade {
        let ret = direction.return_fraction(self.entry_price, exit.price);
        ClosedTrade {
            market: exit.market.clone(),
            entry_time: self.entry_time,
            exit_time: exit.timestamp,
            direction,
            entry_price: self.entry_price,
            exit_price: exit.price,
            size_usd: self.size_usd,
            confidence: self.confidence,
            raw_confidence: self.raw_confidence,
            pnl_usd: self.size_usd * ret,
            pnl_percent: ret * 100.0,
        }
    }
}

/// Per-market position state, local to one simulation run
#[derive(Debug, Clone, PartialEq, Default)]
pub enum PositionState {
    #[default]
    Flat,
    Long(OpenPosition),
    Short(OpenPosition),
}

impl PositionState {
    /// Apply one recommendation. Yields the next state and at most one closed trade.
    pub fn step(self, rec: &Recommendation, size_usd: f64) -> (PositionState, Option<ClosedTrade>) {
        use PositionState::{Flat, Long, Short};

        match (self, rec.action) {
            (Flat, Action::Long) => (Long(OpenPosition::open(rec, size_usd)), None),
            (Flat, Action::Short) => (Short(OpenPosition::open(rec, size_usd)), None),
            (Flat, Action::Hold | Action::Close) => (Flat, None),

            (Long(pos), Action::Long | Action::Hold) => (Long(pos), None),
            (Long(pos), Action::Short) => (
                Short(OpenPosition::open(rec, size_usd)),
                Some(pos.close(Direction::Long, rec)),
            ),
            (Long(pos), Action::Close) => (Flat, Some(pos.close(Direction::Long, rec))),

            (Short(pos), Action::Short | Action::Hold) => (Short(pos), None),
            (Short(pos), Action::Long) => (
                Long(OpenPosition::open(rec, size_usd)),
                Some(pos.close(Direction::Short, rec)),
            ),
            (Short(pos), Action::Close) => (Flat, Some(pos.close(Direction::Short, rec))),
        }
    }

    /// Close whatever is open at the given record's price and time
    pub fn force_close(self, last: &Recommendation) -> Option<ClosedTrade> {
        match self {
            PositionState::Flat => None,
            PositionState::Long(pos) => Some(pos.close(Direction::Long, last)),
            PositionState::Short(pos) => Some(pos.close(Direction::Short, last)),
        }
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::Flat)
    }
}

/// Replays recommendation streams into closed trades
#[derive(Debug, Clone)]
pub struct PositionSimulator {
    /// Size used when a recommendation carries no `size_usd`
    default_size_usd: f64,
}

impl PositionSimulator {
    pub fn new(default_size_usd: f64) -> Self {
        Self { default_size_usd }
    }

    pub fn default_size_usd(&self) -> f64 {
        self.default_size_usd
    }

    /// Simulate the stream and return closed trades ordered by exit time.
    ///
    /// Each market in the stream gets its own state machine. Positions still
    /// open at the end are closed at their market's final record.
    pub fn simulate(&self, recommendations: &[Recommendation]) -> Result<Vec<ClosedTrade>> {
        if recommendations.is_empty() {
            return Err(EngineError::InvalidInput(
                "recommendation list is empty".to_string(),
            ));
        }
        if !self.default_size_usd.is_finite() || self.default_size_usd <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "default position size must be finite and positive, got {}",
                self.default_size_usd
            )));
        }

        let mut states: HashMap<&str, PositionState> = HashMap::new();
        let mut last_seen: HashMap<&str, &Recommendation> = HashMap::new();
        let mut trades = Vec::new();

        for rec in recommendations {
            rec.validate()?;

            if let Some(prev) = last_seen.get(rec.market.as_str()) {
                if rec.timestamp < prev.timestamp {
                    return Err(EngineError::InvalidInput(format!(
                        "{}: recommendations out of order ({} after {})",
                        rec.market, rec.timestamp, prev.timestamp
                    )));
                }
            }
            last_seen.insert(rec.market.as_str(), rec);

            let size = rec.size_usd.unwrap_or(self.default_size_usd);
            let slot = states.entry(rec.market.as_str()).or_default();
            let (next, closed) = std::mem::take(slot).step(rec, size);
            *slot = next;

            if let Some(trade) = closed {
                trades.push(trade);
            }
        }

        // Sorted so force-closes are emitted in a stable order
        let open: BTreeMap<&str, PositionState> = states
            .into_iter()
            .filter(|(_, state)| !state.is_flat())
            .collect();

        for (market, state) in open {
            if let Some(last) = last_seen.get(market) {
                if let Some(trade) = state.force_close(last) {
                    debug!(market = %market, exit_price = last.price, "Force-closed open position at end of stream");
                    trades.push(trade);
                }
            }
        }

        trades.sort_by_key(|t| t.exit_time);

        debug!(
            recommendations = recommendations.len(),
            trades = trades.len(),
            "Simulation complete"
        );

        Ok(trades)
    }
}

impl Default for PositionSimulator {
    fn default() -> Self {
        Self::new(super::DEFAULT_POSITION_SIZE_USD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(i: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i)
    }

    fn rec(i: i64, action: Action, price: f64) -> Recommendation {
        Recommendation::new(t(i), "BTC", action, price, 0.6)
    }

    fn sim() -> PositionSimulator {
        PositionSimulator::new(1000.0)
    }

    #[test]
    fn test_long_then_close() {
        let trades = sim()
            .simulate(&[rec(0, Action::Long, 100_000.0), rec(1, Action::Close, 101_000.0)])
            .unwrap();

        assert_eq!(trades.len(), 1);
        let trade = &trades[0];
        assert_eq!(trade.direction, Direction::Long);
        assert_eq!(trade.entry_price, 100_000.0);
        assert_eq!(trade.exit_price, 101_000.0);
        assert!((trade.pnl_usd - 10.0).abs() < 1e-9);
        assert!((trade.pnl_percent - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_flip_emits_one_trade_and_opens_opposite() {
        let trades = sim()
            .simulate(&[
                rec(0, Action::Long, 100_000.0),
                rec(1, Action::Short, 101_000.0),
                rec(2, Action::Close, 100_500.0),
            ])
            .unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].direction, Direction::Long);
        assert!((trades[0].pnl_usd - 10.0).abs() < 1e-9);

        assert_eq!(trades[1].direction, Direction::Short);
        assert_eq!(trades[1].entry_price, 101_000.0);
        assert_eq!(trades[1].exit_price, 100_500.0);
        assert!((trades[1].pnl_usd - 4.950495).abs() < 1e-5);
    }

    #[test]
    fn test_hold_only_stream() {
        let trades = sim()
            .simulate(&[rec(0, Action::Hold, 100_000.0), rec(1, Action::Hold, 101_000.0)])
            .unwrap();
        assert!(trades.is_empty());
    }

    #[test]
    fn test_force_close_at_end_of_stream() {
        let trades = sim()
            .simulate(&[
                rec(0, Action::Long, 100_000.0),
                rec(1, Action::Hold, 101_000.0),
                rec(2, Action::Hold, 102_000.0),
            ])
            .unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].exit_price, 102_000.0);
        assert_eq!(trades[0].exit_time, t(2));
        assert!((trades[0].pnl_usd - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_signals_do_not_reenter() {
        let trades = sim()
            .simulate(&[
                rec(0, Action::Long, 100.0),
                rec(1, Action::Long, 120.0),
                rec(2, Action::Long, 130.0),
                rec(3, Action::Close, 110.0),
            ])
            .unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].entry_price, 100.0);
        assert_eq!(trades[0].entry_time, t(0));
    }

    #[test]
    fn test_close_while_flat_is_ignored() {
        let trades = sim()
            .simulate(&[
                rec(0, Action::Close, 100.0),
                rec(1, Action::Short, 100.0),
                rec(2, Action::Close, 90.0),
                rec(3, Action::Close, 80.0),
            ])
            .unwrap();

        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].direction, Direction::Short);
        assert!((trades[0].pnl_usd - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_pnl_symmetry() {
        let long = sim()
            .simulate(&[rec(0, Action::Long, 250.0), rec(1, Action::Close, 231.0)])
            .unwrap();
        let short = sim()
            .simulate(&[rec(0, Action::Short, 250.0), rec(1, Action::Close, 231.0)])
            .unwrap();

        assert!((long[0].pnl_usd + short[0].pnl_usd).abs() < 1e-9);
        assert!((long[0].pnl_percent + short[0].pnl_percent).abs() < 1e-9);
    }

    #[test]
    fn test_recommendation_size_overrides_default() {
        let trades = sim()
            .simulate(&[
                rec(0, Action::Long, 100.0).with_size(50.0),
                rec(1, Action::Close, 110.0),
            ])
            .unwrap();
        assert_eq!(trades[0].size_usd, 50.0);
        assert!((trades[0].pnl_usd - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_state_machine_totality() {
        let open = OpenPosition {
            entry_time: t(0),
            entry_price: 100.0,
            size_usd: 10.0,
            confidence: 0.5,
            raw_confidence: None,
        };
        let states = [
            PositionState::Flat,
            PositionState::Long(open.clone()),
            PositionState::Short(open),
        ];

        for state in &states {
            for action in Action::ALL {
                let signal = rec(1, action, 105.0);
                let (next, closed) = state.clone().step(&signal, 10.0);
                let closed_direction = closed.as_ref().map(|t| t.direction);

                match (state, action) {
                    (PositionState::Flat, Action::Long) => {
                        assert!(matches!(&next, PositionState::Long(p) if p.entry_price == 105.0));
                        assert_eq!(closed_direction, None);
                    }
                    (PositionState::Flat, Action::Short) => {
                        assert!(matches!(&next, PositionState::Short(p) if p.entry_price == 105.0));
                        assert_eq!(closed_direction, None);
                    }
                    (PositionState::Flat, Action::Hold | Action::Close) => {
                        assert!(next.is_flat());
                        assert_eq!(closed_direction, None);
                    }
                    // Same-direction signal or hold: keep the original entry
                    (PositionState::Long(_), Action::Long | Action::Hold)
                    | (PositionState::Short(_), Action::Short | Action::Hold) => {
                        assert_eq!(&next, state);
                        assert_eq!(closed_direction, None);
                    }
                    (PositionState::Long(_), Action::Short) => {
                        assert!(matches!(&next, PositionState::Short(p) if p.entry_time == t(1)));
                        assert_eq!(closed_direction, Some(Direction::Long));
                    }
                    (PositionState::Short(_), Action::Long) => {
                        assert!(matches!(&next, PositionState::Long(p) if p.entry_time == t(1)));
                        assert_eq!(closed_direction, Some(Direction::Short));
                    }
                    (PositionState::Long(_), Action::Close) => {
                        assert!(next.is_flat());
                        assert_eq!(closed_direction, Some(Direction::Long));
                    }
                    (PositionState::Short(_), Action::Close) => {
                        assert!(next.is_flat());
                        assert_eq!(closed_direction, Some(Direction::Short));
                    }
                }

                if let Some(trade) = closed {
                    assert_eq!(trade.entry_price, 100.0);
                    assert_eq!(trade.exit_price, 105.0);
                    assert_eq!(trade.exit_time, t(1));
                }
            }
        }
    }

    #[test]
    fn test_markets_are_simulated_independently() {
        let eth = |i, action, price| Recommendation::new(t(i), "ETH", action, price, 0.7);
        let trades = sim()
            .simulate(&[
                rec(0, Action::Long, 100.0),
                eth(0, Action::Short, 50.0),
                rec(1, Action::Hold, 110.0),
                eth(2, Action::Close, 45.0),
            ])
            .unwrap();

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].market, "BTC");
        assert_eq!(trades[0].exit_price, 110.0);
        assert_eq!(trades[1].market, "ETH");
        assert_eq!(trades[1].direction, Direction::Short);
    }

    #[test]
    fn test_invalid_input() {
        assert!(matches!(
            sim().simulate(&[]),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            sim().simulate(&[rec(0, Action::Long, f64::NAN)]),
            Err(EngineError::InvalidInput(_))
        ));
        assert!(matches!(
            sim().simulate(&[rec(1, Action::Long, 100.0), rec(0, Action::Close, 101.0)]),
            Err(EngineError::InvalidInput(_))
        ));
    }
}
