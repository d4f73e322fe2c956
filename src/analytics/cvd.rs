//! Cumulative volume delta tracking.
//!
//! CVD is strictly update-only: the running sum folds trades in arrival
//! order and is never corrected retroactively. Rate-of-change is measured
//! over a sample window rather than wall clock so it stays meaningful
//! through bursty arrival.

use std::collections::{HashMap, VecDeque};

use crate::domain::Trade;

const HISTORY_SIZE: usize = 1000;

/// Snapshot returned by each ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct CvdUpdate {
    pub symbol: String,
    pub cvd: i64,
    pub roc: f64,
}

#[derive(Default)]
struct SymbolCvd {
    cumulative: i64,
    history: VecDeque<i64>,
}

pub struct CvdTracker {
    roc_period: usize,
    state: HashMap<String, SymbolCvd>,
}

impl CvdTracker {
    pub fn new(roc_period: usize) -> Self {
        Self {
            roc_period: roc_period.max(2),
            state: HashMap::new(),
        }
    }

    /// Fold one trade into the running delta and recompute the sample ROC
    pub fn ingest(&mut self, trade: &Trade) -> CvdUpdate {
        let entry = self.state.entry(trade.symbol.clone()).or_default();

        entry.cumulative += trade.signed_volume();
        if entry.history.len() >= HISTORY_SIZE {
            entry.history.pop_front();
        }
        entry.history.push_back(entry.cumulative);

        let roc = Self::rate_of_change(entry, self.roc_period);

        CvdUpdate {
            symbol: trade.symbol.clone(),
            cvd: entry.cumulative,
            roc,
        }
    }

    fn rate_of_change(entry: &SymbolCvd, period: usize) -> f64 {
        if entry.history.len() < period {
            return 0.0;
        }
        let current = entry.cumulative;
        let then = entry.history[entry.history.len() - period];
        if then != 0 {
            (current - then) as f64 / then.abs() as f64 * 100.0
        } else if current == 0 {
            0.0
        } else if current > 0 {
            100.0
        } else {
            -100.0
        }
    }

    pub fn cvd(&self, symbol: &str) -> i64 {
        self.state.get(symbol).map(|s| s.cumulative).unwrap_or(0)
    }

    pub fn roc(&self, symbol: &str) -> f64 {
        self.state
            .get(symbol)
            .map(|s| Self::rate_of_change(s, self.roc_period))
            .unwrap_or(0.0)
    }

    /// Change of the running delta over the last `samples` ingestions
    pub fn delta_over(&self, symbol: &str, samples: usize) -> i64 {
        let Some(entry) = self.state.get(symbol) else {
            return 0;
        };
        if entry.history.is_empty() {
            return 0;
        }
        let back = samples.min(entry.history.len() - 1);
        entry.cumulative - entry.history[entry.history.len() - 1 - back]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TradeSide;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, side: TradeSide, volume: u64) -> Trade {
        Trade::new(symbol, Utc::now(), side, dec!(5500.0), volume)
    }

    #[test]
    fn test_cvd_is_signed_running_sum() {
        let mut tracker = CvdTracker::new(5);

        let sequence = [
            (TradeSide::Buy, 10u64),
            (TradeSide::Sell, 4),
            (TradeSide::Buy, 7),
            (TradeSide::Sell, 20),
            (TradeSide::Buy, 3),
        ];

        let mut expected: i64 = 0;
        for (side, volume) in sequence {
            let update = tracker.ingest(&trade("WDO", side, volume));
            expected += match side {
                TradeSide::Buy => volume as i64,
                TradeSide::Sell => -(volume as i64),
            };
            assert_eq!(update.cvd, expected);
        }
        assert_eq!(tracker.cvd("WDO"), expected);
    }

    #[test]
    fn test_per_symbol_isolation() {
        let mut tracker = CvdTracker::new(5);
        tracker.ingest(&trade("WDO", TradeSide::Buy, 100));
        tracker.ingest(&trade("DOL", TradeSide::Sell, 40));

        assert_eq!(tracker.cvd("WDO"), 100);
        assert_eq!(tracker.cvd("DOL"), -40);
        assert_eq!(tracker.cvd("UNKNOWN"), 0);
    }

    #[test]
    fn test_roc_needs_full_window() {
        let mut tracker = CvdTracker::new(3);

        let first = tracker.ingest(&trade("WDO", TradeSide::Buy, 10));
        assert_eq!(first.roc, 0.0);
        let second = tracker.ingest(&trade("WDO", TradeSide::Buy, 10));
        assert_eq!(second.roc, 0.0);

        // Window filled: cvd 10 -> 30, roc = (30-10)/10 * 100 = 200
        let third = tracker.ingest(&trade("WDO", TradeSide::Buy, 10));
        assert_eq!(third.roc, 200.0);
    }

    #[test]
    fn test_roc_zero_base_convention() {
        let mut tracker = CvdTracker::new(2);
        tracker.ingest(&trade("WDO", TradeSide::Buy, 10));
        tracker.ingest(&trade("WDO", TradeSide::Sell, 10));
        // Base sample is 10, current 0 -> -100
        assert_eq!(tracker.roc("WDO"), -100.0);

        let update = tracker.ingest(&trade("WDO", TradeSide::Buy, 5));
        // Base sample is the zero crossing; positive current maps to +100
        assert_eq!(update.roc, 100.0);
    }

    #[test]
    fn test_delta_over() {
        let mut tracker = CvdTracker::new(5);
        for _ in 0..4 {
            tracker.ingest(&trade("WDO", TradeSide::Buy, 25));
        }
        assert_eq!(tracker.delta_over("WDO", 2), 50);
        assert_eq!(tracker.delta_over("WDO", 100), 75);
    }
}
