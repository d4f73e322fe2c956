//! Book-visible manipulation checks: layering and spoofing.
//!
//! Only patterns actually visible in the depth snapshot are flagged; intent
//! is never guessed.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::ManipulationConfig;
use crate::domain::{BookSnapshot, Warning};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookSide {
    Bid,
    Ask,
}

impl BookSide {
    fn as_str(&self) -> &'static str {
        match self {
            BookSide::Bid => "bid",
            BookSide::Ask => "ask",
        }
    }
}

pub struct DefensiveFilter {
    config: ManipulationConfig,
}

impl DefensiveFilter {
    pub fn new(config: ManipulationConfig) -> Self {
        Self { config }
    }

    pub fn block_signals(&self) -> bool {
        self.config.actions.block_signals
    }

    /// Inspect a fresh snapshot; one warning per detected pattern
    pub fn inspect(&self, book: &BookSnapshot, now: DateTime<Utc>) -> Vec<Warning> {
        let mut warnings = Vec::new();

        if let Some(w) = self.check_layering(book, now) {
            warnings.push(w);
        }
        if let Some(w) = self.check_spoofing(book, now) {
            warnings.push(w);
        }

        for warning in &warnings {
            warn!(symbol = %book.symbol, "{}", warning.message);
        }

        warnings
    }

    /// Layering: several same-side levels carrying near-identical size.
    /// Natural resting orders vary; a uniform wall is suspect.
    fn check_layering(&self, book: &BookSnapshot, now: DateTime<Utc>) -> Option<Warning> {
        let cfg = &self.config.layering;

        for (side, levels) in [(BookSide::Bid, &book.bids), (BookSide::Ask, &book.asks)] {
            if levels.len() < cfg.min_levels {
                continue;
            }

            let volumes: Vec<u64> = levels.iter().take(6).map(|l| l.volume).collect();
            let head = &volumes[..cfg.min_levels.min(volumes.len())];

            if head.iter().any(|v| *v < cfg.min_volume_per_level) {
                continue;
            }

            let avg = head.iter().sum::<u64>() as f64 / head.len() as f64;
            let uniform = head
                .iter()
                .all(|v| (*v as f64 - avg).abs() / avg <= cfg.uniformity_threshold);

            if uniform {
                return Some(Warning::manipulation(
                    &book.symbol,
                    format!(
                        "layering suspected on {} side: {}+ near-identical levels of ~{} contracts",
                        side.as_str(),
                        cfg.min_levels,
                        avg as u64
                    ),
                    now,
                ));
            }
        }

        None
    }

    /// Spoofing: one side of the book carrying a grossly larger resting
    /// volume than the other across the checked depth.
    fn check_spoofing(&self, book: &BookSnapshot, now: DateTime<Utc>) -> Option<Warning> {
        let cfg = &self.config.spoofing;

        let bid_volume = book.bid_volume(cfg.levels_to_check);
        let ask_volume = book.ask_volume(cfg.levels_to_check);
        if bid_volume == 0 || ask_volume == 0 {
            return None;
        }

        let (ratio, heavier) = if bid_volume > ask_volume {
            (bid_volume as f64 / ask_volume as f64, BookSide::Bid)
        } else {
            (ask_volume as f64 / bid_volume as f64, BookSide::Ask)
        };

        if ratio >= cfg.imbalance_ratio {
            return Some(Warning::manipulation(
                &book.symbol,
                format!(
                    "spoofing suspected: {} side {:.1}x heavier across top {} levels",
                    heavier.as_str(),
                    ratio,
                    cfg.levels_to_check
                ),
                now,
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::BookLevel;
    use rust_decimal_macros::dec;

    fn book(bids: Vec<u64>, asks: Vec<u64>) -> BookSnapshot {
        BookSnapshot {
            symbol: "WDO".to_string(),
            timestamp: Utc::now(),
            bids: bids
                .into_iter()
                .enumerate()
                .map(|(i, volume)| BookLevel {
                    price: dec!(5499.5) - rust_decimal::Decimal::from(i as u64) * dec!(0.5),
                    volume,
                })
                .collect(),
            asks: asks
                .into_iter()
                .enumerate()
                .map(|(i, volume)| BookLevel {
                    price: dec!(5500.0) + rust_decimal::Decimal::from(i as u64) * dec!(0.5),
                    volume,
                })
                .collect(),
        }
    }

    fn filter() -> DefensiveFilter {
        DefensiveFilter::new(ManipulationConfig::default())
    }

    #[test]
    fn test_uniform_bid_wall_flags_layering() {
        let book = book(vec![100, 100, 100, 100], vec![90, 30, 20, 45]);
        let warnings = filter().inspect(&book, Utc::now());

        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("layering"));
        assert_eq!(warnings[0].symbol.as_deref(), Some("WDO"));
    }

    #[test]
    fn test_varied_book_is_clean() {
        let book = book(vec![100, 40, 85, 120], vec![90, 30, 110, 45]);
        assert!(filter().inspect(&book, Utc::now()).is_empty());
    }

    #[test]
    fn test_extreme_imbalance_flags_spoofing() {
        let book = book(vec![400, 420, 380, 410, 390], vec![20, 25, 15, 30, 22]);
        let warnings = filter().inspect(&book, Utc::now());

        assert!(warnings.iter().any(|w| w.message.contains("spoofing")));
    }

    #[test]
    fn test_small_uniform_levels_ignored() {
        // Uniform but below the per-level volume floor
        let book = book(vec![20, 20, 20, 20], vec![25, 60, 45, 30]);
        assert!(filter().inspect(&book, Utc::now()).is_empty());
    }
}
