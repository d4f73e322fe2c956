//! Absorption: heavy opposing volume concentrated at one price level
//! without a proportional price move, implying a resting counter-order.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence, TradeSide};
use crate::market::SymbolBuffer;

use super::PatternMatch;

const WINDOW: usize = 100;
const MIN_TRADES: usize = 50;
const TICK: Decimal = dec!(0.5);
/// Share of level volume one side must carry to read as absorption
const DOMINANCE: f64 = 0.6;

#[derive(Default)]
struct LevelVolumes {
    total: u64,
    buy: u64,
    sell: u64,
}

pub fn detect(buffer: &SymbolBuffer, config: &TapeConfig) -> Option<PatternMatch> {
    if buffer.len() < MIN_TRADES {
        return None;
    }

    let mut levels: HashMap<Decimal, LevelVolumes> = HashMap::new();
    let mut total_volume: u64 = 0;

    for trade in buffer.recent(WINDOW) {
        let level = (trade.price / TICK).round() * TICK;
        let entry = levels.entry(level).or_default();
        entry.total += trade.volume;
        match trade.side {
            TradeSide::Buy => entry.buy += trade.volume,
            TradeSide::Sell => entry.sell += trade.volume,
        }
        total_volume += trade.volume;
    }

    if total_volume == 0 {
        return None;
    }

    for (level, volumes) in &levels {
        let concentration = volumes.total as f64 / total_volume as f64;
        if concentration <= config.concentration_threshold
            || volumes.total <= config.absorption_threshold
        {
            continue;
        }

        let buy_ratio = volumes.buy as f64 / volumes.total as f64;
        let sell_ratio = volumes.sell as f64 / volumes.total as f64;

        // Sellers hitting a level that holds reads long; buyers capped reads short.
        // Below the dominance bar the level is plain support/resistance.
        let direction = if sell_ratio > DOMINANCE {
            Direction::Long
        } else if buy_ratio > DOMINANCE {
            Direction::Short
        } else if volumes.buy > volumes.sell {
            Direction::Long
        } else {
            Direction::Short
        };

        let evidence = SignalEvidence {
            level: Some(*level),
            volume: volumes.total,
            buy_volume: volumes.buy,
            sell_volume: volumes.sell,
            ratio: concentration,
            cvd_roc: None,
        };

        return Some(PatternMatch::new(
            PatternKind::Absorption,
            direction,
            concentration,
            evidence,
        ));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Trade;
    use chrono::Utc;

    fn buffer_with(trades: &[(Decimal, TradeSide, u64)]) -> SymbolBuffer {
        let now = Utc::now();
        let mut buffer = SymbolBuffer::new("WDO", 1000);
        for (price, side, volume) in trades {
            buffer.push_trade(Trade::new("WDO", now, *side, *price, *volume), now);
        }
        buffer
    }

    #[test]
    fn test_seller_absorption_reads_long() {
        // 60 heavy sells into one level, light noise elsewhere
        let mut trades = vec![(dec!(5500.0), TradeSide::Sell, 10u64); 60];
        trades.extend(vec![(dec!(5502.0), TradeSide::Buy, 2u64); 40]);
        let buffer = buffer_with(&trades);

        let config = TapeConfig {
            absorption_threshold: 300,
            concentration_threshold: 0.4,
            ..TapeConfig::default()
        };

        let m = detect(&buffer, &config).expect("absorption");
        assert_eq!(m.kind, PatternKind::Absorption);
        assert_eq!(m.direction, Direction::Long);
        assert_eq!(m.evidence.level, Some(dec!(5500.0)));
        assert!(m.strength > 0.4);
    }

    #[test]
    fn test_below_volume_threshold_no_match() {
        let mut trades = vec![(dec!(5500.0), TradeSide::Sell, 2u64); 60];
        trades.extend(vec![(dec!(5502.0), TradeSide::Buy, 1u64); 40]);
        let buffer = buffer_with(&trades);

        let config = TapeConfig {
            absorption_threshold: 300,
            ..TapeConfig::default()
        };

        assert!(detect(&buffer, &config).is_none());
    }

    #[test]
    fn test_spread_volume_no_concentration() {
        let mut trades = Vec::new();
        for i in 0..100u64 {
            let price = dec!(5500.0) + Decimal::from(i % 10) * dec!(0.5);
            trades.push((price, TradeSide::Sell, 10u64));
        }
        let buffer = buffer_with(&trades);

        assert!(detect(&buffer, &TapeConfig::default()).is_none());
    }
}
