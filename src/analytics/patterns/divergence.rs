//! Divergence: price direction opposing the CVD rate-of-change, flagging
//! flow that disagrees with the move.

use rust_decimal::prelude::ToPrimitive;

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence};
use crate::market::SymbolBuffer;

use super::PatternMatch;

const WINDOW: usize = 50;
const MIN_TRADES: usize = 10;
/// Net price move in points required before a trend is worth reading
const MIN_TREND_POINTS: f64 = 1.0;

pub fn detect(buffer: &SymbolBuffer, cvd_roc: f64, config: &TapeConfig) -> Option<PatternMatch> {
    if buffer.len() < MIN_TRADES || cvd_roc.abs() < config.divergence_threshold {
        return None;
    }

    let first = buffer.first_price_of_recent(WINDOW)?;
    let last = buffer.last_price()?;
    let trend = (last - first).to_f64()?;

    // Price up while flow drains reads short; price down on rising flow reads long
    let direction = if trend > MIN_TREND_POINTS && cvd_roc < -config.divergence_threshold {
        Direction::Short
    } else if trend < -MIN_TREND_POINTS && cvd_roc > config.divergence_threshold {
        Direction::Long
    } else {
        return None;
    };

    let strength = (cvd_roc.abs() / config.extreme_threshold).clamp(0.0, 1.0);

    let evidence = SignalEvidence {
        level: Some(last),
        volume: buffer.total_volume(WINDOW),
        buy_volume: 0,
        sell_volume: 0,
        ratio: trend,
        cvd_roc: Some(cvd_roc),
    };

    Some(PatternMatch::new(
        PatternKind::Divergence,
        direction,
        strength,
        evidence,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Trade, TradeSide};
    use chrono::Utc;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn rising_buffer() -> SymbolBuffer {
        let now = Utc::now();
        let mut buffer = SymbolBuffer::new("WDO", 1000);
        for i in 0..30u64 {
            let price = dec!(5500.0) + Decimal::from(i) * dec!(0.5);
            buffer.push_trade(Trade::new("WDO", now, TradeSide::Buy, price, 10), now);
        }
        buffer
    }

    #[test]
    fn test_bearish_divergence() {
        let buffer = rising_buffer();
        let config = TapeConfig::default();

        // Price rising while flow collapses
        let m = detect(&buffer, -220.0, &config).expect("divergence");
        assert_eq!(m.kind, PatternKind::Divergence);
        assert_eq!(m.direction, Direction::Short);
        assert!(m.strength > 0.8);
        assert_eq!(m.evidence.cvd_roc, Some(-220.0));
    }

    #[test]
    fn test_aligned_flow_no_match() {
        let buffer = rising_buffer();
        let config = TapeConfig::default();

        // Price and flow both rising: not a divergence
        assert!(detect(&buffer, 220.0, &config).is_none());
    }

    #[test]
    fn test_weak_roc_no_match() {
        let buffer = rising_buffer();
        let config = TapeConfig::default();

        assert!(detect(&buffer, -100.0, &config).is_none());
    }
}
