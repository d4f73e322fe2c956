//! Iceberg: a large order disguised as repeated equal-size executions at
//! one price level.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence};
use crate::market::SymbolBuffer;

use super::PatternMatch;

const WINDOW: usize = 50;
/// One tick of tolerance when matching executions to the level
const TOLERANCE: Decimal = dec!(0.5);

pub fn detect(buffer: &SymbolBuffer, config: &TapeConfig) -> Option<PatternMatch> {
    let last = buffer.recent(1).next()?.clone();
    if last.volume < config.iceberg_min_volume || buffer.len() < config.iceberg_repetitions {
        return None;
    }

    let recent: Vec<_> = buffer.recent(WINDOW).collect();

    let mut repetitions = 0usize;
    let mut volume_at_level: u64 = 0;
    for trade in &recent {
        let distance = (trade.price - last.price).abs();
        if distance < TOLERANCE {
            volume_at_level += trade.volume;
            // Equal clip size at one level is the fractioning fingerprint
            if trade.volume == last.volume {
                repetitions += 1;
            }
        }
    }

    if repetitions < config.iceberg_repetitions {
        return None;
    }

    // Level sitting above recent trading reads as resistance, below as support
    let earlier = &recent[..recent.len().saturating_sub(10)];
    let direction = if earlier.is_empty() {
        Direction::Long
    } else {
        let sum: Decimal = earlier.iter().map(|t| t.price).sum();
        let avg = sum / Decimal::from(earlier.len() as u64);
        if last.price > avg {
            Direction::Short
        } else {
            Direction::Long
        }
    };

    let strength =
        (repetitions as f64 / (config.iceberg_repetitions as f64 * 2.0)).clamp(0.0, 1.0);

    let evidence = SignalEvidence {
        level: Some(last.price),
        volume: volume_at_level,
        buy_volume: 0,
        sell_volume: 0,
        ratio: repetitions as f64,
        cvd_roc: None,
    };

    Some(PatternMatch::new(
        PatternKind::Iceberg,
        direction,
        strength,
        evidence,
    ))
}
