//! Momentum: directional trade-volume imbalance over a short window.

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence, TradeSide};
use crate::market::SymbolBuffer;

use super::PatternMatch;

const WINDOW: usize = 20;
const MIN_TRADES: usize = 10;

pub fn detect(buffer: &SymbolBuffer, config: &TapeConfig) -> Option<PatternMatch> {
    detect_imbalance(buffer, config, WINDOW, MIN_TRADES, PatternKind::Momentum)
}

/// Shared imbalance scan used by both the momentum and pressure detectors;
/// they differ only in window length.
pub(super) fn detect_imbalance(
    buffer: &SymbolBuffer,
    config: &TapeConfig,
    window: usize,
    min_trades: usize,
    kind: PatternKind,
) -> Option<PatternMatch> {
    if buffer.len() < min_trades {
        return None;
    }

    let mut buy_volume: u64 = 0;
    let mut sell_volume: u64 = 0;
    for trade in buffer.recent(window) {
        match trade.side {
            TradeSide::Buy => buy_volume += trade.volume,
            TradeSide::Sell => sell_volume += trade.volume,
        }
    }

    let total = buy_volume + sell_volume;
    if total < config.exhaustion_volume {
        return None;
    }

    let buy_ratio = buy_volume as f64 / total as f64;
    let sell_ratio = sell_volume as f64 / total as f64;

    let (direction, ratio) = if buy_ratio >= config.pressure_threshold {
        (Direction::Long, buy_ratio)
    } else if sell_ratio >= config.pressure_threshold {
        (Direction::Short, sell_ratio)
    } else {
        return None;
    };

    let evidence = SignalEvidence {
        level: buffer.last_price(),
        volume: total,
        buy_volume,
        sell_volume,
        ratio,
        cvd_roc: None,
    };

    Some(PatternMatch::new(kind, direction, ratio, evidence))
}
