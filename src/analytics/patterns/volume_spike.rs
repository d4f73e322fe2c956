//! Volume spike: the latest burst of executions running a configured
//! multiple over the buffer's baseline volume.

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence, TradeSide};
use crate::market::SymbolBuffer;

use super::PatternMatch;

/// Trades counted as the current burst
const BURST: usize = 10;
/// Minimum buffer depth before a baseline is meaningful
const MIN_TRADES: usize = 20;

pub fn detect(buffer: &SymbolBuffer, config: &TapeConfig) -> Option<PatternMatch> {
    let len = buffer.len();
    if len < MIN_TRADES {
        return None;
    }

    let burst_trades: Vec<_> = buffer.recent(BURST).collect();
    let burst_volume: u64 = burst_trades.iter().map(|t| t.volume).sum();

    // Baseline from the buffer excluding the burst itself
    let baseline_avg = {
        let prior = len - BURST;
        let total_prior = buffer.total_volume(len) - burst_volume;
        total_prior as f64 / prior as f64
    };
    if baseline_avg <= 0.0 {
        return None;
    }

    let baseline_burst = baseline_avg * BURST as f64;
    let multiple = burst_volume as f64 / baseline_burst;
    if multiple <= config.spike_multiplier {
        return None;
    }

    let buy_volume: u64 = burst_trades
        .iter()
        .filter(|t| t.side == TradeSide::Buy)
        .map(|t| t.volume)
        .sum();
    let sell_volume = burst_volume - buy_volume;
    let direction = if buy_volume >= sell_volume {
        Direction::Long
    } else {
        Direction::Short
    };

    let strength = (multiple / (config.spike_multiplier * 2.0)).clamp(0.0, 1.0);

    let evidence = SignalEvidence {
        level: buffer.last_price(),
        volume: burst_volume,
        buy_volume,
        sell_volume,
        ratio: multiple,
        cvd_roc: None,
    };

    Some(PatternMatch::new(
        PatternKind::VolumeSpike,
        direction,
        strength,
        evidence,
    ))
}
