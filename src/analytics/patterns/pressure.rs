//! Pressure: sustained directional imbalance over a longer window than
//! momentum, reading as resting one-sided interest rather than a burst.

use crate::config::TapeConfig;
use crate::domain::PatternKind;
use crate::market::SymbolBuffer;

use super::momentum::detect_imbalance;
use super::PatternMatch;

const WINDOW: usize = 50;
const MIN_TRADES: usize = 25;

pub fn detect(buffer: &SymbolBuffer, config: &TapeConfig) -> Option<PatternMatch> {
    detect_imbalance(buffer, config, WINDOW, MIN_TRADES, PatternKind::Pressure)
}
