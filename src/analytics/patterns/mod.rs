//! Tape-reading pattern detectors.
//!
//! A fixed set of enumerated detectors, each a stateless function of the
//! current rolling buffer (plus the CVD rate-of-change where the pattern
//! needs flow context). A detector failure is isolated to that detector and
//! symbol for the cycle and reported as no-match.

mod absorption;
mod divergence;
mod iceberg;
mod momentum;
mod pressure;
mod volume_spike;

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::TapeConfig;
use crate::domain::{Direction, PatternKind, SignalEvidence};
use crate::market::SymbolBuffer;

/// A positive detection with its strength score in [0, 1]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub direction: Direction,
    pub strength: f64,
    pub evidence: SignalEvidence,
}

impl PatternMatch {
    pub fn new(
        kind: PatternKind,
        direction: Direction,
        strength: f64,
        evidence: SignalEvidence,
    ) -> Self {
        Self {
            kind,
            direction,
            strength: strength.clamp(0.0, 1.0),
            evidence,
        }
    }
}

/// Run one detector over the buffer
pub fn evaluate(
    kind: PatternKind,
    buffer: &SymbolBuffer,
    cvd_roc: f64,
    config: &TapeConfig,
) -> Option<PatternMatch> {
    match kind {
        PatternKind::Absorption => absorption::detect(buffer, config),
        PatternKind::Momentum => momentum::detect(buffer, config),
        PatternKind::Divergence => divergence::detect(buffer, cvd_roc, config),
        PatternKind::Pressure => pressure::detect(buffer, config),
        PatternKind::VolumeSpike => volume_spike::detect(buffer, config),
        PatternKind::Iceberg => iceberg::detect(buffer, config),
    }
}

/// Run one detector with fault isolation: a panicking detector is treated
/// as no-match for this cycle and never takes down the pipeline.
pub fn evaluate_guarded(
    kind: PatternKind,
    buffer: &SymbolBuffer,
    cvd_roc: f64,
    config: &TapeConfig,
) -> Option<PatternMatch> {
    match catch_unwind(AssertUnwindSafe(|| evaluate(kind, buffer, cvd_roc, config))) {
        Ok(result) => result,
        Err(_) => {
            warn!(
                detector = %kind,
                symbol = %buffer.symbol(),
                "detector panicked, treating as no-match for this cycle"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Trade, TradeSide};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_empty_buffer_matches_nothing() {
        let buffer = SymbolBuffer::new("WDO", 100);
        let config = TapeConfig::default();

        for kind in PatternKind::ALL {
            assert!(evaluate(kind, &buffer, 0.0, &config).is_none());
        }
    }

    #[test]
    fn test_guard_passes_results_through() {
        let now = Utc::now();
        let mut buffer = SymbolBuffer::new("WDO", 100);
        let config = TapeConfig::default();

        for i in 0..30 {
            let side = if i % 2 == 0 { TradeSide::Buy } else { TradeSide::Sell };
            buffer.push_trade(Trade::new("WDO", now, side, dec!(5500.0), 10), now);
        }

        for kind in PatternKind::ALL {
            assert_eq!(
                evaluate(kind, &buffer, 0.0, &config),
                evaluate_guarded(kind, &buffer, 0.0, &config)
            );
        }
    }
}
