//! Strategic setup detectors.
//!
//! Each detector is a small seed/confirm state machine: the first
//! qualifying tactical signal creates a pending setup, the confirming
//! observation (a second signal, a CVD reversal, a coincident pattern)
//! promotes it within the kind's window. The lifecycle manager owns the
//! setups themselves; detectors only remember which seeds are theirs.

mod continuation;
mod divergence;
mod reversal;

pub use continuation::{BreakoutIgnitionDetector, PullbackRejectionDetector};
pub use divergence::DivergenceSetupDetector;
pub use reversal::{ReversalSlowDetector, ReversalViolentDetector};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::analytics::regime::{MarketRegime, VolatilityBucket};
use crate::config::TapeConfig;
use crate::domain::{StrategicSetup, TacticalSignal};
use crate::market::SymbolBuffer;

/// Read-only context handed to detectors alongside each signal or tick
pub struct SetupContext<'a> {
    pub buffer: &'a SymbolBuffer,
    pub regime: Option<&'a MarketRegime>,
    pub cvd: i64,
    /// CVD change over the recent sample window, for reversal confirmation
    pub cvd_delta: i64,
}

/// What a detector wants the lifecycle manager to do
#[derive(Debug, Clone)]
pub enum SetupAction {
    /// Create a new pending setup
    Create(StrategicSetup),
    /// Confirm a previously seeded setup, optionally naming the signal
    Confirm { id: Uuid, with: Option<Uuid> },
}

pub trait SetupDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction>;

    /// Called on every processed event and sweep tick, for detectors whose
    /// confirmation comes from market state rather than another signal
    fn on_tick(
        &mut self,
        _symbol: &str,
        _ctx: &SetupContext<'_>,
        _now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        Vec::new()
    }
}

/// Quality modifier from the current regime; turbulent tape discounts
/// every setup's composite score.
pub(crate) fn regime_score_modifier(regime: Option<&MarketRegime>) -> f64 {
    match regime.map(|r| r.volatility) {
        Some(VolatilityBucket::Extreme) => 0.85,
        Some(VolatilityBucket::High) => 0.95,
        _ => 1.0,
    }
}

/// Per-symbol reseed suppression. The patterns that feed a setup usually
/// persist across several consecutive events, so without a cooldown one
/// burst would spawn a train of near-identical setups.
#[derive(Default)]
pub(crate) struct SeedCooldown {
    until: std::collections::HashMap<String, DateTime<Utc>>,
}

impl SeedCooldown {
    pub(crate) fn active(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        matches!(self.until.get(symbol), Some(until) if now < *until)
    }

    pub(crate) fn arm(&mut self, symbol: &str, until: DateTime<Utc>) {
        self.until.insert(symbol.to_string(), until);
    }
}

/// The fixed bank of five detectors behind the lifecycle manager
pub struct SetupEngine {
    detectors: Vec<Box<dyn SetupDetector>>,
}

impl SetupEngine {
    pub fn new(tape: &TapeConfig) -> Self {
        Self {
            detectors: vec![
                Box::new(ReversalViolentDetector::new()),
                Box::new(ReversalSlowDetector::new()),
                Box::new(BreakoutIgnitionDetector::new()),
                Box::new(PullbackRejectionDetector::new()),
                Box::new(DivergenceSetupDetector::new(tape.extreme_threshold)),
            ],
        }
    }

    pub fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        self.detectors
            .iter_mut()
            .flat_map(|d| d.on_signal(signal, ctx, now))
            .collect()
    }

    pub fn on_tick(
        &mut self,
        symbol: &str,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        self.detectors
            .iter_mut()
            .flat_map(|d| d.on_tick(symbol, ctx, now))
            .collect()
    }
}
