//! Continuation setups: breakout ignition (coincident momentum and
//! pressure) and pullback rejection (retracement against an established
//! trend, rejected by a confirming pattern).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::domain::{Direction, PatternKind, SetupKind, StrategicSetup, TacticalSignal};

use super::{regime_score_modifier, SeedCooldown, SetupAction, SetupContext, SetupDetector};

struct IgnitionSeed {
    setup_id: Uuid,
    direction: Direction,
    seeded_by: PatternKind,
    seeded_at: DateTime<Utc>,
}

/// Reseed holdoff after a confirmed ignition, in seconds; the igniting
/// imbalance usually persists for several more events
const IGNITION_COOLDOWN_SECS: i64 = 10;

/// Momentum and pressure firing together, same direction
pub struct BreakoutIgnitionDetector {
    pending: HashMap<String, IgnitionSeed>,
    cooldown: SeedCooldown,
}

impl BreakoutIgnitionDetector {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            cooldown: SeedCooldown::default(),
        }
    }
}

impl Default for BreakoutIgnitionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupDetector for BreakoutIgnitionDetector {
    fn name(&self) -> &'static str {
        "breakout_ignition"
    }

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        if !matches!(signal.kind, PatternKind::Momentum | PatternKind::Pressure) {
            return Vec::new();
        }

        let window = SetupKind::BreakoutIgnition.confirmation_window();

        if let Some(seed) = self.pending.get(&signal.symbol) {
            if now - seed.seeded_at > window {
                self.pending.remove(&signal.symbol);
            } else if seed.seeded_by != signal.kind && seed.direction == signal.direction {
                let id = seed.setup_id;
                self.pending.remove(&signal.symbol);
                self.cooldown.arm(
                    &signal.symbol,
                    now + chrono::Duration::seconds(IGNITION_COOLDOWN_SECS),
                );
                return vec![SetupAction::Confirm {
                    id,
                    with: Some(signal.id),
                }];
            } else {
                // Same pattern again or conflicting direction: reseed below
                self.pending.remove(&signal.symbol);
            }
        }

        if self.cooldown.active(&signal.symbol, now) {
            return Vec::new();
        }
        let Some(entry) = ctx.buffer.last_price() else {
            return Vec::new();
        };
        let score = (0.75 + signal.strength * 0.15) * regime_score_modifier(ctx.regime);
        let setup = StrategicSetup::seed(
            &signal.symbol,
            SetupKind::BreakoutIgnition,
            signal.direction,
            now,
            entry,
            score,
            signal.id,
        );
        self.pending.insert(
            signal.symbol.clone(),
            IgnitionSeed {
                setup_id: setup.id,
                direction: signal.direction,
                seeded_by: signal.kind,
                seeded_at: now,
            },
        );
        vec![SetupAction::Create(setup)]
    }
}

struct PullbackSeed {
    setup_id: Uuid,
    direction: Direction,
    seeded_at: DateTime<Utc>,
}

/// Net drift over the trend window that establishes a trend
const TREND_POINTS: Decimal = dec!(5.0);
/// Retracement against the trend that reads as a pullback
const PULLBACK_POINTS: Decimal = dec!(2.0);
const TREND_WINDOW: usize = 100;
const PULLBACK_WINDOW: usize = 20;

/// Trend, then a retracement, then any of three rejection patterns
pub struct PullbackRejectionDetector {
    pending: HashMap<String, PullbackSeed>,
    cooldown: SeedCooldown,
}

impl PullbackRejectionDetector {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            cooldown: SeedCooldown::default(),
        }
    }

    /// A pullback exists when price has trended and the recent tail
    /// retraces against that trend without breaking it.
    fn detect_pullback(ctx: &SetupContext<'_>) -> Option<Direction> {
        let buffer = ctx.buffer;
        if buffer.len() < TREND_WINDOW {
            return None;
        }

        let first = buffer.first_price_of_recent(TREND_WINDOW)?;
        let last = buffer.last_price()?;
        let drift = last - first;

        let recent: Vec<Decimal> = buffer
            .recent(PULLBACK_WINDOW)
            .map(|t| t.price)
            .collect();

        if drift >= TREND_POINTS {
            let recent_high = recent.iter().copied().max()?;
            if recent_high - last >= PULLBACK_POINTS {
                return Some(Direction::Long);
            }
        } else if drift <= -TREND_POINTS {
            let recent_low = recent.iter().copied().min()?;
            if last - recent_low >= PULLBACK_POINTS {
                return Some(Direction::Short);
            }
        }
        None
    }
}

impl Default for PullbackRejectionDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupDetector for PullbackRejectionDetector {
    fn name(&self) -> &'static str {
        "pullback_rejection"
    }

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        _ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        // Any of the three rejection patterns confirms an armed pullback
        if !matches!(
            signal.kind,
            PatternKind::Absorption | PatternKind::Pressure | PatternKind::Iceberg
        ) {
            return Vec::new();
        }

        let Some(seed) = self.pending.get(&signal.symbol) else {
            return Vec::new();
        };
        if now - seed.seeded_at > SetupKind::PullbackRejection.confirmation_window() {
            self.pending.remove(&signal.symbol);
            return Vec::new();
        }
        if signal.direction != seed.direction {
            return Vec::new();
        }

        let id = seed.setup_id;
        self.pending.remove(&signal.symbol);
        self.cooldown.arm(
            &signal.symbol,
            now + SetupKind::PullbackRejection.confirmation_window(),
        );
        vec![SetupAction::Confirm {
            id,
            with: Some(signal.id),
        }]
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        if let Some(seed) = self.pending.get(symbol) {
            if now - seed.seeded_at > SetupKind::PullbackRejection.confirmation_window() {
                self.pending.remove(symbol);
            } else {
                return Vec::new();
            }
        }
        if self.cooldown.active(symbol, now) {
            return Vec::new();
        }

        let Some(direction) = Self::detect_pullback(ctx) else {
            return Vec::new();
        };
        let Some(entry) = ctx.buffer.last_price() else {
            return Vec::new();
        };

        let score = 0.65 * regime_score_modifier(ctx.regime);
        let setup = StrategicSetup::seed(
            symbol,
            SetupKind::PullbackRejection,
            direction,
            now,
            entry,
            score,
            Uuid::new_v4(),
        );
        self.pending.insert(
            symbol.to_string(),
            PullbackSeed {
                setup_id: setup.id,
                direction,
                seeded_at: now,
            },
        );
        vec![SetupAction::Create(setup)]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{buffer_at, signal};
    use super::*;
    use crate::domain::{Trade, TradeSide};
    use crate::market::SymbolBuffer;
    use chrono::Duration;

    fn ctx(buffer: &SymbolBuffer) -> SetupContext<'_> {
        SetupContext {
            buffer,
            regime: None,
            cvd: 0,
            cvd_delta: 0,
        }
    }

    #[test]
    fn test_ignition_momentum_plus_pressure() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = BreakoutIgnitionDetector::new();

        let momentum = signal(PatternKind::Momentum, Direction::Long, 0.8, now);
        let actions = detector.on_signal(&momentum, &ctx(&buffer), now);
        let seed_id = match &actions[..] {
            [SetupAction::Create(setup)] => {
                assert_eq!(setup.kind, SetupKind::BreakoutIgnition);
                setup.id
            }
            other => panic!("unexpected actions: {other:?}"),
        };

        let pressure = signal(PatternKind::Pressure, Direction::Long, 0.85, now);
        let actions =
            detector.on_signal(&pressure, &ctx(&buffer), now + Duration::milliseconds(400));
        match &actions[..] {
            [SetupAction::Confirm { id, .. }] => assert_eq!(*id, seed_id),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_ignition_not_simultaneous_reseeds() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = BreakoutIgnitionDetector::new();

        detector.on_signal(
            &signal(PatternKind::Momentum, Direction::Long, 0.8, now),
            &ctx(&buffer),
            now,
        );

        // Pressure arrives too late: it becomes a fresh seed, not a confirm
        let actions = detector.on_signal(
            &signal(PatternKind::Pressure, Direction::Long, 0.85, now),
            &ctx(&buffer),
            now + Duration::seconds(3),
        );
        assert!(matches!(&actions[..], [SetupAction::Create(_)]));
    }

    #[test]
    fn test_ignition_direction_conflict_reseeds() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = BreakoutIgnitionDetector::new();

        detector.on_signal(
            &signal(PatternKind::Momentum, Direction::Long, 0.8, now),
            &ctx(&buffer),
            now,
        );
        let actions = detector.on_signal(
            &signal(PatternKind::Pressure, Direction::Short, 0.85, now),
            &ctx(&buffer),
            now + Duration::milliseconds(200),
        );
        assert!(matches!(&actions[..], [SetupAction::Create(_)]));
    }

    fn trending_pullback_buffer(now: DateTime<Utc>) -> SymbolBuffer {
        let mut buffer = SymbolBuffer::new("WDO", 1000);
        // 90 trades trending up 9 points
        for i in 0..90u64 {
            let price = dec!(5500.0) + Decimal::from(i) * dec!(0.1);
            buffer.push_trade(Trade::new("WDO", now, TradeSide::Buy, price, 10), now);
        }
        // 20 trades pulling back 2.5 points off the high
        for i in 0..20u64 {
            let price = dec!(5509.0) - Decimal::from(i) * dec!(0.125);
            buffer.push_trade(Trade::new("WDO", now, TradeSide::Sell, price, 8), now);
        }
        buffer
    }

    #[test]
    fn test_pullback_seeds_then_rejection_confirms() {
        let now = Utc::now();
        let buffer = trending_pullback_buffer(now);
        let mut detector = PullbackRejectionDetector::new();

        let actions = detector.on_tick("WDO", &ctx(&buffer), now);
        let seed_id = match &actions[..] {
            [SetupAction::Create(setup)] => {
                assert_eq!(setup.kind, SetupKind::PullbackRejection);
                assert_eq!(setup.direction, Direction::Long);
                setup.id
            }
            other => panic!("unexpected actions: {other:?}"),
        };

        // Armed: no duplicate seed on the next tick
        assert!(detector.on_tick("WDO", &ctx(&buffer), now).is_empty());

        let rejection = signal(PatternKind::Absorption, Direction::Long, 0.7, now);
        let actions =
            detector.on_signal(&rejection, &ctx(&buffer), now + Duration::seconds(10));
        match &actions[..] {
            [SetupAction::Confirm { id, .. }] => assert_eq!(*id, seed_id),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_no_trend_no_pullback_seed() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = PullbackRejectionDetector::new();

        assert!(detector.on_tick("WDO", &ctx(&buffer), now).is_empty());
    }
}
