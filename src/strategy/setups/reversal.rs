//! Reversal setups: violent (volume spike then momentum inside five
//! seconds) and slow (absorption then a CVD reversal inside two minutes).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Direction, PatternKind, SetupKind, StrategicSetup, TacticalSignal};

use super::{regime_score_modifier, SeedCooldown, SetupAction, SetupContext, SetupDetector};

struct PendingSeed {
    setup_id: Uuid,
    direction: Direction,
    seeded_at: DateTime<Utc>,
}

/// Spike then same-direction momentum within the kind's 5 s window
pub struct ReversalViolentDetector {
    pending: HashMap<String, PendingSeed>,
    cooldown: SeedCooldown,
}

impl ReversalViolentDetector {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            cooldown: SeedCooldown::default(),
        }
    }
}

impl Default for ReversalViolentDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupDetector for ReversalViolentDetector {
    fn name(&self) -> &'static str {
        "reversal_violent"
    }

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        let window = SetupKind::ReversalViolent.confirmation_window();

        match signal.kind {
            PatternKind::VolumeSpike => {
                if self.pending.contains_key(&signal.symbol)
                    || self.cooldown.active(&signal.symbol, now)
                {
                    return Vec::new();
                }
                let Some(entry) = ctx.buffer.last_price() else {
                    return Vec::new();
                };
                let score = (0.8 + signal.strength * 0.15)
                    * regime_score_modifier(ctx.regime);
                let setup = StrategicSetup::seed(
                    &signal.symbol,
                    SetupKind::ReversalViolent,
                    signal.direction,
                    now,
                    entry,
                    score,
                    signal.id,
                );
                self.pending.insert(
                    signal.symbol.clone(),
                    PendingSeed {
                        setup_id: setup.id,
                        direction: signal.direction,
                        seeded_at: now,
                    },
                );
                vec![SetupAction::Create(setup)]
            }
            PatternKind::Momentum => {
                let Some(seed) = self.pending.get(&signal.symbol) else {
                    return Vec::new();
                };
                if now - seed.seeded_at > window {
                    debug!(symbol = %signal.symbol, "violent reversal seed timed out");
                    self.pending.remove(&signal.symbol);
                    return Vec::new();
                }
                if signal.direction != seed.direction {
                    return Vec::new();
                }
                let id = seed.setup_id;
                self.pending.remove(&signal.symbol);
                self.cooldown.arm(&signal.symbol, now + window);
                vec![SetupAction::Confirm {
                    id,
                    with: Some(signal.id),
                }]
            }
            _ => Vec::new(),
        }
    }
}

/// Absorption then a CVD swing against the absorbed side within 2 minutes
pub struct ReversalSlowDetector {
    pending: HashMap<String, PendingSeed>,
    cooldown: SeedCooldown,
}

/// CVD swing (contracts, sample window) that reads as a reversal
const CVD_REVERSAL_THRESHOLD: i64 = 100;

impl ReversalSlowDetector {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            cooldown: SeedCooldown::default(),
        }
    }
}

impl Default for ReversalSlowDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl SetupDetector for ReversalSlowDetector {
    fn name(&self) -> &'static str {
        "reversal_slow"
    }

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        if signal.kind != PatternKind::Absorption {
            return Vec::new();
        }
        if self.pending.contains_key(&signal.symbol)
            || self.cooldown.active(&signal.symbol, now)
        {
            return Vec::new();
        }
        let Some(entry) = ctx.buffer.last_price() else {
            return Vec::new();
        };

        let score = (0.7 + signal.strength * 0.15) * regime_score_modifier(ctx.regime);
        let setup = StrategicSetup::seed(
            &signal.symbol,
            SetupKind::ReversalSlow,
            signal.direction,
            now,
            entry,
            score,
            signal.id,
        );
        self.pending.insert(
            signal.symbol.clone(),
            PendingSeed {
                setup_id: setup.id,
                direction: signal.direction,
                seeded_at: now,
            },
        );
        vec![SetupAction::Create(setup)]
    }

    fn on_tick(
        &mut self,
        symbol: &str,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        let Some(seed) = self.pending.get(symbol) else {
            return Vec::new();
        };

        if now - seed.seeded_at > SetupKind::ReversalSlow.confirmation_window() {
            self.pending.remove(symbol);
            return Vec::new();
        }

        // Long seed: sellers were absorbed, CVD swinging up confirms
        let confirmed = match seed.direction {
            Direction::Long => ctx.cvd_delta >= CVD_REVERSAL_THRESHOLD,
            Direction::Short => ctx.cvd_delta <= -CVD_REVERSAL_THRESHOLD,
        };

        if confirmed {
            let id = seed.setup_id;
            self.pending.remove(symbol);
            self.cooldown
                .arm(symbol, now + SetupKind::ReversalSlow.confirmation_window());
            vec![SetupAction::Confirm { id, with: None }]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{buffer_at, signal};
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn ctx<'a>(buffer: &'a crate::market::SymbolBuffer, cvd_delta: i64) -> SetupContext<'a> {
        SetupContext {
            buffer,
            regime: None,
            cvd: 0,
            cvd_delta,
        }
    }

    #[test]
    fn test_violent_spike_then_momentum_confirms() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalViolentDetector::new();

        let spike = signal(PatternKind::VolumeSpike, Direction::Long, 0.9, now);
        let actions = detector.on_signal(&spike, &ctx(&buffer, 0), now);
        let seed_id = match &actions[..] {
            [SetupAction::Create(setup)] => {
                assert_eq!(setup.kind, SetupKind::ReversalViolent);
                setup.id
            }
            other => panic!("unexpected actions: {other:?}"),
        };

        let momentum = signal(PatternKind::Momentum, Direction::Long, 0.8, now);
        let actions =
            detector.on_signal(&momentum, &ctx(&buffer, 0), now + Duration::seconds(3));
        match &actions[..] {
            [SetupAction::Confirm { id, with }] => {
                assert_eq!(*id, seed_id);
                assert_eq!(*with, Some(momentum.id));
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_violent_window_elapsed_no_confirm() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalViolentDetector::new();

        let spike = signal(PatternKind::VolumeSpike, Direction::Long, 0.9, now);
        detector.on_signal(&spike, &ctx(&buffer, 0), now);

        let momentum = signal(PatternKind::Momentum, Direction::Long, 0.8, now);
        let actions =
            detector.on_signal(&momentum, &ctx(&buffer, 0), now + Duration::seconds(6));
        assert!(actions.is_empty());

        // Seed was discarded: a later momentum cannot confirm either
        let actions =
            detector.on_signal(&momentum, &ctx(&buffer, 0), now + Duration::seconds(7));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_violent_opposite_momentum_ignored() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalViolentDetector::new();

        detector.on_signal(
            &signal(PatternKind::VolumeSpike, Direction::Long, 0.9, now),
            &ctx(&buffer, 0),
            now,
        );
        let actions = detector.on_signal(
            &signal(PatternKind::Momentum, Direction::Short, 0.8, now),
            &ctx(&buffer, 0),
            now + Duration::seconds(1),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_momentum_without_spike_is_nothing() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalViolentDetector::new();

        let actions = detector.on_signal(
            &signal(PatternKind::Momentum, Direction::Long, 0.8, now),
            &ctx(&buffer, 0),
            now,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_slow_absorption_then_cvd_reversal() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalSlowDetector::new();

        let absorption = signal(PatternKind::Absorption, Direction::Long, 0.7, now);
        let actions = detector.on_signal(&absorption, &ctx(&buffer, 0), now);
        let seed_id = match &actions[..] {
            [SetupAction::Create(setup)] => {
                assert_eq!(setup.kind, SetupKind::ReversalSlow);
                setup.id
            }
            other => panic!("unexpected actions: {other:?}"),
        };

        // Flow still against us: nothing yet
        assert!(detector
            .on_tick("WDO", &ctx(&buffer, 20), now + Duration::seconds(30))
            .is_empty());

        // Buyers step in hard: confirmed
        let actions = detector.on_tick("WDO", &ctx(&buffer, 150), now + Duration::seconds(60));
        match &actions[..] {
            [SetupAction::Confirm { id, .. }] => assert_eq!(*id, seed_id),
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_slow_window_elapsed_drops_seed() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = ReversalSlowDetector::new();

        detector.on_signal(
            &signal(PatternKind::Absorption, Direction::Long, 0.7, now),
            &ctx(&buffer, 0),
            now,
        );

        let actions = detector.on_tick("WDO", &ctx(&buffer, 200), now + Duration::seconds(121));
        assert!(actions.is_empty());
    }
}
