//! Divergence setup: a single price/flow divergence of extreme magnitude
//! is a complete qualifying combination on its own, so the setup confirms
//! in the same lifecycle pass it is created.

use chrono::{DateTime, Utc};

use crate::domain::{PatternKind, SetupKind, StrategicSetup, TacticalSignal};

use super::{regime_score_modifier, SeedCooldown, SetupAction, SetupContext, SetupDetector};

/// Holdoff between divergence setups on one symbol; an extreme divergence
/// stays extreme across many consecutive events
const RESEED_COOLDOWN_SECS: i64 = 60;

pub struct DivergenceSetupDetector {
    extreme_threshold: f64,
    cooldown: SeedCooldown,
}

impl DivergenceSetupDetector {
    pub fn new(extreme_threshold: f64) -> Self {
        Self {
            extreme_threshold,
            cooldown: SeedCooldown::default(),
        }
    }
}

impl SetupDetector for DivergenceSetupDetector {
    fn name(&self) -> &'static str {
        "divergence_setup"
    }

    fn on_signal(
        &mut self,
        signal: &TacticalSignal,
        ctx: &SetupContext<'_>,
        now: DateTime<Utc>,
    ) -> Vec<SetupAction> {
        if signal.kind != PatternKind::Divergence {
            return Vec::new();
        }
        let Some(cvd_roc) = signal.evidence.cvd_roc else {
            return Vec::new();
        };
        if cvd_roc.abs() < self.extreme_threshold {
            return Vec::new();
        }
        if self.cooldown.active(&signal.symbol, now) {
            return Vec::new();
        }
        let Some(entry) = ctx.buffer.last_price() else {
            return Vec::new();
        };

        let score = (0.75 + signal.strength * 0.2) * regime_score_modifier(ctx.regime);
        let setup = StrategicSetup::seed(
            &signal.symbol,
            SetupKind::DivergenceSetup,
            signal.direction,
            now,
            entry,
            score,
            signal.id,
        );
        let id = setup.id;
        self.cooldown.arm(
            &signal.symbol,
            now + chrono::Duration::seconds(RESEED_COOLDOWN_SECS),
        );

        vec![
            SetupAction::Create(setup),
            SetupAction::Confirm {
                id,
                with: Some(signal.id),
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{buffer_at, divergence_signal};
    use super::*;
    use crate::domain::Direction;
    use rust_decimal_macros::dec;

    fn ctx(buffer: &crate::market::SymbolBuffer) -> SetupContext<'_> {
        SetupContext {
            buffer,
            regime: None,
            cvd: 0,
            cvd_delta: 0,
        }
    }

    #[test]
    fn test_extreme_divergence_creates_and_confirms() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = DivergenceSetupDetector::new(250.0);

        let signal = divergence_signal(Direction::Short, -280.0, now);
        let actions = detector.on_signal(&signal, &ctx(&buffer), now);

        match &actions[..] {
            [SetupAction::Create(setup), SetupAction::Confirm { id, .. }] => {
                assert_eq!(setup.kind, SetupKind::DivergenceSetup);
                assert_eq!(setup.direction, Direction::Short);
                assert_eq!(*id, setup.id);
            }
            other => panic!("unexpected actions: {other:?}"),
        }
    }

    #[test]
    fn test_ordinary_divergence_ignored() {
        let now = Utc::now();
        let buffer = buffer_at(dec!(5500.0), now);
        let mut detector = DivergenceSetupDetector::new(250.0);

        let signal = divergence_signal(Direction::Short, -220.0, now);
        assert!(detector.on_signal(&signal, &ctx(&buffer), now).is_empty());
    }
}
