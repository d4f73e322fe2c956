use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::Direction;

/// Strategic setup kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupKind {
    ReversalSlow,
    ReversalViolent,
    BreakoutIgnition,
    PullbackRejection,
    DivergenceSetup,
}

impl SetupKind {
    pub const ALL: [SetupKind; 5] = [
        SetupKind::ReversalSlow,
        SetupKind::ReversalViolent,
        SetupKind::BreakoutIgnition,
        SetupKind::PullbackRejection,
        SetupKind::DivergenceSetup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SetupKind::ReversalSlow => "reversal_slow",
            SetupKind::ReversalViolent => "reversal_violent",
            SetupKind::BreakoutIgnition => "breakout_ignition",
            SetupKind::PullbackRejection => "pullback_rejection",
            SetupKind::DivergenceSetup => "divergence_setup",
        }
    }

    /// Time allowed between the seeding signal and its confirmation
    pub fn confirmation_window(&self) -> Duration {
        match self {
            SetupKind::ReversalSlow => Duration::seconds(120),
            SetupKind::ReversalViolent => Duration::seconds(5),
            SetupKind::BreakoutIgnition => Duration::seconds(1),
            SetupKind::PullbackRejection => Duration::seconds(90),
            SetupKind::DivergenceSetup => Duration::zero(),
        }
    }

    /// Stop distance from entry, in points, before volatility scaling
    pub fn stop_points(&self) -> Decimal {
        match self {
            SetupKind::ReversalSlow => dec!(2.0),
            SetupKind::ReversalViolent => dec!(3.0),
            SetupKind::BreakoutIgnition => dec!(4.0),
            SetupKind::PullbackRejection => dec!(3.0),
            SetupKind::DivergenceSetup => dec!(5.0),
        }
    }

    /// Target distance from entry, in points, before volatility scaling
    pub fn target_points(&self) -> Decimal {
        match self {
            SetupKind::ReversalSlow => dec!(5.0),
            SetupKind::ReversalViolent => dec!(8.0),
            SetupKind::BreakoutIgnition => dec!(10.0),
            SetupKind::PullbackRejection => dec!(6.0),
            SetupKind::DivergenceSetup => dec!(12.0),
        }
    }
}

impl std::fmt::Display for SetupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle states of a strategic setup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupState {
    /// Created on the first qualifying signal, awaiting confirmation
    Pending,
    /// Final qualifying signal observed within the kind's window
    Confirmed,
    /// Passed confluence, context and risk gates; position requested
    Triggered,
    /// Deadline reached before confirmation or gating completed
    Expired,
    /// Invalidated by a manipulation or divergence warning
    Cancelled,
}

impl SetupState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupState::Pending => "PENDING",
            SetupState::Confirmed => "CONFIRMED",
            SetupState::Triggered => "TRIGGERED",
            SetupState::Expired => "EXPIRED",
            SetupState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SetupState::Triggered | SetupState::Expired | SetupState::Cancelled
        )
    }

    /// Check if this state can transition to another state
    pub fn can_transition_to(&self, target: SetupState) -> bool {
        use SetupState::*;

        match (self, target) {
            (Pending, Confirmed) => true,
            (Pending, Expired) => true,
            (Pending, Cancelled) => true,

            (Confirmed, Triggered) => true,
            (Confirmed, Expired) => true,
            (Confirmed, Cancelled) => true,

            // Terminal states admit nothing
            _ => false,
        }
    }

    /// Get valid next states from current state
    pub fn valid_transitions(&self) -> Vec<SetupState> {
        use SetupState::*;

        match self {
            Pending => vec![Confirmed, Expired, Cancelled],
            Confirmed => vec![Triggered, Expired, Cancelled],
            Triggered | Expired | Cancelled => vec![],
        }
    }
}

impl std::fmt::Display for SetupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A multi-signal, time-bounded composite pattern backing a position request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicSetup {
    pub id: Uuid,
    pub symbol: String,
    pub kind: SetupKind,
    pub direction: Direction,
    pub state: SetupState,
    pub created_at: DateTime<Utc>,
    /// Immutable once set: created_at + the kind's configured timeout
    pub deadline: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub entry_price: Decimal,
    pub stop_price: Decimal,
    pub target_price: Decimal,
    /// Composite quality score in [0, 1]
    pub score: f64,
    pub risk_reward: f64,
    /// Ids of the tactical signals that seeded and confirmed this setup
    pub confirming: Vec<Uuid>,
}

impl StrategicSetup {
    /// Build a pending setup; the lifecycle manager stamps the deadline
    pub fn seed(
        symbol: impl Into<String>,
        kind: SetupKind,
        direction: Direction,
        created_at: DateTime<Utc>,
        entry_price: Decimal,
        score: f64,
        seeded_by: Uuid,
    ) -> Self {
        let (stop_price, target_price) = match direction {
            Direction::Long => (
                entry_price - kind.stop_points(),
                entry_price + kind.target_points(),
            ),
            Direction::Short => (
                entry_price + kind.stop_points(),
                entry_price - kind.target_points(),
            ),
        };

        let risk = kind.stop_points();
        let reward = kind.target_points();
        let risk_reward = if risk.is_zero() {
            0.0
        } else {
            use rust_decimal::prelude::ToPrimitive;
            (reward / risk).to_f64().unwrap_or(0.0)
        };

        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            kind,
            direction,
            state: SetupState::Pending,
            created_at,
            deadline: created_at, // stamped by the lifecycle manager on create
            confirmed_at: None,
            entry_price,
            stop_price,
            target_price,
            score: score.clamp(0.0, 1.0),
            risk_reward,
            confirming: vec![seeded_by],
        }
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transition_table() {
        use SetupState::*;

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Expired));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Triggered));

        assert!(Confirmed.can_transition_to(Triggered));
        assert!(Confirmed.can_transition_to(Expired));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Pending));

        for terminal in [Triggered, Expired, Cancelled] {
            assert!(terminal.is_terminal());
            assert!(terminal.valid_transitions().is_empty());
            for target in [Pending, Confirmed, Triggered, Expired, Cancelled] {
                assert!(!terminal.can_transition_to(target));
            }
        }
    }

    #[test]
    fn test_seed_geometry() {
        let now = Utc::now();
        let long = StrategicSetup::seed(
            "WDO",
            SetupKind::ReversalViolent,
            Direction::Long,
            now,
            dec!(5500.0),
            0.8,
            Uuid::new_v4(),
        );
        assert_eq!(long.stop_price, dec!(5497.0));
        assert_eq!(long.target_price, dec!(5508.0));
        assert!(long.risk_reward > 2.6 && long.risk_reward < 2.7);

        let short = StrategicSetup::seed(
            "WDO",
            SetupKind::ReversalViolent,
            Direction::Short,
            now,
            dec!(5500.0),
            0.8,
            Uuid::new_v4(),
        );
        assert_eq!(short.stop_price, dec!(5503.0));
        assert_eq!(short.target_price, dec!(5492.0));
    }
}
