//! Risk management service: the final gate between a confirmed setup and a
//! position request.
//!
//! Gates run in order and short-circuit: rolling approval-rate limits defer
//! (the sweep retries), a quality shortfall cancels (quality will not
//! improve), and an open circuit breaker blocks everything until its
//! cooldown elapses. The service is the only writer of `RiskState`.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use crate::config::RiskConfig;
use crate::domain::{Severity, StrategicSetup, Warning, WarningKind};
use crate::error::RiskError;

/// Why the breaker tripped
#[derive(Debug, Clone, PartialEq)]
pub enum TripReason {
    ConsecutiveLosses(u32),
    Drawdown(f64),
    EmergencyLoss(Decimal),
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TripReason::ConsecutiveLosses(n) => write!(f, "{n} consecutive losses"),
            TripReason::Drawdown(pct) => write!(f, "drawdown {pct:.1}%"),
            TripReason::EmergencyLoss(loss) => write!(f, "session loss {loss}"),
            TripReason::Manual(reason) => write!(f, "manual: {reason}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BreakerState {
    Closed,
    Open {
        since: DateTime<Utc>,
        reason: TripReason,
    },
}

/// Outcome of the gate chain for one confirmed setup
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Approved,
    /// Transient rejection; retry on the next sweep
    Deferred(RiskError),
    /// Permanent rejection; the setup should be cancelled
    Cancelled(RiskError),
    /// Breaker open; nothing triggers until cooldown elapses
    Blocked(RiskError),
}

#[derive(Debug, Clone)]
pub struct RiskStatus {
    pub breaker: BreakerState,
    pub consecutive_losses: u32,
    pub session_pnl: Decimal,
    pub drawdown_pct: f64,
    pub approved: u64,
    pub rejected: u64,
    pub total_trips: u64,
}

pub struct RiskService {
    config: RiskConfig,
    minute_window: VecDeque<DateTime<Utc>>,
    hour_window: VecDeque<DateTime<Utc>>,
    consecutive_losses: u32,
    session_pnl: Decimal,
    peak_pnl: Decimal,
    drawdown_pct: f64,
    breaker: BreakerState,
    approved: u64,
    rejected: u64,
    total_trips: u64,
}

impl RiskService {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            minute_window: VecDeque::new(),
            hour_window: VecDeque::new(),
            consecutive_losses: 0,
            session_pnl: Decimal::ZERO,
            peak_pnl: Decimal::ZERO,
            drawdown_pct: 0.0,
            breaker: BreakerState::Closed,
            approved: 0,
            rejected: 0,
            total_trips: 0,
        }
    }

    /// Run the gate chain for a confirmed setup
    pub fn evaluate(&mut self, setup: &StrategicSetup, now: DateTime<Utc>) -> GateOutcome {
        self.prune_windows(now);

        // 1. Rolling approval-rate limits
        if self.minute_window.len() >= self.config.max_signals_per_minute {
            self.rejected += 1;
            let err = RiskError::RateLimited {
                window: "minute",
                count: self.minute_window.len(),
                limit: self.config.max_signals_per_minute,
            };
            debug!(setup = %setup.id, "{err}");
            return GateOutcome::Deferred(err);
        }
        if self.hour_window.len() >= self.config.max_signals_per_hour {
            self.rejected += 1;
            let err = RiskError::RateLimited {
                window: "hour",
                count: self.hour_window.len(),
                limit: self.config.max_signals_per_hour,
            };
            debug!(setup = %setup.id, "{err}");
            return GateOutcome::Deferred(err);
        }

        // 2. Quality threshold
        if setup.score < self.config.signal_quality_threshold {
            self.rejected += 1;
            let err = RiskError::QualityBelowThreshold {
                score: setup.score,
                threshold: self.config.signal_quality_threshold,
            };
            info!(setup = %setup.id, "{err}");
            return GateOutcome::Cancelled(err);
        }

        // 3. Circuit breaker, with timed auto-recovery
        let open_since = match &self.breaker {
            BreakerState::Open { since, .. } => Some(*since),
            BreakerState::Closed => None,
        };
        if let Some(since) = open_since {
            let cooldown = Duration::seconds(self.config.circuit_breaker_cooldown as i64);
            if now - since < cooldown {
                self.rejected += 1;
                let remaining = (cooldown - (now - since)).num_seconds().max(0) as u64;
                return GateOutcome::Blocked(RiskError::BreakerOpen {
                    remaining_secs: remaining,
                });
            }
            info!("circuit breaker cooldown elapsed, closing");
            self.breaker = BreakerState::Closed;
        }

        self.minute_window.push_back(now);
        self.hour_window.push_back(now);
        self.approved += 1;

        GateOutcome::Approved
    }

    /// Fold a closed position's P&L into the session accounting and trip
    /// the breaker when a limit is breached.
    pub fn record_close(&mut self, pnl: Decimal, now: DateTime<Utc>) {
        self.session_pnl += pnl;
        if self.session_pnl > self.peak_pnl {
            self.peak_pnl = self.session_pnl;
        }

        self.drawdown_pct = if self.peak_pnl > Decimal::ZERO {
            ((self.peak_pnl - self.session_pnl) / self.peak_pnl * Decimal::from(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        if pnl < Decimal::ZERO {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        if self.consecutive_losses >= self.config.consecutive_losses_limit {
            self.trip(TripReason::ConsecutiveLosses(self.consecutive_losses), now);
        } else if self.drawdown_pct >= self.config.max_drawdown_percent {
            self.trip(TripReason::Drawdown(self.drawdown_pct), now);
        } else if self.session_pnl <= -self.config.emergency_stop_loss {
            self.trip(TripReason::EmergencyLoss(self.session_pnl.abs()), now);
        }
    }

    pub fn trip(&mut self, reason: TripReason, now: DateTime<Utc>) {
        if matches!(self.breaker, BreakerState::Open { .. }) {
            return;
        }
        error!("circuit breaker tripped: {reason}");
        self.total_trips += 1;
        self.breaker = BreakerState::Open { since: now, reason };
    }

    /// Manual override: force-close the breaker before cooldown
    pub fn force_close_breaker(&mut self, reason: &str, now: DateTime<Utc>) -> Warning {
        warn!(reason, "circuit breaker force-closed by override");
        self.breaker = BreakerState::Closed;
        self.consecutive_losses = 0;
        Warning::new(
            WarningKind::RiskOverride,
            Severity::Critical,
            None,
            format!("circuit breaker force-closed: {reason}"),
            now,
        )
    }

    pub fn breaker(&self) -> &BreakerState {
        &self.breaker
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self.breaker, BreakerState::Open { .. })
    }

    pub fn status(&self) -> RiskStatus {
        RiskStatus {
            breaker: self.breaker.clone(),
            consecutive_losses: self.consecutive_losses,
            session_pnl: self.session_pnl,
            drawdown_pct: self.drawdown_pct,
            approved: self.approved,
            rejected: self.rejected,
            total_trips: self.total_trips,
        }
    }

    fn prune_windows(&mut self, now: DateTime<Utc>) {
        let minute_cutoff = now - Duration::minutes(1);
        while matches!(self.minute_window.front(), Some(ts) if *ts <= minute_cutoff) {
            self.minute_window.pop_front();
        }
        let hour_cutoff = now - Duration::hours(1);
        while matches!(self.hour_window.front(), Some(ts) if *ts <= hour_cutoff) {
            self.hour_window.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, SetupKind};
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn setup_with_score(score: f64) -> StrategicSetup {
        StrategicSetup::seed(
            "WDO",
            SetupKind::ReversalViolent,
            Direction::Long,
            Utc::now(),
            dec!(5500.0),
            score,
            Uuid::new_v4(),
        )
    }

    fn service(config: RiskConfig) -> RiskService {
        RiskService::new(config)
    }

    #[test]
    fn test_approval_happy_path() {
        let mut risk = service(RiskConfig::default());
        let outcome = risk.evaluate(&setup_with_score(0.8), Utc::now());
        assert!(matches!(outcome, GateOutcome::Approved));
        assert_eq!(risk.status().approved, 1);
    }

    #[test]
    fn test_minute_rate_limit_defers() {
        let config = RiskConfig {
            max_signals_per_minute: 2,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        let now = Utc::now();

        assert!(matches!(
            risk.evaluate(&setup_with_score(0.8), now),
            GateOutcome::Approved
        ));
        assert!(matches!(
            risk.evaluate(&setup_with_score(0.8), now),
            GateOutcome::Approved
        ));
        assert!(matches!(
            risk.evaluate(&setup_with_score(0.8), now),
            GateOutcome::Deferred(_)
        ));

        // Window rolls over: approvals resume
        let later = now + Duration::seconds(61);
        assert!(matches!(
            risk.evaluate(&setup_with_score(0.8), later),
            GateOutcome::Approved
        ));
    }

    #[test]
    fn test_low_quality_cancels() {
        let mut risk = service(RiskConfig::default());
        let outcome = risk.evaluate(&setup_with_score(0.2), Utc::now());
        assert!(matches!(outcome, GateOutcome::Cancelled(_)));
    }

    #[test]
    fn test_breaker_trips_on_consecutive_losses() {
        let config = RiskConfig {
            consecutive_losses_limit: 3,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        let now = Utc::now();

        risk.record_close(dec!(-10), now);
        risk.record_close(dec!(-10), now);
        assert!(!risk.is_breaker_open());

        risk.record_close(dec!(-10), now);
        assert!(risk.is_breaker_open());
    }

    #[test]
    fn test_breaker_blocks_until_cooldown() {
        let config = RiskConfig {
            circuit_breaker_cooldown: 60,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        let now = Utc::now();

        risk.trip(TripReason::Manual("test".to_string()), now);

        // Inside the cooldown, even a perfect setup is blocked
        let outcome = risk.evaluate(&setup_with_score(0.95), now + Duration::seconds(30));
        assert!(matches!(outcome, GateOutcome::Blocked(_)));

        // After cooldown the breaker closes and approvals resume
        let outcome = risk.evaluate(&setup_with_score(0.95), now + Duration::seconds(61));
        assert!(matches!(outcome, GateOutcome::Approved));
        assert!(!risk.is_breaker_open());
    }

    #[test]
    fn test_win_resets_loss_streak() {
        let config = RiskConfig {
            consecutive_losses_limit: 3,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        let now = Utc::now();

        risk.record_close(dec!(-10), now);
        risk.record_close(dec!(-10), now);
        risk.record_close(dec!(50), now);
        risk.record_close(dec!(-10), now);
        risk.record_close(dec!(-10), now);
        assert!(!risk.is_breaker_open());
    }

    #[test]
    fn test_emergency_loss_trips() {
        let config = RiskConfig {
            emergency_stop_loss: dec!(100),
            consecutive_losses_limit: 50,
            max_drawdown_percent: 1000.0,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        risk.record_close(dec!(-120), Utc::now());
        assert!(risk.is_breaker_open());
        assert!(matches!(
            risk.breaker(),
            BreakerState::Open {
                reason: TripReason::EmergencyLoss(_),
                ..
            }
        ));
    }

    #[test]
    fn test_manual_override_closes_early() {
        let config = RiskConfig {
            circuit_breaker_cooldown: 3600,
            ..RiskConfig::default()
        };
        let mut risk = service(config);
        let now = Utc::now();

        risk.trip(TripReason::Manual("test".to_string()), now);
        assert!(risk.is_breaker_open());

        let warning = risk.force_close_breaker("operator", now);
        assert_eq!(warning.kind, WarningKind::RiskOverride);
        assert!(!risk.is_breaker_open());

        let outcome = risk.evaluate(&setup_with_score(0.9), now + Duration::seconds(1));
        assert!(matches!(outcome, GateOutcome::Approved));
    }
}
