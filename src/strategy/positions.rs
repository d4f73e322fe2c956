//! Position manager.
//!
//! Virtual bookkeeping only: opens positions from approved setups under the
//! system-wide cap and aggregate-risk ceiling, marks them to market on
//! every trade, advances trailing stops (never retreats them), and closes
//! on stop/target touch, defensive warnings or a risk override. Closed
//! positions survive only for the session P&L tally.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PositionConfig;
use crate::domain::{Direction, Severity, StrategicSetup, Warning, WarningKind};

/// Currency value of one point per contract
pub const POINT_VALUE: Decimal = dec!(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "OPEN"),
            PositionStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    StopLoss,
    Target,
    /// Immediate close on a divergence/manipulation warning
    Defensive(WarningKind),
    RiskOverride,
    Shutdown,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::StopLoss => write!(f, "STOP_LOSS"),
            CloseReason::Target => write!(f, "TARGET"),
            CloseReason::Defensive(kind) => write!(f, "DEFENSIVE_{}", kind.as_str().to_uppercase()),
            CloseReason::RiskOverride => write!(f, "RISK_OVERRIDE"),
            CloseReason::Shutdown => write!(f, "SHUTDOWN"),
        }
    }
}

/// A managed virtual position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub setup_id: Uuid,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub size: u64,
    /// The only field adjusted after open (trailing advance)
    pub stop_price: Decimal,
    pub target_price: Decimal,
    pub trailing_enabled: bool,
    pub opened_at: DateTime<Utc>,
    pub status: PositionStatus,
    pub current_price: Decimal,
    pub pnl: Decimal,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<String>,
}

impl Position {
    fn update_price(&mut self, price: Decimal) {
        self.current_price = price;
        let points = match self.direction {
            Direction::Long => price - self.entry_price,
            Direction::Short => self.entry_price - price,
        };
        self.pnl = points * Decimal::from(self.size) * POINT_VALUE;
    }

    fn stop_hit(&self) -> bool {
        match self.direction {
            Direction::Long => self.current_price <= self.stop_price,
            Direction::Short => self.current_price >= self.stop_price,
        }
    }

    fn target_hit(&self) -> bool {
        match self.direction {
            Direction::Long => self.current_price >= self.target_price,
            Direction::Short => self.current_price <= self.target_price,
        }
    }

    /// Currency at risk between entry and stop
    pub fn risk(&self) -> Decimal {
        (self.entry_price - self.stop_price).abs() * Decimal::from(self.size) * POINT_VALUE
    }

    fn favorable_points(&self) -> Decimal {
        match self.direction {
            Direction::Long => self.current_price - self.entry_price,
            Direction::Short => self.entry_price - self.current_price,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionStats {
    pub total_opened: u64,
    pub total_closed: u64,
    pub stopped: u64,
    pub targets_hit: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl: Decimal,
}

pub enum OpenOutcome {
    Opened(Position),
    Rejected(Warning),
}

pub struct PositionBook {
    config: PositionConfig,
    /// Aggregate open-risk ceiling shared with the risk service
    emergency_stop_loss: Decimal,
    open: HashMap<Uuid, Position>,
    closed: Vec<Position>,
    stats: PositionStats,
    /// Set on a bookkeeping integrity fault; halts new opens, closes still work
    integrity_halted: bool,
}

impl PositionBook {
    pub fn new(config: PositionConfig, emergency_stop_loss: Decimal) -> Self {
        Self {
            config,
            emergency_stop_loss,
            open: HashMap::new(),
            closed: Vec::new(),
            stats: PositionStats::default(),
            integrity_halted: false,
        }
    }

    /// Open a position from an approved setup. Sizing scales the default by
    /// the volatility bucket; stop and target distances scale by the
    /// bucket's stop multiplier.
    pub fn open_from(
        &mut self,
        setup: &StrategicSetup,
        size_multiplier: f64,
        stop_multiplier: f64,
        now: DateTime<Utc>,
    ) -> OpenOutcome {
        if self.integrity_halted {
            return OpenOutcome::Rejected(Warning::new(
                WarningKind::Position,
                Severity::Critical,
                Some(setup.symbol.clone()),
                "position_rejected: bookkeeping halted after integrity fault",
                now,
            ));
        }

        if self.open.len() >= self.config.max_positions {
            warn!(
                setup = %setup.id,
                open = self.open.len(),
                max = self.config.max_positions,
                "approval dropped, position cap reached"
            );
            return OpenOutcome::Rejected(Warning::new(
                WarningKind::Position,
                Severity::Caution,
                Some(setup.symbol.clone()),
                format!(
                    "position_rejected: {} open positions at cap {}",
                    self.open.len(),
                    self.config.max_positions
                ),
                now,
            ));
        }

        let size = ((self.config.default_size as f64 * size_multiplier).floor() as u64).max(1);
        let stop_scale = Decimal::from_f64(stop_multiplier).unwrap_or(Decimal::ONE);

        let stop_distance = (setup.entry_price - setup.stop_price).abs() * stop_scale;
        let target_distance = (setup.target_price - setup.entry_price).abs() * stop_scale;
        let (stop_price, target_price) = match setup.direction {
            Direction::Long => (
                setup.entry_price - stop_distance,
                setup.entry_price + target_distance,
            ),
            Direction::Short => (
                setup.entry_price + stop_distance,
                setup.entry_price - target_distance,
            ),
        };

        let new_risk = stop_distance * Decimal::from(size) * POINT_VALUE;
        let aggregate = self.aggregate_risk() + new_risk;
        if aggregate > self.emergency_stop_loss {
            warn!(
                setup = %setup.id,
                %aggregate,
                limit = %self.emergency_stop_loss,
                "approval dropped, aggregate risk ceiling"
            );
            return OpenOutcome::Rejected(Warning::new(
                WarningKind::Position,
                Severity::Caution,
                Some(setup.symbol.clone()),
                format!(
                    "position_rejected: aggregate open risk {aggregate} would exceed {}",
                    self.emergency_stop_loss
                ),
                now,
            ));
        }

        let position = Position {
            id: Uuid::new_v4(),
            setup_id: setup.id,
            symbol: setup.symbol.clone(),
            direction: setup.direction,
            entry_price: setup.entry_price,
            size,
            stop_price,
            target_price,
            trailing_enabled: self.config.trailing_stop_enabled,
            opened_at: now,
            status: PositionStatus::Open,
            current_price: setup.entry_price,
            pnl: Decimal::ZERO,
            exit_price: None,
            exit_time: None,
            exit_reason: None,
        };

        info!(
            position = %position.id,
            symbol = %position.symbol,
            direction = %position.direction,
            size,
            entry = %position.entry_price,
            stop = %position.stop_price,
            target = %position.target_price,
            "position opened"
        );

        self.stats.total_opened += 1;
        self.open.insert(position.id, position.clone());
        OpenOutcome::Opened(position)
    }

    /// Mark every position on the symbol to the latest trade price, advance
    /// trailing stops, and close any stop/target touches.
    pub fn on_price(
        &mut self,
        symbol: &str,
        price: Decimal,
        now: DateTime<Utc>,
    ) -> Vec<(Position, CloseReason)> {
        let ids: Vec<Uuid> = self
            .open
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.id)
            .collect();

        let mut closed = Vec::new();
        for id in ids {
            let touch = {
                let Some(position) = self.open.get_mut(&id) else {
                    continue;
                };
                position.update_price(price);

                if position.stop_hit() {
                    Some(CloseReason::StopLoss)
                } else if position.target_hit() {
                    Some(CloseReason::Target)
                } else {
                    if position.trailing_enabled
                        && position.favorable_points() > self.config.trailing_stop_distance
                    {
                        let candidate = match position.direction {
                            Direction::Long => price - self.config.trailing_stop_distance,
                            Direction::Short => price + self.config.trailing_stop_distance,
                        };
                        let advanced = match position.direction {
                            Direction::Long => candidate > position.stop_price,
                            Direction::Short => candidate < position.stop_price,
                        };
                        if advanced {
                            position.stop_price = candidate;
                            debug!(position = %id, stop = %candidate, "trailing stop advanced");
                        }
                    }
                    None
                }
            };

            if let Some(reason) = touch {
                if let Some(p) = self.close(id, price, reason.clone(), now) {
                    closed.push((p, reason));
                }
            }
        }

        closed
    }

    /// Defensive close of every open position on a symbol
    pub fn close_for_symbol(
        &mut self,
        symbol: &str,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Vec<Position> {
        let ids: Vec<Uuid> = self
            .open
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.id)
            .collect();
        self.close_ids(&ids, reason, now)
    }

    /// Defensive close of positions a warning runs against
    pub fn close_direction_for_symbol(
        &mut self,
        symbol: &str,
        direction: Direction,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Vec<Position> {
        let ids: Vec<Uuid> = self
            .open
            .values()
            .filter(|p| p.symbol == symbol && p.direction == direction)
            .map(|p| p.id)
            .collect();
        self.close_ids(&ids, reason, now)
    }

    pub fn close_all(&mut self, reason: CloseReason, now: DateTime<Utc>) -> Vec<Position> {
        let ids: Vec<Uuid> = self.open.keys().copied().collect();
        self.close_ids(&ids, reason, now)
    }

    fn close_ids(&mut self, ids: &[Uuid], reason: CloseReason, now: DateTime<Utc>) -> Vec<Position> {
        ids.iter()
            .filter_map(|id| {
                let price = self.open.get(id)?.current_price;
                self.close(*id, price, reason.clone(), now)
            })
            .collect()
    }

    fn close(
        &mut self,
        id: Uuid,
        exit_price: Decimal,
        reason: CloseReason,
        now: DateTime<Utc>,
    ) -> Option<Position> {
        let Some(mut position) = self.open.remove(&id) else {
            // Closing a position that is not open is a bookkeeping fault:
            // stop opening anything new, keep closes working
            error!(position = %id, "close of unknown position, halting new opens");
            self.integrity_halted = true;
            return None;
        };

        position.update_price(exit_price);
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_time = Some(now);
        position.exit_reason = Some(reason.to_string());

        self.stats.total_closed += 1;
        self.stats.total_pnl += position.pnl;
        match reason {
            CloseReason::StopLoss => self.stats.stopped += 1,
            CloseReason::Target => self.stats.targets_hit += 1,
            _ => {}
        }
        if position.pnl > Decimal::ZERO {
            self.stats.wins += 1;
        } else {
            self.stats.losses += 1;
        }

        info!(
            position = %id,
            symbol = %position.symbol,
            reason = %reason,
            pnl = %position.pnl,
            "position closed"
        );

        self.closed.push(position.clone());
        Some(position)
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.open.values().cloned().collect()
    }

    pub fn aggregate_risk(&self) -> Decimal {
        self.open.values().map(|p| p.risk()).sum()
    }

    pub fn is_halted(&self) -> bool {
        self.integrity_halted
    }

    pub fn stats(&self) -> PositionStats {
        self.stats
    }

    pub fn session_pnl(&self) -> Decimal {
        self.stats.total_pnl
    }
}
