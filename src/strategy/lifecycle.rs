//! Setup lifecycle manager.
//!
//! Owns the arena of strategic setups and is the single mutation point for
//! their state. Every change goes through `apply`, which enforces the
//! transition table; the periodic sweep expires overdue setups and the
//! confluence check blocks (never cancels) a confirmed setup while the
//! correlated instrument holds a contradictory one.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{SetupTimeouts, SystemConfig};
use crate::domain::{SetupState, StrategicSetup};
use crate::error::{FluxoError, Result};

/// A recorded state change, for publication on the bus
#[derive(Debug, Clone)]
pub struct Transition {
    pub setup: StrategicSetup,
    pub from: SetupState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub created: u64,
    pub confirmed: u64,
    pub triggered: u64,
    pub expired: u64,
    pub cancelled: u64,
}

pub struct LifecycleManager {
    timeouts: SetupTimeouts,
    confluence_window: Duration,
    terminal_grace: Duration,
    setups: HashMap<Uuid, StrategicSetup>,
    /// When each terminal setup finished, for the audit grace period
    terminal_at: HashMap<Uuid, DateTime<Utc>>,
    stats: LifecycleStats,
}

impl LifecycleManager {
    pub fn new(timeouts: SetupTimeouts, system: &SystemConfig) -> Self {
        Self {
            timeouts,
            confluence_window: Duration::seconds(system.confluence_window_seconds as i64),
            terminal_grace: Duration::seconds(system.terminal_grace_seconds as i64),
            setups: HashMap::new(),
            terminal_at: HashMap::new(),
            stats: LifecycleStats::default(),
        }
    }

    /// Register a freshly seeded setup; stamps the immutable deadline
    pub fn create(&mut self, mut setup: StrategicSetup, now: DateTime<Utc>) -> StrategicSetup {
        setup.created_at = now;
        setup.deadline = now + Duration::seconds(self.timeouts.for_kind(setup.kind) as i64);
        setup.state = SetupState::Pending;

        info!(
            setup = %setup.id,
            symbol = %setup.symbol,
            kind = %setup.kind,
            direction = %setup.direction,
            entry = %setup.entry_price,
            "setup created"
        );

        self.stats.created += 1;
        self.setups.insert(setup.id, setup.clone());
        setup
    }

    /// The single mutation entry point; validates against the table
    fn apply(&mut self, id: Uuid, to: SetupState, now: DateTime<Utc>) -> Result<Transition> {
        let setup = self
            .setups
            .get_mut(&id)
            .ok_or(FluxoError::SetupNotFound(id))?;

        let from = setup.state;
        if !from.can_transition_to(to) {
            return Err(FluxoError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        setup.state = to;
        if to == SetupState::Confirmed {
            setup.confirmed_at = Some(now);
        }

        match to {
            SetupState::Confirmed => self.stats.confirmed += 1,
            SetupState::Triggered => self.stats.triggered += 1,
            SetupState::Expired => self.stats.expired += 1,
            SetupState::Cancelled => self.stats.cancelled += 1,
            SetupState::Pending => {}
        }

        let snapshot = setup.clone();
        if to.is_terminal() {
            self.terminal_at.insert(id, now);
        }

        info!(
            setup = %id,
            symbol = %snapshot.symbol,
            "setup transitioned: {} -> {}",
            from,
            to
        );

        Ok(Transition {
            setup: snapshot,
            from,
        })
    }

    /// Confirm a pending setup. A setup already past its deadline expires
    /// instead; the returned transition says which happened.
    pub fn confirm(
        &mut self,
        id: Uuid,
        with: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Result<Transition> {
        let setup = self.setups.get_mut(&id).ok_or(FluxoError::SetupNotFound(id))?;

        if setup.state.is_terminal() {
            return Err(FluxoError::InvalidTransition {
                from: setup.state.to_string(),
                to: SetupState::Confirmed.to_string(),
            });
        }

        if setup.is_past_deadline(now) {
            debug!(setup = %id, "confirmation arrived past deadline, expiring");
            return self.apply(id, SetupState::Expired, now);
        }

        if let Some(signal_id) = with {
            setup.confirming.push(signal_id);
        }
        self.apply(id, SetupState::Confirmed, now)
    }

    pub fn trigger(&mut self, id: Uuid, now: DateTime<Utc>) -> Result<Transition> {
        self.apply(id, SetupState::Triggered, now)
    }

    pub fn cancel(&mut self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<Transition> {
        warn!(setup = %id, reason, "setup cancelled");
        self.apply(id, SetupState::Cancelled, now)
    }

    pub fn get(&self, id: Uuid) -> Option<&StrategicSetup> {
        self.setups.get(&id)
    }

    /// Sweep duty: every non-terminal setup past its deadline expires
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> Vec<Transition> {
        let due: Vec<Uuid> = self
            .setups
            .values()
            .filter(|s| !s.state.is_terminal() && s.is_past_deadline(now))
            .map(|s| s.id)
            .collect();

        due.into_iter()
            .filter_map(|id| self.apply(id, SetupState::Expired, now).ok())
            .collect()
    }

    /// Confirmed setups awaiting a trigger attempt (sweep retry set)
    pub fn confirmed_awaiting(&self) -> Vec<StrategicSetup> {
        self.setups
            .values()
            .filter(|s| s.state == SetupState::Confirmed)
            .cloned()
            .collect()
    }

    /// A directly contradictory recent setup on the correlated instrument
    /// blocks triggering; the blocked setup stays confirmed.
    pub fn confluence_conflict(
        &self,
        setup: &StrategicSetup,
        now: DateTime<Utc>,
    ) -> Option<StrategicSetup> {
        self.setups
            .values()
            .find(|other| {
                other.symbol != setup.symbol
                    && other.direction == setup.direction.opposite()
                    && matches!(other.state, SetupState::Confirmed | SetupState::Triggered)
                    && now - other.confirmed_at.unwrap_or(other.created_at)
                        <= self.confluence_window
            })
            .cloned()
    }

    /// Manipulation reaction: cancel in-flight setups on a symbol
    pub fn cancel_active_for_symbol(
        &mut self,
        symbol: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let targets: Vec<Uuid> = self
            .setups
            .values()
            .filter(|s| s.symbol == symbol && !s.state.is_terminal())
            .map(|s| s.id)
            .collect();

        targets
            .into_iter()
            .filter_map(|id| self.cancel(id, reason, now).ok())
            .collect()
    }

    /// Divergence reaction: cancel in-flight setups on the symbol whose
    /// direction the warning contradicts
    pub fn cancel_direction_for_symbol(
        &mut self,
        symbol: &str,
        direction: crate::domain::Direction,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Vec<Transition> {
        let targets: Vec<Uuid> = self
            .setups
            .values()
            .filter(|s| s.symbol == symbol && s.direction == direction && !s.state.is_terminal())
            .map(|s| s.id)
            .collect();

        targets
            .into_iter()
            .filter_map(|id| self.cancel(id, reason, now).ok())
            .collect()
    }

    /// Drop terminal setups once their audit grace period has passed
    pub fn gc_terminal(&mut self, now: DateTime<Utc>) -> usize {
        let due: Vec<Uuid> = self
            .terminal_at
            .iter()
            .filter(|(_, at)| now - **at >= self.terminal_grace)
            .map(|(id, _)| *id)
            .collect();

        for id in &due {
            self.setups.remove(id);
            self.terminal_at.remove(id);
        }
        due.len()
    }

    pub fn all(&self) -> Vec<StrategicSetup> {
        self.setups.values().cloned().collect()
    }

    pub fn active_count(&self) -> usize {
        self.setups
            .values()
            .filter(|s| !s.state.is_terminal())
            .count()
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Direction, SetupKind};
    use rust_decimal_macros::dec;

    fn manager() -> LifecycleManager {
        LifecycleManager::new(SetupTimeouts::default(), &SystemConfig::default())
    }

    fn seed(symbol: &str, kind: SetupKind, direction: Direction) -> StrategicSetup {
        StrategicSetup::seed(
            symbol,
            kind,
            direction,
            Utc::now(),
            dec!(5500.0),
            0.8,
            Uuid::new_v4(),
        )
    }

    #[test]
    fn test_create_stamps_deadline_from_kind_timeout() {
        let mut mgr = manager();
        let now = Utc::now();

        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);
        assert_eq!(setup.state, SetupState::Pending);
        assert_eq!(setup.deadline, now + Duration::seconds(300));
    }

    #[test]
    fn test_confirm_then_trigger() {
        let mut mgr = manager();
        let now = Utc::now();
        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);

        let signal_id = Uuid::new_v4();
        let t = mgr.confirm(setup.id, Some(signal_id), now).unwrap();
        assert_eq!(t.from, SetupState::Pending);
        assert_eq!(t.setup.state, SetupState::Confirmed);
        assert!(t.setup.confirming.contains(&signal_id));

        let t = mgr.trigger(setup.id, now).unwrap();
        assert_eq!(t.setup.state, SetupState::Triggered);
    }

    #[test]
    fn test_confirm_past_deadline_expires() {
        let mut mgr = manager();
        let now = Utc::now();
        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);

        let late = now + Duration::seconds(301);
        let t = mgr.confirm(setup.id, None, late).unwrap();
        assert_eq!(t.setup.state, SetupState::Expired);
    }

    #[test]
    fn test_terminal_states_frozen() {
        let mut mgr = manager();
        let now = Utc::now();
        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);

        mgr.confirm(setup.id, None, now).unwrap();
        mgr.trigger(setup.id, now).unwrap();

        assert!(mgr.cancel(setup.id, "late warning", now).is_err());
        assert!(mgr.confirm(setup.id, None, now).is_err());
        assert!(mgr.sweep_expired(now + Duration::seconds(600)).is_empty());
    }

    #[test]
    fn test_sweep_expires_overdue_once() {
        let mut mgr = manager();
        let now = Utc::now();
        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);

        let later = now + Duration::seconds(301);
        let expired = mgr.sweep_expired(later);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].setup.id, setup.id);
        assert_eq!(expired[0].setup.state, SetupState::Expired);

        // Second sweep finds nothing left to expire
        assert!(mgr.sweep_expired(later + Duration::seconds(1)).is_empty());
    }

    #[test]
    fn test_confluence_blocks_only_contradictory_recent() {
        let mut mgr = manager();
        let now = Utc::now();

        let wdo = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);
        mgr.confirm(wdo.id, None, now).unwrap();

        let dol = mgr.create(seed("DOL", SetupKind::BreakoutIgnition, Direction::Short), now);
        mgr.confirm(dol.id, None, now).unwrap();

        let wdo = mgr.get(wdo.id).unwrap().clone();
        let conflict = mgr.confluence_conflict(&wdo, now).expect("conflict");
        assert_eq!(conflict.id, dol.id);

        // Outside the coincidence window the conflict no longer blocks
        let much_later = now + Duration::seconds(31);
        assert!(mgr.confluence_conflict(&wdo, much_later).is_none());
    }

    #[test]
    fn test_same_direction_is_not_conflict() {
        let mut mgr = manager();
        let now = Utc::now();

        let wdo = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);
        mgr.confirm(wdo.id, None, now).unwrap();

        let dol = mgr.create(seed("DOL", SetupKind::BreakoutIgnition, Direction::Long), now);
        mgr.confirm(dol.id, None, now).unwrap();

        let wdo = mgr.get(wdo.id).unwrap().clone();
        assert!(mgr.confluence_conflict(&wdo, now).is_none());
    }

    #[test]
    fn test_cancel_active_for_symbol() {
        let mut mgr = manager();
        let now = Utc::now();

        let a = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);
        let b = mgr.create(seed("WDO", SetupKind::BreakoutIgnition, Direction::Short), now);
        let c = mgr.create(seed("DOL", SetupKind::ReversalSlow, Direction::Long), now);
        mgr.confirm(b.id, None, now).unwrap();

        let cancelled = mgr.cancel_active_for_symbol("WDO", "manipulation", now);
        assert_eq!(cancelled.len(), 2);
        assert_eq!(mgr.get(a.id).unwrap().state, SetupState::Cancelled);
        assert_eq!(mgr.get(b.id).unwrap().state, SetupState::Cancelled);
        assert_eq!(mgr.get(c.id).unwrap().state, SetupState::Pending);
    }

    #[test]
    fn test_gc_after_grace() {
        let mut mgr = manager();
        let now = Utc::now();
        let setup = mgr.create(seed("WDO", SetupKind::ReversalViolent, Direction::Long), now);
        mgr.confirm(setup.id, None, now).unwrap();
        mgr.trigger(setup.id, now).unwrap();

        // Inside the grace period the setup is still auditable
        assert_eq!(mgr.gc_terminal(now + Duration::seconds(10)), 0);
        assert!(mgr.get(setup.id).is_some());

        assert_eq!(mgr.gc_terminal(now + Duration::seconds(61)), 1);
        assert!(mgr.get(setup.id).is_none());
    }
}
