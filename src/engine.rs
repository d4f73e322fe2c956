//! Engine wiring: per-symbol pipelines over the ingest queues, the
//! periodic sweep, and the fan-out of everything observable onto the bus.
//!
//! Event handling for a given symbol is strictly sequential (one pipeline
//! task per symbol partition); the sweep mutates setups only through the
//! lifecycle manager's single mutation entry point, so sweeps and event
//! handling never race on the same setup.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::{CvdTracker, DefensiveFilter, MarketRegime, RegimeDetector};
use crate::bus::{Event, EventBus, SymbolQueue};
use crate::config::AppConfig;
use crate::domain::{
    MarketEvent, SetupState, Severity, Trade, Warning, WarningKind,
};
use crate::error::Result;
use crate::feed::MarketFeed;
use crate::market::SymbolBuffer;
use crate::strategy::positions::{CloseReason, OpenOutcome};
use crate::strategy::setups::{SetupAction, SetupContext};
use crate::strategy::{
    GateOutcome, LifecycleManager, PositionBook, RiskService, SetupEngine, TapeReadingService,
};

/// CVD samples the slow-reversal confirmation looks back over
const CVD_DELTA_SAMPLES: usize = 30;

pub struct Engine {
    config: AppConfig,
    bus: EventBus,
    queues: HashMap<String, Arc<SymbolQueue>>,
    buffers: RwLock<HashMap<String, SymbolBuffer>>,
    cvd: RwLock<CvdTracker>,
    tape: RwLock<TapeReadingService>,
    setups: RwLock<SetupEngine>,
    lifecycle: RwLock<LifecycleManager>,
    risk: RwLock<RiskService>,
    positions: RwLock<PositionBook>,
    regimes: RwLock<HashMap<String, MarketRegime>>,
    regime_detector: RegimeDetector,
    defensive: DefensiveFilter,
    /// Symbols currently paused for stale data
    stale: RwLock<HashSet<String>>,
    last_regime_at: RwLock<Option<DateTime<Utc>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(config: AppConfig) -> Self {
        let now = Utc::now();
        let bus = EventBus::new(1024);

        let mut queues = HashMap::new();
        let mut buffers = HashMap::new();
        let mut regimes = HashMap::new();
        for symbol in &config.system.symbols {
            queues.insert(
                symbol.clone(),
                Arc::new(SymbolQueue::new(symbol, config.system.queue_capacity)),
            );
            buffers.insert(
                symbol.clone(),
                SymbolBuffer::new(symbol, config.tape_reading.history_size),
            );
            regimes.insert(symbol.clone(), MarketRegime::neutral(symbol, now));
        }

        let (shutdown_tx, _) = watch::channel(false);

        Self {
            bus,
            queues,
            buffers: RwLock::new(buffers),
            cvd: RwLock::new(CvdTracker::new(config.tape_reading.cvd_roc_period)),
            tape: RwLock::new(TapeReadingService::new(
                config.tape_reading.clone(),
                &config.pattern_detection.pattern_cache,
            )),
            setups: RwLock::new(SetupEngine::new(&config.tape_reading)),
            lifecycle: RwLock::new(LifecycleManager::new(
                config.setup_timeouts.clone(),
                &config.system,
            )),
            risk: RwLock::new(RiskService::new(config.risk_management.clone())),
            positions: RwLock::new(PositionBook::new(
                config.position_management.clone(),
                config.risk_management.emergency_stop_loss,
            )),
            regimes: RwLock::new(regimes),
            regime_detector: RegimeDetector::new(config.market_regime.clone()),
            defensive: DefensiveFilter::new(config.manipulation_detection.clone()),
            stale: RwLock::new(HashSet::new()),
            last_regime_at: RwLock::new(None),
            shutdown_tx,
            config,
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Hand a raw feed event to its symbol partition
    pub fn ingest(&self, event: MarketEvent) {
        match self.queues.get(event.symbol()) {
            Some(queue) => {
                if let Some(warning) = queue.push(event) {
                    self.bus.publish(Event::Warning(warning));
                }
            }
            None => {
                debug!(symbol = event.symbol(), "event for untracked symbol dropped");
            }
        }
    }

    /// Process one market event, in arrival order for its symbol
    pub async fn process_event(&self, event: MarketEvent) {
        let now = Utc::now();
        match event {
            MarketEvent::Trade(trade) => self.process_trade(trade, now).await,
            MarketEvent::Book(book) => self.process_book(book, now).await,
        }
    }

    async fn process_trade(&self, trade: Trade, now: DateTime<Utc>) {
        if trade.volume == 0 || trade.price <= Decimal::ZERO {
            warn!(symbol = %trade.symbol, "malformed trade skipped");
            self.bus.publish(Event::Warning(Warning::new(
                WarningKind::DataFault,
                Severity::Info,
                Some(trade.symbol.clone()),
                format!(
                    "malformed trade skipped: price {} volume {}",
                    trade.price, trade.volume
                ),
                now,
            )));
            return;
        }

        let symbol = trade.symbol.clone();
        self.mark_fresh(&symbol).await;

        {
            let mut buffers = self.buffers.write().await;
            if let Some(buffer) = buffers.get_mut(&symbol) {
                buffer.push_trade(trade.clone(), now);
            } else {
                return;
            }
        }

        let update = {
            let mut cvd = self.cvd.write().await;
            cvd.ingest(&trade)
        };
        if update.roc.abs() >= self.config.tape_reading.cvd_threshold {
            self.bus.publish(Event::CvdUpdated {
                symbol: symbol.clone(),
                cvd: update.cvd,
                roc: update.roc,
            });
        }

        self.bus.publish(Event::TradeAccepted(trade.clone()));

        // Mark open positions to market before new decisions
        let closes = {
            let mut positions = self.positions.write().await;
            positions.on_price(&symbol, trade.price, now)
        };
        self.publish_closes(closes, now).await;

        self.run_detection(&symbol, now).await;
    }

    async fn process_book(&self, book: crate::domain::BookSnapshot, now: DateTime<Utc>) {
        let symbol = book.symbol.clone();
        self.mark_fresh(&symbol).await;

        let warnings = self.defensive.inspect(&book, now);

        {
            let mut buffers = self.buffers.write().await;
            if let Some(buffer) = buffers.get_mut(&symbol) {
                buffer.set_book(book.clone(), now);
            } else {
                return;
            }
        }

        self.bus.publish(Event::BookAccepted(book));

        if !warnings.is_empty() {
            self.handle_manipulation(&symbol, warnings, now).await;
        }

        self.run_detection(&symbol, now).await;
    }

    async fn handle_manipulation(
        &self,
        symbol: &str,
        warnings: Vec<Warning>,
        now: DateTime<Utc>,
    ) {
        for warning in warnings {
            self.bus.publish(Event::Warning(warning));
        }

        {
            let mut tape = self.tape.write().await;
            tape.note_manipulation(symbol, now);
        }

        if self.defensive.block_signals() {
            let cancelled = {
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.cancel_active_for_symbol(symbol, "manipulation warning", now)
            };
            for t in cancelled {
                self.bus.publish(Event::SetupTransition {
                    setup: t.setup,
                    from: t.from,
                });
            }
        }

        if self.config.position_management.auto_manage {
            let closes = {
                let mut positions = self.positions.write().await;
                positions.close_for_symbol(
                    symbol,
                    CloseReason::Defensive(WarningKind::Manipulation),
                    now,
                )
            };
            let reasons = closes
                .into_iter()
                .map(|p| (p, CloseReason::Defensive(WarningKind::Manipulation)))
                .collect();
            self.publish_closes(reasons, now).await;
        }
    }

    /// Detector pass for one symbol: tactical signals, setup actions and
    /// trigger attempts for whatever confirmed.
    async fn run_detection(&self, symbol: &str, now: DateTime<Utc>) {
        let (cvd_value, cvd_roc, cvd_delta) = {
            let cvd = self.cvd.read().await;
            (
                cvd.cvd(symbol),
                cvd.roc(symbol),
                cvd.delta_over(symbol, CVD_DELTA_SAMPLES),
            )
        };

        let (signals, actions) = {
            let buffers = self.buffers.read().await;
            let Some(buffer) = buffers.get(symbol) else {
                return;
            };
            let regimes = self.regimes.read().await;
            let ctx = SetupContext {
                buffer,
                regime: regimes.get(symbol),
                cvd: cvd_value,
                cvd_delta,
            };

            let signals = {
                let mut tape = self.tape.write().await;
                tape.on_event(buffer, cvd_roc, now)
            };

            let mut setups = self.setups.write().await;
            let mut actions = Vec::new();
            for signal in &signals {
                actions.extend(setups.on_signal(signal, &ctx, now));
            }
            actions.extend(setups.on_tick(symbol, &ctx, now));
            (signals, actions)
        };

        let extreme_divergences: Vec<crate::domain::TacticalSignal> = signals
            .iter()
            .filter(|s| {
                s.kind == crate::domain::PatternKind::Divergence
                    && s.evidence
                        .cvd_roc
                        .map(|roc| roc.abs() >= self.config.tape_reading.extreme_threshold)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();

        for signal in signals {
            self.bus.publish(Event::SignalEmitted(signal));
        }

        for divergence in extreme_divergences {
            self.handle_divergence_warning(&divergence, now).await;
        }

        self.apply_setup_actions(actions, now).await;
    }

    /// An extreme divergence warns against whatever runs with the price
    /// move the flow contradicts: contrary setups cancel, contrary
    /// positions close immediately.
    async fn handle_divergence_warning(
        &self,
        signal: &crate::domain::TacticalSignal,
        now: DateTime<Utc>,
    ) {
        let against = signal.direction.opposite();
        let roc = signal.evidence.cvd_roc.unwrap_or(0.0);

        self.bus.publish(Event::Warning(Warning::new(
            WarningKind::Divergence,
            Severity::Caution,
            Some(signal.symbol.clone()),
            format!("extreme price/flow divergence (cvd roc {roc:.0}%), against {against} exposure"),
            now,
        )));

        if self.defensive.block_signals() {
            let cancelled = {
                let mut lifecycle = self.lifecycle.write().await;
                lifecycle.cancel_direction_for_symbol(
                    &signal.symbol,
                    against,
                    "divergence warning",
                    now,
                )
            };
            for t in cancelled {
                self.bus.publish(Event::SetupTransition {
                    setup: t.setup,
                    from: t.from,
                });
            }
        }

        if self.config.position_management.auto_manage {
            let closes = {
                let mut positions = self.positions.write().await;
                positions.close_direction_for_symbol(
                    &signal.symbol,
                    against,
                    CloseReason::Defensive(WarningKind::Divergence),
                    now,
                )
            };
            let reasons = closes
                .into_iter()
                .map(|p| (p, CloseReason::Defensive(WarningKind::Divergence)))
                .collect();
            self.publish_closes(reasons, now).await;
        }
    }

    async fn apply_setup_actions(&self, actions: Vec<SetupAction>, now: DateTime<Utc>) {
        let mut confirmed: Vec<Uuid> = Vec::new();

        for action in actions {
            match action {
                SetupAction::Create(setup) => {
                    let created = {
                        let mut lifecycle = self.lifecycle.write().await;
                        lifecycle.create(setup, now)
                    };
                    self.bus.publish(Event::SetupCreated(created));
                }
                SetupAction::Confirm { id, with } => {
                    let result = {
                        let mut lifecycle = self.lifecycle.write().await;
                        lifecycle.confirm(id, with, now)
                    };
                    match result {
                        Ok(t) => {
                            let state = t.setup.state;
                            self.bus.publish(Event::SetupTransition {
                                setup: t.setup,
                                from: t.from,
                            });
                            if state == SetupState::Confirmed {
                                confirmed.push(id);
                            }
                        }
                        Err(e) => debug!("confirmation dropped: {e}"),
                    }
                }
            }
        }

        for id in confirmed {
            self.attempt_trigger(id, now).await;
        }
    }

    /// Gate a confirmed setup through confluence, risk and the position
    /// book; only a successful open advances it to triggered.
    async fn attempt_trigger(&self, id: Uuid, now: DateTime<Utc>) {
        let setup = {
            let lifecycle = self.lifecycle.read().await;
            match lifecycle.get(id) {
                Some(s) if s.state == SetupState::Confirmed => s.clone(),
                _ => return,
            }
        };

        let conflict = {
            let lifecycle = self.lifecycle.read().await;
            lifecycle.confluence_conflict(&setup, now)
        };
        if let Some(conflict) = conflict {
            // Blocked, not cancelled: the sweep re-evaluates until deadline
            debug!(
                setup = %setup.id,
                against = %conflict.id,
                "trigger blocked by contradictory setup on correlated instrument"
            );
            return;
        }

        let outcome = {
            let mut risk = self.risk.write().await;
            risk.evaluate(&setup, now)
        };

        match outcome {
            GateOutcome::Approved => {
                self.bus.publish(Event::SetupApproved(setup.clone()));

                let (size_mult, stop_mult) = {
                    let regimes = self.regimes.read().await;
                    let bucket = regimes
                        .get(&setup.symbol)
                        .map(|r| r.volatility)
                        .unwrap_or(crate::analytics::VolatilityBucket::Normal);
                    let adj = self.regime_detector.adjustment_for(bucket);
                    (adj.size_multiplier, adj.stop_multiplier)
                };

                let open = {
                    let mut positions = self.positions.write().await;
                    positions.open_from(&setup, size_mult, stop_mult, now)
                };
                match open {
                    OpenOutcome::Opened(position) => {
                        let triggered = {
                            let mut lifecycle = self.lifecycle.write().await;
                            lifecycle.trigger(id, now)
                        };
                        if let Ok(t) = triggered {
                            self.bus.publish(Event::SetupTransition {
                                setup: t.setup,
                                from: t.from,
                            });
                        }
                        self.bus.publish(Event::PositionOpened(position));
                    }
                    OpenOutcome::Rejected(warning) => {
                        // Setup stays confirmed; usually it expires
                        self.bus.publish(Event::Warning(warning));
                    }
                }
            }
            GateOutcome::Deferred(_) | GateOutcome::Blocked(_) => {
                // Retry on the next sweep
            }
            GateOutcome::Cancelled(err) => {
                let cancelled = {
                    let mut lifecycle = self.lifecycle.write().await;
                    lifecycle.cancel(id, &err.to_string(), now)
                };
                if let Ok(t) = cancelled {
                    self.bus.publish(Event::SetupTransition {
                        setup: t.setup,
                        from: t.from,
                    });
                }
            }
        }
    }

    /// One pass of the periodic sweep at an explicit instant
    pub async fn sweep_at(&self, now: DateTime<Utc>) {
        let expired = {
            let mut lifecycle = self.lifecycle.write().await;
            lifecycle.sweep_expired(now)
        };
        for t in expired {
            self.bus.publish(Event::SetupTransition {
                setup: t.setup,
                from: t.from,
            });
        }

        // Tick the stateful setup detectors (CVD reversals, pullback arming)
        let symbols = self.config.system.symbols.clone();
        for symbol in &symbols {
            let actions = {
                let (cvd_value, cvd_delta) = {
                    let cvd = self.cvd.read().await;
                    (cvd.cvd(symbol), cvd.delta_over(symbol, CVD_DELTA_SAMPLES))
                };
                let buffers = self.buffers.read().await;
                let Some(buffer) = buffers.get(symbol) else {
                    continue;
                };
                let regimes = self.regimes.read().await;
                let ctx = SetupContext {
                    buffer,
                    regime: regimes.get(symbol),
                    cvd: cvd_value,
                    cvd_delta,
                };
                let mut setups = self.setups.write().await;
                setups.on_tick(symbol, &ctx, now)
            };
            self.apply_setup_actions(actions, now).await;
        }

        // Re-attempt confirmed setups (confluence blocks, deferred gates)
        let awaiting = {
            let lifecycle = self.lifecycle.read().await;
            lifecycle.confirmed_awaiting()
        };
        for setup in awaiting {
            self.attempt_trigger(setup.id, now).await;
        }

        {
            let mut lifecycle = self.lifecycle.write().await;
            lifecycle.gc_terminal(now);
        }
        {
            let mut tape = self.tape.write().await;
            tape.cache_mut().purge_expired(now);
        }

        self.check_staleness(now).await;

        let due = {
            let last = self.last_regime_at.read().await;
            match *last {
                Some(at) => now - at >= self.regime_detector.update_interval(),
                None => true,
            }
        };
        if due {
            self.recompute_regimes(now).await;
        }
    }

    async fn check_staleness(&self, now: DateTime<Utc>) {
        let stale_after = Duration::seconds(self.config.system.stale_after_seconds as i64);

        let mut newly_stale = Vec::new();
        {
            let buffers = self.buffers.read().await;
            let stale = self.stale.read().await;
            for (symbol, buffer) in buffers.iter() {
                if buffer.is_stale(now, stale_after) && !stale.contains(symbol) {
                    newly_stale.push(symbol.clone());
                }
            }
        }

        for symbol in newly_stale {
            warn!(%symbol, "feed stale, pausing tactical signal emission");
            {
                let mut stale = self.stale.write().await;
                stale.insert(symbol.clone());
            }
            {
                let mut tape = self.tape.write().await;
                tape.set_paused(&symbol, true);
            }
            self.bus.publish(Event::Warning(Warning::data_stale(
                &symbol,
                self.config.system.stale_after_seconds,
                now,
            )));
        }
    }

    async fn mark_fresh(&self, symbol: &str) {
        let was_stale = {
            let mut stale = self.stale.write().await;
            stale.remove(symbol)
        };
        if was_stale {
            info!(symbol, "fresh data resumed, signal emission unpaused");
            let mut tape = self.tape.write().await;
            tape.set_paused(symbol, false);
        }
    }

    async fn recompute_regimes(&self, now: DateTime<Utc>) {
        let updated = {
            let buffers = self.buffers.read().await;
            let mut regimes = self.regimes.write().await;
            let mut updated = Vec::new();
            for (symbol, buffer) in buffers.iter() {
                let regime = self.regime_detector.compute(buffer, now);
                regimes.insert(symbol.clone(), regime.clone());
                updated.push(regime);
            }
            updated
        };
        for regime in updated {
            self.bus.publish(Event::RegimeUpdated(regime));
        }
        *self.last_regime_at.write().await = Some(now);
    }

    async fn publish_closes(
        &self,
        closes: Vec<(crate::strategy::Position, CloseReason)>,
        now: DateTime<Utc>,
    ) {
        for (position, reason) in closes {
            {
                let mut risk = self.risk.write().await;
                risk.record_close(position.pnl, now);
            }
            self.bus.publish(Event::PositionClosed {
                reason: reason.to_string(),
                position,
            });
        }
    }

    // ==================== Console operations ====================

    /// Console `quit`: close out the book and stop every task
    pub async fn shutdown(&self) {
        info!("shutdown requested");
        let now = Utc::now();
        let closes = {
            let mut positions = self.positions.write().await;
            positions.close_all(CloseReason::Shutdown, now)
        };
        let reasons = closes
            .into_iter()
            .map(|p| (p, CloseReason::Shutdown))
            .collect();
        self.publish_closes(reasons, now).await;
        let _ = self.shutdown_tx.send(true);
    }

    /// Console `clear-signals`
    pub async fn clear_active_signals(&self) {
        let mut tape = self.tape.write().await;
        tape.clear_active_signals();
        info!("active tactical signals cleared");
    }

    /// Console `force-refresh`
    pub async fn force_regime_recompute(&self) {
        self.recompute_regimes(Utc::now()).await;
    }

    /// Manual risk override: force-close the circuit breaker
    pub async fn risk_override(&self, reason: &str) {
        let warning = {
            let mut risk = self.risk.write().await;
            risk.force_close_breaker(reason, Utc::now())
        };
        self.bus.publish(Event::Warning(warning));
    }

    /// Manually trip the circuit breaker (operator action): blocks all
    /// approvals and closes out the book defensively.
    pub async fn trip_breaker(&self, reason: &str) {
        let now = Utc::now();
        {
            let mut risk = self.risk.write().await;
            risk.trip(crate::strategy::TripReason::Manual(reason.to_string()), now);
        }
        self.bus.publish(Event::Warning(Warning::new(
            WarningKind::RiskOverride,
            Severity::Critical,
            None,
            format!("circuit breaker tripped by operator: {reason}"),
            now,
        )));

        let closes = {
            let mut positions = self.positions.write().await;
            positions.close_all(CloseReason::RiskOverride, now)
        };
        let reasons = closes
            .into_iter()
            .map(|p| (p, CloseReason::RiskOverride))
            .collect();
        self.publish_closes(reasons, now).await;
    }

    // ==================== Status snapshots ====================

    pub async fn risk_status(&self) -> crate::strategy::risk::RiskStatus {
        self.risk.read().await.status()
    }

    pub async fn setups_snapshot(&self) -> Vec<crate::domain::StrategicSetup> {
        self.lifecycle.read().await.all()
    }

    pub async fn open_position_count(&self) -> usize {
        self.positions.read().await.open_count()
    }

    pub async fn open_positions(&self) -> Vec<crate::strategy::Position> {
        self.positions.read().await.open_positions()
    }

    // ==================== Task orchestration ====================

    /// Run the full system against a market feed until shutdown
    pub async fn run<F>(self: Arc<Self>, mut feed: F) -> Result<()>
    where
        F: MarketFeed + 'static,
    {
        info!(
            symbols = ?self.config.system.symbols,
            "engine starting"
        );

        // One sequential pipeline per symbol partition
        for symbol in &self.config.system.symbols {
            let queue = Arc::clone(&self.queues[symbol]);
            let engine = Arc::clone(&self);
            tokio::spawn(async move {
                let mut shutdown = engine.shutdown_rx();
                loop {
                    tokio::select! {
                        event = queue.pop() => engine.process_event(event).await,
                        _ = shutdown.changed() => break,
                    }
                }
            });
        }

        // Periodic sweep
        {
            let engine = Arc::clone(&self);
            let interval_ms = self.config.system.update_interval_ms.max(50);
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(std::time::Duration::from_millis(interval_ms));
                let mut shutdown = engine.shutdown_rx();
                loop {
                    tokio::select! {
                        _ = ticker.tick() => engine.sweep_at(Utc::now()).await,
                        _ = shutdown.changed() => break,
                    }
                }
            });
        }

        // Feed ingestion on this task
        let mut shutdown = self.shutdown_rx();
        loop {
            tokio::select! {
                next = feed.next() => match next {
                    Some(event) => self.ingest(event),
                    None => {
                        info!("market feed ended");
                        break;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        // Keep sweeping until shutdown is requested
        if !*self.shutdown_rx().borrow() {
            let mut shutdown = self.shutdown_rx();
            let _ = shutdown.changed().await;
        }

        info!("engine stopped");
        Ok(())
    }
}
