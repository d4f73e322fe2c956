//! In-process event backbone.
//!
//! Two layers: bounded per-symbol ingest queues feeding the sequential
//! symbol pipelines (drop-oldest on overflow, producers never block), and a
//! broadcast fan-out of processed events for observers such as the record
//! sink and the console. Lagging broadcast subscribers lose oldest events.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tracing::debug;

use crate::analytics::regime::MarketRegime;
use crate::domain::{
    BookSnapshot, MarketEvent, SetupState, StrategicSetup, TacticalSignal, Trade, Warning,
};
use crate::strategy::positions::Position;

/// Everything observable on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TradeAccepted(Trade),
    BookAccepted(BookSnapshot),
    CvdUpdated {
        symbol: String,
        cvd: i64,
        roc: f64,
    },
    SignalEmitted(TacticalSignal),
    SetupCreated(StrategicSetup),
    SetupTransition {
        setup: StrategicSetup,
        from: SetupState,
    },
    SetupApproved(StrategicSetup),
    PositionOpened(Position),
    PositionClosed {
        position: Position,
        reason: String,
    },
    RegimeUpdated(MarketRegime),
    Warning(Warning),
}

impl Event {
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Event::TradeAccepted(t) => Some(&t.symbol),
            Event::BookAccepted(b) => Some(&b.symbol),
            Event::CvdUpdated { symbol, .. } => Some(symbol),
            Event::SignalEmitted(s) => Some(&s.symbol),
            Event::SetupCreated(s) => Some(&s.symbol),
            Event::SetupTransition { setup, .. } => Some(&setup.symbol),
            Event::SetupApproved(s) => Some(&s.symbol),
            Event::PositionOpened(p) => Some(&p.symbol),
            Event::PositionClosed { position, .. } => Some(&position.symbol),
            Event::RegimeUpdated(r) => Some(&r.symbol),
            Event::Warning(w) => w.symbol.as_deref(),
        }
    }
}

/// Broadcast fan-out for processed events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to all current subscribers; a bus with no subscribers is fine
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Bounded ingest queue for one symbol partition.
///
/// A full queue drops the oldest event and reports it, so the feed side
/// never blocks on a slow pipeline.
pub struct SymbolQueue {
    symbol: String,
    capacity: usize,
    inner: Mutex<VecDeque<MarketEvent>>,
    notify: Notify,
    dropped: AtomicU64,
}

impl SymbolQueue {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<MarketEvent>> {
        // A poisoned queue still holds valid events
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue an event; returns an overflow warning when the oldest event
    /// had to be dropped to make room.
    pub fn push(&self, event: MarketEvent) -> Option<Warning> {
        let warning = {
            let mut queue = self.lock();
            let warning = if queue.len() >= self.capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(symbol = %self.symbol, dropped, "ingest queue overflow, dropped oldest");
                Some(Warning::overflow(&self.symbol, dropped, Utc::now()))
            } else {
                None
            };
            queue.push_back(event);
            warning
        };
        self.notify.notify_one();
        warning
    }

    pub fn try_pop(&self) -> Option<MarketEvent> {
        self.lock().pop_front()
    }

    /// Wait for the next event in arrival order
    pub async fn pop(&self) -> MarketEvent {
        loop {
            if let Some(event) = self.try_pop() {
                return event;
            }
            self.notify.notified().await;
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
