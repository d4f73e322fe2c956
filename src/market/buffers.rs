//! Per-symbol rolling market-data buffers.
//!
//! Foundation for every streaming statistic: a bounded trade history, the
//! latest book snapshot and a version counter bumped on each mutation that
//! keys the pattern-result cache.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::{BookSnapshot, Trade};

pub struct SymbolBuffer {
    symbol: String,
    capacity: usize,
    trades: VecDeque<Trade>,
    book: Option<BookSnapshot>,
    version: u64,
    /// Arrival wall-clock of the last event, for staleness detection
    last_event_at: Option<DateTime<Utc>>,
}

impl SymbolBuffer {
    pub fn new(symbol: impl Into<String>, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            capacity: capacity.max(1),
            trades: VecDeque::with_capacity(capacity.max(1).min(4096)),
            book: None,
            version: 0,
            last_event_at: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Monotonic buffer version; bumped on every mutation
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn push_trade(&mut self, trade: Trade, arrived_at: DateTime<Utc>) {
        if self.trades.len() >= self.capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
        self.version += 1;
        self.last_event_at = Some(arrived_at);
    }

    pub fn set_book(&mut self, book: BookSnapshot, arrived_at: DateTime<Utc>) {
        self.book = Some(book);
        self.version += 1;
        self.last_event_at = Some(arrived_at);
    }

    pub fn book(&self) -> Option<&BookSnapshot> {
        self.book.as_ref()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Last `n` trades in chronological order
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &Trade> {
        let skip = self.trades.len().saturating_sub(n);
        self.trades.iter().skip(skip)
    }

    /// Trades whose event timestamp falls within the last `window`
    pub fn recent_within(&self, window: Duration, now: DateTime<Utc>) -> Vec<&Trade> {
        let cutoff = now - window;
        let mut result: Vec<&Trade> = self
            .trades
            .iter()
            .rev()
            .take_while(|t| t.timestamp > cutoff)
            .collect();
        result.reverse();
        result
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.trades.back().map(|t| t.price)
    }

    pub fn first_price_of_recent(&self, n: usize) -> Option<Decimal> {
        self.recent(n).next().map(|t| t.price)
    }

    /// Mean volume per trade over the last `n` trades
    pub fn avg_volume(&self, n: usize) -> f64 {
        let count = n.min(self.trades.len());
        if count == 0 {
            return 0.0;
        }
        let total: u64 = self.recent(count).map(|t| t.volume).sum();
        total as f64 / count as f64
    }

    pub fn total_volume(&self, n: usize) -> u64 {
        self.recent(n).map(|t| t.volume).sum()
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.last_event_at
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        match self.last_event_at {
            Some(last) => now - last >= stale_after,
            // No data yet is not staleness; emission has nothing to pause
            None => false,
        }
    }
}
