//! Bounded, time-expiring memo for pattern-detector results.
//!
//! Keyed by (symbol, detector, buffer version) so a cached entry can never
//! disagree with recomputation: any buffer mutation changes the key. Time
//! eviction happens on lookup, LRU eviction on insert overflow.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::PatternCacheConfig;
use crate::domain::PatternKind;

use super::patterns::PatternMatch;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub symbol: String,
    pub kind: PatternKind,
    pub buffer_version: u64,
}

impl CacheKey {
    pub fn new(symbol: &str, kind: PatternKind, buffer_version: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            kind,
            buffer_version,
        }
    }
}

struct CacheEntry {
    result: Option<PatternMatch>,
    inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

pub struct PatternCache {
    max_size: usize,
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry>,
    /// LRU order, oldest at the front
    order: VecDeque<CacheKey>,
    stats: CacheStats,
}

impl PatternCache {
    pub fn new(config: &PatternCacheConfig) -> Self {
        Self {
            max_size: config.max_size.max(1),
            ttl: Duration::seconds(config.ttl_seconds as i64),
            entries: HashMap::new(),
            order: VecDeque::new(),
            stats: CacheStats::default(),
        }
    }

    /// Fetch a memoized result. `Some(inner)` is a hit (inner being the
    /// detector's result, match or no-match); `None` means recompute.
    pub fn get(&mut self, key: &CacheKey, now: DateTime<Utc>) -> Option<Option<PatternMatch>> {
        match self.entries.get(key) {
            Some(entry) if now - entry.inserted_at < self.ttl => {
                self.stats.hits += 1;
                self.touch(key);
                Some(self.entries[key].result.clone())
            }
            Some(_) => {
                // Expired on lookup: drop and force recomputation
                self.remove(key);
                self.stats.expirations += 1;
                self.stats.misses += 1;
                None
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    pub fn insert(&mut self, key: CacheKey, result: Option<PatternMatch>, now: DateTime<Utc>) {
        if self.entries.contains_key(&key) {
            self.touch(&key);
        } else {
            while self.entries.len() >= self.max_size {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                    self.stats.evictions += 1;
                } else {
                    break;
                }
            }
            self.order.push_back(key.clone());
        }
        self.entries.insert(
            key,
            CacheEntry {
                result,
                inserted_at: now,
            },
        );
    }

    /// Drop every entry past its TTL (periodic sweep duty)
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| now - entry.inserted_at >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
            self.order.push_back(key.clone());
        }
    }

    fn remove(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
    }
}
