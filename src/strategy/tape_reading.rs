//! Tape reading service: runs the pattern detectors over the rolling
//! buffers on every market event and turns matches into tactical signals.
//!
//! Signals coinciding with an active manipulation warning for the symbol
//! are suppressed outright, and emission pauses entirely while a symbol's
//! feed is stale.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::analytics::cache::{CacheKey, PatternCache};
use crate::analytics::patterns;
use crate::config::{PatternCacheConfig, TapeConfig};
use crate::domain::{PatternKind, TacticalSignal};
use crate::market::SymbolBuffer;

/// Emitted signals kept per symbol for display and clearing
const ACTIVE_HISTORY: usize = 100;

pub struct TapeReadingService {
    config: TapeConfig,
    cache: PatternCache,
    active: HashMap<String, VecDeque<TacticalSignal>>,
    /// Symbols under a manipulation grace window, until the given instant
    manipulation_until: HashMap<String, DateTime<Utc>>,
    paused: HashSet<String>,
}

impl TapeReadingService {
    pub fn new(config: TapeConfig, cache_config: &PatternCacheConfig) -> Self {
        Self {
            config,
            cache: PatternCache::new(cache_config),
            active: HashMap::new(),
            manipulation_until: HashMap::new(),
            paused: HashSet::new(),
        }
    }

    pub fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// Start (or extend) the post-manipulation suppression window
    pub fn note_manipulation(&mut self, symbol: &str, now: DateTime<Utc>) {
        let until = now + Duration::seconds(self.config.manipulation_grace_seconds as i64);
        self.manipulation_until.insert(symbol.to_string(), until);
    }

    pub fn set_paused(&mut self, symbol: &str, paused: bool) {
        if paused {
            self.paused.insert(symbol.to_string());
        } else {
            self.paused.remove(symbol);
        }
    }

    pub fn is_paused(&self, symbol: &str) -> bool {
        self.paused.contains(symbol)
    }

    /// Run every detector over the buffer and emit qualifying signals
    pub fn on_event(
        &mut self,
        buffer: &SymbolBuffer,
        cvd_roc: f64,
        now: DateTime<Utc>,
    ) -> Vec<TacticalSignal> {
        let symbol = buffer.symbol().to_string();

        if self.paused.contains(&symbol) {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for kind in PatternKind::ALL {
            let key = CacheKey::new(&symbol, kind, buffer.version());
            let result = match self.cache.get(&key, now) {
                Some(cached) => cached,
                None => {
                    let computed =
                        patterns::evaluate_guarded(kind, buffer, cvd_roc, &self.config);
                    self.cache.insert(key, computed.clone(), now);
                    computed
                }
            };
            if let Some(m) = result {
                matches.push(m);
            }
        }

        if matches.is_empty() {
            return Vec::new();
        }

        if let Some(until) = self.manipulation_until.get(&symbol) {
            if now < *until {
                debug!(
                    %symbol,
                    suppressed = matches.len(),
                    "suppressing signals inside manipulation grace window"
                );
                return Vec::new();
            }
        }

        let signals: Vec<TacticalSignal> = matches
            .into_iter()
            .map(|m| {
                TacticalSignal::new(&symbol, m.kind, m.direction, now, m.strength, m.evidence)
            })
            .collect();

        let history = self.active.entry(symbol).or_default();
        for signal in &signals {
            if history.len() >= ACTIVE_HISTORY {
                history.pop_front();
            }
            history.push_back(signal.clone());
        }

        signals
    }

    pub fn active_signals(&self, symbol: &str) -> Vec<TacticalSignal> {
        self.active
            .get(symbol)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Console `clear-signals` operation
    pub fn clear_active_signals(&mut self) {
        self.active.clear();
    }

    pub fn cache_mut(&mut self) -> &mut PatternCache {
        &mut self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Trade, TradeSide};
    use rust_decimal_macros::dec;

    fn momentum_buffer(now: DateTime<Utc>) -> SymbolBuffer {
        let mut buffer = SymbolBuffer::new("WDO", 1000);
        for _ in 0..20 {
            buffer.push_trade(
                Trade::new("WDO", now, TradeSide::Buy, dec!(5500.0), 20),
                now,
            );
        }
        buffer
    }

    fn service() -> TapeReadingService {
        TapeReadingService::new(TapeConfig::default(), &PatternCacheConfig::default())
    }

    #[test]
    fn test_emits_signals_for_matches() {
        let now = Utc::now();
        let buffer = momentum_buffer(now);
        let mut service = service();

        let signals = service.on_event(&buffer, 0.0, now);
        assert!(signals.iter().any(|s| s.kind == PatternKind::Momentum));
        assert!(!service.active_signals("WDO").is_empty());
    }

    #[test]
    fn test_manipulation_grace_suppresses() {
        let now = Utc::now();
        let buffer = momentum_buffer(now);
        let mut service = service();

        service.note_manipulation("WDO", now);
        assert!(service.on_event(&buffer, 0.0, now).is_empty());

        // Window elapsed: emission resumes
        let later = now + Duration::seconds(6);
        assert!(!service.on_event(&buffer, 0.0, later).is_empty());
    }

    #[test]
    fn test_stale_pause_blocks_emission() {
        let now = Utc::now();
        let buffer = momentum_buffer(now);
        let mut service = service();

        service.set_paused("WDO", true);
        assert!(service.on_event(&buffer, 0.0, now).is_empty());

        service.set_paused("WDO", false);
        assert!(!service.on_event(&buffer, 0.0, now).is_empty());
    }

    #[test]
    fn test_cached_result_identical_within_ttl() {
        let now = Utc::now();
        let buffer = momentum_buffer(now);
        let mut service = service();

        let first = service.on_event(&buffer, 0.0, now);
        let second = service.on_event(&buffer, 0.0, now + Duration::seconds(1));

        let strength = |signals: &[TacticalSignal]| {
            signals
                .iter()
                .find(|s| s.kind == PatternKind::Momentum)
                .map(|s| s.strength)
        };
        assert_eq!(strength(&first), strength(&second));
        assert!(service.cache_mut().stats().hits > 0);
    }

    #[test]
    fn test_clear_active_signals() {
        let now = Utc::now();
        let buffer = momentum_buffer(now);
        let mut service = service();

        service.on_event(&buffer, 0.0, now);
        assert!(!service.active_signals("WDO").is_empty());

        service.clear_active_signals();
        assert!(service.active_signals("WDO").is_empty());
    }
}
