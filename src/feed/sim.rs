//! Simulated feed: a correlated random walk over the configured pair,
//! with periodic book snapshots. Exists to exercise the whole pipeline
//! without a live data source.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::domain::{BookLevel, BookSnapshot, MarketEvent, Trade, TradeSide};

use super::MarketFeed;

const TICK: Decimal = dec!(0.5);

pub struct SimFeed {
    symbols: Vec<String>,
    prices: Vec<Decimal>,
    rng: StdRng,
    interval: std::time::Duration,
    /// Shared directional drift so the pair stays correlated
    drift: f64,
    sequence: u64,
}

impl SimFeed {
    pub fn new(symbols: Vec<String>, interval_ms: u64) -> Self {
        let prices = symbols.iter().map(|_| dec!(5500.0)).collect();
        Self {
            symbols,
            prices,
            rng: StdRng::from_entropy(),
            interval: std::time::Duration::from_millis(interval_ms.max(1)),
            drift: 0.0,
            sequence: 0,
        }
    }

    pub fn with_seed(symbols: Vec<String>, interval_ms: u64, seed: u64) -> Self {
        let mut feed = Self::new(symbols, interval_ms);
        feed.rng = StdRng::seed_from_u64(seed);
        feed
    }

    fn step(&mut self) -> MarketEvent {
        let idx = (self.sequence as usize) % self.symbols.len();
        self.sequence += 1;

        // Slowly wandering drift keeps both legs loosely trending together
        self.drift = (self.drift + self.rng.gen_range(-0.1..0.1)).clamp(-0.6, 0.6);

        let up_bias = 0.5 + self.drift * 0.4;
        let step_up = self.rng.gen_bool(up_bias.clamp(0.05, 0.95));
        let ticks: u32 = self.rng.gen_range(0..=2);
        let delta = TICK * Decimal::from(ticks);
        self.prices[idx] = if step_up {
            self.prices[idx] + delta
        } else {
            (self.prices[idx] - delta).max(TICK)
        };
        let price = self.prices[idx];
        let symbol = self.symbols[idx].clone();

        // Roughly one book snapshot per ten trades
        if self.sequence % 10 == 0 {
            let levels = |base: Decimal, sign: Decimal, rng: &mut StdRng| {
                (0..5)
                    .map(|i| BookLevel {
                        price: base + sign * TICK * Decimal::from(i as u64 + 1),
                        volume: rng.gen_range(20..200),
                    })
                    .collect::<Vec<_>>()
            };
            let bids = levels(price, dec!(-1), &mut self.rng);
            let asks = levels(price, dec!(1), &mut self.rng);
            return MarketEvent::Book(BookSnapshot {
                symbol,
                timestamp: Utc::now(),
                bids,
                asks,
            });
        }

        let side = if step_up { TradeSide::Buy } else { TradeSide::Sell };
        // Occasional burst to give the spike detector something to find
        let volume = if self.rng.gen_ratio(1, 40) {
            self.rng.gen_range(150..400)
        } else {
            self.rng.gen_range(1..30)
        };

        MarketEvent::Trade(Trade::new(symbol, Utc::now(), side, price, volume))
    }
}

#[async_trait]
impl MarketFeed for SimFeed {
    async fn next(&mut self) -> Option<MarketEvent> {
        tokio::time::sleep(self.interval).await;
        Some(self.step())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_with_seed() {
        let symbols = vec!["WDO".to_string(), "DOL".to_string()];
        let mut a = SimFeed::with_seed(symbols.clone(), 1, 42);
        let mut b = SimFeed::with_seed(symbols, 1, 42);

        for _ in 0..50 {
            assert_eq!(a.step(), b.step());
        }
    }

    #[test]
    fn test_alternates_symbols_and_stays_positive() {
        let symbols = vec!["WDO".to_string(), "DOL".to_string()];
        let mut feed = SimFeed::with_seed(symbols, 1, 7);

        let first = feed.step();
        let second = feed.step();
        assert_ne!(first.symbol(), second.symbol());

        for _ in 0..500 {
            match feed.step() {
                MarketEvent::Trade(t) => {
                    assert!(t.price > Decimal::ZERO);
                    assert!(t.volume > 0);
                }
                MarketEvent::Book(b) => {
                    assert_eq!(b.bids.len(), 5);
                    assert_eq!(b.asks.len(), 5);
                }
            }
        }
    }
}
