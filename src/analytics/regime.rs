//! Market regime classification: trend, volatility bucket and liquidity
//! depth, recomputed on a timer and replaced atomically.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RegimeConfig, VolatilityAdjustment};
use crate::market::SymbolBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Up => "UP",
            TrendDirection::Down => "DOWN",
            TrendDirection::Sideways => "SIDEWAYS",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityBucket {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityBucket::Low => "low",
            VolatilityBucket::Normal => "normal",
            VolatilityBucket::High => "high",
            VolatilityBucket::Extreme => "extreme",
        }
    }
}

impl std::fmt::Display for VolatilityBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One classification pass; replaced, never mutated incrementally
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketRegime {
    pub symbol: String,
    pub trend: TrendDirection,
    pub volatility: VolatilityBucket,
    /// Average contracts per level across the top of book, both sides
    pub liquidity_score: f64,
    pub computed_at: DateTime<Utc>,
}

impl MarketRegime {
    /// Neutral default used before the first recomputation
    pub fn neutral(symbol: &str, now: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.to_string(),
            trend: TrendDirection::Sideways,
            volatility: VolatilityBucket::Normal,
            liquidity_score: 0.0,
            computed_at: now,
        }
    }
}

pub struct RegimeDetector {
    config: RegimeConfig,
}

impl RegimeDetector {
    pub fn new(config: RegimeConfig) -> Self {
        Self { config }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::seconds(self.config.update_interval_secs as i64)
    }

    /// Classify from the last `lookback_seconds` of history
    pub fn compute(&self, buffer: &SymbolBuffer, now: DateTime<Utc>) -> MarketRegime {
        let lookback = Duration::seconds(self.config.lookback_seconds as i64);
        let window = buffer.recent_within(lookback, now);

        let trend = self.classify_trend(&window);
        let volatility = self.classify_volatility(&window);
        let liquidity_score = Self::liquidity(buffer);

        debug!(
            symbol = %buffer.symbol(),
            trend = trend.as_str(),
            volatility = %volatility,
            liquidity = liquidity_score,
            "regime recomputed"
        );

        MarketRegime {
            symbol: buffer.symbol().to_string(),
            trend,
            volatility,
            liquidity_score,
            computed_at: now,
        }
    }

    pub fn adjustment_for(&self, bucket: VolatilityBucket) -> VolatilityAdjustment {
        let adj = &self.config.volatility_adjustments;
        match bucket {
            VolatilityBucket::Low => adj.low,
            VolatilityBucket::Normal => adj.normal,
            VolatilityBucket::High => adj.high,
            VolatilityBucket::Extreme => adj.extreme,
        }
    }

    fn classify_trend(&self, window: &[&crate::domain::Trade]) -> TrendDirection {
        let (Some(first), Some(last)) = (window.first(), window.last()) else {
            return TrendDirection::Sideways;
        };
        let drift = last.price - first.price;
        if drift >= self.config.trend_threshold {
            TrendDirection::Up
        } else if drift <= -self.config.trend_threshold {
            TrendDirection::Down
        } else {
            TrendDirection::Sideways
        }
    }

    fn classify_volatility(&self, window: &[&crate::domain::Trade]) -> VolatilityBucket {
        if window.len() < 3 {
            return VolatilityBucket::Normal;
        }

        let deltas: Vec<f64> = window
            .windows(2)
            .filter_map(|pair| (pair[1].price - pair[0].price).to_f64())
            .collect();
        if deltas.is_empty() {
            return VolatilityBucket::Normal;
        }

        let mean = deltas.iter().sum::<f64>() / deltas.len() as f64;
        let variance =
            deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / deltas.len() as f64;
        let stdev = variance.sqrt();

        if stdev <= self.config.volatility_low_max {
            VolatilityBucket::Low
        } else if stdev <= self.config.volatility_normal_max {
            VolatilityBucket::Normal
        } else if stdev <= self.config.volatility_high_max {
            VolatilityBucket::High
        } else {
            VolatilityBucket::Extreme
        }
    }

    fn liquidity(buffer: &SymbolBuffer) -> f64 {
        const LEVELS: usize = 5;
        match buffer.book() {
            Some(book) => {
                let levels = book.bids.len().min(LEVELS) + book.asks.len().min(LEVELS);
                if levels == 0 {
                    0.0
                } else {
                    (book.bid_volume(LEVELS) + book.ask_volume(LEVELS)) as f64 / levels as f64
                }
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BookLevel, BookSnapshot, Trade, TradeSide};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn detector() -> RegimeDetector {
        RegimeDetector::new(RegimeConfig::default())
    }

    fn buffer_with_prices(prices: &[Decimal], now: DateTime<Utc>) -> SymbolBuffer {
        let mut buffer = SymbolBuffer::new("WDO", 1000);
        for price in prices {
            buffer.push_trade(Trade::new("WDO", now, TradeSide::Buy, *price, 10), now);
        }
        buffer
    }

    #[test]
    fn test_uptrend_classification() {
        let now = Utc::now();
        let prices: Vec<Decimal> = (0..20)
            .map(|i| dec!(5500.0) + Decimal::from(i) * dec!(0.5))
            .collect();
        let buffer = buffer_with_prices(&prices, now);

        let regime = detector().compute(&buffer, now);
        assert_eq!(regime.trend, TrendDirection::Up);
    }

    #[test]
    fn test_flat_prices_are_sideways_and_low_vol() {
        let now = Utc::now();
        let prices = vec![dec!(5500.0); 20];
        let buffer = buffer_with_prices(&prices, now);

        let regime = detector().compute(&buffer, now);
        assert_eq!(regime.trend, TrendDirection::Sideways);
        assert_eq!(regime.volatility, VolatilityBucket::Low);
    }

    #[test]
    fn test_wild_swings_read_extreme() {
        let now = Utc::now();
        let prices: Vec<Decimal> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    dec!(5500.0)
                } else {
                    dec!(5508.0)
                }
            })
            .collect();
        let buffer = buffer_with_prices(&prices, now);

        let regime = detector().compute(&buffer, now);
        assert_eq!(regime.volatility, VolatilityBucket::Extreme);
    }

    #[test]
    fn test_liquidity_from_book_depth() {
        let now = Utc::now();
        let mut buffer = SymbolBuffer::new("WDO", 100);
        buffer.set_book(
            BookSnapshot {
                symbol: "WDO".to_string(),
                timestamp: now,
                bids: vec![BookLevel { price: dec!(5499.5), volume: 100 }; 5],
                asks: vec![BookLevel { price: dec!(5500.0), volume: 60 }; 5],
            },
            now,
        );

        let regime = detector().compute(&buffer, now);
        assert_eq!(regime.liquidity_score, 80.0);
    }

    #[test]
    fn test_adjustments_follow_bucket() {
        let d = detector();
        assert_eq!(d.adjustment_for(VolatilityBucket::Extreme).size_multiplier, 0.6);
        assert_eq!(d.adjustment_for(VolatilityBucket::Low).stop_multiplier, 0.8);
    }
}
