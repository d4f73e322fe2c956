use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggressor side of an executed trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn opposite(&self) -> Self {
        match self {
            TradeSide::Buy => TradeSide::Sell,
            TradeSide::Sell => TradeSide::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade direction of a signal, setup or position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "LONG",
            Direction::Short => "SHORT",
        }
    }
}

impl From<TradeSide> for Direction {
    fn from(side: TradeSide) -> Self {
        match side {
            TradeSide::Buy => Direction::Long,
            TradeSide::Sell => Direction::Short,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single executed trade on the tape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub side: TradeSide,
    pub price: Decimal,
    pub volume: u64,
}

impl Trade {
    pub fn new(
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        side: TradeSide,
        price: Decimal,
        volume: u64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timestamp,
            side,
            price,
            volume,
        }
    }

    /// Volume signed by aggressor side (buy positive, sell negative)
    pub fn signed_volume(&self) -> i64 {
        match self.side {
            TradeSide::Buy => self.volume as i64,
            TradeSide::Sell => -(self.volume as i64),
        }
    }
}

/// One price level of the order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub volume: u64,
}

/// Depth snapshot for one symbol; superseded by the next snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl BookSnapshot {
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }

    /// Total bid volume across the first `levels` levels
    pub fn bid_volume(&self, levels: usize) -> u64 {
        self.bids.iter().take(levels).map(|l| l.volume).sum()
    }

    /// Total ask volume across the first `levels` levels
    pub fn ask_volume(&self, levels: usize) -> u64 {
        self.asks.iter().take(levels).map(|l| l.volume).sum()
    }
}

/// Raw event handed over by the market-data adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    Trade(Trade),
    Book(BookSnapshot),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Trade(t) => &t.symbol,
            MarketEvent::Book(b) => &b.symbol,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::Trade(t) => t.timestamp,
            MarketEvent::Book(b) => b.timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signed_volume() {
        let now = Utc::now();
        let buy = Trade::new("WDO", now, TradeSide::Buy, dec!(5500.0), 10);
        let sell = Trade::new("WDO", now, TradeSide::Sell, dec!(5500.0), 10);

        assert_eq!(buy.signed_volume(), 10);
        assert_eq!(sell.signed_volume(), -10);
    }

    #[test]
    fn test_book_helpers() {
        let book = BookSnapshot {
            symbol: "WDO".to_string(),
            timestamp: Utc::now(),
            bids: vec![
                BookLevel { price: dec!(5499.5), volume: 100 },
                BookLevel { price: dec!(5499.0), volume: 80 },
            ],
            asks: vec![
                BookLevel { price: dec!(5500.0), volume: 50 },
                BookLevel { price: dec!(5500.5), volume: 120 },
            ],
        };

        assert_eq!(book.best_bid(), Some(dec!(5499.5)));
        assert_eq!(book.best_ask(), Some(dec!(5500.0)));
        assert_eq!(book.mid_price(), Some(dec!(5499.75)));
        assert_eq!(book.bid_volume(2), 180);
        assert_eq!(book.ask_volume(1), 50);
    }
}
