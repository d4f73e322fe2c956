use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::Direction;

/// Tape-reading pattern kinds, one per detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Absorption,
    Momentum,
    Divergence,
    Pressure,
    VolumeSpike,
    Iceberg,
}

impl PatternKind {
    pub const ALL: [PatternKind; 6] = [
        PatternKind::Absorption,
        PatternKind::Momentum,
        PatternKind::Divergence,
        PatternKind::Pressure,
        PatternKind::VolumeSpike,
        PatternKind::Iceberg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::Absorption => "absorption",
            PatternKind::Momentum => "momentum",
            PatternKind::Divergence => "divergence",
            PatternKind::Pressure => "pressure",
            PatternKind::VolumeSpike => "volume_spike",
            PatternKind::Iceberg => "iceberg",
        }
    }
}

impl std::fmt::Display for PatternKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Observed quantities backing a tactical signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalEvidence {
    /// Price level the pattern anchors to, when it has one
    pub level: Option<Decimal>,
    /// Total volume involved in the pattern
    pub volume: u64,
    pub buy_volume: u64,
    pub sell_volume: u64,
    /// Pattern-specific ratio (concentration, imbalance, spike multiple)
    pub ratio: f64,
    pub cvd_roc: Option<f64>,
}

/// A short-horizon signal emitted by the tape reading service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TacticalSignal {
    pub id: Uuid,
    pub symbol: String,
    pub kind: PatternKind,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    /// Strength score in [0, 1]
    pub strength: f64,
    pub evidence: SignalEvidence,
}

impl TacticalSignal {
    pub fn new(
        symbol: impl Into<String>,
        kind: PatternKind,
        direction: Direction,
        timestamp: DateTime<Utc>,
        strength: f64,
        evidence: SignalEvidence,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            kind,
            direction,
            timestamp,
            strength: strength.clamp(0.0, 1.0),
            evidence,
        }
    }
}

/// Broadcast-only warning categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Divergence,
    Manipulation,
    RiskOverride,
    Position,
    DataStale,
    DataFault,
    Overflow,
}

impl WarningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningKind::Divergence => "divergence",
            WarningKind::Manipulation => "manipulation",
            WarningKind::RiskOverride => "risk_override",
            WarningKind::Position => "position",
            WarningKind::DataStale => "data_stale",
            WarningKind::DataFault => "data_fault",
            WarningKind::Overflow => "overflow",
        }
    }
}

impl std::fmt::Display for WarningKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Caution,
    Critical,
}

/// Immutable, broadcast-only warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub severity: Severity,
    pub symbol: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Warning {
    pub fn new(
        kind: WarningKind,
        severity: Severity,
        symbol: Option<String>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            severity,
            symbol,
            message: message.into(),
            timestamp,
        }
    }

    pub fn manipulation(symbol: &str, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::new(
            WarningKind::Manipulation,
            Severity::Caution,
            Some(symbol.to_string()),
            message,
            now,
        )
    }

    pub fn overflow(symbol: &str, dropped: u64, now: DateTime<Utc>) -> Self {
        Self::new(
            WarningKind::Overflow,
            Severity::Caution,
            Some(symbol.to_string()),
            format!("event queue full, dropped oldest ({dropped} dropped so far)"),
            now,
        )
    }

    pub fn data_stale(symbol: &str, silent_secs: u64, now: DateTime<Utc>) -> Self {
        Self::new(
            WarningKind::DataStale,
            Severity::Caution,
            Some(symbol.to_string()),
            format!("no market data for {silent_secs}s, pausing signal emission"),
            now,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_clamped() {
        let now = Utc::now();
        let s = TacticalSignal::new(
            "WDO",
            PatternKind::Momentum,
            Direction::Long,
            now,
            1.7,
            SignalEvidence::default(),
        );
        assert_eq!(s.strength, 1.0);

        let s = TacticalSignal::new(
            "WDO",
            PatternKind::Momentum,
            Direction::Long,
            now,
            -0.2,
            SignalEvidence::default(),
        );
        assert_eq!(s.strength, 0.0);
    }
}
