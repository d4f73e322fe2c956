use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum FluxoError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Data-path errors
    #[error("Malformed market data: {0}")]
    DataFault(String),

    #[error("Stale feed for {symbol}: no update for {silent_secs}s")]
    DataStale { symbol: String, silent_secs: u64 },

    #[error("Detector {detector} failed for {symbol}: {reason}")]
    DetectorFault {
        detector: String,
        symbol: String,
        reason: String,
    },

    #[error("Queue overflow for {symbol}: dropped {dropped} events")]
    CapacityFault { symbol: String, dropped: u64 },

    // Setup lifecycle errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Setup not found: {0}")]
    SetupNotFound(uuid::Uuid),

    // Risk management errors
    #[error("Risk breach: {0}")]
    RiskBreach(String),

    // Position bookkeeping
    #[error("Position bookkeeping integrity violated: {0}")]
    PositionIntegrity(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for FluxoError
pub type Result<T> = std::result::Result<T, FluxoError>;

/// Specific error types for the risk gate
#[derive(Error, Debug, Clone)]
pub enum RiskError {
    #[error("Rate limit hit: {count} approvals in the last {window} (max {limit})")]
    RateLimited {
        window: &'static str,
        count: usize,
        limit: usize,
    },

    #[error("Signal quality {score:.2} below threshold {threshold:.2}")]
    QualityBelowThreshold { score: f64, threshold: f64 },

    #[error("Circuit breaker open, {remaining_secs}s until cooldown elapses")]
    BreakerOpen { remaining_secs: u64 },

    #[error("Aggregate open risk {current} + {requested} would exceed emergency stop {limit}")]
    AggregateRiskExceeded {
        current: rust_decimal::Decimal,
        requested: rust_decimal::Decimal,
        limit: rust_decimal::Decimal,
    },
}

impl From<RiskError> for FluxoError {
    fn from(err: RiskError) -> Self {
        FluxoError::RiskBreach(err.to_string())
    }
}
