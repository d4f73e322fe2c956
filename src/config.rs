use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::SetupKind;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub system: SystemConfig,
    pub position_management: PositionConfig,
    pub setup_timeouts: SetupTimeouts,
    pub tape_reading: TapeConfig,
    pub pattern_detection: PatternDetectionConfig,
    pub risk_management: RiskConfig,
    pub manipulation_detection: ManipulationConfig,
    pub market_regime: RegimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// The correlated contract pair, e.g. ["WDO", "DOL"]
    pub symbols: Vec<String>,
    /// Sweep interval in milliseconds
    pub update_interval_ms: u64,
    /// Feed silence before a symbol is declared stale
    pub stale_after_seconds: u64,
    /// Per-symbol ingest queue capacity (drop-oldest on overflow)
    pub queue_capacity: usize,
    /// How long terminal setups are kept for audit before GC
    pub terminal_grace_seconds: u64,
    /// Coincidence window for the cross-instrument confluence check
    pub confluence_window_seconds: u64,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            symbols: vec!["WDO".to_string(), "DOL".to_string()],
            update_interval_ms: 500,
            stale_after_seconds: 10,
            queue_capacity: 1024,
            terminal_grace_seconds: 60,
            confluence_window_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    /// Maximum concurrent open positions, system-wide
    pub max_positions: usize,
    /// Base entry size in contracts before volatility scaling
    pub default_size: u64,
    /// React to warnings with defensive stop/close actions
    pub auto_manage: bool,
    pub trailing_stop_enabled: bool,
    /// Trailing distance in points
    pub trailing_stop_distance: Decimal,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            max_positions: 3,
            default_size: 1,
            auto_manage: true,
            trailing_stop_enabled: false,
            trailing_stop_distance: dec!(10.0),
        }
    }
}

/// Per-kind setup deadlines in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupTimeouts {
    pub reversal_slow: u64,
    pub reversal_violent: u64,
    pub breakout_ignition: u64,
    pub pullback_rejection: u64,
    pub divergence_setup: u64,
}

impl SetupTimeouts {
    pub fn for_kind(&self, kind: SetupKind) -> u64 {
        match kind {
            SetupKind::ReversalSlow => self.reversal_slow,
            SetupKind::ReversalViolent => self.reversal_violent,
            SetupKind::BreakoutIgnition => self.breakout_ignition,
            SetupKind::PullbackRejection => self.pullback_rejection,
            SetupKind::DivergenceSetup => self.divergence_setup,
        }
    }
}

impl Default for SetupTimeouts {
    fn default() -> Self {
        Self {
            reversal_slow: 600,
            reversal_violent: 300,
            breakout_ignition: 900,
            pullback_rejection: 600,
            divergence_setup: 480,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TapeConfig {
    /// CVD rate-of-change magnitude that publishes a CvdUpdated event
    pub cvd_threshold: f64,
    /// Samples in the CVD rate-of-change window
    pub cvd_roc_period: usize,
    /// Minimum volume at one level for absorption
    pub absorption_threshold: u64,
    /// Share of total volume one level must concentrate for absorption
    pub concentration_threshold: f64,
    /// Minimum directional volume for momentum/pressure detection
    pub exhaustion_volume: u64,
    /// Directional volume imbalance ratio for momentum/pressure
    pub pressure_threshold: f64,
    pub iceberg_repetitions: usize,
    pub iceberg_min_volume: u64,
    /// Burst volume multiple over baseline for a volume spike
    pub spike_multiplier: f64,
    /// CVD ROC magnitude for a price/flow divergence
    pub divergence_threshold: f64,
    /// CVD ROC magnitude considered extreme (divergence_setup seed)
    pub extreme_threshold: f64,
    /// Rolling trade buffer size per symbol
    pub history_size: usize,
    /// Signal suppression window after a manipulation warning
    pub manipulation_grace_seconds: u64,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            cvd_threshold: 50.0,
            cvd_roc_period: 15,
            absorption_threshold: 282,
            concentration_threshold: 0.4,
            exhaustion_volume: 100,
            pressure_threshold: 0.75,
            iceberg_repetitions: 4,
            iceberg_min_volume: 59,
            spike_multiplier: 3.0,
            divergence_threshold: 209.0,
            extreme_threshold: 250.0,
            history_size: 1000,
            manipulation_grace_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatternDetectionConfig {
    pub pattern_cache: PatternCacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternCacheConfig {
    pub max_size: usize,
    pub ttl_seconds: u64,
}

impl Default for PatternCacheConfig {
    fn default() -> Self {
        Self {
            max_size: 256,
            ttl_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub max_signals_per_minute: usize,
    pub max_signals_per_hour: usize,
    /// Composite setup score required for approval
    pub signal_quality_threshold: f64,
    /// Consecutive losing positions before the breaker trips
    pub consecutive_losses_limit: u32,
    /// Drawdown percent from session peak before the breaker trips
    pub max_drawdown_percent: f64,
    /// Session loss (currency) that trips the breaker and caps aggregate open risk
    pub emergency_stop_loss: Decimal,
    /// Seconds the breaker stays open after a trip
    pub circuit_breaker_cooldown: u64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_signals_per_minute: 10,
            max_signals_per_hour: 100,
            signal_quality_threshold: 0.4,
            consecutive_losses_limit: 5,
            max_drawdown_percent: 2.0,
            emergency_stop_loss: dec!(1000),
            circuit_breaker_cooldown: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManipulationConfig {
    pub layering: LayeringConfig,
    pub spoofing: SpoofingConfig,
    pub actions: ManipulationActions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayeringConfig {
    /// Uniform levels on one side required to flag layering
    pub min_levels: usize,
    pub min_volume_per_level: u64,
    /// Max relative deviation from the mean for levels to count as uniform
    pub uniformity_threshold: f64,
}

impl Default for LayeringConfig {
    fn default() -> Self {
        Self {
            min_levels: 4,
            min_volume_per_level: 80,
            uniformity_threshold: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoofingConfig {
    /// Bid/ask volume ratio that flags spoofing
    pub imbalance_ratio: f64,
    pub levels_to_check: usize,
}

impl Default for SpoofingConfig {
    fn default() -> Self {
        Self {
            imbalance_ratio: 8.0,
            levels_to_check: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManipulationActions {
    /// Cancel in-flight pending/confirmed setups on the affected symbol
    pub block_signals: bool,
}

impl Default for ManipulationActions {
    fn default() -> Self {
        Self {
            block_signals: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    /// Seconds between regime recomputations
    pub update_interval_secs: u64,
    /// History window the classification looks back over, in seconds
    pub lookback_seconds: u64,
    /// Net drift in points separating a trend from sideways
    pub trend_threshold: Decimal,
    /// Volatility bucket upper bounds (stdev of trade-to-trade price deltas)
    pub volatility_low_max: f64,
    pub volatility_normal_max: f64,
    pub volatility_high_max: f64,
    pub volatility_adjustments: VolatilityAdjustments,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 5,
            lookback_seconds: 300,
            trend_threshold: dec!(3.0),
            volatility_low_max: 0.35,
            volatility_normal_max: 0.9,
            volatility_high_max: 2.0,
            volatility_adjustments: VolatilityAdjustments::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityAdjustments {
    pub low: VolatilityAdjustment,
    pub normal: VolatilityAdjustment,
    pub high: VolatilityAdjustment,
    pub extreme: VolatilityAdjustment,
}

impl Default for VolatilityAdjustments {
    fn default() -> Self {
        Self {
            low: VolatilityAdjustment {
                size_multiplier: 1.0,
                stop_multiplier: 0.8,
            },
            normal: VolatilityAdjustment {
                size_multiplier: 1.0,
                stop_multiplier: 1.0,
            },
            high: VolatilityAdjustment {
                size_multiplier: 0.8,
                stop_multiplier: 1.3,
            },
            extreme: VolatilityAdjustment {
                size_multiplier: 0.6,
                stop_multiplier: 1.5,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VolatilityAdjustment {
    pub size_multiplier: f64,
    pub stop_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for rotated log files and the structured record journal
    pub dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: "logs".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with built-in defaults so partial files are valid
            .add_source(Config::try_from(&Self::default_config())?)
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FLUXO_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FLUXO_SYSTEM__UPDATE_INTERVAL_MS, etc.)
            .add_source(
                Environment::with_prefix("FLUXO")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Built-in defaults, usable without any config file
    pub fn default_config() -> Self {
        Self {
            system: SystemConfig::default(),
            position_management: PositionConfig::default(),
            setup_timeouts: SetupTimeouts::default(),
            tape_reading: TapeConfig::default(),
            pattern_detection: PatternDetectionConfig::default(),
            risk_management: RiskConfig::default(),
            manipulation_detection: ManipulationConfig::default(),
            market_regime: RegimeConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.system.symbols.len() != 2 {
            errors.push(format!(
                "system.symbols must name exactly the two correlated contracts, got {}",
                self.system.symbols.len()
            ));
        }

        if self.system.queue_capacity == 0 {
            errors.push("system.queue_capacity must be positive".to_string());
        }

        if self.position_management.max_positions == 0 {
            errors.push("position_management.max_positions must be positive".to_string());
        }

        if self.position_management.default_size == 0 {
            errors.push("position_management.default_size must be positive".to_string());
        }

        let tape = &self.tape_reading;
        if !(0.0..=1.0).contains(&tape.concentration_threshold) {
            errors.push("tape_reading.concentration_threshold must be between 0 and 1".to_string());
        }
        if !(0.0..=1.0).contains(&tape.pressure_threshold) {
            errors.push("tape_reading.pressure_threshold must be between 0 and 1".to_string());
        }
        if tape.spike_multiplier <= 1.0 {
            errors.push("tape_reading.spike_multiplier must exceed 1".to_string());
        }
        if tape.extreme_threshold < tape.divergence_threshold {
            errors.push(
                "tape_reading.extreme_threshold must be at least divergence_threshold".to_string(),
            );
        }
        if tape.cvd_roc_period < 2 {
            errors.push("tape_reading.cvd_roc_period must be at least 2".to_string());
        }

        if self.pattern_detection.pattern_cache.max_size == 0 {
            errors.push("pattern_detection.pattern_cache.max_size must be positive".to_string());
        }

        let risk = &self.risk_management;
        if !(0.0..=1.0).contains(&risk.signal_quality_threshold) {
            errors.push(
                "risk_management.signal_quality_threshold must be between 0 and 1".to_string(),
            );
        }
        if risk.emergency_stop_loss <= Decimal::ZERO {
            errors.push("risk_management.emergency_stop_loss must be positive".to_string());
        }
        if risk.max_drawdown_percent <= 0.0 {
            errors.push("risk_management.max_drawdown_percent must be positive".to_string());
        }

        if self.manipulation_detection.spoofing.imbalance_ratio <= 1.0 {
            errors.push(
                "manipulation_detection.spoofing.imbalance_ratio must exceed 1".to_string(),
            );
        }
        if self.manipulation_detection.layering.min_levels < 2 {
            errors.push("manipulation_detection.layering.min_levels must be at least 2".to_string());
        }

        let regime = &self.market_regime;
        if !(regime.volatility_low_max < regime.volatility_normal_max
            && regime.volatility_normal_max < regime.volatility_high_max)
        {
            errors.push("market_regime volatility bucket bounds must be increasing".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = AppConfig::default_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default_config();
        config.system.symbols = vec!["WDO".to_string()];
        config.tape_reading.spike_multiplier = 0.5;
        config.risk_management.signal_quality_threshold = 1.5;

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_timeout_lookup() {
        let timeouts = SetupTimeouts::default();
        assert_eq!(timeouts.for_kind(SetupKind::ReversalViolent), 300);
        assert_eq!(timeouts.for_kind(SetupKind::BreakoutIgnition), 900);
    }
}
