//! Configuration management for the purchase ledger
//!
//! Supports hierarchical configuration loading:
//! 1. Default values in code
//! 2. Configuration files (development.toml, production.toml)
//! 3. Environment variable overrides with LEDGER_ prefix

use std::time::Duration;

use chrono::Duration as ChronoDuration;
use config::{ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use shared::integrity::IntegrityLimits;
use shared::{DuplicatePolicy, SettlementPolicy, ValidationPolicy};

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Current environment (development, production)
    pub environment: String,

    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Delivery submission rules
    pub delivery: DeliveryConfig,

    /// Integrity audit limits
    pub integrity: IntegrityConfig,

    /// Correction run settings
    pub correction: CorrectionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server port
    pub port: u16,

    /// Server host
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// How far back recent deliveries are read for the duplicate guard
    pub duplicate_lookback_secs: i64,

    /// Age under which a near-identical delivery counts as a double submission
    pub duplicate_window_secs: i64,

    /// Amount difference tolerated when comparing against recent deliveries
    pub duplicate_amount_tolerance: Decimal,

    /// Tolerance between amount and remaining balance when items are settled
    pub settlement_tolerance: Decimal,

    /// `block` rejects settlement inconsistencies, `warn` records them with a warning
    pub settlement_policy: SettlementPolicy,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IntegrityConfig {
    /// Upper bound for a single check before it is reported as failed
    pub check_timeout_secs: u64,

    /// Sample rows attached to each finding
    pub sample_limit: usize,

    /// Stock difference below which a product is considered in sync
    pub stock_tolerance: Decimal,

    /// Age after which an unallocated delivery is reported as stuck
    pub in_progress_grace_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrectionConfig {
    /// Key of the PostgreSQL advisory lock held during a correction run
    pub advisory_lock_key: i64,
}

impl Config {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("LEDGER_ENVIRONMENT").unwrap_or_else(|_| "development".into());

        let config = config::Config::builder()
            // Start with default values
            .set_default("environment", environment.clone())?
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("delivery.duplicate_lookback_secs", 30)?
            .set_default("delivery.duplicate_window_secs", 10)?
            .set_default("delivery.duplicate_amount_tolerance", "1")?
            .set_default("delivery.settlement_tolerance", "5")?
            .set_default("delivery.settlement_policy", "block")?
            .set_default("integrity.check_timeout_secs", 30)?
            .set_default("integrity.sample_limit", 10)?
            .set_default("integrity.stock_tolerance", "0.001")?
            .set_default("integrity.in_progress_grace_secs", 300)?
            .set_default("correction.advisory_lock_key", 724_001)?
            // Load environment-specific config file
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // Override with environment variables (LEDGER_ prefix)
            .add_source(
                Environment::with_prefix("LEDGER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn validation_policy(&self) -> ValidationPolicy {
        ValidationPolicy {
            settlement_tolerance: self.delivery.settlement_tolerance,
            settlement_policy: self.delivery.settlement_policy,
        }
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        DuplicatePolicy {
            lookback: ChronoDuration::seconds(self.delivery.duplicate_lookback_secs),
            window: ChronoDuration::seconds(self.delivery.duplicate_window_secs),
            amount_tolerance: self.delivery.duplicate_amount_tolerance,
        }
    }

    pub fn integrity_limits(&self) -> IntegrityLimits {
        IntegrityLimits {
            sample_limit: self.integrity.sample_limit,
            stock_tolerance: self.integrity.stock_tolerance,
            in_progress_grace: ChronoDuration::seconds(self.integrity.in_progress_grace_secs),
        }
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.integrity.check_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "0.0.0.0".to_string(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let duplicate = DuplicatePolicy::default();
        let validation = ValidationPolicy::default();
        Self {
            duplicate_lookback_secs: duplicate.lookback.num_seconds(),
            duplicate_window_secs: duplicate.window.num_seconds(),
            duplicate_amount_tolerance: duplicate.amount_tolerance,
            settlement_tolerance: validation.settlement_tolerance,
            settlement_policy: validation.settlement_policy,
        }
    }
}

impl Default for IntegrityConfig {
    fn default() -> Self {
        let limits = IntegrityLimits::default();
        Self {
            check_timeout_secs: 30,
            sample_limit: limits.sample_limit,
            stock_tolerance: limits.stock_tolerance,
            in_progress_grace_secs: limits.in_progress_grace.num_seconds(),
        }
    }
}

/// Configuration with in-code defaults, for tests that never touch the environment
#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        environment: "test".to_string(),
        server: ServerConfig::default(),
        database: DatabaseConfig {
            url: "postgres://localhost/ledger_test".to_string(),
            max_connections: 1,
            min_connections: 1,
        },
        delivery: DeliveryConfig::default(),
        integrity: IntegrityConfig::default(),
        correction: CorrectionConfig {
            advisory_lock_key: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policies_match_ledger_defaults() {
        let config = test_config();
        assert_eq!(config.duplicate_policy(), DuplicatePolicy::default());
        assert_eq!(config.validation_policy(), ValidationPolicy::default());
        assert_eq!(config.integrity_limits().sample_limit, 10);
        assert_eq!(config.check_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_warn_policy_flows_into_validation() {
        let mut config = test_config();
        config.delivery.settlement_policy = SettlementPolicy::Warn;
        config.delivery.settlement_tolerance = Decimal::ZERO;
        let policy = config.validation_policy();
        assert_eq!(policy.settlement_policy, SettlementPolicy::Warn);
        assert_eq!(policy.settlement_tolerance, Decimal::ZERO);
    }
}
