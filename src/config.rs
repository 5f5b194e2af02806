//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::jobs::JobSchedulerConfig;
use crate::policy::{LimitKind, PolicyConfig};

/// Accepted `PENDING_EXPIRY_HOURS` (one year at most)
pub const PENDING_EXPIRY_HOURS_RANGE: RangeInclusive<i64> = 1..=8_760;
/// Accepted scheduler intervals, in seconds
pub const JOB_INTERVAL_SECS_RANGE: RangeInclusive<u64> = 1..=86_400;
/// Accepted `RECONCILE_AFTER_SECS` (one week at most)
pub const RECONCILE_AFTER_SECS_RANGE: RangeInclusive<i64> = 0..=604_800;
/// Accepted `GATEWAY_TIMEOUT_SECS`
pub const GATEWAY_TIMEOUT_SECS_RANGE: RangeInclusive<u64> = 1..=300;

/// Settings the transaction engine is constructed with
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Limits and fees
    pub policy: PolicyConfig,

    /// Age after which a PENDING row is cancelled by the expiry sweep
    pub pending_expiry: chrono::Duration,

    /// Upper bound on a single settlement gateway call
    pub gateway_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            pending_expiry: chrono::Duration::hours(24),
            gateway_timeout: Duration::from_secs(30),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Environment (development, production)
    pub environment: String,

    pub engine: EngineConfig,

    pub scheduler: JobSchedulerConfig,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections =
            parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?;

        let environment = lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string());

        let pending_expiry_hours = parse_in_range(
            &lookup,
            "PENDING_EXPIRY_HOURS",
            24i64,
            PENDING_EXPIRY_HOURS_RANGE,
        )?;
        let gateway_timeout_secs = parse_in_range(
            &lookup,
            "GATEWAY_TIMEOUT_SECS",
            30u64,
            GATEWAY_TIMEOUT_SECS_RANGE,
        )?;

        let mut policy = PolicyConfig::default();
        for kind in LimitKind::ALL {
            let limit = policy.limits.limit_mut(kind);
            let key = kind.env_key();

            let min_key = format!("LIMIT_{}_MIN", key);
            if let Some(min) = parse_opt::<i64>(&lookup, &min_key)? {
                limit.min = min;
            }
            let max_key = format!("LIMIT_{}_MAX", key);
            if let Some(max) = parse_opt::<i64>(&lookup, &max_key)? {
                limit.max = max;
            }
            let daily_key = format!("LIMIT_{}_DAILY", key);
            if let Some(daily) = parse_opt::<i64>(&lookup, &daily_key)? {
                // 0 disables the cap
                limit.daily_cap = (daily > 0).then_some(daily);
            }

            if limit.min <= 0 || limit.min > limit.max {
                return Err(ConfigError::InvalidValue(format!("LIMIT_{}_MIN", key)));
            }
        }

        let expiry_interval_secs = parse_in_range(
            &lookup,
            "EXPIRY_SWEEP_INTERVAL_SECS",
            300u64,
            JOB_INTERVAL_SECS_RANGE,
        )?;
        let reconcile_interval_secs = parse_in_range(
            &lookup,
            "RECONCILE_INTERVAL_SECS",
            60u64,
            JOB_INTERVAL_SECS_RANGE,
        )?;
        let reconcile_after_secs = parse_in_range(
            &lookup,
            "RECONCILE_AFTER_SECS",
            900i64,
            RECONCILE_AFTER_SECS_RANGE,
        )?;
        let scheduler = JobSchedulerConfig {
            expiry_interval: Duration::from_secs(expiry_interval_secs),
            reconcile_interval: Duration::from_secs(reconcile_interval_secs),
            reconcile_after: chrono::Duration::seconds(reconcile_after_secs),
        };

        Ok(Self {
            database_url,
            database_max_connections,
            environment,
            engine: EngineConfig {
                policy,
                pending_expiry: chrono::Duration::hours(pending_expiry_hours),
                gateway_timeout: Duration::from_secs(gateway_timeout_secs),
            },
            scheduler,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_opt<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn parse_in_range<T: std::str::FromStr + PartialOrd>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError> {
    let value = parse_or(lookup, key, default)?;
    if !range.contains(&value) {
        return Err(ConfigError::InvalidValue(key.to_string()));
    }
    Ok(value)
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}
