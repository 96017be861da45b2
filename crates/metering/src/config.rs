//! Engine configuration
//!
//! Read once from the environment at startup; everything downstream receives
//! an explicit handle instead of reaching into `std::env`.

use std::time::Duration;

use crate::error::{MeteringError, MeteringResult};

/// Configuration for the enforcement engine.
#[derive(Debug, Clone)]
pub struct EnforcementConfig {
    pub database_url: String,
    /// Redis connection string for the counter backend. None = in-memory
    /// counters (single-node deployments and tests).
    pub redis_url: Option<String>,
    /// Analytics sink endpoint for usage events. None disables forwarding.
    pub analytics_sink_url: Option<String>,
    /// Realtime push endpoint for usage snapshots and warnings.
    pub realtime_push_url: Option<String>,
    /// Post-expiration window where status reads past_due instead of expired.
    pub grace_period: Duration,
    /// Billing cycle length; also the monthly quota window.
    pub billing_cycle: Duration,
    /// Ceiling for every outbound dependency call (counters, push).
    pub outbound_timeout: Duration,
}

impl EnforcementConfig {
    pub fn from_env() -> MeteringResult<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| MeteringError::Config("DATABASE_URL must be set".to_string()))?;

        let grace_days = env_parse("GRACE_PERIOD_DAYS", 3)?;
        let cycle_days = env_parse("BILLING_CYCLE_DAYS", 30)?;
        let timeout_ms = env_parse("OUTBOUND_TIMEOUT_MS", 3_000)?;

        Ok(Self {
            database_url,
            redis_url: std::env::var("REDIS_URL").ok(),
            analytics_sink_url: std::env::var("ANALYTICS_SINK_URL").ok(),
            realtime_push_url: std::env::var("REALTIME_PUSH_URL").ok(),
            grace_period: Duration::from_secs(grace_days * 24 * 3600),
            billing_cycle: Duration::from_secs(cycle_days * 24 * 3600),
            outbound_timeout: Duration::from_millis(timeout_ms),
        })
    }

    /// Defaults suitable for tests: in-memory counters, no outbound endpoints.
    pub fn for_tests(database_url: &str) -> Self {
        Self {
            database_url: database_url.to_string(),
            redis_url: None,
            analytics_sink_url: None,
            realtime_push_url: None,
            grace_period: Duration::from_secs(3 * 24 * 3600),
            billing_cycle: Duration::from_secs(30 * 24 * 3600),
            outbound_timeout: Duration::from_millis(500),
        }
    }
}

fn env_parse(key: &str, default: u64) -> MeteringResult<u64> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<u64>()
            .map_err(|_| MeteringError::Config(format!("{key} must be a positive integer"))),
        Err(_) => Ok(default),
    }
}
