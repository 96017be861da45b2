// Metering crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::result_large_err)] // MeteringError carries structured denial data
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! AppForge Metering Engine
//!
//! Tier-based usage enforcement and subscription lifecycle management.
//!
//! ## Features
//!
//! - **Subscription Lifecycle**: Create, prorated upgrade, scheduled
//!   downgrade, cancel with grace period, reactivate, renew, expire
//! - **Quota Enforcement**: Burst rate limit plus absolute monthly quota,
//!   backed by atomic counters; fails open when the backend is unreachable
//! - **Usage Ledger**: Durable per-user daily metrics for analytics and
//!   billing, decoupled from enforcement
//! - **Feature Gating**: Tier feature lists with one-hop inheritance
//! - **BYOK Override**: Users on their own provider credentials bypass AI
//!   enforcement, with usage still recorded
//! - **Usage Warnings**: Deduplicated threshold notifications and realtime
//!   snapshot pushes

pub mod byok;
pub mod config;
pub mod counters;
pub mod error;
pub mod facade;
pub mod features;
pub mod notify;
pub mod quota;
pub mod store;
pub mod subscriptions;
pub mod usage;
pub mod warnings;

#[cfg(test)]
pub(crate) mod testing;

// BYOK
pub use byok::ByokOverride;

// Config
pub use config::EnforcementConfig;

// Counters
pub use counters::{counter_key, CounterStore, IncrementOutcome};

// Error
pub use error::{MeteringError, MeteringResult, QuotaDenial};

// Facade
pub use facade::{CheckOutcome, EnforcementFacade, GenerationUsage};

// Features
pub use features::FeatureGate;

// Notifications
pub use notify::{
    HttpPushChannel, NoopChannel, NotificationChannel, OperationUsage, UsageSnapshot, WarningEvent,
    WarningKind,
};

// Quota
pub use quota::{MonthlyUsage, QuotaDecision, QuotaEnforcer};

// Store
pub use store::{PgSubscriptionStore, SubscriptionStore};

// Subscriptions
pub use subscriptions::{
    derive_status, plan_downgrade, prorated_upgrade_cents, ScheduledDowngrade,
    SubscriptionRecord, SubscriptionService, SubscriptionStatus, SweepSummary, UpgradeOutcome,
};

// Usage
pub use usage::{DailyUsage, UsageEvent, UsageLedger, UsageRecorder, UsageTotals};

// Warnings
pub use warnings::{WarningBroadcaster, WARNING_THRESHOLDS};

use std::sync::Arc;

use sqlx::PgPool;

/// Main metering service that combines all enforcement functionality.
pub struct MeteringService {
    pub subscriptions: SubscriptionService,
    pub quota: QuotaEnforcer,
    pub usage: UsageRecorder,
    pub features: FeatureGate,
    pub byok: ByokOverride,
    pub warnings: WarningBroadcaster,
    pub enforcement: EnforcementFacade,
}

impl MeteringService {
    /// Wire every component from config. Uses Redis counters when
    /// `REDIS_URL` is configured, in-memory counters otherwise.
    pub async fn from_config(config: &EnforcementConfig, pool: PgPool) -> MeteringResult<Self> {
        let counters = match &config.redis_url {
            Some(url) => CounterStore::connect_redis(url, config.outbound_timeout).await?,
            None => {
                tracing::warn!("REDIS_URL not set - using in-memory counters (single node only)");
                CounterStore::new_in_memory()
            }
        };

        let channel: Arc<dyn NotificationChannel> = match &config.realtime_push_url {
            Some(url) => Arc::new(HttpPushChannel::new(url.clone(), config.outbound_timeout)),
            None => Arc::new(NoopChannel),
        };

        Ok(Self::assemble(
            pool,
            counters,
            channel,
            config.analytics_sink_url.clone(),
            config.grace_period,
            config.billing_cycle,
        ))
    }

    /// Wire with explicit backends. Useful for embedding and tests.
    pub fn assemble(
        pool: PgPool,
        counters: CounterStore,
        channel: Arc<dyn NotificationChannel>,
        analytics_sink_url: Option<String>,
        grace: std::time::Duration,
        cycle: std::time::Duration,
    ) -> Self {
        let store: Arc<dyn SubscriptionStore> = Arc::new(PgSubscriptionStore::new(pool.clone()));
        let subscriptions = SubscriptionService::new(pool.clone(), grace, cycle);
        let quota = QuotaEnforcer::new(counters.clone(), store.clone(), cycle);
        let usage = UsageRecorder::new(pool, analytics_sink_url);
        let features = FeatureGate::new(store.clone(), grace);
        let byok = ByokOverride::new(store.clone(), grace);
        let warnings = WarningBroadcaster::new(counters, channel, cycle);
        let enforcement = EnforcementFacade::new(
            store,
            quota.clone(),
            byok.clone(),
            warnings.clone(),
            Arc::new(usage.clone()),
            grace,
        );

        Self {
            subscriptions,
            quota,
            usage,
            features,
            byok,
            warnings,
            enforcement,
        }
    }
}
