//! Quota enforcement
//!
//! Two independently-evaluated, jointly-required layers per metered
//! operation:
//!
//! - Rate layer: a short fixed window per (operation, user) that smooths
//!   bursts.
//! - Monthly layer: the absolute ceiling over the billing cycle. App
//!   creation is the exception: it counts rows in the apps table so the
//!   check reflects true historical count and deletions, not a decaying
//!   counter.
//!
//! Failure policy is deliberate: when the counter backend is unreachable,
//! every check returns allowed and logs at error level. Availability wins
//! over strict enforcement.

use std::sync::Arc;
use std::time::Duration;

use appforge_shared::{
    is_unlimited, monthly_limit_for, next_tier_up, rate_limit_for, MeteredOperation, Tier,
};
use tracing::{debug, error};
use uuid::Uuid;

use crate::counters::{counter_key, CounterStore};
use crate::error::QuotaDenial;
use crate::store::SubscriptionStore;

/// Outcome of a quota check. Denials are data, not errors.
#[derive(Debug, Clone)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub denial: Option<QuotaDenial>,
}

impl QuotaDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            denial: None,
        }
    }

    fn denied(denial: QuotaDenial) -> Self {
        Self {
            allowed: false,
            denial: Some(denial),
        }
    }
}

/// Monthly usage after tracking, for warning evaluation.
#[derive(Debug, Clone, Copy)]
pub struct MonthlyUsage {
    pub current: i64,
    pub limit: i64,
}

/// Composes the rate and monthly layers over the counter store.
#[derive(Clone)]
pub struct QuotaEnforcer {
    counters: CounterStore,
    store: Arc<dyn SubscriptionStore>,
    cycle: Duration,
}

impl QuotaEnforcer {
    pub fn new(counters: CounterStore, store: Arc<dyn SubscriptionStore>, cycle: Duration) -> Self {
        Self {
            counters,
            store,
            cycle,
        }
    }

    /// Non-consuming check: allowed only if both layers have headroom.
    /// Infrastructure failures resolve to allowed (fail-open).
    pub async fn check(
        &self,
        user_id: Uuid,
        tier: Tier,
        operation: MeteredOperation,
    ) -> QuotaDecision {
        // Rate layer
        let rate = rate_limit_for(tier, operation);
        if !is_unlimited(rate.limit) {
            let key = counter_key("rate", user_id, operation.as_str());
            match self
                .counters
                .get_remaining(&key, rate.limit, Duration::from_secs(rate.window_secs))
                .await
            {
                Ok(remaining) if remaining <= 0 => {
                    return QuotaDecision::denied(QuotaDenial {
                        operation,
                        current: rate.limit,
                        limit: rate.limit,
                        tier,
                        layer: "rate",
                        suggested_tier: next_tier_up(tier),
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    error!(user_id = %user_id, operation = %operation, error = %e, "Counter backend unreachable, failing open on rate check");
                    return QuotaDecision::allowed();
                }
            }
        }

        // Monthly layer
        let limit = monthly_limit_for(tier, operation);
        if is_unlimited(limit) {
            return QuotaDecision::allowed();
        }
        let current = match self.monthly_current(user_id, operation, limit).await {
            Ok(current) => current,
            Err(e) => {
                error!(user_id = %user_id, operation = %operation, error = %e, "Monthly usage lookup failed, failing open");
                return QuotaDecision::allowed();
            }
        };
        if current >= limit {
            return QuotaDecision::denied(QuotaDenial {
                operation,
                current,
                limit,
                tier,
                layer: "monthly",
                suggested_tier: next_tier_up(tier),
            });
        }
        QuotaDecision::allowed()
    }

    /// Consume after a successful action: increment both layers atomically.
    /// Returns the post-increment monthly usage for warning evaluation, or
    /// None if it could not be determined. Never fails the caller.
    pub async fn track(
        &self,
        user_id: Uuid,
        tier: Tier,
        operation: MeteredOperation,
        amount: i64,
    ) -> Option<MonthlyUsage> {
        let rate = rate_limit_for(tier, operation);
        if !is_unlimited(rate.limit) {
            let key = counter_key("rate", user_id, operation.as_str());
            if let Err(e) = self
                .counters
                .increment(&key, rate.limit, Duration::from_secs(rate.window_secs), amount)
                .await
            {
                error!(user_id = %user_id, operation = %operation, error = %e, "Failed to track rate usage");
            }
        }

        let limit = monthly_limit_for(tier, operation);
        if is_unlimited(limit) {
            return None;
        }

        if operation == MeteredOperation::AppCreation {
            // The apps table is authoritative; the row was already inserted
            // by the caller, so the count reflects this action.
            return match self.store.app_count(user_id).await {
                Ok(current) => Some(MonthlyUsage { current, limit }),
                Err(e) => {
                    error!(user_id = %user_id, error = %e, "Failed to read app count after creation");
                    None
                }
            };
        }

        let key = counter_key("monthly", user_id, operation.as_str());
        match self.counters.increment(&key, limit, self.cycle, amount).await {
            Ok(outcome) => {
                if !outcome.success {
                    // The action already ran; the ceiling just means a racing
                    // request consumed the last slot. Counter stays at limit.
                    debug!(user_id = %user_id, operation = %operation, "Monthly counter already at limit while tracking");
                }
                Some(MonthlyUsage {
                    current: limit - outcome.remaining,
                    limit,
                })
            }
            Err(e) => {
                error!(user_id = %user_id, operation = %operation, error = %e, "Failed to track monthly usage");
                None
            }
        }
    }

    /// Current monthly usage without consuming, for snapshot pushes.
    /// None for unlimited limits or when the backend is unreachable.
    pub async fn monthly_usage(
        &self,
        user_id: Uuid,
        tier: Tier,
        operation: MeteredOperation,
    ) -> Option<MonthlyUsage> {
        let limit = monthly_limit_for(tier, operation);
        if is_unlimited(limit) {
            return None;
        }
        match self.monthly_current(user_id, operation, limit).await {
            Ok(current) => Some(MonthlyUsage { current, limit }),
            Err(e) => {
                error!(user_id = %user_id, operation = %operation, error = %e, "Monthly usage lookup failed");
                None
            }
        }
    }

    async fn monthly_current(
        &self,
        user_id: Uuid,
        operation: MeteredOperation,
        limit: i64,
    ) -> crate::error::MeteringResult<i64> {
        if operation == MeteredOperation::AppCreation {
            return self.store.app_count(user_id).await;
        }
        let key = counter_key("monthly", user_id, operation.as_str());
        let remaining = self.counters.get_remaining(&key, limit, self.cycle).await?;
        Ok(limit - remaining)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::testing::FakeSubscriptionStore;

    fn enforcer(store: Arc<FakeSubscriptionStore>) -> QuotaEnforcer {
        QuotaEnforcer::new(
            CounterStore::new_in_memory(),
            store,
            Duration::from_secs(30 * 24 * 3600),
        )
    }

    #[tokio::test]
    async fn allows_until_rate_limit_then_denies_with_rate_layer() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let quota = enforcer(store);
        let user = Uuid::new_v4();

        // Free tier: 3 AI generations per minute.
        for _ in 0..3 {
            let decision = quota
                .check(user, Tier::Free, MeteredOperation::AiGeneration)
                .await;
            assert!(decision.allowed);
            quota
                .track(user, Tier::Free, MeteredOperation::AiGeneration, 1)
                .await;
        }

        let decision = quota
            .check(user, Tier::Free, MeteredOperation::AiGeneration)
            .await;
        assert!(!decision.allowed);
        let denial = decision.denial.unwrap();
        assert_eq!(denial.layer, "rate");
        assert_eq!(denial.tier, Tier::Free);
        assert_eq!(denial.suggested_tier, Tier::Byok);
    }

    #[tokio::test]
    async fn enterprise_tier_short_circuits_both_layers() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let quota = enforcer(store);
        let user = Uuid::new_v4();

        for _ in 0..500 {
            let decision = quota
                .check(user, Tier::Enterprise, MeteredOperation::AiGeneration)
                .await;
            assert!(decision.allowed);
            quota
                .track(user, Tier::Enterprise, MeteredOperation::AiGeneration, 1)
                .await;
        }
    }

    #[tokio::test]
    async fn app_creation_counts_the_apps_table_not_a_counter() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        // Free tier allows 3 apps; user already has 3.
        store.set_app_count(user, 3);
        let quota = enforcer(store.clone());

        let decision = quota
            .check(user, Tier::Free, MeteredOperation::AppCreation)
            .await;
        assert!(!decision.allowed);
        let denial = decision.denial.unwrap();
        assert_eq!(denial.layer, "monthly");
        assert_eq!(denial.current, 3);

        // Deleting an app frees the slot immediately.
        store.set_app_count(user, 2);
        let decision = quota
            .check(user, Tier::Free, MeteredOperation::AppCreation)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn infra_failure_fails_open() {
        let store = Arc::new(FakeSubscriptionStore::default());
        store.fail_reads(true);
        let quota = enforcer(store);
        let user = Uuid::new_v4();

        // App count lookup fails; check must still allow.
        let decision = quota
            .check(user, Tier::Free, MeteredOperation::AppCreation)
            .await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn track_reports_post_increment_monthly_usage() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let quota = enforcer(store);
        let user = Uuid::new_v4();

        let usage = quota
            .track(user, Tier::Free, MeteredOperation::WorkflowExecution, 1)
            .await
            .unwrap();
        assert_eq!(usage.current, 1);
        assert_eq!(usage.limit, 100);
    }
}
