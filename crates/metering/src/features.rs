//! Feature gate
//!
//! Boolean feature-access checks layered on the tier policy table and the
//! subscription lookup. Lookup failures degrade the tier to free: defaults
//! never escalate toward unlimited access.

use std::sync::Arc;
use std::time::Duration;

use appforge_shared::{available_features, has_feature, Tier};
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::error::{MeteringError, MeteringResult};
use crate::store::SubscriptionStore;
use crate::subscriptions::{derive_status, SubscriptionStatus};

#[derive(Clone)]
pub struct FeatureGate {
    store: Arc<dyn SubscriptionStore>,
    grace: Duration,
}

impl FeatureGate {
    pub fn new(store: Arc<dyn SubscriptionStore>, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Tier the user currently gets feature access for. No subscription,
    /// an effectively-expired one, or a failed lookup all read as free.
    pub async fn effective_tier(&self, user_id: Uuid) -> Tier {
        match self.store.find_for_user(user_id).await {
            Ok(Some(sub)) => {
                let status = derive_status(
                    sub.status,
                    sub.current_period_end,
                    OffsetDateTime::now_utc(),
                    self.grace,
                );
                if status == SubscriptionStatus::Expired {
                    Tier::Free
                } else {
                    sub.tier
                }
            }
            Ok(None) => Tier::Free,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Subscription lookup failed, defaulting to free tier");
                Tier::Free
            }
        }
    }

    /// Typed capability check for pre-handler guards. The denial is data
    /// (403-equivalent), not control flow.
    pub async fn require_feature(&self, user_id: Uuid, feature: &str) -> MeteringResult<()> {
        let tier = self.effective_tier(user_id).await;
        if has_feature(tier, feature) {
            Ok(())
        } else {
            Err(MeteringError::FeatureUnavailable {
                feature: feature.to_string(),
                tier,
            })
        }
    }

    pub async fn available_features(&self, user_id: Uuid) -> Vec<&'static str> {
        available_features(self.effective_tier(user_id).await)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::testing::{active_subscription, FakeSubscriptionStore};

    const GRACE: Duration = Duration::from_secs(3 * 24 * 3600);

    #[tokio::test]
    async fn grants_inherited_features_and_denies_missing_ones() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        store.insert_subscription(active_subscription(user, Tier::Business));
        let gate = FeatureGate::new(store, GRACE);

        // github_sync reaches business via the pro inheritance marker.
        gate.require_feature(user, "github_sync").await.unwrap();

        let err = gate.require_feature(user, "sso").await.unwrap_err();
        match err {
            MeteringError::FeatureUnavailable { feature, tier } => {
                assert_eq!(feature, "sso");
                assert_eq!(tier, Tier::Business);
            }
            other => panic!("expected FeatureUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_subscription_reads_as_free() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let gate = FeatureGate::new(store, GRACE);
        let user = Uuid::new_v4();

        assert_eq!(gate.effective_tier(user).await, Tier::Free);
        assert!(gate.require_feature(user, "github_sync").await.is_err());
    }

    #[tokio::test]
    async fn lookup_failure_defaults_to_free_not_unlimited() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        store.insert_subscription(active_subscription(user, Tier::Enterprise));
        store.fail_reads(true);
        let gate = FeatureGate::new(store, GRACE);

        assert_eq!(gate.effective_tier(user).await, Tier::Free);
    }

    #[tokio::test]
    async fn lapsed_subscription_loses_paid_features() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        let mut sub = active_subscription(user, Tier::Pro);
        sub.current_period_end = Some(OffsetDateTime::now_utc() - time::Duration::days(10));
        store.insert_subscription(sub);
        let gate = FeatureGate::new(store, GRACE);

        assert_eq!(gate.effective_tier(user).await, Tier::Free);
        assert!(gate.require_feature(user, "github_sync").await.is_err());
    }
}
