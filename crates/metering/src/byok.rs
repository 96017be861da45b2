//! BYOK override
//!
//! Users on the BYOK tier run AI generations against their own upstream
//! provider credentials, so the platform's AI rate and quota layers are
//! bypassed for them. Usage is still recorded, tagged byok=true. A BYOK user
//! with no credentials on file is a configuration error surfaced to the
//! caller, never a silent "no limit".

use std::sync::Arc;
use std::time::Duration;

use appforge_shared::Tier;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::error::{MeteringError, MeteringResult};
use crate::store::SubscriptionStore;
use crate::subscriptions::{derive_status, SubscriptionRecord, SubscriptionStatus};

#[derive(Clone)]
pub struct ByokOverride {
    store: Arc<dyn SubscriptionStore>,
    grace: Duration,
}

impl ByokOverride {
    pub fn new(store: Arc<dyn SubscriptionStore>, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Whether this subscription exempts the user from AI enforcement:
    /// tier is byok and the subscription is effectively active.
    pub fn applies_to(&self, sub: &SubscriptionRecord) -> bool {
        sub.tier == Tier::Byok
            && derive_status(
                sub.status,
                sub.current_period_end,
                OffsetDateTime::now_utc(),
                self.grace,
            ) == SubscriptionStatus::Active
    }

    /// Convenience lookup form of [`applies_to`](Self::applies_to). A failed
    /// lookup reads as no exemption so the regular (fail-open) enforcement
    /// path decides.
    pub async fn should_use_user_keys(&self, user_id: Uuid) -> bool {
        match self.store.find_for_user(user_id).await {
            Ok(Some(sub)) => self.applies_to(&sub),
            Ok(None) => false,
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Subscription lookup failed during BYOK check");
                false
            }
        }
    }

    /// An exempted user must have provider credentials configured.
    /// A failed existence check fails open: generation proceeds on the
    /// user's keys and the upstream call surfaces any real problem.
    pub async fn verify_credentials(&self, user_id: Uuid) -> MeteringResult<()> {
        match self.store.byok_credentials_configured(user_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MeteringError::MissingByokCredentials(user_id)),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Credential lookup failed, proceeding with user keys");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::testing::{active_subscription, FakeSubscriptionStore};

    const GRACE: Duration = Duration::from_secs(3 * 24 * 3600);

    #[tokio::test]
    async fn active_byok_subscription_is_exempt() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        store.insert_subscription(active_subscription(user, Tier::Byok));
        let byok = ByokOverride::new(store, GRACE);

        assert!(byok.should_use_user_keys(user).await);
    }

    #[tokio::test]
    async fn other_tiers_and_lapsed_byok_are_not_exempt() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let pro_user = Uuid::new_v4();
        store.insert_subscription(active_subscription(pro_user, Tier::Pro));

        let lapsed_user = Uuid::new_v4();
        let mut lapsed = active_subscription(lapsed_user, Tier::Byok);
        lapsed.current_period_end = Some(OffsetDateTime::now_utc() - time::Duration::days(10));
        store.insert_subscription(lapsed);

        let byok = ByokOverride::new(store, GRACE);
        assert!(!byok.should_use_user_keys(pro_user).await);
        assert!(!byok.should_use_user_keys(lapsed_user).await);
    }

    #[tokio::test]
    async fn missing_credentials_is_a_configuration_error() {
        let store = Arc::new(FakeSubscriptionStore::default());
        let user = Uuid::new_v4();
        store.insert_subscription(active_subscription(user, Tier::Byok));
        let byok = ByokOverride::new(store.clone(), GRACE);

        let err = byok.verify_credentials(user).await.unwrap_err();
        assert!(matches!(err, MeteringError::MissingByokCredentials(id) if id == user));

        store.set_credentials_configured(user, true);
        byok.verify_credentials(user).await.unwrap();
    }
}
