//! Enforcement facade
//!
//! The two-phase contract request handlers program against: a `check_*`
//! call before the metered action, and a `track_*` call only after the
//! action succeeded. Keeping them separate (not one wrapper) means failed
//! attempts never consume quota. Tracking increments both enforcement
//! layers, records the usage ledger, evaluates warning bands, and pushes a
//! realtime snapshot.

use std::sync::Arc;
use std::time::Duration;

use appforge_shared::{is_unlimited, monthly_limit_for, MeteredOperation, Tier, UNLIMITED};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::byok::ByokOverride;
use crate::error::{MeteringResult, QuotaDenial};
use crate::notify::{OperationUsage, UsageSnapshot};
use crate::quota::QuotaEnforcer;
use crate::store::SubscriptionStore;
use crate::subscriptions::{derive_status, SubscriptionRecord, SubscriptionStatus};
use crate::usage::{UsageEvent, UsageLedger};
use crate::warnings::WarningBroadcaster;

/// Result of a pre-action check. Denials are data for the caller to return
/// to the user (402-equivalent), not errors.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub allowed: bool,
    /// The action should run on the user's own provider credentials.
    pub use_byok: bool,
    pub denial: Option<QuotaDenial>,
}

impl CheckOutcome {
    fn allowed() -> Self {
        Self {
            allowed: true,
            use_byok: false,
            denial: None,
        }
    }

    fn byok() -> Self {
        Self {
            allowed: true,
            use_byok: true,
            denial: None,
        }
    }
}

/// Post-action details for AI generation tracking.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationUsage {
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
}

#[derive(Clone)]
pub struct EnforcementFacade {
    store: Arc<dyn SubscriptionStore>,
    quota: QuotaEnforcer,
    byok: ByokOverride,
    warnings: WarningBroadcaster,
    ledger: Arc<dyn UsageLedger>,
    grace: Duration,
}

impl EnforcementFacade {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        quota: QuotaEnforcer,
        byok: ByokOverride,
        warnings: WarningBroadcaster,
        ledger: Arc<dyn UsageLedger>,
        grace: Duration,
    ) -> Self {
        Self {
            store,
            quota,
            byok,
            warnings,
            ledger,
            grace,
        }
    }

    /// Gate an AI generation. BYOK-exempt users are allowed unconditionally
    /// (after a credential configuration check); everyone else goes through
    /// both quota layers.
    pub async fn check_ai_generation_allowed(&self, user_id: Uuid) -> MeteringResult<CheckOutcome> {
        let sub = match self.lookup(user_id).await {
            Ok(sub) => sub,
            Err(()) => return Ok(CheckOutcome::allowed()), // fail-open
        };

        if let Some(sub) = &sub {
            if self.byok.applies_to(sub) {
                self.byok.verify_credentials(user_id).await?;
                return Ok(CheckOutcome::byok());
            }
        }

        let tier = self.effective_tier(sub.as_ref());
        let decision = self
            .quota
            .check(user_id, tier, MeteredOperation::AiGeneration)
            .await;
        Ok(CheckOutcome {
            allowed: decision.allowed,
            use_byok: false,
            denial: decision.denial,
        })
    }

    /// Consume after a successful AI generation. BYOK usage bypasses the
    /// enforcement layers but still lands in the ledger, tagged byok=true.
    pub async fn track_ai_generation(&self, user_id: Uuid, generation: GenerationUsage) {
        let sub = self.lookup(user_id).await.ok().flatten();
        let byok = sub.as_ref().is_some_and(|s| self.byok.applies_to(s));
        let tier = self.effective_tier(sub.as_ref());

        let mut event = UsageEvent::new(user_id, MeteredOperation::AiGeneration);
        event.tokens_used = generation.tokens_used;
        event.estimated_cost_cents = generation.estimated_cost_cents;
        event.byok = byok;
        self.record(event);

        if !byok {
            if let Some(usage) = self
                .quota
                .track(user_id, tier, MeteredOperation::AiGeneration, 1)
                .await
            {
                self.warnings
                    .evaluate(user_id, tier, MeteredOperation::AiGeneration, usage)
                    .await;
            }
        }
        self.push_snapshot(user_id, tier).await;
    }

    /// Gate app creation. Always enforced against the apps table, BYOK or
    /// not; the exemption covers AI generation only.
    pub async fn check_app_creation_allowed(&self, user_id: Uuid) -> MeteringResult<CheckOutcome> {
        self.check_plain(user_id, MeteredOperation::AppCreation).await
    }

    /// Consume after the app row has been inserted.
    pub async fn track_app_creation(&self, user_id: Uuid) {
        self.track_plain(user_id, MeteredOperation::AppCreation).await;
    }

    pub async fn check_workflow_execution_allowed(
        &self,
        user_id: Uuid,
    ) -> MeteringResult<CheckOutcome> {
        self.check_plain(user_id, MeteredOperation::WorkflowExecution)
            .await
    }

    pub async fn track_workflow_execution(&self, user_id: Uuid) {
        self.track_plain(user_id, MeteredOperation::WorkflowExecution)
            .await;
    }

    async fn check_plain(
        &self,
        user_id: Uuid,
        operation: MeteredOperation,
    ) -> MeteringResult<CheckOutcome> {
        let sub = match self.lookup(user_id).await {
            Ok(sub) => sub,
            Err(()) => return Ok(CheckOutcome::allowed()),
        };
        let tier = self.effective_tier(sub.as_ref());
        let decision = self.quota.check(user_id, tier, operation).await;
        Ok(CheckOutcome {
            allowed: decision.allowed,
            use_byok: false,
            denial: decision.denial,
        })
    }

    async fn track_plain(&self, user_id: Uuid, operation: MeteredOperation) {
        let sub = self.lookup(user_id).await.ok().flatten();
        let tier = self.effective_tier(sub.as_ref());

        self.record(UsageEvent::new(user_id, operation));

        if let Some(usage) = self.quota.track(user_id, tier, operation, 1).await {
            self.warnings.evaluate(user_id, tier, operation, usage).await;
        }
        self.push_snapshot(user_id, tier).await;
    }

    /// Ledger writes are fire-and-forget relative to the request.
    fn record(&self, event: UsageEvent) {
        let ledger = self.ledger.clone();
        tokio::spawn(async move {
            ledger.record(event).await;
        });
    }

    async fn push_snapshot(&self, user_id: Uuid, tier: Tier) {
        let mut operations = Vec::with_capacity(3);
        for operation in [
            MeteredOperation::AiGeneration,
            MeteredOperation::AppCreation,
            MeteredOperation::WorkflowExecution,
        ] {
            let limit = monthly_limit_for(tier, operation);
            match self.quota.monthly_usage(user_id, tier, operation).await {
                Some(usage) => operations.push(OperationUsage {
                    operation,
                    current: usage.current,
                    limit: usage.limit,
                    percentage: Some(usage.current as f64 * 100.0 / usage.limit as f64),
                }),
                None if is_unlimited(limit) => operations.push(OperationUsage {
                    operation,
                    current: 0,
                    limit: UNLIMITED,
                    percentage: None,
                }),
                None => {} // backend unreachable; leave the entry out
            }
        }
        let snapshot = UsageSnapshot { tier, operations };
        self.warnings.push_snapshot(user_id, &snapshot).await;
    }

    /// Subscription lookup with the fail-open contract: Err(()) tells the
    /// caller to allow and move on.
    async fn lookup(&self, user_id: Uuid) -> Result<Option<SubscriptionRecord>, ()> {
        match self.store.find_for_user(user_id).await {
            Ok(sub) => Ok(sub),
            Err(e) => {
                error!(user_id = %user_id, error = %e, "Subscription lookup failed on enforcement path, failing open");
                Err(())
            }
        }
    }

    /// Tier to enforce against. No row or an effectively expired one reads
    /// as free; this never escalates toward unlimited.
    fn effective_tier(&self, sub: Option<&SubscriptionRecord>) -> Tier {
        match sub {
            Some(sub) => {
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
            None => Tier::Free,
        }
    }
}
