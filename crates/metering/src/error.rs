//! Error types for the metering engine
//!
//! Two classes with deliberately different handling:
//!
//! - Policy outcomes (feature unavailable, illegal tier transition, missing
//!   BYOK credentials) are expected business results. They carry structured
//!   fields, serialize cleanly for API boundaries, and are never logged as
//!   errors. Quota denials are not errors at all: they travel as
//!   [`QuotaDenial`] data inside check outcomes.
//! - Infrastructure failures (counter backend, database) are logged at error
//!   level and resolved fail-open on the enforcement path.

use appforge_shared::{MeteredOperation, Tier};
use serde::Serialize;
use uuid::Uuid;

pub type MeteringResult<T> = Result<T, MeteringError>;

#[derive(Debug, thiserror::Error)]
pub enum MeteringError {
    /// Feature not included in the user's tier. 403-equivalent.
    #[error("feature '{feature}' is not available on the {tier} tier")]
    FeatureUnavailable { feature: String, tier: Tier },

    /// Requested tier change violates the hierarchy order.
    #[error("cannot change tier from {from} to {to}: {reason}")]
    InvalidTierChange {
        from: Tier,
        to: Tier,
        reason: String,
    },

    /// Lifecycle operation applied in a state that does not permit it.
    #[error("subscription {id} is {status}, cannot {operation}")]
    InvalidSubscriptionState {
        id: Uuid,
        status: String,
        operation: &'static str,
    },

    /// No subscription row exists for the user.
    #[error("no subscription found for user {0}")]
    SubscriptionNotFound(Uuid),

    /// A BYOK-exempted user has no provider credentials configured.
    /// Configuration error, never treated as "no limit".
    #[error("user {0} is on the BYOK tier but has no provider credentials configured")]
    MissingByokCredentials(Uuid),

    /// Counter backend unreachable or timed out. Enforcement fails open.
    #[error("counter backend error: {0}")]
    Counter(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MeteringError {
    /// Policy failures are expected business outcomes; everything else is
    /// infrastructure and gets error-level logging.
    pub fn is_policy(&self) -> bool {
        matches!(
            self,
            MeteringError::FeatureUnavailable { .. }
                | MeteringError::InvalidTierChange { .. }
                | MeteringError::InvalidSubscriptionState { .. }
                | MeteringError::MissingByokCredentials(_)
        )
    }
}

/// Structured quota denial returned to callers as data, not control flow.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDenial {
    pub operation: MeteredOperation,
    pub current: i64,
    pub limit: i64,
    pub tier: Tier,
    /// Which layer rejected: "rate" or "monthly".
    pub layer: &'static str,
    /// Tier that would lift the limit.
    pub suggested_tier: Tier,
}

impl std::fmt::Display for QuotaDenial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} limit reached for {} ({}/{} on the {} tier)",
            self.layer, self.operation, self.current, self.limit, self.tier
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_and_infrastructure_errors_are_distinguished() {
        let policy = MeteringError::FeatureUnavailable {
            feature: "sso".to_string(),
            tier: Tier::Pro,
        };
        assert!(policy.is_policy());

        let infra = MeteringError::Counter("connection refused".to_string());
        assert!(!infra.is_policy());
    }

    #[test]
    fn quota_denial_displays_both_layers() {
        let denial = QuotaDenial {
            operation: MeteredOperation::AiGeneration,
            current: 30,
            limit: 30,
            tier: Tier::Free,
            layer: "monthly",
            suggested_tier: Tier::Byok,
        };
        let msg = denial.to_string();
        assert!(msg.contains("monthly"));
        assert!(msg.contains("ai_generation"));
        assert!(msg.contains("30/30"));
    }
}
