//! Tier policy table
//!
//! The single source of truth for the subscription hierarchy: which tiers
//! exist, their order, their limits, their feature lists, and the pure
//! comparison helpers (`is_upgrade`, `is_downgrade`, `has_feature`) the
//! enforcement engine is built on.

use serde::{Deserialize, Serialize};

/// Sentinel meaning "no limit". Consumers must check with [`is_unlimited`]
/// before doing any arithmetic with a limit value.
pub const UNLIMITED: i64 = -1;

/// Subscription tier, ordered lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Byok,
    Pro,
    Business,
    Enterprise,
}

/// Fixed upgrade/downgrade order. Index position defines the hierarchy.
pub const TIER_ORDER: [Tier; 5] = [
    Tier::Free,
    Tier::Byok,
    Tier::Pro,
    Tier::Business,
    Tier::Enterprise,
];

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Byok => "byok",
            Tier::Pro => "pro",
            Tier::Business => "business",
            Tier::Enterprise => "enterprise",
        }
    }

    /// Parse a tier from its database/wire representation.
    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "free" => Some(Tier::Free),
            "byok" => Some(Tier::Byok),
            "pro" => Some(Tier::Pro),
            "business" => Some(Tier::Business),
            "enterprise" => Some(Tier::Enterprise),
            _ => None,
        }
    }

    fn index(&self) -> usize {
        // TIER_ORDER is exhaustive, so this always finds a position.
        TIER_ORDER.iter().position(|t| t == self).unwrap_or(0)
    }

    /// Per-tier resource limits. `UNLIMITED` short-circuits enforcement.
    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                max_apps: 3,
                ai_generations_per_month: 30,
                workflow_executions_per_month: 100,
                max_team_members: 1,
                custom_domains: 0,
                price_cents: Some(0),
            },
            // BYOK users bring their own provider keys; AI enforcement is
            // bypassed at the override layer, not via the sentinel, so these
            // AI numbers only apply to byok subscriptions that are not active.
            Tier::Byok => TierLimits {
                max_apps: 10,
                ai_generations_per_month: 500,
                workflow_executions_per_month: 1_000,
                max_team_members: 3,
                custom_domains: 1,
                price_cents: Some(1_000),
            },
            Tier::Pro => TierLimits {
                max_apps: 25,
                ai_generations_per_month: 1_000,
                workflow_executions_per_month: 5_000,
                max_team_members: 5,
                custom_domains: 3,
                price_cents: Some(2_000),
            },
            Tier::Business => TierLimits {
                max_apps: 100,
                ai_generations_per_month: 5_000,
                workflow_executions_per_month: 25_000,
                max_team_members: 15,
                custom_domains: 10,
                price_cents: Some(9_900),
            },
            // Enterprise is custom-priced; price_cents = None.
            Tier::Enterprise => TierLimits {
                max_apps: UNLIMITED,
                ai_generations_per_month: UNLIMITED,
                workflow_executions_per_month: UNLIMITED,
                max_team_members: UNLIMITED,
                custom_domains: UNLIMITED,
                price_cents: None,
            },
        }
    }

    /// Feature list as declared, including inheritance markers.
    ///
    /// A marker of the form `all_<tier>_features` pulls in the referenced
    /// tier's directly-listed features. Resolution is exactly one hop deep
    /// (not transitive), which is why Enterprise declares both markers.
    pub fn declared_features(&self) -> &'static [&'static str] {
        match self {
            Tier::Free => &["basic_builder", "community_support"],
            Tier::Byok => &["basic_builder", "community_support", "byok_ai"],
            Tier::Pro => &[
                "basic_builder",
                "priority_support",
                "github_sync",
                "custom_domains",
                "workflow_automation",
            ],
            Tier::Business => &[
                "all_pro_features",
                "team_collaboration",
                "advanced_analytics",
                "audit_log",
            ],
            Tier::Enterprise => &[
                "all_business_features",
                "all_pro_features",
                "sso",
                "dedicated_support",
                "custom_contracts",
            ],
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource limits for a tier. Money is integer cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    pub max_apps: i64,
    pub ai_generations_per_month: i64,
    pub workflow_executions_per_month: i64,
    pub max_team_members: i64,
    pub custom_domains: i64,
    /// None = custom pricing (enterprise contracts).
    pub price_cents: Option<i64>,
}

/// True iff `n` is the reserved "no limit" sentinel.
pub fn is_unlimited(n: i64) -> bool {
    n == UNLIMITED
}

/// Strict hierarchy comparison: true iff `to` sits above `from`.
/// Equal tiers are neither an upgrade nor a downgrade.
pub fn is_upgrade(from: Tier, to: Tier) -> bool {
    to.index() > from.index()
}

/// Strict hierarchy comparison: true iff `to` sits below `from`.
pub fn is_downgrade(from: Tier, to: Tier) -> bool {
    to.index() < from.index()
}

/// Next tier strictly above `tier`, or the top tier if already there.
pub fn next_tier_up(tier: Tier) -> Tier {
    let idx = tier.index();
    if idx + 1 < TIER_ORDER.len() {
        TIER_ORDER[idx + 1]
    } else {
        TIER_ORDER[TIER_ORDER.len() - 1]
    }
}

fn marker_target(marker: &str) -> Option<Tier> {
    marker
        .strip_prefix("all_")
        .and_then(|rest| rest.strip_suffix("_features"))
        .and_then(Tier::parse)
}

/// Whether `tier` has access to feature `feature`.
///
/// True if directly listed, or if a declared inheritance marker references
/// a tier whose list contains it. One hop only.
pub fn has_feature(tier: Tier, feature: &str) -> bool {
    let declared = tier.declared_features();
    if declared.contains(&feature) {
        return true;
    }
    declared
        .iter()
        .filter_map(|entry| marker_target(entry))
        .any(|parent| parent.declared_features().contains(&feature))
}

/// Full feature set for a tier with markers expanded (one hop), markers
/// themselves excluded.
pub fn available_features(tier: Tier) -> Vec<&'static str> {
    let mut features: Vec<&'static str> = Vec::new();
    for entry in tier.declared_features() {
        match marker_target(entry) {
            Some(parent) => {
                for inherited in parent.declared_features() {
                    if marker_target(inherited).is_none() && !features.contains(inherited) {
                        features.push(inherited);
                    }
                }
            }
            None => {
                if !features.contains(entry) {
                    features.push(entry);
                }
            }
        }
    }
    features
}

/// Metered platform operations subject to quota and rate enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeteredOperation {
    AiGeneration,
    AppCreation,
    WorkflowExecution,
}

impl MeteredOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeteredOperation::AiGeneration => "ai_generation",
            MeteredOperation::AppCreation => "app_creation",
            MeteredOperation::WorkflowExecution => "workflow_execution",
        }
    }
}

impl std::fmt::Display for MeteredOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Burst rate limit: `limit` operations per fixed window of `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateWindow {
    pub limit: i64,
    pub window_secs: u64,
}

/// Burst (short-window) rate limit for an operation on a tier.
/// Distinct from the monthly quota; smooths spikes.
pub fn rate_limit_for(tier: Tier, operation: MeteredOperation) -> RateWindow {
    let (limit, window_secs) = match operation {
        MeteredOperation::AiGeneration => match tier {
            Tier::Free => (3, 60),
            Tier::Byok => (20, 60),
            Tier::Pro => (10, 60),
            Tier::Business => (20, 60),
            Tier::Enterprise => (UNLIMITED, 60),
        },
        MeteredOperation::AppCreation => match tier {
            Tier::Free => (5, 3_600),
            Tier::Byok => (10, 3_600),
            Tier::Pro => (20, 3_600),
            Tier::Business => (50, 3_600),
            Tier::Enterprise => (UNLIMITED, 3_600),
        },
        MeteredOperation::WorkflowExecution => match tier {
            Tier::Free => (10, 60),
            Tier::Byok => (60, 60),
            Tier::Pro => (60, 60),
            Tier::Business => (120, 60),
            Tier::Enterprise => (UNLIMITED, 60),
        },
    };
    RateWindow { limit, window_secs }
}

/// Monthly quota ceiling for an operation on a tier.
pub fn monthly_limit_for(tier: Tier, operation: MeteredOperation) -> i64 {
    let limits = tier.limits();
    match operation {
        MeteredOperation::AiGeneration => limits.ai_generations_per_month,
        MeteredOperation::AppCreation => limits.max_apps,
        MeteredOperation::WorkflowExecution => limits.workflow_executions_per_month,
    }
}
