// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! AppForge Shared Types
//!
//! Pure tier policy used by every other crate: the tier hierarchy, per-tier
//! limits and feature lists, and the comparison helpers that the enforcement
//! engine builds on. No I/O happens here.

pub mod tiers;

pub use tiers::{
    available_features, has_feature, is_downgrade, is_unlimited, is_upgrade, monthly_limit_for,
    next_tier_up, rate_limit_for, MeteredOperation, RateWindow, Tier, TierLimits, TIER_ORDER,
    UNLIMITED,
};
