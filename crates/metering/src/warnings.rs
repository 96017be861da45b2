//! Usage warning broadcaster
//!
//! After each successful consumption the current monthly usage is mapped
//! into one of three disjoint bands: [70,90) and [90,100) fire an
//! "approaching limit" warning, [100,∞) fires a distinct "limit exceeded"
//! event carrying a suggested next tier. Each band fires at most once per
//! billing cycle per (user, operation): the dedup mark is a counter-store
//! key with limit 1 and a cycle-length TTL, so repeats are suppressed even
//! when usage oscillates back into the same band.

use std::sync::Arc;
use std::time::Duration;

use appforge_shared::{is_unlimited, next_tier_up, MeteredOperation, Tier};
use tracing::warn;
use uuid::Uuid;

use crate::counters::CounterStore;
use crate::notify::{NotificationChannel, UsageSnapshot, WarningEvent, WarningKind};
use crate::quota::MonthlyUsage;

/// Warning band thresholds, highest first.
pub const WARNING_THRESHOLDS: [u8; 3] = [100, 90, 70];

/// Band for a usage percentage, if any.
fn threshold_band(percentage: i64) -> Option<u8> {
    WARNING_THRESHOLDS
        .iter()
        .copied()
        .find(|&t| percentage >= i64::from(t))
}

#[derive(Clone)]
pub struct WarningBroadcaster {
    counters: CounterStore,
    channel: Arc<dyn NotificationChannel>,
    cycle: Duration,
}

impl WarningBroadcaster {
    pub fn new(
        counters: CounterStore,
        channel: Arc<dyn NotificationChannel>,
        cycle: Duration,
    ) -> Self {
        Self {
            counters,
            channel,
            cycle,
        }
    }

    /// Evaluate one consumption against the warning bands and push at most
    /// one deduplicated event. Unlimited tiers are skipped entirely.
    pub async fn evaluate(
        &self,
        user_id: Uuid,
        tier: Tier,
        operation: MeteredOperation,
        usage: MonthlyUsage,
    ) {
        if is_unlimited(usage.limit) || usage.limit <= 0 {
            return;
        }
        let percentage_int = usage.current * 100 / usage.limit;
        let Some(threshold) = threshold_band(percentage_int) else {
            return;
        };

        // Cycle-length TTL mark; only the first increment per cycle succeeds.
        let mark_key = format!("warn:{user_id}:{operation}:{threshold}");
        match self.counters.increment(&mark_key, 1, self.cycle, 1).await {
            Ok(outcome) if outcome.success => {}
            Ok(_) => return, // already warned this cycle
            Err(e) => {
                // Skip rather than spam: with the mark unavailable a resend
                // could not be deduplicated.
                warn!(user_id = %user_id, operation = %operation, error = %e, "Warning dedup mark unavailable, skipping notification");
                return;
            }
        }

        let percentage = usage.current as f64 * 100.0 / usage.limit as f64;
        let event = if threshold == 100 {
            let suggested = next_tier_up(tier);
            WarningEvent {
                kind: WarningKind::LimitExceeded,
                operation,
                threshold,
                current: usage.current,
                limit: usage.limit,
                percentage,
                suggested_tier: Some(suggested),
                message: format!(
                    "You have used your monthly {operation} limit ({}/{}). Upgrade to the {suggested} tier to continue.",
                    usage.current, usage.limit
                ),
            }
        } else {
            WarningEvent {
                kind: WarningKind::LimitWarning,
                operation,
                threshold,
                current: usage.current,
                limit: usage.limit,
                percentage,
                suggested_tier: None,
                message: format!(
                    "You have used {percentage_int}% of your monthly {operation} limit ({}/{}).",
                    usage.current, usage.limit
                ),
            }
        };
        self.channel.push_warning(user_id, &event).await;
    }

    /// Push a `{usage, limits, percentages}` snapshot. Best-effort.
    pub async fn push_snapshot(&self, user_id: Uuid, snapshot: &UsageSnapshot) {
        self.channel.push_snapshot(user_id, snapshot).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::testing::CaptureChannel;

    const CYCLE: Duration = Duration::from_secs(30 * 24 * 3600);

    fn broadcaster(channel: Arc<CaptureChannel>) -> WarningBroadcaster {
        WarningBroadcaster::new(CounterStore::new_in_memory(), channel, CYCLE)
    }

    fn usage(current: i64, limit: i64) -> MonthlyUsage {
        MonthlyUsage { current, limit }
    }

    #[test]
    fn bands_are_disjoint() {
        assert_eq!(threshold_band(69), None);
        assert_eq!(threshold_band(70), Some(70));
        assert_eq!(threshold_band(89), Some(70));
        assert_eq!(threshold_band(90), Some(90));
        assert_eq!(threshold_band(99), Some(90));
        assert_eq!(threshold_band(100), Some(100));
        assert_eq!(threshold_band(140), Some(100));
    }

    #[tokio::test]
    async fn ninety_percent_warning_fires_once_despite_oscillation() {
        let channel = Arc::new(CaptureChannel::default());
        let warnings = broadcaster(channel.clone());
        let user = Uuid::new_v4();

        // Usage oscillates between 88% and 95% across multiple requests.
        for current in [88, 92, 95, 91, 94] {
            warnings
                .evaluate(user, Tier::Free, MeteredOperation::AiGeneration, usage(current, 100))
                .await;
        }

        let fired = channel.warnings.lock().unwrap();
        // 88 lands in the 70 band, the rest in the 90 band: one event each.
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].1.threshold, 70);
        assert_eq!(fired[1].1.threshold, 90);
    }

    #[tokio::test]
    async fn exceeded_event_carries_suggested_next_tier() {
        let channel = Arc::new(CaptureChannel::default());
        let warnings = broadcaster(channel.clone());
        let user = Uuid::new_v4();

        warnings
            .evaluate(user, Tier::Pro, MeteredOperation::AiGeneration, usage(1_000, 1_000))
            .await;

        let fired = channel.warnings.lock().unwrap();
        assert_eq!(fired.len(), 1);
        let event = &fired[0].1;
        assert_eq!(event.kind, WarningKind::LimitExceeded);
        assert_eq!(event.suggested_tier, Some(Tier::Business));
    }

    #[tokio::test]
    async fn top_tier_suggests_itself_when_exceeded() {
        let channel = Arc::new(CaptureChannel::default());
        let warnings = broadcaster(channel.clone());
        let user = Uuid::new_v4();

        // An enterprise user with a finite limit cannot occur via the tier
        // table, but the suggestion logic still has to stay in range.
        warnings
            .evaluate(user, Tier::Enterprise, MeteredOperation::WorkflowExecution, usage(10, 10))
            .await;

        let fired = channel.warnings.lock().unwrap();
        assert_eq!(fired[0].1.suggested_tier, Some(Tier::Enterprise));
    }

    #[tokio::test]
    async fn unlimited_tiers_are_skipped() {
        let channel = Arc::new(CaptureChannel::default());
        let warnings = broadcaster(channel.clone());
        let user = Uuid::new_v4();

        warnings
            .evaluate(
                user,
                Tier::Enterprise,
                MeteredOperation::AiGeneration,
                usage(1_000_000, appforge_shared::UNLIMITED),
            )
            .await;

        assert!(channel.warnings.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn separate_operations_warn_independently() {
        let channel = Arc::new(CaptureChannel::default());
        let warnings = broadcaster(channel.clone());
        let user = Uuid::new_v4();

        warnings
            .evaluate(user, Tier::Free, MeteredOperation::AiGeneration, usage(95, 100))
            .await;
        warnings
            .evaluate(user, Tier::Free, MeteredOperation::WorkflowExecution, usage(95, 100))
            .await;

        assert_eq!(channel.warnings.lock().unwrap().len(), 2);
    }
}
