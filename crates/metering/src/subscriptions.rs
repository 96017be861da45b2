//! Subscription lifecycle management
//!
//! Owns the one authoritative subscription row per user and every state
//! transition on it: create, prorated upgrade, scheduled (soft) downgrade,
//! cancellation with a grace period, reactivation, renewal, and expiration.
//! The periodic sweeps here are idempotent and precondition-guarded so
//! concurrent or redundant invocations are harmless.

use std::time::Duration;

use appforge_shared::{is_downgrade, is_upgrade, Tier};
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{MeteringError, MeteringResult};

/// Subscription status as stored. `past_due` is also *derived* for active
/// rows inside the grace window, see [`derive_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    Expired,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
            SubscriptionStatus::PastDue => "past_due",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            "past_due" => Some(SubscriptionStatus::PastDue),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raw database row. Tier and status land as text and are normalized into
/// [`SubscriptionRecord`]; unknown values degrade to free/expired rather
/// than failing the read.
#[derive(Debug, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: String,
    pub status: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub scheduled_tier: Option<String>,
    pub scheduled_change_date: Option<OffsetDateTime>,
    pub amount_paid_cents: i64,
    pub cancelled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// The one authoritative subscription per user.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier: Tier,
    pub status: SubscriptionStatus,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub auto_renew: bool,
    pub scheduled_tier: Option<Tier>,
    pub scheduled_change_date: Option<OffsetDateTime>,
    pub amount_paid_cents: i64,
    pub cancelled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<SubscriptionRow> for SubscriptionRecord {
    fn from(row: SubscriptionRow) -> Self {
        let tier = Tier::parse(&row.tier).unwrap_or_else(|| {
            warn!(user_id = %row.user_id, tier = %row.tier, "Unknown tier in subscription row, treating as free");
            Tier::Free
        });
        let status = SubscriptionStatus::parse(&row.status).unwrap_or_else(|| {
            warn!(user_id = %row.user_id, status = %row.status, "Unknown status in subscription row, treating as expired");
            SubscriptionStatus::Expired
        });
        Self {
            id: row.id,
            user_id: row.user_id,
            tier,
            status,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            auto_renew: row.auto_renew,
            scheduled_tier: row.scheduled_tier.as_deref().and_then(Tier::parse),
            scheduled_change_date: row.scheduled_change_date,
            amount_paid_cents: row.amount_paid_cents,
            cancelled_at: row.cancelled_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Result of a prorated upgrade.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpgradeOutcome {
    pub subscription: SubscriptionRecord,
    /// Charge for the remainder of the cycle, in cents, floored at zero.
    pub prorated_cents: i64,
}

/// Result of scheduling a soft downgrade.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ScheduledDowngrade {
    pub current_tier: Tier,
    pub new_tier: Tier,
    pub effective_date: OffsetDateTime,
}

/// Per-sweep summary in the worker's log style.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepSummary {
    pub scanned: usize,
    pub processed: usize,
    pub errors: usize,
}

/// Prorated charge for an upgrade, in integer cents.
///
/// Credit for unused time = old_price × remaining/cycle, with a negative
/// remaining (stale or already-expired period) clamped to zero. The clamp is
/// mandatory behavior, not an optimization. Result floors at zero: upgrades
/// never refund.
pub fn prorated_upgrade_cents(
    old_price_cents: i64,
    new_price_cents: i64,
    remaining_secs: i64,
    cycle_secs: i64,
) -> i64 {
    let remaining = remaining_secs.max(0).min(cycle_secs);
    if cycle_secs <= 0 {
        return new_price_cents.max(0);
    }
    let credit = old_price_cents * remaining / cycle_secs;
    (new_price_cents - credit).max(0)
}

/// Pure scheduling decision for a soft downgrade.
///
/// Validates the hierarchy direction and picks the effective date: the
/// current period end when one exists, one cycle out otherwise. The target
/// tier and the date always travel together; persisting one without the
/// other would leave a half-scheduled change.
pub fn plan_downgrade(
    current_tier: Tier,
    new_tier: Tier,
    period_end: Option<OffsetDateTime>,
    now: OffsetDateTime,
    cycle: Duration,
) -> MeteringResult<ScheduledDowngrade> {
    if !is_downgrade(current_tier, new_tier) {
        return Err(MeteringError::InvalidTierChange {
            from: current_tier,
            to: new_tier,
            reason: "not a downgrade in the tier hierarchy".to_string(),
        });
    }
    Ok(ScheduledDowngrade {
        current_tier,
        new_tier,
        effective_date: period_end.unwrap_or(now + cycle),
    })
}

/// Effective status for a subscription at `now`.
///
/// Active rows within `[period_end, period_end + grace)` read `past_due`;
/// beyond the grace window they read `expired`. Cancelled rows keep access
/// (and their stored status) until period end, then read `expired`.
pub fn derive_status(
    stored: SubscriptionStatus,
    period_end: Option<OffsetDateTime>,
    now: OffsetDateTime,
    grace: Duration,
) -> SubscriptionStatus {
    let Some(end) = period_end else {
        // Free-tier rows have no period end and never lapse.
        return stored;
    };
    match stored {
        SubscriptionStatus::Active => {
            if now >= end + grace {
                SubscriptionStatus::Expired
            } else if now >= end {
                SubscriptionStatus::PastDue
            } else {
                SubscriptionStatus::Active
            }
        }
        SubscriptionStatus::Cancelled => {
            if now >= end {
                SubscriptionStatus::Expired
            } else {
                SubscriptionStatus::Cancelled
            }
        }
        other => other,
    }
}

/// Manages the subscription state machine against Postgres.
#[derive(Clone)]
pub struct SubscriptionService {
    pool: PgPool,
    grace: Duration,
    cycle: Duration,
}

impl SubscriptionService {
    pub fn new(pool: PgPool, grace: Duration, cycle: Duration) -> Self {
        Self { pool, grace, cycle }
    }

    pub fn grace_period(&self) -> Duration {
        self.grace
    }

    pub fn billing_cycle(&self) -> Duration {
        self.cycle
    }

    /// Create the subscription at signup/checkout. Free tier gets no period
    /// end and never lapses; paid tiers get now..now+cycle.
    pub async fn create(&self, user_id: Uuid, tier: Tier) -> MeteringResult<SubscriptionRecord> {
        let now = OffsetDateTime::now_utc();
        let period_end = if tier == Tier::Free {
            None
        } else {
            Some(now + self.cycle)
        };
        let amount_paid = tier.limits().price_cents.unwrap_or(0);

        let row: SubscriptionRow = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (id, user_id, tier, status, current_period_start, current_period_end,
                 auto_renew, amount_paid_cents, created_at, updated_at)
            VALUES ($1, $2, $3, 'active', $4, $5, true, $6, $4, $4)
            RETURNING id, user_id, tier, status, current_period_start, current_period_end,
                      auto_renew, scheduled_tier, scheduled_change_date,
                      amount_paid_cents, cancelled_at, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(tier.as_str())
        .bind(now)
        .bind(period_end)
        .bind(amount_paid)
        .fetch_one(&self.pool)
        .await?;

        info!(user_id = %user_id, tier = %tier, "Subscription created");
        Ok(row.into())
    }

    pub async fn get(&self, user_id: Uuid) -> MeteringResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tier, status, current_period_start, current_period_end,
                   auto_renew, scheduled_tier, scheduled_change_date,
                   amount_paid_cents, cancelled_at, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn get_required(&self, user_id: Uuid) -> MeteringResult<SubscriptionRecord> {
        self.get(user_id)
            .await?
            .ok_or(MeteringError::SubscriptionNotFound(user_id))
    }

    /// Effective status at now, grace window applied.
    pub async fn subscription_status(&self, user_id: Uuid) -> MeteringResult<SubscriptionStatus> {
        let sub = self.get_required(user_id).await?;
        Ok(derive_status(
            sub.status,
            sub.current_period_end,
            OffsetDateTime::now_utc(),
            self.grace,
        ))
    }

    /// Immediate, prorated upgrade: charge the difference for the remainder
    /// of the cycle, reset the period to now..now+cycle, clear any pending
    /// downgrade, force active.
    pub async fn upgrade(&self, user_id: Uuid, new_tier: Tier) -> MeteringResult<UpgradeOutcome> {
        let sub = self.get_required(user_id).await?;
        if !is_upgrade(sub.tier, new_tier) {
            return Err(MeteringError::InvalidTierChange {
                from: sub.tier,
                to: new_tier,
                reason: "not an upgrade in the tier hierarchy".to_string(),
            });
        }
        let new_price = new_tier.limits().price_cents.ok_or_else(|| {
            MeteringError::InvalidTierChange {
                from: sub.tier,
                to: new_tier,
                reason: "tier is custom-priced, contact sales".to_string(),
            }
        })?;
        let old_price = sub.tier.limits().price_cents.unwrap_or(0);

        let now = OffsetDateTime::now_utc();
        let remaining_secs = sub
            .current_period_end
            .map(|end| (end - now).whole_seconds())
            .unwrap_or(0);
        let prorated =
            prorated_upgrade_cents(old_price, new_price, remaining_secs, self.cycle.as_secs() as i64);

        let row: SubscriptionRow = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET tier = $2,
                status = 'active',
                current_period_start = $3,
                current_period_end = $4,
                scheduled_tier = NULL,
                scheduled_change_date = NULL,
                amount_paid_cents = $5,
                updated_at = $3
            WHERE user_id = $1
            RETURNING id, user_id, tier, status, current_period_start, current_period_end,
                      auto_renew, scheduled_tier, scheduled_change_date,
                      amount_paid_cents, cancelled_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(new_tier.as_str())
        .bind(now)
        .bind(now + self.cycle)
        .bind(new_price)
        .fetch_one(&self.pool)
        .await?;

        info!(
            user_id = %user_id,
            from = %sub.tier,
            to = %new_tier,
            prorated_cents = prorated,
            "Subscription upgraded"
        );
        Ok(UpgradeOutcome {
            subscription: row.into(),
            prorated_cents: prorated,
        })
    }

    /// Soft downgrade: tier and period stay untouched now; the change takes
    /// effect at the current period end (or one cycle out if the period has
    /// no end). No refund.
    pub async fn downgrade(
        &self,
        user_id: Uuid,
        new_tier: Tier,
    ) -> MeteringResult<ScheduledDowngrade> {
        let sub = self.get_required(user_id).await?;
        let now = OffsetDateTime::now_utc();
        let plan = plan_downgrade(sub.tier, new_tier, sub.current_period_end, now, self.cycle)?;

        sqlx::query(
            r#"
            UPDATE subscriptions
            SET scheduled_tier = $2,
                scheduled_change_date = $3,
                updated_at = $4
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(plan.new_tier.as_str())
        .bind(plan.effective_date)
        .bind(now)
        .execute(&self.pool)
        .await?;

        info!(
            user_id = %user_id,
            from = %plan.current_tier,
            to = %plan.new_tier,
            effective_date = %plan.effective_date,
            "Downgrade scheduled for period end"
        );
        Ok(plan)
    }

    /// Cancel: access continues until the period end, then the expiration
    /// sweep takes over. Guarded so only active rows flip.
    pub async fn cancel(&self, user_id: Uuid) -> MeteringResult<SubscriptionRecord> {
        let sub = self.get_required(user_id).await?;
        if sub.status != SubscriptionStatus::Active {
            return Err(MeteringError::InvalidSubscriptionState {
                id: sub.id,
                status: sub.status.to_string(),
                operation: "cancel",
            });
        }

        let now = OffsetDateTime::now_utc();
        let row: SubscriptionRow = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'cancelled',
                auto_renew = false,
                cancelled_at = $2,
                updated_at = $2
            WHERE user_id = $1 AND status = 'active'
            RETURNING id, user_id, tier, status, current_period_start, current_period_end,
                      auto_renew, scheduled_tier, scheduled_change_date,
                      amount_paid_cents, cancelled_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        info!(user_id = %user_id, tier = %sub.tier, "Subscription cancelled");
        Ok(row.into())
    }

    /// Undo a cancellation before the period lapses. Legal only from
    /// cancelled; tier and period stay untouched.
    pub async fn reactivate(&self, user_id: Uuid) -> MeteringResult<SubscriptionRecord> {
        let sub = self.get_required(user_id).await?;
        if sub.status != SubscriptionStatus::Cancelled {
            return Err(MeteringError::InvalidSubscriptionState {
                id: sub.id,
                status: sub.status.to_string(),
                operation: "reactivate",
            });
        }

        let now = OffsetDateTime::now_utc();
        let row: SubscriptionRow = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET status = 'active',
                auto_renew = true,
                cancelled_at = NULL,
                updated_at = $2
            WHERE user_id = $1 AND status = 'cancelled'
            RETURNING id, user_id, tier, status, current_period_start, current_period_end,
                      auto_renew, scheduled_tier, scheduled_change_date,
                      amount_paid_cents, cancelled_at, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        info!(user_id = %user_id, "Subscription reactivated");
        Ok(row.into())
    }

    /// Roll a subscription into its next period, applying any scheduled
    /// tier and re-pricing. Called by the scheduled-change sweep.
    pub async fn renew(&self, sub: &SubscriptionRecord) -> MeteringResult<SubscriptionRecord> {
        let now = OffsetDateTime::now_utc();
        let target_tier = sub.scheduled_tier.unwrap_or(sub.tier);
        let period_end = if target_tier == Tier::Free {
            None
        } else {
            Some(now + self.cycle)
        };
        let amount_paid = target_tier.limits().price_cents.unwrap_or(sub.amount_paid_cents);

        let row: SubscriptionRow = sqlx::query_as(
            r#"
            UPDATE subscriptions
            SET tier = $2,
                current_period_start = $3,
                current_period_end = $4,
                scheduled_tier = NULL,
                scheduled_change_date = NULL,
                amount_paid_cents = $5,
                updated_at = $3
            WHERE id = $1
            RETURNING id, user_id, tier, status, current_period_start, current_period_end,
                      auto_renew, scheduled_tier, scheduled_change_date,
                      amount_paid_cents, cancelled_at, created_at, updated_at
            "#,
        )
        .bind(sub.id)
        .bind(target_tier.as_str())
        .bind(now)
        .bind(period_end)
        .bind(amount_paid)
        .fetch_one(&self.pool)
        .await?;

        info!(
            user_id = %sub.user_id,
            tier = %target_tier,
            applied_scheduled = sub.scheduled_tier.is_some(),
            "Subscription renewed"
        );
        Ok(row.into())
    }

    /// Force a lapsed subscription down to free/expired. Idempotent: the
    /// target state is a fixed point, re-running changes nothing.
    pub async fn expire(&self, subscription_id: Uuid) -> MeteringResult<()> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            r#"
            UPDATE subscriptions
            SET tier = 'free',
                status = 'expired',
                auto_renew = false,
                scheduled_tier = NULL,
                scheduled_change_date = NULL,
                updated_at = $2
            WHERE id = $1
              AND (tier != 'free' OR status != 'expired' OR auto_renew)
            "#,
        )
        .bind(subscription_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Expiration sweep: active rows whose period ended more than a grace
    /// period ago. One corrupt record never aborts the sweep.
    pub async fn sweep_expirations(&self) -> MeteringResult<SweepSummary> {
        let cutoff = OffsetDateTime::now_utc() - self.grace;
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tier, status, current_period_start, current_period_end,
                   auto_renew, scheduled_tier, scheduled_change_date,
                   amount_paid_cents, cancelled_at, created_at, updated_at
            FROM subscriptions
            WHERE status = 'active'
              AND current_period_end IS NOT NULL
              AND current_period_end < $1
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = SweepSummary {
            scanned: rows.len(),
            ..Default::default()
        };
        for row in rows {
            let (id, user_id) = (row.id, row.user_id);
            match self.expire(id).await {
                Ok(()) => {
                    summary.processed += 1;
                    info!(user_id = %user_id, subscription_id = %id, "Subscription expired");
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(user_id = %user_id, subscription_id = %id, error = %e, "Failed to expire subscription");
                }
            }
        }

        info!(
            scanned = summary.scanned,
            processed = summary.processed,
            errors = summary.errors,
            "Expiration sweep complete"
        );
        Ok(summary)
    }

    /// Scheduled-change sweep: rows whose downgrade date has passed. Renews
    /// each, which applies the scheduled tier and clears the schedule.
    pub async fn sweep_scheduled_changes(&self) -> MeteringResult<SweepSummary> {
        let now = OffsetDateTime::now_utc();
        let rows: Vec<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tier, status, current_period_start, current_period_end,
                   auto_renew, scheduled_tier, scheduled_change_date,
                   amount_paid_cents, cancelled_at, created_at, updated_at
            FROM subscriptions
            WHERE scheduled_tier IS NOT NULL
              AND scheduled_change_date IS NOT NULL
              AND scheduled_change_date < $1
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = SweepSummary {
            scanned: rows.len(),
            ..Default::default()
        };
        for row in rows {
            let record: SubscriptionRecord = row.into();
            match self.renew(&record).await {
                Ok(renewed) => {
                    summary.processed += 1;
                    info!(
                        user_id = %record.user_id,
                        from = %record.tier,
                        to = %renewed.tier,
                        "Scheduled tier change applied"
                    );
                }
                Err(e) => {
                    summary.errors += 1;
                    error!(user_id = %record.user_id, error = %e, "Failed to apply scheduled change");
                }
            }
        }

        info!(
            scanned = summary.scanned,
            processed = summary.processed,
            errors = summary.errors,
            "Scheduled change sweep complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CYCLE_SECS: i64 = 30 * 24 * 3600;
    const CYCLE: Duration = Duration::from_secs(30 * 24 * 3600);
    const GRACE: Duration = Duration::from_secs(3 * 24 * 3600);

    #[test]
    fn free_to_pro_upgrade_charges_full_pro_price() {
        // Free price is 0, so the credit is 0 regardless of time remaining.
        for remaining in [0, CYCLE_SECS / 2, CYCLE_SECS] {
            assert_eq!(prorated_upgrade_cents(0, 2_000, remaining, CYCLE_SECS), 2_000);
        }
    }

    #[test]
    fn pro_to_business_at_half_cycle_charges_8900() {
        // 9900 - 2000 * 0.5 = 8900
        assert_eq!(
            prorated_upgrade_cents(2_000, 9_900, CYCLE_SECS / 2, CYCLE_SECS),
            8_900
        );
    }

    #[test]
    fn proration_floors_at_zero() {
        // Old plan more expensive than new for the remaining window.
        assert_eq!(prorated_upgrade_cents(9_900, 2_000, CYCLE_SECS, CYCLE_SECS), 0);
    }

    #[test]
    fn negative_remaining_time_is_clamped_to_zero() {
        // Stale/expired period: no credit, full new price.
        assert_eq!(
            prorated_upgrade_cents(2_000, 9_900, -86_400, CYCLE_SECS),
            9_900
        );
    }

    #[test]
    fn remaining_time_never_exceeds_the_cycle() {
        // A period end further out than one cycle still credits at most the
        // full old price.
        assert_eq!(
            prorated_upgrade_cents(2_000, 9_900, CYCLE_SECS * 2, CYCLE_SECS),
            7_900
        );
    }

    #[test]
    fn business_to_free_downgrade_schedules_at_period_end() {
        let now = OffsetDateTime::now_utc();
        let end = now + time::Duration::days(12);
        let plan =
            plan_downgrade(Tier::Business, Tier::Free, Some(end), now, CYCLE).unwrap();
        // The current tier is untouched until the sweep applies the plan.
        assert_eq!(plan.current_tier, Tier::Business);
        assert_eq!(plan.new_tier, Tier::Free);
        assert_eq!(plan.effective_date, end);
    }

    #[test]
    fn downgrade_without_a_period_end_schedules_one_cycle_out() {
        let now = OffsetDateTime::now_utc();
        let plan = plan_downgrade(Tier::Pro, Tier::Free, None, now, CYCLE).unwrap();
        assert_eq!(plan.effective_date, now + CYCLE);
    }

    #[test]
    fn downgrade_plan_rejects_upward_and_lateral_moves() {
        let now = OffsetDateTime::now_utc();
        let err = plan_downgrade(Tier::Free, Tier::Pro, None, now, CYCLE).unwrap_err();
        assert!(matches!(err, MeteringError::InvalidTierChange { .. }));
        assert!(plan_downgrade(Tier::Pro, Tier::Pro, None, now, CYCLE).is_err());
    }

    #[test]
    fn status_within_grace_reads_past_due() {
        let now = OffsetDateTime::now_utc();
        let end = now - time::Duration::days(1);
        assert_eq!(
            derive_status(SubscriptionStatus::Active, Some(end), now, GRACE),
            SubscriptionStatus::PastDue
        );
    }

    #[test]
    fn status_beyond_grace_reads_expired() {
        let now = OffsetDateTime::now_utc();
        let end = now - time::Duration::days(4);
        assert_eq!(
            derive_status(SubscriptionStatus::Active, Some(end), now, GRACE),
            SubscriptionStatus::Expired
        );
    }

    #[test]
    fn active_before_period_end_stays_active() {
        let now = OffsetDateTime::now_utc();
        let end = now + time::Duration::days(10);
        assert_eq!(
            derive_status(SubscriptionStatus::Active, Some(end), now, GRACE),
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn free_tier_without_period_end_never_lapses() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            derive_status(SubscriptionStatus::Active, None, now, GRACE),
            SubscriptionStatus::Active
        );
    }

    #[test]
    fn cancelled_keeps_access_until_period_end() {
        let now = OffsetDateTime::now_utc();
        let future_end = now + time::Duration::days(5);
        assert_eq!(
            derive_status(SubscriptionStatus::Cancelled, Some(future_end), now, GRACE),
            SubscriptionStatus::Cancelled
        );
        let past_end = now - time::Duration::hours(1);
        assert_eq!(
            derive_status(SubscriptionStatus::Cancelled, Some(past_end), now, GRACE),
            SubscriptionStatus::Expired
        );
    }
}
