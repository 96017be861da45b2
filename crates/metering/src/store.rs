//! Read-side storage seam for the enforcement path
//!
//! Enforcement components only ever *read* subscription state, the
//! authoritative app count, and BYOK credential presence. Putting that behind
//! a trait lets tests substitute in-memory fakes while production wires in
//! Postgres. The lifecycle manager owns the write side directly.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::MeteringResult;
use crate::subscriptions::{SubscriptionRecord, SubscriptionRow};

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// The one authoritative subscription row for a user, if any.
    async fn find_for_user(&self, user_id: Uuid) -> MeteringResult<Option<SubscriptionRecord>>;

    /// Authoritative app count from the apps table. Reflects deletions,
    /// unlike a decaying counter.
    async fn app_count(&self, user_id: Uuid) -> MeteringResult<i64>;

    /// Whether the user has upstream provider credentials on file.
    async fn byok_credentials_configured(&self, user_id: Uuid) -> MeteringResult<bool>;
}

/// Postgres-backed store. Schema is owned externally; this only reads.
#[derive(Clone)]
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn find_for_user(&self, user_id: Uuid) -> MeteringResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, tier, status,
                   current_period_start, current_period_end,
                   auto_renew, scheduled_tier, scheduled_change_date,
                   amount_paid_cents, cancelled_at, created_at, updated_at
            FROM subscriptions
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SubscriptionRecord::from))
    }

    async fn app_count(&self, user_id: Uuid) -> MeteringResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM apps WHERE user_id = $1 AND deleted_at IS NULL")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn byok_credentials_configured(&self, user_id: Uuid) -> MeteringResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM user_provider_credentials WHERE user_id = $1)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}
