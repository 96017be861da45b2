//! Usage ledger
//!
//! Durable, non-gating record of consumption for analytics and billing. One
//! row per user per day, incremented per metered action, then forwarded to
//! the external analytics sink. Everything here is best-effort: a ledger
//! failure is logged and swallowed, never propagated to the metered action.
//! Enforcement never reads this path.

use async_trait::async_trait;
use serde::Serialize;
use sqlx::PgPool;
use time::{Date, OffsetDateTime};
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::Retry;
use tracing::error;
use uuid::Uuid;

use appforge_shared::MeteredOperation;

use crate::error::MeteringResult;

/// One consumption event headed for the ledger and the analytics sink.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub user_id: Uuid,
    pub operation: MeteredOperation,
    pub amount: i64,
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
    /// True when the generation ran on the user's own provider credentials.
    pub byok: bool,
}

impl UsageEvent {
    pub fn new(user_id: Uuid, operation: MeteredOperation) -> Self {
        Self {
            user_id,
            operation,
            amount: 1,
            tokens_used: 0,
            estimated_cost_cents: 0,
            byok: false,
        }
    }
}

/// Write seam for the ledger so the facade can be tested with a capture
/// fake. Infallible by contract: implementations swallow their own errors.
#[async_trait]
pub trait UsageLedger: Send + Sync {
    async fn record(&self, event: UsageEvent);
}

/// Aggregated totals over a period.
#[derive(Debug, Clone, Default, sqlx::FromRow, Serialize)]
pub struct UsageTotals {
    pub ai_generations: i64,
    pub apps_created: i64,
    pub workflow_executions: i64,
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
}

/// One day of the usage series.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DailyUsage {
    pub day: Date,
    pub ai_generations: i64,
    pub apps_created: i64,
    pub workflow_executions: i64,
    pub tokens_used: i64,
    pub estimated_cost_cents: i64,
}

/// Postgres-backed recorder with optional analytics forwarding.
#[derive(Clone)]
pub struct UsageRecorder {
    pool: PgPool,
    sink: Option<AnalyticsSink>,
}

#[derive(Clone)]
struct AnalyticsSink {
    client: reqwest::Client,
    url: String,
}

impl UsageRecorder {
    pub fn new(pool: PgPool, analytics_sink_url: Option<String>) -> Self {
        let sink = analytics_sink_url.map(|url| AnalyticsSink {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_default(),
            url,
        });
        Self { pool, sink }
    }

    async fn upsert_daily_row(&self, event: &UsageEvent) -> MeteringResult<()> {
        let (ai, apps, workflows) = match event.operation {
            MeteredOperation::AiGeneration => (event.amount, 0, 0),
            MeteredOperation::AppCreation => (0, event.amount, 0),
            MeteredOperation::WorkflowExecution => (0, 0, event.amount),
        };
        let byok_ai = if event.byok { ai } else { 0 };
        let now = OffsetDateTime::now_utc();

        sqlx::query(
            r#"
            INSERT INTO usage_metrics
                (user_id, day, ai_generations, apps_created, workflow_executions,
                 tokens_used, estimated_cost_cents, byok_ai_generations,
                 created_at, updated_at)
            VALUES ($1, CURRENT_DATE, $2, $3, $4, $5, $6, $7, $8, $8)
            ON CONFLICT (user_id, day) DO UPDATE SET
                ai_generations = usage_metrics.ai_generations + EXCLUDED.ai_generations,
                apps_created = usage_metrics.apps_created + EXCLUDED.apps_created,
                workflow_executions = usage_metrics.workflow_executions + EXCLUDED.workflow_executions,
                tokens_used = usage_metrics.tokens_used + EXCLUDED.tokens_used,
                estimated_cost_cents = usage_metrics.estimated_cost_cents + EXCLUDED.estimated_cost_cents,
                byok_ai_generations = usage_metrics.byok_ai_generations + EXCLUDED.byok_ai_generations,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(event.user_id)
        .bind(ai)
        .bind(apps)
        .bind(workflows)
        .bind(event.tokens_used)
        .bind(event.estimated_cost_cents)
        .bind(byok_ai)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn forward_to_sink(&self, event: &UsageEvent) {
        let Some(sink) = &self.sink else { return };
        let strategy = ExponentialBackoff::from_millis(100).take(3);
        let result = Retry::spawn(strategy, || async {
            sink.client
                .post(&sink.url)
                .json(event)
                .send()
                .await?
                .error_for_status()
        })
        .await;
        if let Err(e) = result {
            error!(user_id = %event.user_id, operation = %event.operation, error = %e, "Failed to forward usage event to analytics sink");
        }
    }

    /// Totals over the trailing 30-day window.
    pub async fn monthly_totals(&self, user_id: Uuid) -> MeteringResult<UsageTotals> {
        let totals: UsageTotals = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(ai_generations), 0)::BIGINT AS ai_generations,
                   COALESCE(SUM(apps_created), 0)::BIGINT AS apps_created,
                   COALESCE(SUM(workflow_executions), 0)::BIGINT AS workflow_executions,
                   COALESCE(SUM(tokens_used), 0)::BIGINT AS tokens_used,
                   COALESCE(SUM(estimated_cost_cents), 0)::BIGINT AS estimated_cost_cents
            FROM usage_metrics
            WHERE user_id = $1
              AND day >= CURRENT_DATE - INTERVAL '30 days'
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    /// Totals over an arbitrary inclusive date range.
    pub async fn range_totals(
        &self,
        user_id: Uuid,
        from: Date,
        to: Date,
    ) -> MeteringResult<UsageTotals> {
        let totals: UsageTotals = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(ai_generations), 0)::BIGINT AS ai_generations,
                   COALESCE(SUM(apps_created), 0)::BIGINT AS apps_created,
                   COALESCE(SUM(workflow_executions), 0)::BIGINT AS workflow_executions,
                   COALESCE(SUM(tokens_used), 0)::BIGINT AS tokens_used,
                   COALESCE(SUM(estimated_cost_cents), 0)::BIGINT AS estimated_cost_cents
            FROM usage_metrics
            WHERE user_id = $1 AND day BETWEEN $2 AND $3
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(totals)
    }

    /// Per-day series for charts, oldest first.
    pub async fn daily_series(
        &self,
        user_id: Uuid,
        from: Date,
        to: Date,
    ) -> MeteringResult<Vec<DailyUsage>> {
        let rows: Vec<DailyUsage> = sqlx::query_as(
            r#"
            SELECT day, ai_generations, apps_created, workflow_executions,
                   tokens_used, estimated_cost_cents
            FROM usage_metrics
            WHERE user_id = $1 AND day BETWEEN $2 AND $3
            ORDER BY day ASC
            "#,
        )
        .bind(user_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Authoritative total app count from the apps table.
    pub async fn total_app_count(&self, user_id: Uuid) -> MeteringResult<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM apps WHERE user_id = $1 AND deleted_at IS NULL")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

#[async_trait]
impl UsageLedger for UsageRecorder {
    /// Upsert the daily row, then forward to the sink. Both best-effort.
    async fn record(&self, event: UsageEvent) {
        if let Err(e) = self.upsert_daily_row(&event).await {
            error!(user_id = %event.user_id, operation = %event.operation, error = %e, "Failed to write usage ledger row");
        }
        self.forward_to_sink(&event).await;
    }
}
