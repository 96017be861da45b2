//! AppForge Background Worker
//!
//! Handles scheduled jobs for the subscription lifecycle:
//! - Expiration sweep for lapsed subscriptions (hourly)
//! - Scheduled downgrade / renewal sweep (every 15 minutes)
//! - Health check heartbeat (every 5 minutes)
//!
//! Both sweeps are idempotent and precondition-guarded, so overlapping or
//! redundant runs are safe.

use std::sync::Arc;
use std::time::Duration;

use appforge_metering::{EnforcementConfig, MeteringService, SweepSummary};
use sqlx::postgres::PgPoolOptions;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Create a database connection pool
async fn create_db_pool(database_url: &str) -> anyhow::Result<sqlx::PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    info!("Database pool created");
    Ok(pool)
}

fn log_sweep_result(sweep: &str, result: Result<SweepSummary, appforge_metering::MeteringError>) {
    match result {
        Ok(summary) => info!(
            sweep = sweep,
            scanned = summary.scanned,
            processed = summary.processed,
            errors = summary.errors,
            "Sweep complete"
        ),
        Err(e) => error!(sweep = sweep, error = %e, "Sweep failed"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // Load environment
    dotenvy::dotenv().ok();

    info!("Starting AppForge Worker");

    let config = EnforcementConfig::from_env()?;
    let pool = create_db_pool(&config.database_url).await?;
    let metering = Arc::new(MeteringService::from_config(&config, pool).await?);

    // Create scheduler
    let scheduler = JobScheduler::new().await?;

    // Job 1: Expiration sweep (hourly)
    // Forces active subscriptions whose period ended more than a grace
    // period ago down to free/expired.
    let expiration_service = metering.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let metering = expiration_service.clone();
            Box::pin(async move {
                info!("Running subscription expiration sweep");
                let result = metering.subscriptions.sweep_expirations().await;
                log_sweep_result("expirations", result);
            })
        })?)
        .await?;
    info!("Scheduled: Expiration sweep (hourly)");

    // Job 2: Scheduled downgrade / renewal sweep (every 15 minutes)
    // Applies scheduled tier changes whose effective date has passed.
    let renewal_service = metering.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let metering = renewal_service.clone();
            Box::pin(async move {
                info!("Running scheduled tier change sweep");
                let result = metering.subscriptions.sweep_scheduled_changes().await;
                log_sweep_result("scheduled_changes", result);
            })
        })?)
        .await?;
    info!("Scheduled: Scheduled tier change sweep (every 15 minutes)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    // Start the scheduler
    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("AppForge Worker started successfully with 3 scheduled jobs");

    // Keep the main task running
    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
