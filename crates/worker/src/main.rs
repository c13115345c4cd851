//! Quickshop Billing Worker
//!
//! Drives the scheduled settlement cycles out-of-band from user traffic:
//! - Subscription renewals (daily at 02:00 UTC)
//! - Transaction fee settlement (daily at 03:00 UTC)
//! - Plugin fee settlement (daily at 03:30 UTC)
//! - Trial expiry sweep (hourly)
//! - Card-health sweep (monthly, 1st at 01:00 UTC)
//!
//! Each job processes stores one at a time; a per-store failure flips that
//! store to past_due and the run continues.

use std::sync::Arc;
use std::time::Duration;

use quickshop_billing::{BillingRunSummary, BillingService};
use time::OffsetDateTime;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Log one batch job's outcome counts
fn log_summary(job: &str, result: Result<BillingRunSummary, quickshop_billing::BillingError>) {
    match result {
        Ok(summary) => info!(
            job = job,
            processed = summary.processed,
            charged = summary.charged,
            declined = summary.declined,
            failed = summary.failed,
            skipped = summary.skipped,
            "Billing job complete"
        ),
        Err(e) => error!(job = job, error = %e, "Billing job aborted"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("Starting Quickshop Billing Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = quickshop_shared::create_pool(&database_url).await?;
    info!("Database pool created");

    let billing = match BillingService::from_env(pool.clone()) {
        Ok(b) => Arc::new(b),
        Err(e) => {
            // Without gateway credentials nothing can be charged; keep the
            // process alive so deploys don't crash-loop, but do no billing
            warn!(error = %e, "Gateway not configured - running in heartbeat mode");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (heartbeat mode)");
            }
        }
    };

    let scheduler = JobScheduler::new().await?;

    // Job 1: Subscription renewals, daily at 02:00 UTC
    let renewals = billing.clone();
    scheduler
        .add(Job::new_async("0 0 2 * * *", move |_uuid, _l| {
            let billing = renewals.clone();
            Box::pin(async move {
                info!("Running scheduled subscription renewals");
                let result = billing
                    .orchestrator
                    .run_renewals(OffsetDateTime::now_utc())
                    .await;
                log_summary("renewals", result);
            })
        })?)
        .await?;
    info!("Scheduled: subscription renewals (02:00 UTC)");

    // Job 2: Transaction fee settlement, daily at 03:00 UTC
    let fees = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = fees.clone();
            Box::pin(async move {
                info!("Running scheduled transaction fee settlement");
                let result = billing
                    .orchestrator
                    .run_transaction_fees(OffsetDateTime::now_utc())
                    .await;
                log_summary("transaction_fees", result);
            })
        })?)
        .await?;
    info!("Scheduled: transaction fee settlement (03:00 UTC)");

    // Job 3: Plugin fee settlement, daily at 03:30 UTC
    let plugins = billing.clone();
    scheduler
        .add(Job::new_async("0 30 3 * * *", move |_uuid, _l| {
            let billing = plugins.clone();
            Box::pin(async move {
                info!("Running scheduled plugin fee settlement");
                let result = billing
                    .orchestrator
                    .run_plugin_fees(OffsetDateTime::now_utc())
                    .await;
                log_summary("plugin_fees", result);
            })
        })?)
        .await?;
    info!("Scheduled: plugin fee settlement (03:30 UTC)");

    // Job 4: Trial expiry sweep, hourly
    let trials = billing.clone();
    scheduler
        .add(Job::new_async("0 0 * * * *", move |_uuid, _l| {
            let billing = trials.clone();
            Box::pin(async move {
                let result = billing
                    .orchestrator
                    .expire_lapsed_trials(OffsetDateTime::now_utc())
                    .await;
                if let Err(e) = result {
                    error!(error = %e, "Trial expiry sweep aborted");
                }
            })
        })?)
        .await?;
    info!("Scheduled: trial expiry sweep (hourly)");

    // Job 5: Card-health sweep, monthly on the 1st at 01:00 UTC
    let cards = billing.clone();
    scheduler
        .add(Job::new_async("0 0 1 1 * *", move |_uuid, _l| {
            let billing = cards.clone();
            Box::pin(async move {
                info!("Running card health sweep");
                let result = billing.orchestrator.card_health_sweep().await;
                log_summary("card_health", result);
            })
        })?)
        .await?;
    info!("Scheduled: card health sweep (monthly)");

    scheduler.start().await?;
    info!("Billing worker running");

    // Park the main task; jobs run on the scheduler
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
