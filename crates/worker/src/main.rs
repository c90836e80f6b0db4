//! Course Funnel Background Worker
//!
//! Handles scheduled maintenance around the webhook event store:
//! - Event reference cleanup + failed-event report (every 15 minutes)
//! - Stuck `processing` event recovery (every 30 minutes)
//! - Webhook event retention cleanup (daily at 3:00 UTC)
//! - Health check heartbeat (every 5 minutes)

use funnel_fulfillment::dedup::{EventStore, PROCESSING_TIMEOUT_MINUTES};
use funnel_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Keep processed webhook events for this long before deleting
const EVENT_RETENTION_DAYS: i32 = 30;

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

    info!("Starting Funnel Worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;
    let store = EventStore::new(pool);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Reference cleanup and failed-event report (every 15 minutes)
    let report_store = store.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let store = report_store.clone();
            Box::pin(async move {
                info!("Running event reference cleanup");
                match store.cleanup_references().await {
                    Ok(removed) => info!(removed = removed, "Event reference cleanup complete"),
                    Err(e) => error!(error = %e, "Event reference cleanup failed"),
                }

                match store.list_failed(20).await {
                    Ok(failed) if failed.is_empty() => {}
                    Ok(failed) => {
                        warn!(count = failed.len(), "Webhook events needing attention");
                        for event in failed {
                            warn!(
                                event_id = %event.event_id,
                                result = %event.processing_result,
                                error = ?event.error_message,
                                "Failed webhook event"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Failed-event report query failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Reference cleanup and failed-event report (every 15 minutes)");

    // Job 2: Stuck event recovery (every 30 minutes)
    // An api process that died mid-fan-out leaves events in 'processing';
    // resetting them lets a Razorpay redelivery claim them again.
    let recovery_store = store.clone();
    scheduler
        .add(Job::new_async("0 */30 * * * *", move |_uuid, _l| {
            let store = recovery_store.clone();
            Box::pin(async move {
                info!("Running stuck webhook event recovery");
                match store.reset_stuck(PROCESSING_TIMEOUT_MINUTES).await {
                    Ok(0) => info!("No stuck webhook events"),
                    Ok(reset) => warn!(reset = reset, "Reset stuck webhook events"),
                    Err(e) => error!(error = %e, "Stuck event recovery failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stuck event recovery (every 30 minutes)");

    // Job 3: Event retention cleanup (daily at 3:00 UTC)
    let retention_store = store.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let store = retention_store.clone();
            Box::pin(async move {
                info!(
                    retention_days = EVENT_RETENTION_DAYS,
                    "Running webhook event retention cleanup"
                );
                match store.cleanup_events(EVENT_RETENTION_DAYS).await {
                    Ok(removed) => info!(removed = removed, "Event retention cleanup complete"),
                    Err(e) => error!(error = %e, "Event retention cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Event retention cleanup (daily 3:00 UTC)");

    // Job 4: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: Health check heartbeat (every 5 minutes)");

    scheduler.start().await?;
    info!("Worker scheduler started");

    // Keep the process alive; the scheduler runs on background tasks
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping worker");

    Ok(())
}
