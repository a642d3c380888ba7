//! Scheduled overdue sweep

use anyhow::{anyhow, Result};
use sqlx::types::chrono::Utc;
use tokio_cron_scheduler::{Job, JobScheduler};

use super::service::LoanEngine;

/// Register the overdue sweep on `cron` (six fields, seconds first) and start
/// the scheduler. The sweep goes through [`LoanEngine::sweep_overdue`], the
/// same locked transition path interactive calls use.
pub async fn start_overdue_sweep(engine: LoanEngine, cron: &str) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| anyhow!("Failed to create job scheduler: {:?}", e))?;

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let engine = engine.clone();
        Box::pin(async move {
            match engine.sweep_overdue(Utc::now()).await {
                Ok(summary) => {
                    tracing::debug!(
                        examined = summary.examined,
                        defaulted = summary.defaulted.len(),
                        "Overdue sweep run"
                    );
                }
                Err(e) => tracing::error!(error = %e, "Overdue sweep failed"),
            }
        })
    })
    .map_err(|e| anyhow!("Invalid OVERDUE_SWEEP_CRON '{}': {:?}", cron, e))?;

    scheduler
        .add(job)
        .await
        .map_err(|e| anyhow!("Failed to register overdue sweep: {:?}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow!("Failed to start job scheduler: {:?}", e))?;

    tracing::info!(cron, "Overdue sweep scheduled");
    Ok(scheduler)
}
