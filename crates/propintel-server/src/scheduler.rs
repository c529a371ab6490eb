//! Weekly refresh scheduling.
//!
//! Registers one job that fires the pipeline at the configured weekly rule.
//! The job evaluates its cron expression in the rule's fixed offset.

use propintel_pipeline::{Orchestrator, ScrapeStep, TriggerSource};
use propintel_trainer::Trainer;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down the weekly job.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler<S, T>(
    pipeline: Orchestrator<S, T>,
) -> Result<JobScheduler, JobSchedulerError>
where
    S: ScrapeStep,
    T: Trainer + 'static,
{
    let mut scheduler = JobScheduler::new().await?;
    let trigger = *pipeline.trigger_rule();
    let cron = trigger.cron_expression();

    let job = Job::new_async_tz(cron.as_str(), trigger.offset(), move |_uuid, _lock| {
        let pipeline = pipeline.clone();

        Box::pin(async move {
            tracing::info!("scheduler: weekly refresh fired");
            match pipeline.run(TriggerSource::Schedule).await {
                Ok(run) => tracing::info!(
                    run_id = %run.run_id,
                    status = ?run.status,
                    "scheduler: weekly refresh finished"
                ),
                Err(skipped) => tracing::warn!(
                    outcome = ?skipped,
                    "scheduler: weekly refresh skipped, a run is already in progress"
                ),
            }
        })
    })?;

    let job_id = scheduler.add(job).await?;
    scheduler.start().await?;

    let computed = trigger.next_fire_after(chrono::Utc::now());
    let library = scheduler.next_tick_for_job(job_id).await?;
    tracing::info!(
        cron = %cron,
        rule = %trigger,
        next_fire_at = %computed,
        scheduler_next_tick = ?library,
        "scheduler: registered weekly refresh job"
    );
    if library.is_some_and(|tick| tick != computed) {
        tracing::warn!(
            next_fire_at = %computed,
            scheduler_next_tick = ?library,
            "scheduler: cron library disagrees with the computed next fire time"
        );
    }

    Ok(scheduler)
}
