//! Run state machine.
//!
//! ```text
//! Idle ──trigger──▶ Scraping ──ok──▶ Training ──ok──▶ Reloading ──ok──▶ Idle
//!                      │                │                 │
//!                      └──────error─────┴───────error─────┴──▶ Failed ──▶ Idle
//! ```
//!
//! A retrain run is claimed straight into `Training` and records the scrape
//! step as skipped. Each step runs on its own task, so a panic in one fails
//! the run instead of leaving the state stuck.
//!
//! A trigger that arrives while a run is in progress is logged and dropped;
//! runs are never queued.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use propintel_core::WeeklyTrigger;
use propintel_trainer::{ArtifactStore, GenerationSummary, Trainer};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ScrapeError;
use crate::history::RunHistory;
use crate::reloader::Reloader;
use crate::state::{JobRunRecord, PipelineState, RunKind, Step, StepFailure, TriggerSource};
use crate::steps::{train_generation, ScrapeStep};

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub data_dir: PathBuf,
    /// A scrape that writes fewer records fails the run before training.
    pub min_scrape_records: u64,
    pub trigger: WeeklyTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    Started { run_id: Uuid },
    Skipped { state: PipelineState, run_id: Option<Uuid> },
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    pub current_run: Option<JobRunRecord>,
    pub last_run: Option<JobRunRecord>,
    pub last_failure: Option<StepFailure>,
    pub next_fire_at: DateTime<Utc>,
    pub trigger_rule: String,
    pub cron_expression: String,
    pub live_generation: Option<GenerationSummary>,
}

#[derive(Debug)]
struct Status {
    state: PipelineState,
    current: Option<JobRunRecord>,
    last_failure: Option<StepFailure>,
}

struct Inner<S, T> {
    scrape: S,
    trainer: Arc<T>,
    artifacts: ArtifactStore,
    reloader: Arc<Reloader>,
    options: OrchestratorOptions,
    status: Mutex<Status>,
    history: tokio::sync::Mutex<RunHistory>,
}

/// Drives scrape → train → reload runs. Cheap to clone; clones share state.
pub struct Orchestrator<S, T> {
    inner: Arc<Inner<S, T>>,
}

impl<S, T> Clone for Orchestrator<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ScrapeStep, T: Trainer + 'static> Orchestrator<S, T> {
    #[must_use]
    pub fn new(
        scrape: S,
        trainer: T,
        artifacts: ArtifactStore,
        reloader: Arc<Reloader>,
        options: OrchestratorOptions,
        history: RunHistory,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                scrape,
                trainer: Arc::new(trainer),
                artifacts,
                reloader,
                options,
                status: Mutex::new(Status {
                    state: PipelineState::Idle,
                    current: None,
                    last_failure: None,
                }),
                history: tokio::sync::Mutex::new(history),
            }),
        }
    }

    #[must_use]
    pub fn reloader(&self) -> &Arc<Reloader> {
        &self.inner.reloader
    }

    #[must_use]
    pub fn trigger_rule(&self) -> &WeeklyTrigger {
        &self.inner.options.trigger
    }

    #[must_use]
    pub fn state(&self) -> PipelineState {
        self.lock_status().state.clone()
    }

    /// Starts a refresh run in the background if the pipeline is idle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn trigger(&self, source: TriggerSource) -> TriggerOutcome {
        self.spawn_run(source, RunKind::Refresh)
    }

    /// Starts a retrain run in the background if the pipeline is idle.
    ///
    /// The run skips scraping and fits a new generation on the listings
    /// already on disk. Must be called from within a Tokio runtime.
    pub fn trigger_retrain(&self, source: TriggerSource) -> TriggerOutcome {
        self.spawn_run(source, RunKind::Retrain)
    }

    /// Runs a refresh to completion in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns the [`TriggerOutcome::Skipped`] outcome if a run is already in
    /// progress.
    pub async fn run(&self, source: TriggerSource) -> Result<JobRunRecord, TriggerOutcome> {
        let run = self.claim(source, RunKind::Refresh)?;
        Ok(self.execute(run).await)
    }

    /// Runs a retrain to completion in the caller's task.
    ///
    /// # Errors
    ///
    /// Returns the [`TriggerOutcome::Skipped`] outcome if a run is already in
    /// progress.
    pub async fn run_retrain(
        &self,
        source: TriggerSource,
    ) -> Result<JobRunRecord, TriggerOutcome> {
        let run = self.claim(source, RunKind::Retrain)?;
        Ok(self.execute(run).await)
    }

    /// Current state plus the last run and the schedule.
    pub async fn status(&self, now: DateTime<Utc>) -> PipelineStatus {
        let (state, current_run, last_failure) = {
            let status = self.lock_status();
            (
                status.state.clone(),
                status.current.clone(),
                status.last_failure.clone(),
            )
        };
        let last_run = self.inner.history.lock().await.last().cloned();
        let trigger = &self.inner.options.trigger;

        PipelineStatus {
            state,
            current_run,
            last_run,
            last_failure,
            next_fire_at: trigger.next_fire_after(now),
            trigger_rule: trigger.to_string(),
            cron_expression: trigger.cron_expression(),
            live_generation: self.inner.reloader.current().and_then(|g| {
                g.summary()
                    .map_err(|e| {
                        tracing::error!(
                            generation = %g.id,
                            error = %e,
                            "pipeline: could not summarize live generation"
                        );
                    })
                    .ok()
            }),
        }
    }

    /// Up to `limit` terminal runs, newest first.
    pub async fn history(&self, limit: usize) -> Vec<JobRunRecord> {
        self.inner.history.lock().await.recent(limit)
    }

    fn lock_status(&self) -> MutexGuard<'_, Status> {
        self.inner
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_run(&self, source: TriggerSource, kind: RunKind) -> TriggerOutcome {
        match self.claim(source, kind) {
            Ok(run) => {
                let run_id = run.run_id;
                let this = self.clone();
                tokio::spawn(async move {
                    this.execute(run).await;
                });
                TriggerOutcome::Started { run_id }
            }
            Err(skipped) => skipped,
        }
    }

    fn claim(&self, source: TriggerSource, kind: RunKind) -> Result<JobRunRecord, TriggerOutcome> {
        let mut status = self.lock_status();
        if !status.state.is_idle() {
            let run_id = status.current.as_ref().map(|r| r.run_id);
            tracing::warn!(
                source = %source,
                kind = %kind,
                state = %status.state,
                run_id = ?run_id,
                "pipeline: trigger ignored, a run is already in progress"
            );
            return Err(TriggerOutcome::Skipped {
                state: status.state.clone(),
                run_id,
            });
        }

        let run = JobRunRecord::new(source, kind, Utc::now());
        let first = kind.first_state();
        tracing::info!(
            run_id = %run.run_id,
            source = %source,
            kind = %kind,
            "pipeline: run triggered"
        );
        tracing::info!(
            run_id = %run.run_id,
            from = %status.state,
            to = %first,
            "pipeline: state transition"
        );
        status.state = first;
        status.current = Some(run.clone());
        Ok(run)
    }

    fn transition(&self, run: &JobRunRecord, to: PipelineState) {
        let mut status = self.lock_status();
        tracing::info!(
            run_id = %run.run_id,
            from = %status.state,
            to = %to,
            "pipeline: state transition"
        );
        status.state = to;
        status.current = Some(run.clone());
    }

    fn publish_progress(&self, run: &JobRunRecord) {
        self.lock_status().current = Some(run.clone());
    }

    async fn execute(&self, mut run: JobRunRecord) -> JobRunRecord {
        let run_started = Instant::now();
        match run.kind {
            RunKind::Refresh => self.refresh(run, run_started).await,
            RunKind::Retrain => {
                run.skip_step(Step::Scrape, "retrain reuses the listings on disk".into());
                self.publish_progress(&run);
                self.train_and_reload(run, run_started).await
            }
        }
    }

    async fn refresh(&self, mut run: JobRunRecord, run_started: Instant) -> JobRunRecord {
        let step_started = Instant::now();
        run.begin_step(Step::Scrape, Utc::now());
        self.publish_progress(&run);

        let run_id = run.run_id;
        let this = self.clone();
        let joined = tokio::spawn(async move { this.inner.scrape.scrape(run_id).await }).await;
        let summary = match joined {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                return self
                    .fail(run, Step::Scrape, e.to_string(), step_started, run_started)
                    .await
            }
            Err(e) => {
                let reason = format!("scrape task aborted: {e}");
                return self
                    .fail(run, Step::Scrape, reason, step_started, run_started)
                    .await;
            }
        };
        let written = summary.records_written;
        let detail = format!(
            "{written} records, {}/{} partitions succeeded",
            summary.partitions_succeeded, summary.partitions_total
        );
        run.scrape = Some(summary);
        let required = self.inner.options.min_scrape_records;
        if written < required {
            let e = ScrapeError::TooFewRecords { written, required };
            return self
                .fail(run, Step::Scrape, e.to_string(), step_started, run_started)
                .await;
        }
        run.end_step(Step::Scrape, true, detail, Utc::now());

        self.transition(&run, PipelineState::Training);
        self.train_and_reload(run, run_started).await
    }

    /// Training and reloading, entered in the `Training` state.
    async fn train_and_reload(&self, mut run: JobRunRecord, run_started: Instant) -> JobRunRecord {
        let step_started = Instant::now();
        run.begin_step(Step::Train, Utc::now());
        self.publish_progress(&run);
        let trainer = Arc::clone(&self.inner.trainer);
        let data_dir = self.inner.options.data_dir.clone();
        let artifacts = self.inner.artifacts.clone();
        let joined = tokio::task::spawn_blocking(move || {
            train_generation(trainer.as_ref(), &data_dir, &artifacts)
        })
        .await;
        let generation = match joined {
            Ok(Ok(generation)) => Arc::new(generation),
            Ok(Err(e)) => {
                return self
                    .fail(run, Step::Train, e.to_string(), step_started, run_started)
                    .await
            }
            Err(e) => {
                let reason = format!("training task aborted: {e}");
                return self
                    .fail(run, Step::Train, reason, step_started, run_started)
                    .await;
            }
        };
        run.end_step(
            Step::Train,
            true,
            format!(
                "generation {} from {} rows, holdout MAE {:.4} Cr, R² {:.4}",
                generation.id,
                generation.dataset.len(),
                generation.metrics.mae_cr,
                generation.metrics.r2
            ),
            Utc::now(),
        );

        self.transition(&run, PipelineState::Reloading);
        let step_started = Instant::now();
        run.begin_step(Step::Reload, Utc::now());
        self.publish_progress(&run);
        let reloader = Arc::clone(&self.inner.reloader);
        let next = Arc::clone(&generation);
        let joined = tokio::task::spawn_blocking(move || reloader.swap(next).map(|_| ())).await;
        let reason = match joined {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(e) => Some(format!("reload task aborted: {e}")),
        };
        if let Some(reason) = reason {
            return self
                .fail(run, Step::Reload, reason, step_started, run_started)
                .await;
        }
        run.end_step(
            Step::Reload,
            true,
            format!("generation {} is live", generation.id),
            Utc::now(),
        );
        run.generation_id = Some(generation.id.clone());
        run.succeed(Utc::now());

        tracing::info!(
            run_id = %run.run_id,
            kind = %run.kind,
            generation = %generation.id,
            elapsed_ms = elapsed_ms(run_started),
            "pipeline: run succeeded"
        );
        self.finish(run).await
    }

    async fn fail(
        &self,
        mut run: JobRunRecord,
        step: Step,
        reason: String,
        step_started: Instant,
        run_started: Instant,
    ) -> JobRunRecord {
        run.fail(step, reason.clone(), Utc::now());
        tracing::error!(
            run_id = %run.run_id,
            step = %step,
            elapsed_ms = elapsed_ms(step_started),
            run_elapsed_ms = elapsed_ms(run_started),
            error = %reason,
            "pipeline: step failed, previous model stays live"
        );
        self.transition(&run, PipelineState::Failed { step, reason });
        self.finish(run).await
    }

    async fn finish(&self, run: JobRunRecord) -> JobRunRecord {
        self.inner.history.lock().await.record(run.clone()).await;

        let mut status = self.lock_status();
        if let Some(failure) = &run.failure {
            status.last_failure = Some(failure.clone());
        }
        tracing::info!(
            run_id = %run.run_id,
            from = %status.state,
            to = %PipelineState::Idle,
            "pipeline: state transition"
        );
        status.state = PipelineState::Idle;
        status.current = None;
        drop(status);
        run
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}
