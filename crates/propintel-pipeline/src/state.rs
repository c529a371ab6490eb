//! Pipeline state and job run records.

use std::fmt;

use chrono::{DateTime, Utc};
use propintel_scraper::ScrapeSummary;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Scrape,
    Train,
    Reload,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Scrape, Step::Train, Step::Reload];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Scrape => "scrape",
            Step::Train => "train",
            Step::Reload => "reload",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the orchestrator is. `Failed` only lasts long enough to be logged
/// and observed; the next transition is always back to `Idle`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Scraping,
    Training,
    Reloading,
    Failed { step: Step, reason: String },
}

impl PipelineState {
    #[must_use]
    pub fn is_idle(&self) -> bool {
        matches!(self, PipelineState::Idle)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Idle => f.write_str("idle"),
            PipelineState::Scraping => f.write_str("scraping"),
            PipelineState::Training => f.write_str("training"),
            PipelineState::Reloading => f.write_str("reloading"),
            PipelineState::Failed { step, .. } => write!(f, "failed({step})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Manual,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerSource::Schedule => f.write_str("schedule"),
            TriggerSource::Manual => f.write_str("manual"),
        }
    }
}

/// What a run does. A retrain reuses the listings already on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Scrape, then train and reload.
    #[default]
    Refresh,
    /// Train and reload only.
    Retrain,
}

impl RunKind {
    /// State a run of this kind starts in once claimed.
    #[must_use]
    pub fn first_state(self) -> PipelineState {
        match self {
            RunKind::Refresh => PipelineState::Scraping,
            RunKind::Retrain => PipelineState::Training,
        }
    }
}

impl fmt::Display for RunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunKind::Refresh => f.write_str("refresh"),
            RunKind::Retrain => f.write_str("retrain"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: Step,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: Step,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// One pipeline run, from trigger to its terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub run_id: Uuid,
    pub source: TriggerSource,
    /// Records written before retraining existed carry no kind.
    #[serde(default)]
    pub kind: RunKind,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub failure: Option<StepFailure>,
    pub scrape: Option<ScrapeSummary>,
    /// Generation made live by this run.
    pub generation_id: Option<String>,
}

impl JobRunRecord {
    #[must_use]
    pub fn new(source: TriggerSource, kind: RunKind, started_at: DateTime<Utc>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source,
            kind,
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            steps: Step::ALL
                .iter()
                .map(|&step| StepRecord {
                    step,
                    status: StepStatus::Pending,
                    started_at: None,
                    duration_ms: None,
                    detail: None,
                })
                .collect(),
            failure: None,
            scrape: None,
            generation_id: None,
        }
    }

    #[must_use]
    pub fn step(&self, step: Step) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.step == step)
    }

    fn step_mut(&mut self, step: Step) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.step == step)
    }

    pub(crate) fn begin_step(&mut self, step: Step, at: DateTime<Utc>) {
        if let Some(record) = self.step_mut(step) {
            record.status = StepStatus::Running;
            record.started_at = Some(at);
        }
    }

    pub(crate) fn end_step(&mut self, step: Step, succeeded: bool, detail: String, at: DateTime<Utc>) {
        if let Some(record) = self.step_mut(step) {
            record.status = if succeeded {
                StepStatus::Succeeded
            } else {
                StepStatus::Failed
            };
            record.duration_ms = record
                .started_at
                .map(|start| u64::try_from((at - start).num_milliseconds()).unwrap_or(0));
            record.detail = Some(detail);
        }
    }

    pub(crate) fn skip_step(&mut self, step: Step, detail: String) {
        if let Some(record) = self.step_mut(step) {
            record.status = StepStatus::Skipped;
            record.detail = Some(detail);
        }
    }

    pub(crate) fn fail(&mut self, step: Step, reason: String, at: DateTime<Utc>) {
        self.end_step(step, false, reason.clone(), at);
        self.status = RunStatus::Failed;
        self.failure = Some(StepFailure { step, reason, at });
        self.finished_at = Some(at);
    }

    pub(crate) fn succeed(&mut self, at: DateTime<Utc>) {
        self.status = RunStatus::Succeeded;
        self.finished_at = Some(at);
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }
}
