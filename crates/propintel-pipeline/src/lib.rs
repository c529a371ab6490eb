//! The weekly refresh pipeline: scrape, train, reload.
//!
//! The [`Orchestrator`] owns the run state machine. Each run moves
//! `Idle → Scraping → Training → Reloading → Idle`; a step failure passes
//! through `Failed` back to `Idle` with the previous model still live. The
//! [`Reloader`] is the only place a new model becomes visible to readers.
//! A retrain run skips the scrape and starts at `Training`.

pub mod error;
pub mod history;
pub mod orchestrator;
pub mod reloader;
pub mod state;
pub mod steps;

pub use error::{ReloadError, ScrapeError, TrainStepError};
pub use history::{read_recent_runs, RunHistory};
pub use orchestrator::{Orchestrator, OrchestratorOptions, PipelineStatus, TriggerOutcome};
pub use reloader::Reloader;
pub use state::{
    JobRunRecord, PipelineState, RunKind, RunStatus, Step, StepFailure, StepRecord, StepStatus,
    TriggerSource,
};
pub use steps::{train_generation, ScrapeJob, ScrapeStep};
