use propintel_scraper::{FetchError, StoreError};
use propintel_trainer::{ArtifactError, DatasetError, TrainingError};
use thiserror::Error;

/// Failure of the scrape step as a whole. Individual partition failures are
/// not errors; they are counted in the summary.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("could not open the listings file: {0}")]
    Store(#[from] StoreError),

    #[error("could not set up the listing source: {0}")]
    Source(#[from] FetchError),

    #[error("scrape wrote {written} records; at least {required} are required to retrain")]
    TooFewRecords { written: u64, required: u64 },
}

#[derive(Debug, Error)]
pub enum TrainStepError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Training(#[from] TrainingError),

    #[error("failed to persist generation: {0}")]
    Artifact(#[from] ArtifactError),
}

/// The new generation was not made live; the previous one still is.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error("generation failed validation: {0}")]
    Invalid(#[source] ArtifactError),

    #[error("failed to update the live pointer: {0}")]
    Pointer(#[source] ArtifactError),
}
