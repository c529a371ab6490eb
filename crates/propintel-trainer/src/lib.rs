//! Model training and artifact generations.
//!
//! [`load_dataset`] reads every scraped `listings-*.jsonl` file, a [`Trainer`]
//! turns the records into a [`TrainedModel`], and the [`ArtifactStore`]
//! persists it as an immutable [`ArtifactGeneration`].

pub mod artifacts;
pub mod clean;
pub mod dataset;
pub mod encoders;
pub mod error;
pub mod model;
pub mod train;

pub use artifacts::{ArtifactGeneration, ArtifactStore, GenerationSummary};
pub use clean::{clean_records, CleaningRules, TrainingRow};
pub use dataset::{listings_file_name, load_dataset, LoadedDataset};
pub use encoders::{Encoders, LabelEncoder, OTHER_LOCATION};
pub use error::{ArtifactError, DatasetError, TrainingError};
pub use model::PriceModel;
pub use train::{DefaultTrainer, TrainedModel, Trainer, TrainerOptions, ValidationMetrics};
