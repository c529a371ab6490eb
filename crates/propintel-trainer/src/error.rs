use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum TrainingError {
    #[error("only {rows} usable rows after cleaning; at least {required} are required")]
    InsufficientRows { rows: usize, required: usize },

    #[error("target has no variance across {rows} rows; nothing to learn")]
    DegenerateVariance { rows: usize },

    #[error("validation R² {r2:.3} is below the configured floor {floor:.3}")]
    BelowAccuracyFloor { r2: f64, floor: f64 },
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode artifact {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("generation {id} is invalid: {reason}")]
    Invalid { id: String, reason: String },

    #[error("model digest mismatch for generation {id}: manifest {expected}, computed {actual}")]
    DigestMismatch {
        id: String,
        expected: String,
        actual: String,
    },
}
