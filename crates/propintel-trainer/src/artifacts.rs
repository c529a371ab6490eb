//! Immutable artifact generations and their on-disk layout.
//!
//! ```text
//! <model_dir>/
//!   LIVE                        id of the live generation
//!   generations/<id>/
//!     manifest.json             id, timestamps, model digest, metrics
//!     model.json
//!     encoders.json
//!     dataset.jsonl             the cleaned rows the model was fit on
//! ```
//!
//! A generation directory is assembled under a temporary name and renamed
//! into place, and `LIVE` is replaced the same way, so a reader never sees a
//! half-written generation or pointer.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clean::TrainingRow;
use crate::encoders::Encoders;
use crate::error::ArtifactError;
use crate::model::PriceModel;
use crate::train::{TrainedModel, ValidationMetrics};

const GENERATIONS_DIR: &str = "generations";
const LIVE_POINTER: &str = "LIVE";
const MANIFEST_FILE: &str = "manifest.json";
const MODEL_FILE: &str = "model.json";
const ENCODERS_FILE: &str = "encoders.json";
const DATASET_FILE: &str = "dataset.jsonl";

/// A model together with the encoders and data it was built from.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactGeneration {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model: PriceModel,
    pub encoders: Encoders,
    pub dataset: Vec<TrainingRow>,
    pub metrics: ValidationMetrics,
}

/// What status endpoints report about a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model_digest: String,
    pub rows: usize,
    pub mae_cr: f64,
    pub r2: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    id: String,
    created_at: DateTime<Utc>,
    model_digest: String,
    metrics: ValidationMetrics,
}

impl ArtifactGeneration {
    /// Wraps a training result in a new generation with a fresh id.
    ///
    /// Ids start with the UTC creation time, so they sort chronologically.
    #[must_use]
    pub fn new(trained: TrainedModel, created_at: DateTime<Utc>) -> Self {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}", created_at.format("%Y%m%dT%H%M%SZ"), &suffix[..8]),
            created_at,
            model: trained.model,
            encoders: trained.encoders,
            dataset: trained.dataset,
            metrics: trained.metrics,
        }
    }

    /// # Errors
    ///
    /// Returns [`ArtifactError::Encode`] if the model cannot be serialized.
    pub fn model_digest(&self) -> Result<String, ArtifactError> {
        self.model
            .digest()
            .map_err(|source| ArtifactError::Encode {
                what: "model",
                source,
            })
    }

    /// # Errors
    ///
    /// Fails as [`Self::model_digest`] does.
    pub fn summary(&self) -> Result<GenerationSummary, ArtifactError> {
        Ok(GenerationSummary {
            id: self.id.clone(),
            created_at: self.created_at,
            model_digest: self.model_digest()?,
            rows: self.dataset.len(),
            mae_cr: self.metrics.mae_cr,
            r2: self.metrics.r2,
        })
    }

    /// Estimated asking price in crores.
    #[must_use]
    pub fn estimate_price_cr(&self, location: &str, property_type: &str, area_sqft: f64) -> f64 {
        self.model
            .predict(&self.encoders, location, property_type, area_sqft)
    }

    /// Checks that the three parts belong together.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Invalid`] describing the first inconsistency.
    pub fn validate(&self) -> Result<(), ArtifactError> {
        let invalid = |reason: String| ArtifactError::Invalid {
            id: self.id.clone(),
            reason,
        };

        if self.dataset.is_empty() {
            return Err(invalid("dataset snapshot is empty".into()));
        }
        if !(self.model.global_rate.is_finite() && self.model.global_rate > 0.0) {
            return Err(invalid(format!(
                "global rate {} is not a positive number",
                self.model.global_rate
            )));
        }
        if self.model.training_rows != self.dataset.len() {
            return Err(invalid(format!(
                "model was fit on {} rows but the snapshot has {}",
                self.model.training_rows,
                self.dataset.len()
            )));
        }
        if let Some(loc) = self
            .model
            .location_rates
            .keys()
            .find(|loc| !self.encoders.location.contains(loc))
        {
            return Err(invalid(format!("location group \"{loc}\" has no encoding")));
        }
        if let Some(ptype) = self
            .model
            .type_multipliers
            .keys()
            .find(|t| !self.encoders.property_type.contains(t))
        {
            return Err(invalid(format!("property type \"{ptype}\" has no encoding")));
        }
        Ok(())
    }
}

/// Reads and writes generations under one model directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn generation_dir(&self, id: &str) -> PathBuf {
        self.root.join(GENERATIONS_DIR).join(id)
    }

    /// Persists `trained` as a new generation and returns it.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if any file cannot be written or the final
    /// rename fails. Nothing is left under the generation's final name then.
    pub fn commit(&self, trained: TrainedModel) -> Result<ArtifactGeneration, ArtifactError> {
        let generation = ArtifactGeneration::new(trained, Utc::now());
        generation.validate()?;

        let generations = self.root.join(GENERATIONS_DIR);
        fs::create_dir_all(&generations).map_err(io_err(&generations))?;

        let model_digest = generation.model_digest()?;
        let staging = generations.join(format!(".tmp-{}", generation.id));
        let result = write_generation(&staging, &generation, &model_digest).and_then(|()| {
            let target = self.generation_dir(&generation.id);
            fs::rename(&staging, &target).map_err(io_err(&target))
        });
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                tracing::debug!(
                    path = %staging.display(),
                    error = %cleanup,
                    "artifacts: staging cleanup failed"
                );
            }
            return Err(e);
        }

        tracing::info!(
            generation = %generation.id,
            model_digest = %model_digest,
            rows = generation.dataset.len(),
            "artifacts: generation committed"
        );
        Ok(generation)
    }

    /// Loads generation `id`, verifying its digest and consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if a file is missing or unreadable, the model
    /// does not match the manifest digest, or validation fails.
    pub fn load(&self, id: &str) -> Result<ArtifactGeneration, ArtifactError> {
        let dir = self.generation_dir(id);
        let manifest: Manifest = read_json(&dir.join(MANIFEST_FILE))?;
        let model: PriceModel = read_json(&dir.join(MODEL_FILE))?;
        let encoders: Encoders = read_json(&dir.join(ENCODERS_FILE))?;
        let dataset = read_dataset(&dir.join(DATASET_FILE))?;

        let generation = ArtifactGeneration {
            id: manifest.id,
            created_at: manifest.created_at,
            model,
            encoders,
            dataset,
            metrics: manifest.metrics,
        };
        let actual = generation.model_digest()?;
        if actual != manifest.model_digest {
            return Err(ArtifactError::DigestMismatch {
                id: generation.id,
                expected: manifest.model_digest,
                actual,
            });
        }
        generation.validate()?;
        Ok(generation)
    }

    /// Id named by the `LIVE` pointer, if there is one.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError::Io`] if the pointer exists but cannot be read.
    pub fn read_live_pointer(&self) -> Result<Option<String>, ArtifactError> {
        let path = self.root.join(LIVE_POINTER);
        match fs::read_to_string(&path) {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ArtifactError::Io { path, source: e }),
        }
    }

    /// Atomically points `LIVE` at generation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ArtifactError`] if the generation does not exist or the
    /// pointer cannot be replaced. The old pointer is intact on error.
    pub fn write_live_pointer(&self, id: &str) -> Result<(), ArtifactError> {
        let dir = self.generation_dir(id);
        if !dir.is_dir() {
            return Err(ArtifactError::Invalid {
                id: id.to_string(),
                reason: format!("no generation directory at {}", dir.display()),
            });
        }
        let tmp = self.root.join(format!(".{LIVE_POINTER}.tmp"));
        write_file(&tmp, format!("{id}\n").as_bytes())?;
        let live = self.root.join(LIVE_POINTER);
        fs::rename(&tmp, &live).map_err(io_err(&live))
    }

    /// Loads the generation `LIVE` points at.
    ///
    /// # Errors
    ///
    /// See [`Self::read_live_pointer`] and [`Self::load`].
    pub fn load_live(&self) -> Result<Option<ArtifactGeneration>, ArtifactError> {
        match self.read_live_pointer()? {
            Some(id) => self.load(&id).map(Some),
            None => Ok(None),
        }
    }
}

fn write_generation(
    dir: &Path,
    generation: &ArtifactGeneration,
    model_digest: &str,
) -> Result<(), ArtifactError> {
    fs::create_dir_all(dir).map_err(io_err(dir))?;

    let manifest = Manifest {
        id: generation.id.clone(),
        created_at: generation.created_at,
        model_digest: model_digest.to_string(),
        metrics: generation.metrics.clone(),
    };
    write_file(&dir.join(MANIFEST_FILE), &encode("manifest", &manifest)?)?;
    write_file(&dir.join(MODEL_FILE), &encode("model", &generation.model)?)?;
    write_file(&dir.join(ENCODERS_FILE), &encode("encoders", &generation.encoders)?)?;

    let mut dataset = Vec::new();
    for row in &generation.dataset {
        serde_json::to_writer(&mut dataset, row).map_err(|source| ArtifactError::Encode {
            what: "dataset",
            source,
        })?;
        dataset.push(b'\n');
    }
    write_file(&dir.join(DATASET_FILE), &dataset)
}

fn encode<T: Serialize>(what: &'static str, value: &T) -> Result<Vec<u8>, ArtifactError> {
    serde_json::to_vec_pretty(value).map_err(|source| ArtifactError::Encode { what, source })
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut file = fs::File::create(path).map_err(io_err(path))?;
    file.write_all(bytes).map_err(io_err(path))?;
    file.sync_all().map_err(io_err(path))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let bytes = fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&bytes).map_err(|source| ArtifactError::Decode {
        path: path.to_path_buf(),
        source,
    })
}

fn read_dataset(path: &Path) -> Result<Vec<TrainingRow>, ArtifactError> {
    let contents = fs::read_to_string(path).map_err(io_err(path))?;
    contents
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l).map_err(|source| ArtifactError::Decode {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect()
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoders::Encoders;

    fn trained() -> TrainedModel {
        let dataset: Vec<TrainingRow> = (0..6_u32)
            .map(|i| TrainingRow {
                url: format!("https://listings.test/{i}"),
                city: "Pune".to_string(),
                location: if i < 4 { "Baner" } else { "Aundh" }.to_string(),
                property_type: "Villa".to_string(),
                bedrooms: 3,
                area_sqft: 1000.0 + f64::from(i) * 100.0,
                price_cr: 1.0 + f64::from(i) * 0.1,
            })
            .collect();
        let encoders = Encoders::fit(&dataset, 3);
        let model = PriceModel::fit(&dataset, &encoders).unwrap();
        TrainedModel {
            model,
            encoders,
            dataset,
            metrics: ValidationMetrics {
                rows_input: 6,
                rows_clean: 6,
                train_rows: 5,
                validation_rows: 1,
                location_groups: 2,
                mae_cr: 0.01,
                r2: 0.9,
            },
        }
    }

    #[test]
    fn committed_generation_loads_back_identically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let generation = store.commit(trained()).unwrap();
        let loaded = store.load(&generation.id).unwrap();

        assert_eq!(loaded, generation);
        assert_eq!(
            loaded.model_digest().unwrap(),
            generation.model_digest().unwrap()
        );
    }

    #[test]
    fn commit_leaves_no_staging_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let generation = store.commit(trained()).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join(GENERATIONS_DIR))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![generation.id]);
    }

    #[test]
    fn live_pointer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        assert!(store.load_live().unwrap().is_none());

        let generation = store.commit(trained()).unwrap();
        store.write_live_pointer(&generation.id).unwrap();

        assert_eq!(store.read_live_pointer().unwrap(), Some(generation.id.clone()));
        assert_eq!(store.load_live().unwrap().unwrap().id, generation.id);
    }

    #[test]
    fn live_pointer_refuses_unknown_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let err = store.write_live_pointer("does-not-exist").unwrap_err();
        assert!(matches!(err, ArtifactError::Invalid { .. }));
        assert!(store.read_live_pointer().unwrap().is_none());
    }

    #[test]
    fn tampered_model_fails_digest_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let generation = store.commit(trained()).unwrap();

        let mut model = generation.model.clone();
        model.global_rate *= 2.0;
        fs::write(
            store.generation_dir(&generation.id).join(MODEL_FILE),
            serde_json::to_vec(&model).unwrap(),
        )
        .unwrap();

        let err = store.load(&generation.id).unwrap_err();
        assert!(matches!(err, ArtifactError::DigestMismatch { .. }));
    }

    #[test]
    fn manifest_records_the_model_digest() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let generation = store.commit(trained()).unwrap();

        let manifest: Manifest =
            read_json(&store.generation_dir(&generation.id).join(MANIFEST_FILE)).unwrap();
        let digest = generation.model_digest().unwrap();
        assert_eq!(manifest.model_digest, digest);
        assert_eq!(generation.summary().unwrap().model_digest, digest);
    }

    #[test]
    fn estimate_uses_the_generation_model_and_encoders() {
        let generation = ArtifactGeneration::new(trained(), Utc::now());

        let baner = generation.estimate_price_cr("Baner", "Villa", 1200.0);
        assert!(baner > 0.0);
        assert!(
            (baner
                - generation
                    .model
                    .predict(&generation.encoders, "Baner", "Villa", 1200.0))
            .abs()
                < 1e-12
        );
        let doubled = generation.estimate_price_cr("Baner", "Villa", 2400.0);
        assert!((doubled - 2.0 * baner).abs() < 1e-9);

        // Locations below the grouping threshold and unseen ones share a rate.
        let aundh = generation.estimate_price_cr("Aundh", "Villa", 1200.0);
        let unseen = generation.estimate_price_cr("Never Seen", "Villa", 1200.0);
        assert!((aundh - unseen).abs() < 1e-12);

        // An unknown property type is priced at the bare location rate.
        let plain = generation.estimate_price_cr("Baner", "Penthouse", 1200.0);
        let villa = generation.model.type_multipliers["Villa"];
        assert!((baner - plain * villa).abs() < 1e-9);
    }

    #[test]
    fn validate_rejects_uncovered_location() {
        let mut generation = ArtifactGeneration::new(trained(), Utc::now());
        generation
            .model
            .location_rates
            .insert("Atlantis".to_string(), 1.0);
        assert!(matches!(
            generation.validate(),
            Err(ArtifactError::Invalid { .. })
        ));
    }

    #[test]
    fn validate_rejects_empty_snapshot() {
        let mut generation = ArtifactGeneration::new(trained(), Utc::now());
        generation.dataset.clear();
        assert!(generation.validate().is_err());
    }

    #[test]
    fn generation_ids_sort_by_creation_time() {
        let earlier = ArtifactGeneration::new(
            trained(),
            DateTime::parse_from_rfc3339("2026-10-11T02:00:00Z").unwrap().with_timezone(&Utc),
        );
        let later = ArtifactGeneration::new(
            trained(),
            DateTime::parse_from_rfc3339("2026-10-18T02:00:00Z").unwrap().with_timezone(&Utc),
        );
        assert!(earlier.id < later.id);
        assert!(earlier.id.starts_with("20261011T020000Z-"));
    }
}
