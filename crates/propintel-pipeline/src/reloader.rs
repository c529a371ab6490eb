//! Atomic publication of the live artifact generation.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use propintel_trainer::{ArtifactGeneration, ArtifactStore};

use crate::error::ReloadError;

/// Holds the live [`ArtifactGeneration`] behind one `Arc`.
///
/// Readers clone the `Arc` under a read lock and keep using that generation
/// for as long as they need it; a swap replaces the whole value, so a reader
/// can never see the model of one generation with the encoders of another.
#[derive(Debug)]
pub struct Reloader {
    live: RwLock<Option<Arc<ArtifactGeneration>>>,
    artifacts: ArtifactStore,
    /// Serializes swaps so the on-disk pointer and the in-memory value
    /// always name the same generation.
    swap_lock: Mutex<()>,
}

impl Reloader {
    #[must_use]
    pub fn new(artifacts: ArtifactStore, initial: Option<Arc<ArtifactGeneration>>) -> Self {
        Self {
            live: RwLock::new(initial),
            artifacts,
            swap_lock: Mutex::new(()),
        }
    }

    /// The live generation, if one has been loaded.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ArtifactGeneration>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates `next`, points `LIVE` at it and makes it current.
    ///
    /// Returns the generation it replaced.
    ///
    /// # Errors
    ///
    /// - [`ReloadError::Invalid`] if `next` fails validation.
    /// - [`ReloadError::Pointer`] if the `LIVE` pointer cannot be replaced.
    ///
    /// Either way the previous generation stays live, in memory and on disk.
    pub fn swap(
        &self,
        next: Arc<ArtifactGeneration>,
    ) -> Result<Option<Arc<ArtifactGeneration>>, ReloadError> {
        next.validate().map_err(ReloadError::Invalid)?;
        let model_digest = next.model_digest().map_err(ReloadError::Invalid)?;

        let _serial = self.swap_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.artifacts
            .write_live_pointer(&next.id)
            .map_err(ReloadError::Pointer)?;

        let previous = {
            let mut live = self.live.write().unwrap_or_else(PoisonError::into_inner);
            live.replace(Arc::clone(&next))
        };

        tracing::info!(
            generation = %next.id,
            model_digest = %model_digest,
            previous = previous.as_ref().map_or("none", |p| p.id.as_str()),
            "reload: generation is live"
        );
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use propintel_trainer::{
        Encoders, PriceModel, TrainedModel, TrainingRow, ValidationMetrics,
    };

    use super::*;

    /// A generation whose model, encoders and dataset all carry `tag`, so a
    /// reader can tell if it ever sees parts of two generations.
    fn tagged_trained(tag: &str, rate: f64) -> TrainedModel {
        let dataset: Vec<TrainingRow> = (0..4_u32)
            .map(|i| TrainingRow {
                url: format!("https://listings.test/{tag}/{i}"),
                city: "Pune".to_string(),
                location: tag.to_string(),
                property_type: format!("{tag}-type"),
                bedrooms: 2,
                area_sqft: 1000.0,
                price_cr: rate * 1000.0 / 10_000_000.0 + f64::from(i) * 0.01,
            })
            .collect();
        let encoders = Encoders::fit(&dataset, 1);
        let model = PriceModel::fit(&dataset, &encoders).expect("non-empty rows");
        TrainedModel {
            model,
            encoders,
            dataset,
            metrics: ValidationMetrics {
                rows_input: 4,
                rows_clean: 4,
                train_rows: 4,
                validation_rows: 4,
                location_groups: 2,
                mae_cr: 0.0,
                r2: 1.0,
            },
        }
    }

    fn is_consistent(generation: &ArtifactGeneration) -> bool {
        let tag = generation.dataset[0].location.as_str();
        generation.model.location_rates.contains_key(tag)
            && generation.encoders.location.contains(tag)
            && generation.dataset.iter().all(|r| r.location == tag)
    }

    #[test]
    fn swap_publishes_and_returns_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = Arc::new(store.commit(tagged_trained("alpha", 10_000.0)).unwrap());
        let b = Arc::new(store.commit(tagged_trained("beta", 20_000.0)).unwrap());
        let reloader = Reloader::new(store.clone(), None);

        assert!(reloader.current().is_none());
        assert!(reloader.swap(Arc::clone(&a)).unwrap().is_none());
        let previous = reloader.swap(Arc::clone(&b)).unwrap().unwrap();

        assert_eq!(previous.id, a.id);
        assert_eq!(reloader.current().unwrap().id, b.id);
        assert_eq!(store.read_live_pointer().unwrap(), Some(b.id.clone()));
    }

    #[test]
    fn invalid_generation_leaves_previous_live() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = Arc::new(store.commit(tagged_trained("alpha", 10_000.0)).unwrap());
        let reloader = Reloader::new(store.clone(), None);
        reloader.swap(Arc::clone(&a)).unwrap();

        let mut broken = (*a).clone();
        broken.id = "broken".to_string();
        broken.dataset.clear();
        let err = reloader.swap(Arc::new(broken)).unwrap_err();

        assert!(matches!(err, ReloadError::Invalid(_)));
        assert_eq!(reloader.current().unwrap().id, a.id);
        assert_eq!(store.read_live_pointer().unwrap(), Some(a.id.clone()));
    }

    #[test]
    fn uncommitted_generation_fails_pointer_update() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = Arc::new(store.commit(tagged_trained("alpha", 10_000.0)).unwrap());
        let reloader = Reloader::new(store.clone(), Some(Arc::clone(&a)));

        let stray = Arc::new(ArtifactGeneration::new(
            tagged_trained("beta", 20_000.0),
            chrono::Utc::now(),
        ));
        let err = reloader.swap(stray).unwrap_err();

        assert!(matches!(err, ReloadError::Pointer(_)));
        assert_eq!(reloader.current().unwrap().id, a.id);
    }

    #[test]
    fn readers_never_observe_a_mixed_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let a = Arc::new(store.commit(tagged_trained("alpha", 10_000.0)).unwrap());
        let b = Arc::new(store.commit(tagged_trained("beta", 20_000.0)).unwrap());
        let reloader = Arc::new(Reloader::new(store, Some(Arc::clone(&a))));

        let writer = {
            let reloader = Arc::clone(&reloader);
            thread::spawn(move || {
                for i in 0..200 {
                    let next = if i % 2 == 0 { &b } else { &a };
                    reloader.swap(Arc::clone(next)).expect("swap");
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let reloader = Arc::clone(&reloader);
                thread::spawn(move || {
                    let mut seen = 0;
                    for _ in 0..250 {
                        let generation = reloader.current().expect("always a live generation");
                        assert!(is_consistent(&generation), "mixed generation {}", generation.id);
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        let samples: usize = readers.into_iter().map(|r| r.join().expect("reader")).sum();
        writer.join().expect("writer");
        assert_eq!(samples, 1000);
    }
}
