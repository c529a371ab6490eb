//! The scrape and train steps as the orchestrator sees them.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use propintel_core::AppConfig;
use propintel_scraper::{
    Coordinator, DelayWindow, Fetcher, IncrementalStore, ListingSource, MagicBricksSource,
    ScrapeSummary,
};
use propintel_trainer::{
    listings_file_name, load_dataset, ArtifactGeneration, ArtifactStore, Trainer,
};
use uuid::Uuid;

use crate::error::{ScrapeError, TrainStepError};

/// Collects a fresh batch of listings into the raw dataset.
pub trait ScrapeStep: Send + Sync + 'static {
    fn scrape(
        &self,
        run_id: Uuid,
    ) -> impl Future<Output = Result<ScrapeSummary, ScrapeError>> + Send;
}

/// Production scrape step: one coordinated run into a new
/// `listings-<timestamp>.jsonl` file.
#[derive(Debug)]
pub struct ScrapeJob<S = MagicBricksSource> {
    coordinator: Coordinator<S>,
    data_dir: PathBuf,
    cities: Vec<String>,
    pages_per_city: u32,
    worker_count: usize,
}

impl<S: ListingSource> ScrapeJob<S> {
    #[must_use]
    pub fn new(
        coordinator: Coordinator<S>,
        data_dir: PathBuf,
        cities: Vec<String>,
        pages_per_city: u32,
        worker_count: usize,
    ) -> Self {
        Self {
            coordinator,
            data_dir,
            cities,
            pages_per_city,
            worker_count,
        }
    }
}

impl ScrapeJob<MagicBricksSource> {
    /// Builds the HTTP scrape job from application config.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Source`] if the HTTP client cannot be built or
    /// the base URL is invalid.
    pub fn from_config(config: &AppConfig) -> Result<Self, ScrapeError> {
        let fetcher = Fetcher::new(
            config.scraper_request_timeout_secs,
            DelayWindow::new(config.scraper_delay_min_ms, config.scraper_delay_max_ms),
        )?;
        let source = MagicBricksSource::new(
            fetcher,
            &config.scraper_base_url,
            config.scraper_max_listings_per_page,
        )?;
        Ok(Self::new(
            Coordinator::new(
                source,
                config.scraper_pages_per_partition,
                config.scraper_enable_details,
            ),
            config.data_dir.clone(),
            config.scraper_cities.clone(),
            config.scraper_pages_per_city,
            config.scraper_worker_count,
        ))
    }
}

impl<S: ListingSource> ScrapeStep for ScrapeJob<S> {
    async fn scrape(&self, run_id: Uuid) -> Result<ScrapeSummary, ScrapeError> {
        let path = self.data_dir.join(listings_file_name(Utc::now()));
        let store = Arc::new(IncrementalStore::open(&path).await?);
        tracing::info!(run_id = %run_id, path = %path.display(), "pipeline: scraping");
        Ok(self
            .coordinator
            .run(&store, &self.cities, self.pages_per_city, self.worker_count)
            .await)
    }
}

/// Loads the raw dataset, trains on it and commits a new generation.
///
/// Blocking; the orchestrator runs it on the blocking pool.
///
/// # Errors
///
/// Returns [`TrainStepError`] wrapping the first failing stage.
pub fn train_generation<T: Trainer + ?Sized>(
    trainer: &T,
    data_dir: &Path,
    artifacts: &ArtifactStore,
) -> Result<ArtifactGeneration, TrainStepError> {
    let dataset = load_dataset(data_dir)?;
    let trained = trainer.train(&dataset.records)?;
    Ok(artifacts.commit(trained)?)
}
