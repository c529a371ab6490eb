//! Parallel scrape coordination.
//!
//! A run splits every city's page range into [`ScrapePartition`]s and drives
//! them through a bounded pool of spawned tasks. Partitions are independent:
//! one that fails (fetch error, blocked page, store error, even a panic) is
//! recorded in the [`ScrapeSummary`] and the rest carry on.

use std::fmt;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use propintel_core::ListingRecord;
use serde::{Deserialize, Serialize};

use crate::error::PartitionError;
use crate::source::ListingSource;
use crate::store::IncrementalStore;

/// A contiguous page range of one city's search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapePartition {
    pub city: String,
    pub first_page: u32,
    pub last_page: u32,
}

impl ScrapePartition {
    #[must_use]
    pub fn pages(&self) -> RangeInclusive<u32> {
        self.first_page..=self.last_page
    }
}

impl fmt::Display for ScrapePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pages {}-{}", self.city, self.first_page, self.last_page)
    }
}

/// Splits pages `1..=pages_per_city` of every city into partitions of at most
/// `pages_per_partition` consecutive pages, in city order.
#[must_use]
pub fn plan_partitions(
    cities: &[String],
    pages_per_city: u32,
    pages_per_partition: u32,
) -> Vec<ScrapePartition> {
    let step = pages_per_partition.max(1);
    let mut partitions = Vec::new();
    for city in cities {
        let mut first = 1;
        while first <= pages_per_city {
            let last = first.saturating_add(step - 1).min(pages_per_city);
            partitions.push(ScrapePartition {
                city: city.clone(),
                first_page: first,
                last_page: last,
            });
            first = last + 1;
        }
    }
    partitions
}

/// A partition that ended early.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFailure {
    pub partition: ScrapePartition,
    /// Records the partition had already appended before it failed. They stay
    /// in the dataset.
    pub records_written: u64,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// How many written records carry each field the trainer needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCompletion {
    pub with_price: u64,
    pub with_area: u64,
    pub with_location: u64,
    pub with_bedrooms: u64,
}

#[derive(Debug, Default)]
struct CompletionCounters {
    price: AtomicU64,
    area: AtomicU64,
    location: AtomicU64,
    bedrooms: AtomicU64,
}

impl CompletionCounters {
    fn observe(&self, record: &ListingRecord) {
        for (counter, present) in [
            (&self.price, record.price_cr.is_some()),
            (&self.area, record.area_sqft.is_some()),
            (&self.location, record.location.is_some()),
            (&self.bedrooms, record.bedrooms.is_some()),
        ] {
            if present {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> FieldCompletion {
        FieldCompletion {
            with_price: self.price.load(Ordering::Relaxed),
            with_area: self.area.load(Ordering::Relaxed),
            with_location: self.location.load(Ordering::Relaxed),
            with_bedrooms: self.bedrooms.load(Ordering::Relaxed),
        }
    }
}

/// Result of one coordinated scrape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeSummary {
    pub records_written: u64,
    pub partitions_total: usize,
    pub partitions_succeeded: usize,
    pub partitions_failed: usize,
    pub failures: Vec<PartitionFailure>,
    pub completion: FieldCompletion,
}

/// Fans partitions out over a bounded worker pool.
#[derive(Debug)]
pub struct Coordinator<S> {
    source: Arc<S>,
    pages_per_partition: u32,
    enable_details: bool,
}

impl<S: ListingSource> Coordinator<S> {
    #[must_use]
    pub fn new(source: S, pages_per_partition: u32, enable_details: bool) -> Self {
        Self {
            source: Arc::new(source),
            pages_per_partition,
            enable_details,
        }
    }

    /// Scrapes `pages_per_city` pages of every city into `store` using at
    /// most `worker_count` concurrent tasks.
    ///
    /// Resolves once every partition has either finished or failed; it never
    /// returns early and never errors. Callers judge the outcome from the
    /// returned [`ScrapeSummary`].
    pub async fn run(
        &self,
        store: &Arc<IncrementalStore>,
        cities: &[String],
        pages_per_city: u32,
        worker_count: usize,
    ) -> ScrapeSummary {
        let partitions = plan_partitions(cities, pages_per_city, self.pages_per_partition);
        let partitions_total = partitions.len();
        let completion = Arc::new(CompletionCounters::default());
        let started = Instant::now();

        tracing::info!(
            partitions = partitions_total,
            cities = cities.len(),
            pages_per_city,
            worker_count,
            "scrape: starting run"
        );

        let outcomes: Vec<(ScrapePartition, u64, Option<PartitionError>)> =
            stream::iter(partitions)
                .map(|partition| {
                    let written = Arc::new(AtomicU64::new(0));
                    let handle = tokio::spawn(scrape_partition(
                        Arc::clone(&self.source),
                        Arc::clone(store),
                        partition.clone(),
                        self.enable_details,
                        Arc::clone(&written),
                        Arc::clone(&completion),
                    ));
                    async move {
                        let error = match handle.await {
                            Ok(Ok(())) => None,
                            Ok(Err(e)) => Some(e),
                            Err(join_err) => Some(PartitionError::Aborted(join_err.to_string())),
                        };
                        (partition, written.load(Ordering::Relaxed), error)
                    }
                })
                .buffer_unordered(worker_count.max(1))
                .collect()
                .await;

        let mut summary = ScrapeSummary {
            partitions_total,
            ..ScrapeSummary::default()
        };
        for (partition, records, error) in outcomes {
            summary.records_written += records;
            match error {
                None => {
                    summary.partitions_succeeded += 1;
                    tracing::info!(
                        city = %partition.city,
                        pages = %format!("{}-{}", partition.first_page, partition.last_page),
                        records,
                        "scrape: partition complete"
                    );
                }
                Some(e) => {
                    summary.partitions_failed += 1;
                    tracing::warn!(
                        city = %partition.city,
                        pages = %format!("{}-{}", partition.first_page, partition.last_page),
                        records_written = records,
                        error = %e,
                        "scrape: partition failed"
                    );
                    summary.failures.push(PartitionFailure {
                        partition,
                        records_written: records,
                        error: e.to_string(),
                        failed_at: Utc::now(),
                    });
                }
            }
        }
        summary.completion = completion.snapshot();

        tracing::info!(
            records_written = summary.records_written,
            partitions_succeeded = summary.partitions_succeeded,
            partitions_failed = summary.partitions_failed,
            with_price = summary.completion.with_price,
            with_area = summary.completion.with_area,
            with_location = summary.completion.with_location,
            with_bedrooms = summary.completion.with_bedrooms,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "scrape: run complete"
        );
        summary
    }
}

async fn scrape_partition<S: ListingSource>(
    source: Arc<S>,
    store: Arc<IncrementalStore>,
    partition: ScrapePartition,
    enable_details: bool,
    written: Arc<AtomicU64>,
    completion: Arc<CompletionCounters>,
) -> Result<(), PartitionError> {
    for page in partition.pages() {
        let stubs = source.index_page(&partition.city, page).await?;
        if stubs.is_empty() {
            tracing::debug!(city = %partition.city, page, "scrape: empty page, end of results");
            break;
        }

        for stub in stubs {
            let detail = if enable_details {
                match source.detail(&stub).await {
                    Ok(detail) => Some(detail),
                    Err(e) => {
                        tracing::warn!(
                            url = %stub.url,
                            error = %e,
                            "scrape: detail page failed, keeping index fields only"
                        );
                        None
                    }
                }
            } else {
                None
            };

            let record = stub.into_record(detail, Utc::now());
            store.append(&record).await?;
            written.fetch_add(1, Ordering::Relaxed);
            completion.observe(&record);
        }
    }
    Ok(())
}
