use std::net::SocketAddr;
use std::path::PathBuf;

use crate::trigger::WeeklyTrigger;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

/// Process-wide configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub bind_addr: SocketAddr,
    pub log_level: String,

    /// Directory holding the per-run `listings-*.jsonl` files.
    pub data_dir: PathBuf,
    /// Directory holding artifact generations and the `LIVE` pointer.
    pub model_dir: PathBuf,
    /// Directory holding the `runs.jsonl` job history.
    pub log_dir: PathBuf,

    /// Search-results URL the per-city index pages are built from.
    pub scraper_base_url: String,
    pub scraper_cities: Vec<String>,
    pub scraper_pages_per_city: u32,
    pub scraper_pages_per_partition: u32,
    pub scraper_worker_count: usize,
    pub scraper_enable_details: bool,
    pub scraper_max_listings_per_page: usize,
    pub scraper_request_timeout_secs: u64,
    pub scraper_delay_min_ms: u64,
    pub scraper_delay_max_ms: u64,

    pub trigger: WeeklyTrigger,

    /// A scrape writing fewer records than this fails the scrape step.
    pub pipeline_min_scrape_records: u64,
    pub trainer_min_rows: usize,
    pub trainer_min_location_count: usize,
    pub trainer_min_validation_r2: Option<f64>,
}
