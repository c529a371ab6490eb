//! Shared types and configuration for the PropIntel data-refresh pipeline.

pub mod app_config;
pub mod config;
pub mod listing;
pub mod trigger;

use thiserror::Error;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use listing::{ListingRecord, PriceUnit};
pub use trigger::{TriggerError, WeeklyTrigger};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
