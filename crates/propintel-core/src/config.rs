use crate::app_config::{AppConfig, Environment};
use crate::trigger::WeeklyTrigger;
use crate::ConfigError;

const DEFAULT_BASE_URL: &str =
    "https://www.magicbricks.com/property-for-sale/residential-real-estate";

const DEFAULT_CITIES: &str =
    "Delhi-NCR,Bangalore,Mumbai,Hyderabad,Pune,Chennai,Kolkata,Ahmedabad,Jaipur,Indore";

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a value is present but invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// Every variable has a default; only malformed values fail.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::str::FromStr;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let invalid = |var: &str, reason: String| ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason,
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        u64::from_str(raw.trim()).map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        u32::from_str(raw.trim()).map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        usize::from_str(raw.trim()).map_err(|e| invalid(var, e.to_string()))
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        match or_default(var, default).trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(invalid(var, format!("expected a boolean, got \"{other}\""))),
        }
    };

    let env = parse_environment(&or_default("PROPINTEL_ENV", "development"))?;

    let bind_addr = or_default("PROPINTEL_BIND_ADDR", "0.0.0.0:8000")
        .parse::<SocketAddr>()
        .map_err(|e| invalid("PROPINTEL_BIND_ADDR", e.to_string()))?;
    let log_level = or_default("PROPINTEL_LOG_LEVEL", "info");

    let data_dir = PathBuf::from(or_default("PROPINTEL_DATA_DIR", "/data/raw"));
    let model_dir = PathBuf::from(or_default("PROPINTEL_MODEL_DIR", "/data/models"));
    let log_dir = PathBuf::from(or_default("PROPINTEL_LOG_DIR", "/data/logs"));

    let scraper_base_url = or_default("PROPINTEL_BASE_URL", DEFAULT_BASE_URL);
    let scraper_cities: Vec<String> = or_default("PROPINTEL_CITIES", DEFAULT_CITIES)
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();
    if scraper_cities.is_empty() {
        return Err(invalid("PROPINTEL_CITIES", "at least one city is required".into()));
    }

    let scraper_pages_per_city = parse_u32("PROPINTEL_PAGES_PER_CITY", "15")?;
    let scraper_pages_per_partition = parse_u32("PROPINTEL_PAGES_PER_PARTITION", "5")?;
    let scraper_worker_count = parse_usize("PROPINTEL_WORKER_COUNT", "2")?;
    let scraper_enable_details = parse_bool("PROPINTEL_ENABLE_DETAILS", "true")?;
    let scraper_max_listings_per_page = parse_usize("PROPINTEL_MAX_LISTINGS_PER_PAGE", "100")?;
    let scraper_request_timeout_secs = parse_u64("PROPINTEL_REQUEST_TIMEOUT_SECS", "20")?;
    let scraper_delay_min_ms = parse_u64("PROPINTEL_DELAY_MIN_MS", "500")?;
    let scraper_delay_max_ms = parse_u64("PROPINTEL_DELAY_MAX_MS", "2000")?;

    for (var, is_zero) in [
        ("PROPINTEL_PAGES_PER_CITY", scraper_pages_per_city == 0),
        ("PROPINTEL_PAGES_PER_PARTITION", scraper_pages_per_partition == 0),
        ("PROPINTEL_WORKER_COUNT", scraper_worker_count == 0),
        ("PROPINTEL_REQUEST_TIMEOUT_SECS", scraper_request_timeout_secs == 0),
    ] {
        if is_zero {
            return Err(invalid(var, "must be at least 1".into()));
        }
    }
    if scraper_delay_min_ms > scraper_delay_max_ms {
        return Err(invalid(
            "PROPINTEL_DELAY_MIN_MS",
            format!(
                "delay window is inverted: min {scraper_delay_min_ms}ms > max {scraper_delay_max_ms}ms"
            ),
        ));
    }

    let trigger = WeeklyTrigger::parse(
        &or_default("PROPINTEL_TRIGGER_WEEKDAY", "SUN"),
        &or_default("PROPINTEL_TRIGGER_TIME", "02:00"),
        &or_default("PROPINTEL_TRIGGER_UTC_OFFSET", "+00:00"),
    )
    .map_err(|e| invalid("PROPINTEL_TRIGGER_*", e.to_string()))?;

    let pipeline_min_scrape_records = parse_u64("PROPINTEL_MIN_SCRAPE_RECORDS", "50")?;
    let trainer_min_rows = parse_usize("PROPINTEL_MIN_TRAINING_ROWS", "100")?;
    let trainer_min_location_count = parse_usize("PROPINTEL_MIN_LOCATION_COUNT", "20")?;
    let trainer_min_validation_r2 = match lookup("PROPINTEL_MIN_VALIDATION_R2") {
        Ok(raw) if !raw.trim().is_empty() => Some(
            raw.trim()
                .parse::<f64>()
                .map_err(|e| invalid("PROPINTEL_MIN_VALIDATION_R2", e.to_string()))?,
        ),
        _ => None,
    };

    Ok(AppConfig {
        env,
        bind_addr,
        log_level,
        data_dir,
        model_dir,
        log_dir,
        scraper_base_url,
        scraper_cities,
        scraper_pages_per_city,
        scraper_pages_per_partition,
        scraper_worker_count,
        scraper_enable_details,
        scraper_max_listings_per_page,
        scraper_request_timeout_secs,
        scraper_delay_min_ms,
        scraper_delay_max_ms,
        trigger,
        pipeline_min_scrape_records,
        trainer_min_rows,
        trainer_min_location_count,
        trainer_min_validation_r2,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnvVar` for anything other than
/// `development`, `test` or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "PROPINTEL_ENV".to_string(),
            reason: format!("unknown environment \"{other}\""),
        }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
