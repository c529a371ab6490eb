//! Cleaning raw listing records into training rows.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use propintel_core::listing::RUPEES_PER_CRORE;
use propintel_core::ListingRecord;
use serde::{Deserialize, Serialize};

/// Property type used when a listing does not say.
pub const UNKNOWN_PROPERTY_TYPE: &str = "Unknown";

/// Plausibility bounds; anything outside is treated as a parsing artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct CleaningRules {
    pub bedrooms: RangeInclusive<u32>,
    pub area_sqft: RangeInclusive<f64>,
    pub price_cr: RangeInclusive<f64>,
}

impl Default for CleaningRules {
    fn default() -> Self {
        Self {
            bedrooms: 1..=5,
            area_sqft: 300.0..=10_000.0,
            price_cr: 0.3..=50.0,
        }
    }
}

/// A listing with every field the model needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRow {
    pub url: String,
    pub city: String,
    pub location: String,
    pub property_type: String,
    pub bedrooms: u32,
    pub area_sqft: f64,
    pub price_cr: f64,
}

impl TrainingRow {
    #[must_use]
    pub fn price_per_sqft(&self) -> f64 {
        self.price_cr * RUPEES_PER_CRORE / self.area_sqft
    }
}

/// Drops incomplete and out-of-range records and de-duplicates by URL
/// (first occurrence wins). Input order is preserved.
#[must_use]
pub fn clean_records(records: &[ListingRecord], rules: &CleaningRules) -> Vec<TrainingRow> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut rows = Vec::new();
    let mut dropped_incomplete = 0usize;
    let mut dropped_range = 0usize;
    let mut dropped_duplicate = 0usize;

    for record in records {
        let (Some(location), Some(bedrooms), Some(area_sqft), Some(price_cr)) = (
            record.location.as_deref().map(str::trim).filter(|l| !l.is_empty()),
            record.bedrooms,
            record.area_sqft,
            record.price_cr,
        ) else {
            dropped_incomplete += 1;
            continue;
        };

        if !rules.bedrooms.contains(&bedrooms)
            || !rules.area_sqft.contains(&area_sqft)
            || !rules.price_cr.contains(&price_cr)
        {
            dropped_range += 1;
            continue;
        }

        if !seen.insert(record.url.as_str()) {
            dropped_duplicate += 1;
            continue;
        }

        rows.push(TrainingRow {
            url: record.url.clone(),
            city: record.city.clone(),
            location: location.to_string(),
            property_type: record
                .property_type
                .clone()
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_PROPERTY_TYPE.to_string()),
            bedrooms,
            area_sqft,
            price_cr,
        });
    }

    tracing::info!(
        input = records.len(),
        kept = rows.len(),
        dropped_incomplete,
        dropped_range,
        dropped_duplicate,
        "train: cleaned dataset"
    );
    rows
}
