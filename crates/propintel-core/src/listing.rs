//! Scraped listing records.
//!
//! A [`ListingRecord`] is written once by the scraper and never mutated
//! afterwards. Every field except `url`, `city` and `scraped_at` is optional
//! because index-page stubs carry only what the URL slug reveals; the detail
//! page (when fetched) fills in the rest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rupees per crore, used to derive price per square foot.
pub const RUPEES_PER_CRORE: f64 = 10_000_000.0;

/// Unit a listing price is quoted in on the source site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceUnit {
    /// Lakh (100,000 rupees). Quoted as "Lac" or "Lakh".
    Lakh,
    /// Crore (10,000,000 rupees). Quoted as "Cr" or "Crore".
    Crore,
}

impl PriceUnit {
    /// Parses the unit suffix shown next to a price, case-insensitively.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "lac" | "lacs" | "lakh" | "lakhs" => Some(Self::Lakh),
            "cr" | "crore" | "crores" => Some(Self::Crore),
            _ => None,
        }
    }

    /// Converts an amount in this unit to crores.
    #[must_use]
    pub fn to_crores(self, amount: f64) -> f64 {
        match self {
            Self::Lakh => amount / 100.0,
            Self::Crore => amount,
        }
    }
}

/// One scraped property listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingRecord {
    /// Canonical listing URL; the de-duplication key.
    pub url: String,
    /// City the listing was collected under.
    pub city: String,
    /// Locality within the city, when known.
    pub location: Option<String>,
    pub property_type: Option<String>,
    pub bedrooms: Option<u32>,
    pub area_sqft: Option<f64>,
    /// Asking price normalized to crores.
    pub price_cr: Option<f64>,
    /// Derived from `price_cr` and `area_sqft`; `None` if either is missing.
    pub price_per_sqft: Option<f64>,
    pub title: Option<String>,
    pub scraped_at: DateTime<Utc>,
}

impl ListingRecord {
    /// Recomputes `price_per_sqft` from `price_cr` and `area_sqft`.
    ///
    /// Called once when a record is assembled, before it is persisted.
    #[must_use]
    pub fn with_derived_fields(mut self) -> Self {
        self.price_per_sqft = match (self.price_cr, self.area_sqft) {
            (Some(price), Some(area)) if area > 0.0 => Some(price * RUPEES_PER_CRORE / area),
            _ => None,
        };
        self
    }
}
