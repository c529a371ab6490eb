//! Stratified median price-per-square-foot estimator.
//!
//! The price of a listing is `area × rate`, where the rate is the median price
//! per square foot of its location group, scaled by a multiplier for its
//! property type. Locations and types the model has not seen fall back to the
//! global median rate and a multiplier of 1.

use std::collections::BTreeMap;

use propintel_core::listing::RUPEES_PER_CRORE;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clean::TrainingRow;
use crate::encoders::Encoders;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceModel {
    /// Median rupees per sq ft over all training rows.
    pub global_rate: f64,
    /// Median rupees per sq ft per location group.
    pub location_rates: BTreeMap<String, f64>,
    /// Median of `row rate / location rate` per property type.
    pub type_multipliers: BTreeMap<String, f64>,
    pub training_rows: usize,
}

impl PriceModel {
    /// Fits the model on `rows`. Location groups come from `encoders`.
    ///
    /// Returns `None` when `rows` is empty.
    #[must_use]
    pub fn fit(rows: &[TrainingRow], encoders: &Encoders) -> Option<Self> {
        let global_rate = median(rows.iter().map(TrainingRow::price_per_sqft).collect())?;

        let mut by_location: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in rows {
            by_location
                .entry(encoders.location_group(&row.location).to_string())
                .or_default()
                .push(row.price_per_sqft());
        }
        let location_rates: BTreeMap<String, f64> = by_location
            .into_iter()
            .filter_map(|(loc, rates)| median(rates).map(|m| (loc, m)))
            .collect();

        let mut by_type: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for row in rows {
            let base = location_rates
                .get(encoders.location_group(&row.location))
                .copied()
                .unwrap_or(global_rate);
            if base > 0.0 {
                by_type
                    .entry(row.property_type.clone())
                    .or_default()
                    .push(row.price_per_sqft() / base);
            }
        }
        let type_multipliers = by_type
            .into_iter()
            .filter_map(|(t, ratios)| median(ratios).map(|m| (t, m)))
            .collect();

        Some(Self {
            global_rate,
            location_rates,
            type_multipliers,
            training_rows: rows.len(),
        })
    }

    /// Predicted asking price in crores.
    #[must_use]
    pub fn predict(
        &self,
        encoders: &Encoders,
        location: &str,
        property_type: &str,
        area_sqft: f64,
    ) -> f64 {
        let rate = self
            .location_rates
            .get(encoders.location_group(location))
            .copied()
            .unwrap_or(self.global_rate);
        let multiplier = self
            .type_multipliers
            .get(property_type)
            .copied()
            .unwrap_or(1.0);
        rate * multiplier * area_sqft / RUPEES_PER_CRORE
    }

    #[must_use]
    pub fn predict_row(&self, encoders: &Encoders, row: &TrainingRow) -> f64 {
        self.predict(encoders, &row.location, &row.property_type, row.area_sqft)
    }

    /// Hex SHA-256 of the model's canonical JSON encoding.
    ///
    /// Map fields are `BTreeMap`s, so equal models always hash equally.
    ///
    /// # Errors
    ///
    /// Returns the encoder's error if the model cannot be serialized.
    pub fn digest(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(location: &str, property_type: &str, area: f64, price: f64) -> TrainingRow {
        TrainingRow {
            url: format!("{location}-{property_type}-{area}-{price}"),
            city: "Pune".to_string(),
            location: location.to_string(),
            property_type: property_type.to_string(),
            bedrooms: 2,
            area_sqft: area,
            price_cr: price,
        }
    }

    fn fixture() -> (Vec<TrainingRow>, Encoders) {
        // Baner apartments at 10k/sqft, villas at 15k/sqft; one Aundh listing.
        let rows = vec![
            row("Baner", "Apartment", 1000.0, 1.0),
            row("Baner", "Apartment", 1000.0, 1.0),
            row("Baner", "Villa", 2000.0, 3.0),
            row("Aundh", "Apartment", 1000.0, 0.8),
        ];
        let encoders = Encoders::fit(&rows, 2);
        (rows, encoders)
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
        assert_eq!(median(vec![f64::NAN]), None);
    }

    #[test]
    fn fit_learns_location_rates_and_type_multipliers() {
        let (rows, encoders) = fixture();
        let model = PriceModel::fit(&rows, &encoders).unwrap();

        assert_eq!(model.location_rates.get("Baner"), Some(&10_000.0));
        assert!((model.location_rates["Other"] - 8_000.0).abs() < 1e-6);
        assert!((model.type_multipliers["Villa"] - 1.5).abs() < 1e-9);
        assert!((model.type_multipliers["Apartment"] - 1.0).abs() < 1e-9);
        assert_eq!(model.training_rows, 4);
    }

    #[test]
    fn predict_scales_by_area_and_type() {
        let (rows, encoders) = fixture();
        let model = PriceModel::fit(&rows, &encoders).unwrap();

        let villa = model.predict(&encoders, "Baner", "Villa", 1000.0);
        assert!((villa - 1.5).abs() < 1e-9);
        let unseen = model.predict(&encoders, "Hinjewadi", "Penthouse", 1000.0);
        assert!((unseen - 0.8).abs() < 1e-9, "unseen location uses Other rate");
    }

    #[test]
    fn fit_on_empty_rows_is_none() {
        assert!(PriceModel::fit(&[], &Encoders::default()).is_none());
    }

    #[test]
    fn digest_is_stable_and_sensitive() {
        let (rows, encoders) = fixture();
        let a = PriceModel::fit(&rows, &encoders).unwrap();
        let b = PriceModel::fit(&rows, &encoders).unwrap();
        let digest = a.digest().unwrap();
        assert_eq!(digest, b.digest().unwrap());
        assert_eq!(digest.len(), 64);
        assert!(digest.bytes().all(|b| b.is_ascii_hexdigit()));

        let mut c = a.clone();
        c.global_rate += 1.0;
        assert_ne!(digest, c.digest().unwrap());
    }
}
