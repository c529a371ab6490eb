//! Categorical encoders.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::clean::TrainingRow;

/// Bucket for locations with too few listings to price on their own.
pub const OTHER_LOCATION: &str = "Other";

/// Maps each class to its index in sorted class order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

impl LabelEncoder {
    /// Fits on the distinct values of `values`, sorted.
    pub fn fit<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self {
            classes: classes.into_iter().map(ToOwned::to_owned).collect(),
        }
    }

    #[must_use]
    pub fn encode(&self, value: &str) -> Option<usize> {
        self.classes
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }

    #[must_use]
    pub fn decode(&self, index: usize) -> Option<&str> {
        self.classes.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.encode(value).is_some()
    }
}

/// Encoders for the two categorical features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encoders {
    /// Location groups: every location with at least `min_location_count`
    /// listings, plus [`OTHER_LOCATION`].
    pub location: LabelEncoder,
    pub property_type: LabelEncoder,
    pub min_location_count: usize,
}

impl Encoders {
    #[must_use]
    pub fn fit(rows: &[TrainingRow], min_location_count: usize) -> Self {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for row in rows {
            *counts.entry(row.location.as_str()).or_default() += 1;
        }
        let groups = counts
            .into_iter()
            .filter(|(_, n)| *n >= min_location_count)
            .map(|(loc, _)| loc)
            .chain(std::iter::once(OTHER_LOCATION));

        Self {
            location: LabelEncoder::fit(groups),
            property_type: LabelEncoder::fit(rows.iter().map(|r| r.property_type.as_str())),
            min_location_count,
        }
    }

    /// The group a raw location falls into.
    #[must_use]
    pub fn location_group<'a>(&'a self, location: &'a str) -> &'a str {
        if self.location.contains(location) {
            location
        } else {
            OTHER_LOCATION
        }
    }
}
