//! The training step.

use propintel_core::ListingRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::clean::{clean_records, CleaningRules, TrainingRow};
use crate::encoders::Encoders;
use crate::error::TrainingError;
use crate::model::PriceModel;

/// One in this many rows (by URL hash) is held out for validation.
const HOLDOUT_MODULUS: u8 = 5;

/// Turns raw records into a model. Implementations must be pure: the same
/// records always give the same result and nothing outside is touched.
pub trait Trainer: Send + Sync {
    /// # Errors
    ///
    /// Returns [`TrainingError`] when the records cannot support a model.
    fn train(&self, records: &[ListingRecord]) -> Result<TrainedModel, TrainingError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerOptions {
    pub min_rows: usize,
    pub min_location_count: usize,
    /// Reject models whose holdout R² falls below this.
    pub min_validation_r2: Option<f64>,
    pub rules: CleaningRules,
}

impl Default for TrainerOptions {
    fn default() -> Self {
        Self {
            min_rows: 100,
            min_location_count: 20,
            min_validation_r2: None,
            rules: CleaningRules::default(),
        }
    }
}

/// Holdout evaluation of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    pub rows_input: usize,
    pub rows_clean: usize,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub location_groups: usize,
    /// Mean absolute error on the holdout, in crores.
    pub mae_cr: f64,
    pub r2: f64,
}

/// Everything a new artifact generation is built from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedModel {
    pub model: PriceModel,
    pub encoders: Encoders,
    pub dataset: Vec<TrainingRow>,
    pub metrics: ValidationMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct DefaultTrainer {
    options: TrainerOptions,
}

impl DefaultTrainer {
    #[must_use]
    pub fn new(options: TrainerOptions) -> Self {
        Self { options }
    }
}

impl Trainer for DefaultTrainer {
    fn train(&self, records: &[ListingRecord]) -> Result<TrainedModel, TrainingError> {
        let opts = &self.options;
        let rows = clean_records(records, &opts.rules);
        if rows.len() < opts.min_rows.max(1) {
            return Err(TrainingError::InsufficientRows {
                rows: rows.len(),
                required: opts.min_rows.max(1),
            });
        }
        if !has_variance(&rows) {
            return Err(TrainingError::DegenerateVariance { rows: rows.len() });
        }

        let encoders = Encoders::fit(&rows, opts.min_location_count);

        let (train_rows, validation_rows): (Vec<TrainingRow>, Vec<TrainingRow>) =
            rows.iter().cloned().partition(|r| !is_holdout(&r.url));
        // Tiny datasets can hash entirely to one side; evaluate in-sample then.
        let (fit_rows, eval_rows) = if train_rows.is_empty() || validation_rows.is_empty() {
            tracing::warn!(rows = rows.len(), "train: holdout split is one-sided, evaluating in-sample");
            (&rows, &rows)
        } else {
            (&train_rows, &validation_rows)
        };

        let holdout_model = PriceModel::fit(fit_rows, &encoders)
            .ok_or(TrainingError::InsufficientRows { rows: 0, required: 1 })?;
        let (mae_cr, r2) = evaluate(&holdout_model, &encoders, eval_rows);

        let metrics = ValidationMetrics {
            rows_input: records.len(),
            rows_clean: rows.len(),
            train_rows: fit_rows.len(),
            validation_rows: eval_rows.len(),
            location_groups: encoders.location.classes().len(),
            mae_cr,
            r2,
        };
        tracing::info!(
            rows = metrics.rows_clean,
            train_rows = metrics.train_rows,
            validation_rows = metrics.validation_rows,
            location_groups = metrics.location_groups,
            mae_cr,
            r2,
            "train: holdout metrics"
        );

        if let Some(floor) = opts.min_validation_r2 {
            if r2 < floor {
                return Err(TrainingError::BelowAccuracyFloor { r2, floor });
            }
        }

        // The published model uses every clean row.
        let model = PriceModel::fit(&rows, &encoders)
            .ok_or(TrainingError::InsufficientRows { rows: 0, required: 1 })?;

        Ok(TrainedModel {
            model,
            encoders,
            dataset: rows,
            metrics,
        })
    }
}

fn has_variance(rows: &[TrainingRow]) -> bool {
    let Some(first) = rows.first() else {
        return false;
    };
    rows.iter()
        .any(|r| (r.price_cr - first.price_cr).abs() > f64::EPSILON)
}

/// Deterministic 80/20 split keyed on the URL, stable across runs and
/// independent of row order.
fn is_holdout(url: &str) -> bool {
    Sha256::digest(url.as_bytes())[0] % HOLDOUT_MODULUS == 0
}

#[allow(clippy::cast_precision_loss)]
fn evaluate(model: &PriceModel, encoders: &Encoders, rows: &[TrainingRow]) -> (f64, f64) {
    let n = rows.len() as f64;
    let mean = rows.iter().map(|r| r.price_cr).sum::<f64>() / n;

    let mut abs_err = 0.0;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for row in rows {
        let predicted = model.predict_row(encoders, row);
        let err = row.price_cr - predicted;
        abs_err += err.abs();
        ss_res += err * err;
        ss_tot += (row.price_cr - mean).powi(2);
    }

    let r2 = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else if ss_res == 0.0 {
        1.0
    } else {
        0.0
    };
    (abs_err / n, r2)
}
