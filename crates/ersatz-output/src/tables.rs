//! Table construction from estimator outputs.
//!
//! Weight-style tables round to two decimals because they are read by
//! humans; the rounding happens on a copy, never on the stored vectors.
//! The predictor comparison uses unscaled values throughout: the point of
//! that table is interpretation in original units, not the solver's
//! rescaled internal units.

use ndarray::{ArrayView1, ArrayView2};
use polars::prelude::*;
use thiserror::Error;

/// Result type for presentation operations.
pub type Result<T> = std::result::Result<T, PresenterError>;

/// Errors that can occur while building tables.
#[derive(Debug, Error)]
pub enum PresenterError {
    /// Labels and values disagree in length
    #[error("table input mismatch: {labels} labels vs {values} values")]
    LengthMismatch {
        /// Number of labels supplied
        labels: usize,
        /// Number of values supplied
        values: usize,
    },

    /// Underlying polars error
    #[error("polars error: {0}")]
    Polars(#[from] PolarsError),
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Control unit labels with their solved weights, rounded for display.
pub fn weight_table(
    control_units: &[String],
    weights: ArrayView1<'_, f64>,
) -> Result<DataFrame> {
    if control_units.len() != weights.len() {
        return Err(PresenterError::LengthMismatch {
            labels: control_units.len(),
            values: weights.len(),
        });
    }
    let rounded: Vec<f64> = weights.iter().map(|&w| round2(w)).collect();
    Ok(df!(
        "unit" => control_units.to_vec(),
        "weight" => rounded,
    )?)
}

/// Predictor names with their solved importance, rounded for display.
pub fn importance_table(
    predictors: &[String],
    importance: ArrayView1<'_, f64>,
) -> Result<DataFrame> {
    if predictors.len() != importance.len() {
        return Err(PresenterError::LengthMismatch {
            labels: predictors.len(),
            values: importance.len(),
        });
    }
    let rounded: Vec<f64> = importance.iter().map(|&v| round2(v)).collect();
    Ok(df!(
        "predictor" => predictors.to_vec(),
        "importance" => rounded,
    )?)
}

/// Treated vs. synthetic predictor averages in original units.
///
/// `treated` and `controls` must be the UNSCALED predictor matrices; the
/// synthetic column is the weight-blend of the unscaled control matrix.
pub fn predictor_comparison(
    predictors: &[String],
    treated: ArrayView1<'_, f64>,
    controls: ArrayView2<'_, f64>,
    weights: ArrayView1<'_, f64>,
) -> Result<DataFrame> {
    if predictors.len() != treated.len() || controls.nrows() != treated.len() {
        return Err(PresenterError::LengthMismatch {
            labels: predictors.len(),
            values: treated.len(),
        });
    }
    if controls.ncols() != weights.len() {
        return Err(PresenterError::LengthMismatch {
            labels: controls.ncols(),
            values: weights.len(),
        });
    }
    let synthetic = controls.dot(&weights);
    Ok(df!(
        "predictor" => predictors.to_vec(),
        "treated" => treated.to_vec(),
        "synthetic" => synthetic.to_vec(),
    )?)
}

/// Post-treatment actual vs. counterfactual outcome path and their gap.
///
/// Periods are numbered from 1 starting at the treatment cutoff.
pub fn outcome_comparison(
    actual: ArrayView1<'_, f64>,
    counterfactual: ArrayView1<'_, f64>,
) -> Result<DataFrame> {
    if actual.len() != counterfactual.len() {
        return Err(PresenterError::LengthMismatch {
            labels: actual.len(),
            values: counterfactual.len(),
        });
    }
    let periods: Vec<u32> = (1..=actual.len() as u32).collect();
    let gap: Vec<f64> = actual
        .iter()
        .zip(counterfactual.iter())
        .map(|(a, c)| a - c)
        .collect();
    Ok(df!(
        "period" => periods,
        "actual" => actual.to_vec(),
        "synthetic" => counterfactual.to_vec(),
        "gap" => gap,
    )?)
}
