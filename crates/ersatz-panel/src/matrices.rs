//! Immutable matrix bundle produced by the panel builder.
//!
//! The bundle keeps two copies of the predictor data: the unscaled averages
//! (original units, used for interpretation and comparison tables) and the
//! rescaled averages (each predictor divided by its population standard
//! deviation across treated + controls, used by the solver so that no
//! predictor dominates purely through its measurement scale).

use ndarray::{Array1, Array2};

/// Aligned matrices for one treated unit and its control units.
///
/// Built once by [`crate::build_matrices`]; every accessor borrows, nothing
/// here is mutated after construction. Dimensions follow the usual synthetic
/// control notation: K predictors, J control units, T0 pre-treatment periods,
/// T1 post-treatment periods.
#[derive(Debug, Clone)]
pub struct PanelMatrices {
    pub(crate) treated_unit: String,
    pub(crate) control_units: Vec<String>,
    pub(crate) predictor_names: Vec<String>,
    pub(crate) predictor_scales: Array1<f64>,

    pub(crate) treated_predictors: Array1<f64>,
    pub(crate) control_predictors: Array2<f64>,
    pub(crate) scaled_treated_predictors: Array1<f64>,
    pub(crate) scaled_control_predictors: Array2<f64>,

    pub(crate) treated_outcome_before: Array1<f64>,
    pub(crate) treated_outcome_after: Array1<f64>,
    pub(crate) control_outcome_before: Array2<f64>,
    pub(crate) control_outcome_after: Array2<f64>,
}

impl PanelMatrices {
    /// Label of the treated unit.
    pub fn treated_unit(&self) -> &str {
        &self.treated_unit
    }

    /// Control unit labels, in first-seen panel order. Columns of every
    /// control matrix follow this order.
    pub fn control_units(&self) -> &[String] {
        &self.control_units
    }

    /// Predictor names, in table column order. Rows of the predictor
    /// matrices follow this order.
    pub fn predictor_names(&self) -> &[String] {
        &self.predictor_names
    }

    /// Per-predictor population standard deviation used for rescaling.
    pub fn predictor_scales(&self) -> &Array1<f64> {
        &self.predictor_scales
    }

    /// Treated pre-treatment predictor averages in original units (K).
    pub fn treated_predictors(&self) -> &Array1<f64> {
        &self.treated_predictors
    }

    /// Control pre-treatment predictor averages in original units (K x J).
    pub fn control_predictors(&self) -> &Array2<f64> {
        &self.control_predictors
    }

    /// Rescaled treated predictor vector (K), solver input.
    pub fn scaled_treated_predictors(&self) -> &Array1<f64> {
        &self.scaled_treated_predictors
    }

    /// Rescaled control predictor matrix (K x J), solver input.
    pub fn scaled_control_predictors(&self) -> &Array2<f64> {
        &self.scaled_control_predictors
    }

    /// Treated outcome over the pre-treatment periods (T0), ascending time.
    pub fn treated_outcome_before(&self) -> &Array1<f64> {
        &self.treated_outcome_before
    }

    /// Treated outcome over the post-treatment periods (T1), ascending time.
    ///
    /// Not consumed by the solver; kept so callers can compute the gap
    /// between the actual and counterfactual paths.
    pub fn treated_outcome_after(&self) -> &Array1<f64> {
        &self.treated_outcome_after
    }

    /// Control outcomes over the pre-treatment periods (T0 x J).
    pub fn control_outcome_before(&self) -> &Array2<f64> {
        &self.control_outcome_before
    }

    /// Control outcomes over the post-treatment periods (T1 x J).
    pub fn control_outcome_after(&self) -> &Array2<f64> {
        &self.control_outcome_after
    }

    /// Number of predictors K.
    pub fn num_predictors(&self) -> usize {
        self.predictor_names.len()
    }

    /// Number of control units J.
    pub fn num_control_units(&self) -> usize {
        self.control_units.len()
    }

    /// Number of pre-treatment periods T0.
    pub fn pre_periods(&self) -> usize {
        self.treated_outcome_before.len()
    }

    /// Number of post-treatment periods T1.
    pub fn post_periods(&self) -> usize {
        self.treated_outcome_after.len()
    }
}
