//! The synthetic control estimator.
//!
//! `SyntheticControl` composes the panel builder and the bi-level solver:
//! construction validates the panel and builds the immutable matrix bundle,
//! `estimate` runs the optimization and returns a value object with the
//! solved weights keyed by unit and predictor names. There is no inheritance
//! between the pieces and no partially initialized state; a construction
//! error never leaves a half-built estimator behind.

use ersatz_panel::{PanelError, PanelMatrices, PanelSpec, build_matrices};
use ersatz_solve::{Solution, SolverConfig, SolverError};
use ndarray::Array1;
use polars::prelude::DataFrame;
use thiserror::Error;

/// Result type for estimator operations.
pub type Result<T> = std::result::Result<T, EstimatorError>;

/// Errors from estimator construction or estimation.
#[derive(Debug, Error)]
pub enum EstimatorError {
    /// Panel validation or matrix construction failed
    #[error(transparent)]
    Panel(#[from] PanelError),

    /// The bi-level solver failed
    #[error(transparent)]
    Solver(#[from] SolverError),
}

/// Synthetic control estimator for one treated unit.
///
/// Holds the immutable matrix bundle and the solver configuration; both are
/// fixed at construction, so a `SyntheticControl` can be shared across
/// threads and `estimate` called concurrently (each call is a pure function
/// of the held state and its seed).
#[derive(Debug, Clone)]
pub struct SyntheticControl {
    matrices: PanelMatrices,
    config: SolverConfig,
}

impl SyntheticControl {
    /// Validate the panel and build the matrices. No optimization runs yet.
    ///
    /// # Errors
    /// Any [`PanelError`]: schema problems, missing treated unit or excluded
    /// column, unbalanced panel, zero-variance predictor.
    pub fn new(data: &DataFrame, spec: &PanelSpec) -> Result<Self> {
        let matrices = build_matrices(data, spec)?;
        Ok(Self { matrices, config: SolverConfig::default() })
    }

    /// Replace the default solver configuration.
    #[must_use]
    pub fn with_config(mut self, config: SolverConfig) -> Self {
        self.config = config;
        self
    }

    /// The matrix bundle, for diagnostics and presentation.
    pub const fn matrices(&self) -> &PanelMatrices {
        &self.matrices
    }

    /// The active solver configuration.
    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Run the full bi-level optimization: search for the importance vector,
    /// solve the weight QP at the winner, and project the counterfactual.
    ///
    /// # Errors
    /// Any [`SolverError`]; no partial result is returned on failure.
    pub fn estimate(&self) -> Result<Estimate> {
        let m = &self.matrices;
        let solution = ersatz_solve::estimate(
            m.scaled_treated_predictors().view(),
            m.scaled_control_predictors().view(),
            m.treated_outcome_before().view(),
            m.control_outcome_before().view(),
            m.control_outcome_after().view(),
            &self.config,
        )?;
        Ok(self.wrap(solution))
    }

    /// Solve only the inner weight QP at a caller-supplied importance
    /// vector, skipping the outer search. Entries must lie in `[0, 1]` and
    /// follow the panel's predictor order.
    ///
    /// # Errors
    /// [`SolverError::InvalidImportance`] for out-of-box entries, plus
    /// anything the inner QP can raise.
    pub fn estimate_with_importance(&self, importance: &[f64]) -> Result<Estimate> {
        let m = &self.matrices;
        let solution = ersatz_solve::estimate_with_importance(
            importance,
            m.scaled_treated_predictors().view(),
            m.scaled_control_predictors().view(),
            m.treated_outcome_before().view(),
            m.control_outcome_before().view(),
            m.control_outcome_after().view(),
            &self.config,
        )?;
        Ok(self.wrap(solution))
    }

    fn wrap(&self, solution: Solution) -> Estimate {
        Estimate {
            control_units: self.matrices.control_units().to_vec(),
            predictor_names: self.matrices.predictor_names().to_vec(),
            solution,
        }
    }
}

/// Immutable result of one `estimate` call.
#[derive(Debug, Clone)]
pub struct Estimate {
    control_units: Vec<String>,
    predictor_names: Vec<String>,
    solution: Solution,
}

impl Estimate {
    /// Control unit weights keyed by unit id, in build order.
    pub fn control_unit_weights(&self) -> impl Iterator<Item = (&str, f64)> {
        self.control_units
            .iter()
            .map(String::as_str)
            .zip(self.solution.weights.iter().copied())
    }

    /// Predictor importance keyed by predictor name, in table column order.
    pub fn predictor_importance(&self) -> impl Iterator<Item = (&str, f64)> {
        self.predictor_names
            .iter()
            .map(String::as_str)
            .zip(self.solution.importance.iter().copied())
    }

    /// Raw weight vector (J), aligned with the control unit order.
    pub const fn weights(&self) -> &Array1<f64> {
        &self.solution.weights
    }

    /// Raw importance vector (K), aligned with the predictor order.
    pub const fn importance(&self) -> &Array1<f64> {
        &self.solution.importance
    }

    /// Estimated post-treatment counterfactual outcome path (T1).
    pub const fn counterfactual(&self) -> &Array1<f64> {
        &self.solution.counterfactual
    }

    /// Pre-treatment outcome mean squared error at the returned weights.
    pub const fn loss(&self) -> f64 {
        self.solution.loss
    }
}
