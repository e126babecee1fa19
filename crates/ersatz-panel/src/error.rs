//! Error types for panel-to-matrix construction.

use thiserror::Error;

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, PanelError>;

/// Errors that can occur while turning a panel table into matrices.
#[derive(Debug, Error)]
pub enum PanelError {
    /// A required column is missing or has an unusable type
    #[error("column '{column}' {reason}")]
    Schema {
        /// Offending column name
        column: String,
        /// What was wrong with it
        reason: String,
    },

    /// A referenced unit or column does not exist in the table
    #[error("{kind} '{name}' not found in the panel")]
    NotFound {
        /// What kind of thing was looked up ("treated unit", "excluded column")
        kind: &'static str,
        /// The name that was looked up
        name: String,
    },

    /// The panel is unbalanced: a unit's period count differs from the treated unit's
    #[error(
        "unbalanced panel: unit '{unit}' has {actual} {regime} periods, expected {expected}"
    )]
    Shape {
        /// Unit whose row count disagrees
        unit: String,
        /// "pre-treatment" or "post-treatment"
        regime: &'static str,
        /// Period count implied by the treated unit
        expected: usize,
        /// Period count actually observed
        actual: usize,
    },

    /// The panel cannot support estimation at all (no predictors, no
    /// control units, or duplicate time periods within a unit)
    #[error("degenerate panel: {reason}")]
    Degenerate {
        /// What makes the panel unusable
        reason: String,
    },

    /// A predictor has (near-)zero variance across treated and control units,
    /// so it cannot discriminate between units and rescaling would divide by zero
    #[error("predictor '{predictor}' has zero variance across treated and control units")]
    ZeroVariance {
        /// The degenerate predictor
        predictor: String,
    },

    /// Underlying polars error
    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}
