//! Error types for the bi-level solver.

use thiserror::Error;

/// Result type for solver operations.
pub type Result<T> = std::result::Result<T, SolverError>;

/// Errors that can occur during bi-level optimization.
///
/// Any of these aborts the whole `estimate` call; no partial importance or
/// weight vector is ever returned. The only recoverable condition, a failed
/// inner weight solve inside a single basin hop, is handled internally by
/// discarding the hop.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Inner quadratic program ran out of iterations
    #[error(
        "weight QP did not converge within {iterations} iterations (residual {residual:.3e})"
    )]
    NonConvergence {
        /// Iterations spent
        iterations: usize,
        /// Final iterate movement
        residual: f64,
    },

    /// Solution violates the simplex constraints beyond tolerance
    #[error("weight vector infeasible: {reason}")]
    Infeasible {
        /// Which constraint failed and by how much
        reason: String,
    },

    /// Every basin hop was discarded without producing a usable loss
    #[error("global search exhausted all {hops} hops without a usable loss")]
    SearchExhausted {
        /// Hop budget that was spent
        hops: usize,
    },

    /// Caller-supplied importance vector is unusable
    #[error("invalid importance vector: {reason}")]
    InvalidImportance {
        /// Why the vector was rejected
        reason: String,
    },

    /// Matrix dimensions disagree
    #[error("dimension mismatch: {context} expected {expected}, got {actual}")]
    Dimension {
        /// Which input disagreed
        context: &'static str,
        /// Expected extent
        expected: usize,
        /// Observed extent
        actual: usize,
    },

    /// Solver configuration is out of range
    #[error("invalid solver configuration: {0}")]
    Config(String),
}
