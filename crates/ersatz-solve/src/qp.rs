//! Inner level: weight QP over the probability simplex.
//!
//! For a fixed importance vector V the unit-matching objective
//!
//! ```text
//! f(W) = (Xt - Xc W)' diag(V) (Xt - Xc W)
//! ```
//!
//! is convex quadratic in W, and the constraint set `sum(W) = 1`,
//! `0 <= W_j <= 1` is exactly the probability simplex (the upper bound is
//! implied by the equality and nonnegativity). Projected gradient descent
//! with a fixed `1/L` step therefore converges to the global optimum: take
//! a gradient step, project back onto the simplex, repeat until the iterate
//! stops moving.

use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::simplex;
use ndarray::{Array1, ArrayView1, ArrayView2};

/// Component-wise box tolerance certified on the returned weights.
pub const WEIGHT_BOX_TOL: f64 = 1e-6;
/// Tolerance on `sum(W) - 1` certified on the returned weights.
pub const WEIGHT_SUM_TOL: f64 = 1e-4;

/// Solve the inner weight QP for a fixed importance vector.
///
/// `treated_predictors` is the rescaled K-vector, `control_predictors` the
/// rescaled K x J matrix. Starts from uniform weights.
///
/// # Errors
///
/// * [`SolverError::Dimension`] - input extents disagree
/// * [`SolverError::InvalidImportance`] - V has a negative or non-finite entry
/// * [`SolverError::NonConvergence`] - iteration cap reached, with the final
///   iterate movement as the residual
/// * [`SolverError::Infeasible`] - the converged point violates the simplex
///   constraints beyond tolerance
pub fn solve_weights(
    importance: ArrayView1<'_, f64>,
    treated_predictors: ArrayView1<'_, f64>,
    control_predictors: ArrayView2<'_, f64>,
    config: &SolverConfig,
) -> Result<Array1<f64>> {
    let (k, j) = control_predictors.dim();
    if importance.len() != k {
        return Err(SolverError::Dimension {
            context: "importance vector length",
            expected: k,
            actual: importance.len(),
        });
    }
    if treated_predictors.len() != k {
        return Err(SolverError::Dimension {
            context: "treated predictor vector length",
            expected: k,
            actual: treated_predictors.len(),
        });
    }
    if j == 0 {
        return Err(SolverError::Dimension {
            context: "control unit count",
            expected: 1,
            actual: 0,
        });
    }
    if let Some(bad) = importance.iter().find(|v| !v.is_finite() || **v < 0.0) {
        return Err(SolverError::InvalidImportance {
            reason: format!("inner QP requires finite nonnegative entries, got {bad}"),
        });
    }

    // Hessian is 2 * sum_k v_k x_k x_k', so its spectral norm is bounded by
    // 2 * sum_k v_k ||x_k||^2. Step 1/L keeps plain gradient descent stable.
    let lipschitz: f64 = 2.0
        * importance
            .iter()
            .zip(control_predictors.rows())
            .map(|(v, row)| v * row.dot(&row))
            .sum::<f64>();
    let step = 1.0 / lipschitz.max(1e-12);

    let mut weights = Array1::from_elem(j, 1.0 / j as f64);
    let mut movement = f64::INFINITY;
    for _ in 0..config.qp_max_iter {
        // grad f(W) = 2 Xc' (V o (Xc W - Xt))
        let residual = control_predictors.dot(&weights) - &treated_predictors;
        let weighted = &residual * &importance;
        let gradient = control_predictors.t().dot(&weighted) * 2.0;

        let next = simplex::project((&weights - &(&gradient * step)).view());
        movement = (&next - &weights).mapv(f64::abs).sum();
        weights = next;
        if movement < config.qp_tol {
            certify_feasible(&weights)?;
            return Ok(weights);
        }
    }

    Err(SolverError::NonConvergence {
        iterations: config.qp_max_iter,
        residual: movement,
    })
}

/// Check the simplex constraints on a converged weight vector.
fn certify_feasible(weights: &Array1<f64>) -> Result<()> {
    for (idx, &w) in weights.iter().enumerate() {
        if !(-WEIGHT_BOX_TOL..=1.0 + WEIGHT_BOX_TOL).contains(&w) {
            return Err(SolverError::Infeasible {
                reason: format!("weight {idx} = {w} outside [0, 1]"),
            });
        }
    }
    let gap = (weights.sum() - 1.0).abs();
    if gap > WEIGHT_SUM_TOL {
        return Err(SolverError::Infeasible {
            reason: format!("weights sum to 1 {gap:+.3e}"),
        });
    }
    Ok(())
}
