//! Outer level: seeded global search over the importance vector.
//!
//! The outer loss `L(V)` is the pre-treatment outcome mismatch of the inner
//! QP solution at V. It is generally non-convex and non-smooth because the
//! inner solution's active constraints change as V moves, so a single local
//! minimization is not enough. The search is basin hopping: bounded L-BFGS
//! local minimization (numerical gradient, parameters clamped to the unit
//! box), then a Metropolis accept/reject of each perturbed restart. All
//! randomness comes from one `StdRng` seeded per call, which makes results
//! reproducible across runs and processes.

use crate::config::SolverConfig;
use crate::error::{Result, SolverError};
use crate::qp::solve_weights;
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

/// Result of a bi-level estimation.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Best importance vector found by the outer search (K), in `[0,1]^K`.
    pub importance: Array1<f64>,
    /// Control unit weights from the final inner QP at that importance (J).
    pub weights: Array1<f64>,
    /// Counterfactual post-treatment outcome path (T1).
    pub counterfactual: Array1<f64>,
    /// Pre-treatment outcome mean squared error at the returned weights.
    pub loss: f64,
}

impl fmt::Display for Solution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Solution(loss={:.6e}, {} predictors, {} controls)",
            self.loss,
            self.importance.len(),
            self.weights.len()
        )
    }
}

/// Jointly solve for importance and weights, then project the counterfactual.
///
/// `treated_predictors` (K) and `control_predictors` (K x J) must be the
/// rescaled matrices; `treated_outcome` (T0) and `control_outcome` (T0 x J)
/// are the pre-treatment outcome paths; `control_outcome_after` (T1 x J) is
/// projected through the final weights.
///
/// A hop whose local minimization fails or never escapes an inner-QP
/// failure is discarded and the budget moves on; only exhausting every hop
/// without a single usable loss is fatal.
///
/// # Errors
///
/// * [`SolverError::Config`] / [`SolverError::Dimension`] - bad inputs
/// * [`SolverError::SearchExhausted`] - no hop produced a finite loss
/// * [`SolverError::NonConvergence`] / [`SolverError::Infeasible`] - the
///   final inner QP at the best importance failed
pub fn estimate<'a>(
    treated_predictors: ArrayView1<'a, f64>,
    control_predictors: ArrayView2<'a, f64>,
    treated_outcome: ArrayView1<'a, f64>,
    control_outcome: ArrayView2<'a, f64>,
    control_outcome_after: ArrayView2<'a, f64>,
    config: &'a SolverConfig,
) -> Result<Solution> {
    config.validate()?;
    check_dimensions(
        treated_predictors,
        control_predictors,
        treated_outcome,
        control_outcome,
        control_outcome_after,
    )?;

    let k = treated_predictors.len();
    let problem = MatchingLoss {
        treated_predictors,
        control_predictors,
        treated_outcome,
        control_outcome,
        config,
    };

    let mut rng = StdRng::seed_from_u64(config.seed);
    let v0 = vec![1.0 / k as f64; k];

    // The uniform start is hop zero: its local minimum seeds both the
    // Metropolis anchor and the running best.
    let mut anchor: Option<(Vec<f64>, f64)> = local_minimum(&problem, v0.clone(), config);
    let mut best = anchor.clone();

    for _ in 0..config.hops {
        let from = anchor.as_ref().map_or(&v0, |(v, _)| v);
        let start: Vec<f64> = from
            .iter()
            .map(|&v| (v + rng.gen_range(-config.step_size..=config.step_size)).clamp(0.0, 1.0))
            .collect();
        // One acceptance draw per hop, taken unconditionally so the random
        // stream does not depend on intermediate losses.
        let accept_draw: f64 = rng.r#gen();

        let Some((v, loss)) = local_minimum(&problem, start, config) else {
            continue;
        };

        if best.as_ref().is_none_or(|(_, b)| loss < *b) {
            best = Some((v.clone(), loss));
        }
        let accepted = match &anchor {
            None => true,
            Some((_, current)) => {
                loss < *current
                    || accept_draw < (-(loss - current) / config.temperature).exp()
            }
        };
        if accepted {
            anchor = Some((v, loss));
        }
    }

    let Some((best_v, _)) = best else {
        return Err(SolverError::SearchExhausted { hops: config.hops });
    };

    // Re-solve the QP at the winning importance so the returned weights are
    // consistent with it rather than with the last accepted hop.
    let importance = Array1::from_vec(best_v);
    let weights = solve_weights(
        importance.view(),
        treated_predictors,
        control_predictors,
        config,
    )?;
    let loss = outcome_mse(treated_outcome, control_outcome, &weights);
    let counterfactual = control_outcome_after.dot(&weights);

    Ok(Solution { importance, weights, counterfactual, loss })
}

/// Bypass the outer search: solve the inner QP at a caller-supplied
/// importance vector. Useful for sensitivity analysis or for reproducing
/// externally derived importance weights.
///
/// # Errors
///
/// * [`SolverError::InvalidImportance`] - entries outside `[0,1]` or not finite
/// * plus everything [`solve_weights`] can raise
pub fn estimate_with_importance(
    importance: &[f64],
    treated_predictors: ArrayView1<'_, f64>,
    control_predictors: ArrayView2<'_, f64>,
    treated_outcome: ArrayView1<'_, f64>,
    control_outcome: ArrayView2<'_, f64>,
    control_outcome_after: ArrayView2<'_, f64>,
    config: &SolverConfig,
) -> Result<Solution> {
    config.validate()?;
    check_dimensions(
        treated_predictors,
        control_predictors,
        treated_outcome,
        control_outcome,
        control_outcome_after,
    )?;
    for &v in importance {
        if !v.is_finite() || !(0.0..=1.0).contains(&v) {
            return Err(SolverError::InvalidImportance {
                reason: format!("entry {v} outside [0, 1]"),
            });
        }
    }

    let importance = Array1::from_vec(importance.to_vec());
    let weights = solve_weights(
        importance.view(),
        treated_predictors,
        control_predictors,
        config,
    )?;
    let loss = outcome_mse(treated_outcome, control_outcome, &weights);
    let counterfactual = control_outcome_after.dot(&weights);

    Ok(Solution { importance, weights, counterfactual, loss })
}

fn check_dimensions(
    treated_predictors: ArrayView1<'_, f64>,
    control_predictors: ArrayView2<'_, f64>,
    treated_outcome: ArrayView1<'_, f64>,
    control_outcome: ArrayView2<'_, f64>,
    control_outcome_after: ArrayView2<'_, f64>,
) -> Result<()> {
    let (k, j) = control_predictors.dim();
    if treated_predictors.len() != k {
        return Err(SolverError::Dimension {
            context: "treated predictor vector length",
            expected: k,
            actual: treated_predictors.len(),
        });
    }
    if k == 0 {
        return Err(SolverError::Dimension {
            context: "predictor count",
            expected: 1,
            actual: 0,
        });
    }
    if j == 0 {
        return Err(SolverError::Dimension {
            context: "control unit count",
            expected: 1,
            actual: 0,
        });
    }
    if control_outcome.nrows() != treated_outcome.len() {
        return Err(SolverError::Dimension {
            context: "control pre-treatment outcome rows",
            expected: treated_outcome.len(),
            actual: control_outcome.nrows(),
        });
    }
    if treated_outcome.is_empty() {
        return Err(SolverError::Dimension {
            context: "pre-treatment period count",
            expected: 1,
            actual: 0,
        });
    }
    for (context, cols) in [
        ("control pre-treatment outcome columns", control_outcome.ncols()),
        ("control post-treatment outcome columns", control_outcome_after.ncols()),
    ] {
        if cols != j {
            return Err(SolverError::Dimension { context, expected: j, actual: cols });
        }
    }
    Ok(())
}

fn outcome_mse(
    treated_outcome: ArrayView1<'_, f64>,
    control_outcome: ArrayView2<'_, f64>,
    weights: &Array1<f64>,
) -> f64 {
    let residual = &treated_outcome - &control_outcome.dot(weights);
    residual.mapv(|e| e * e).mean().unwrap_or(f64::INFINITY)
}

/// Loss reported for a trial importance whose inner QP fails. Orders of
/// magnitude above any real outcome mismatch, but finite: the line search
/// interpolates over cost and gradient values, and an actual infinity would
/// turn differences into NaN and stall it.
const FAILED_FIT_LOSS: f64 = 1e30;

/// The outer objective: pre-treatment outcome MSE of the inner QP solution.
///
/// Evaluations clamp the trial importance to the unit box, and an inner QP
/// failure surfaces as [`FAILED_FIT_LOSS`] so the surrounding hop is
/// discarded instead of aborting the search.
#[derive(Clone)]
struct MatchingLoss<'a> {
    treated_predictors: ArrayView1<'a, f64>,
    control_predictors: ArrayView2<'a, f64>,
    treated_outcome: ArrayView1<'a, f64>,
    control_outcome: ArrayView2<'a, f64>,
    config: &'a SolverConfig,
}

impl MatchingLoss<'_> {
    fn eval(&self, importance: &[f64]) -> f64 {
        let v = Array1::from_vec(importance.to_vec());
        match solve_weights(
            v.view(),
            self.treated_predictors,
            self.control_predictors,
            self.config,
        ) {
            Ok(weights) => outcome_mse(self.treated_outcome, self.control_outcome, &weights),
            Err(_) => FAILED_FIT_LOSS,
        }
    }
}

fn clamp_unit_box(params: &[f64]) -> Vec<f64> {
    params.iter().map(|&v| v.clamp(0.0, 1.0)).collect()
}

impl CostFunction for MatchingLoss<'_> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<f64, argmin::core::Error> {
        Ok(self.eval(&clamp_unit_box(params)))
    }
}

impl Gradient for MatchingLoss<'_> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(
        &self,
        params: &Self::Param,
    ) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        // Finite differences; the outer loss has no closed-form gradient
        // because it goes through the inner QP's argmin. The stencil shrinks
        // to a one-sided difference at the box edges so the loss is never
        // probed at a negative importance.
        let clamped = clamp_unit_box(params);
        let mut grad = vec![0.0; clamped.len()];
        for i in 0..clamped.len() {
            let eps = 1e-8 * clamped[i].abs().max(1.0);
            let hi = (clamped[i] + eps).min(1.0);
            let lo = (clamped[i] - eps).max(0.0);
            if hi <= lo {
                continue;
            }
            let mut plus = clamped.clone();
            plus[i] = hi;
            let mut minus = clamped.clone();
            minus[i] = lo;
            grad[i] = (self.eval(&plus) - self.eval(&minus)) / (hi - lo);
        }

        // At an active bound, a gradient component pointing outside the box
        // would send the line search into the flat clamped region; zero it.
        const EPS: f64 = 1e-12;
        for (i, &v) in clamped.iter().enumerate() {
            if v <= EPS && grad[i] > 0.0 {
                grad[i] = 0.0;
            }
            if v >= 1.0 - EPS && grad[i] < 0.0 {
                grad[i] = 0.0;
            }
        }
        Ok(grad)
    }
}

/// One bounded local minimization. Returns `None` when the run fails or
/// never escapes failure-level losses, which the caller treats as a
/// discarded hop.
fn local_minimum(
    problem: &MatchingLoss<'_>,
    start: Vec<f64>,
    config: &SolverConfig,
) -> Option<(Vec<f64>, f64)> {
    // A start whose inner QP already fails cannot seed a useful descent;
    // discard the hop without spinning up the executor.
    if problem.eval(&clamp_unit_box(&start)) >= FAILED_FIT_LOSS {
        return None;
    }

    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, config.lbfgs_memory)
        .with_tolerance_grad(config.local_tol)
        .ok()?;

    let run = Executor::new(problem.clone(), solver)
        .configure(|state| state.param(start).max_iters(config.local_max_iter))
        .run()
        .ok()?;

    let state = run.state();
    let best = clamp_unit_box(state.get_best_param()?);
    let loss = state.get_best_cost();
    (loss.is_finite() && loss < FAILED_FIT_LOSS).then_some((best, loss))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn toy_inputs() -> (Array1<f64>, Array2<f64>, Array1<f64>, Array2<f64>, Array2<f64>) {
        // One predictor, two controls bracketing the treated unit; the
        // treated outcome is exactly the 3:1 control blend.
        let xt = array![9.0];
        let xc = Array2::from_shape_vec((1, 2), vec![8.0, 12.0]).unwrap();
        let yt = array![2.0, 3.0, 4.0];
        let yc = Array2::from_shape_vec(
            (3, 2),
            vec![1.0, 5.0, 2.0, 6.0, 3.0, 7.0],
        )
        .unwrap();
        let yc_after = Array2::from_shape_vec((2, 2), vec![4.0, 8.0, 5.0, 9.0]).unwrap();
        (xt, xc, yt, yc, yc_after)
    }

    #[test]
    fn estimate_returns_feasible_weights_and_projection() {
        let (xt, xc, yt, yc, yc_after) = toy_inputs();
        let s = estimate(
            xt.view(),
            xc.view(),
            yt.view(),
            yc.view(),
            yc_after.view(),
            &SolverConfig::default(),
        )
        .unwrap();

        assert_relative_eq!(s.weights.sum(), 1.0, epsilon = 1e-4);
        assert!(s.weights.iter().all(|&w| (-1e-6..=1.0 + 1e-6).contains(&w)));
        assert!(s.importance.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(s.loss.is_finite());
        assert_eq!(s.counterfactual.len(), 2);
        // The predictor blend w = (0.75, 0.25) also reproduces the treated
        // outcome path exactly, so the search should land on it.
        assert_relative_eq!(s.weights[0], 0.75, epsilon = 1e-3);
        assert_relative_eq!(s.loss, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn identical_seed_reproduces_the_solution() {
        let (xt, xc, yt, yc, yc_after) = toy_inputs();
        let config = SolverConfig::default();
        let a = estimate(xt.view(), xc.view(), yt.view(), yc.view(), yc_after.view(), &config)
            .unwrap();
        let b = estimate(xt.view(), xc.view(), yt.view(), yc.view(), yc_after.view(), &config)
            .unwrap();
        for (x, y) in a.importance.iter().zip(b.importance.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
        for (x, y) in a.weights.iter().zip(b.weights.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
        assert_relative_eq!(a.loss, b.loss, epsilon = 1e-12);
    }

    #[test]
    fn starved_inner_qp_exhausts_the_search() {
        let (xt, xc, yt, yc, yc_after) = toy_inputs();
        // A single inner iteration can never satisfy the movement tolerance,
        // so every hop's weight solve fails and no hop yields a usable loss.
        // The search must run out of hops and error rather than spin.
        let config = SolverConfig { qp_max_iter: 1, ..Default::default() };
        let err = estimate(xt.view(), xc.view(), yt.view(), yc.view(), yc_after.view(), &config)
            .unwrap_err();
        assert!(matches!(err, SolverError::SearchExhausted { hops: 10 }));
    }

    #[test]
    fn bypass_mode_skips_the_search() {
        let (xt, xc, yt, yc, yc_after) = toy_inputs();
        let s = estimate_with_importance(
            &[1.0],
            xt.view(),
            xc.view(),
            yt.view(),
            yc.view(),
            yc_after.view(),
            &SolverConfig::default(),
        )
        .unwrap();
        assert_relative_eq!(s.importance[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(s.weights[0], 0.75, epsilon = 1e-4);
        // Counterfactual is the control-after projection of the weights.
        assert_relative_eq!(s.counterfactual[0], 5.0, epsilon = 1e-3);
    }

    #[test]
    fn bypass_rejects_out_of_box_importance() {
        let (xt, xc, yt, yc, yc_after) = toy_inputs();
        let err = estimate_with_importance(
            &[1.5],
            xt.view(),
            xc.view(),
            yt.view(),
            yc.view(),
            yc_after.view(),
            &SolverConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SolverError::InvalidImportance { .. }));
    }

    #[test]
    fn mismatched_outcome_rows_are_rejected() {
        let (xt, xc, yt, yc, _) = toy_inputs();
        let bad_after = Array2::from_shape_vec((2, 3), vec![0.0; 6]).unwrap();
        let err = estimate(
            xt.view(),
            xc.view(),
            yt.view(),
            yc.view(),
            bad_after.view(),
            &SolverConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SolverError::Dimension { .. }));
    }
}
