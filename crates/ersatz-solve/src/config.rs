//! Solver configuration.

use crate::error::{Result, SolverError};
use serde::{Deserialize, Serialize};

/// Knobs for the bi-level solver.
///
/// Defaults reproduce the canonical setup: ten basin hops at temperature 1.0
/// with coordinate perturbations of width 0.5, seeded with 2021. The cost of
/// an `estimate` call is bounded by `hops` times the local minimizer's
/// iteration cap times the inner QP's iteration cap; there is no timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Number of basin-hopping perturbation steps (the initial local
    /// minimization is free and always runs).
    pub hops: usize,
    /// Half-width of the uniform coordinate perturbation between hops.
    pub step_size: f64,
    /// Metropolis acceptance temperature.
    pub temperature: f64,
    /// Seed for the scoped random generator driving perturbation and
    /// acceptance. Never falls back to process-global randomness.
    pub seed: u64,
    /// Iteration cap for the inner weight QP.
    pub qp_max_iter: usize,
    /// Convergence tolerance (iterate movement) for the inner weight QP.
    pub qp_tol: f64,
    /// Iteration cap for each bounded local minimization of the outer loss.
    pub local_max_iter: u64,
    /// Gradient tolerance for the local minimizer.
    pub local_tol: f64,
    /// Number of corrections kept by the L-BFGS approximation.
    pub lbfgs_memory: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            hops: 10,
            step_size: 0.5,
            temperature: 1.0,
            seed: 2021,
            qp_max_iter: 20_000,
            qp_tol: 1e-10,
            local_max_iter: 100,
            local_tol: 1e-6,
            lbfgs_memory: 10,
        }
    }
}

impl SolverConfig {
    /// Validate the configuration before any optimization work.
    pub fn validate(&self) -> Result<()> {
        if self.hops == 0 {
            return Err(SolverError::Config("hops must be at least 1".to_string()));
        }
        for (name, value) in [
            ("step_size", self.step_size),
            ("temperature", self.temperature),
            ("qp_tol", self.qp_tol),
            ("local_tol", self.local_tol),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SolverError::Config(format!(
                    "{name} must be a positive finite number, got {value}"
                )));
            }
        }
        if self.qp_max_iter == 0 || self.local_max_iter == 0 {
            return Err(SolverError::Config(
                "iteration caps must be at least 1".to_string(),
            ));
        }
        if self.lbfgs_memory == 0 {
            return Err(SolverError::Config(
                "lbfgs_memory must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
