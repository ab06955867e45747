//! Minimization of the profiled deviance over the covariance parameters.
//!
//! The search is handed to `wolfe_bfgs`. The objective has no analytic
//! gradient, so one is supplied by central differences.

use crate::error::{LmmError, Result};
use log::{debug, warn};
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use wolfe_bfgs::{Bfgs, BfgsError, BfgsSolution};

/// Returned in place of non-finite objective values.
const PENALTY: f64 = 1e10;

/// Quasi-Newton minimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuasiNewton {
    /// Maximum number of BFGS iterations.
    pub max_iter: usize,
    /// Gradient-norm tolerance for convergence.
    pub tol: f64,
    /// Central-difference step, relative to `max(|x_i|, 1)`.
    pub gradient_step: f64,
    /// Gradient norm under which a failed line search still counts as
    /// converged.
    pub stationarity_tol: f64,
}

impl Default for QuasiNewton {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-6,
            gradient_step: 1e-5,
            stationarity_tol: 1e-3,
        }
    }
}

/// Outcome of a minimization.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    /// Best point found.
    pub x: Vec<f64>,
    /// Objective at `x`.
    pub f: f64,
    /// BFGS iterations used.
    pub iterations: usize,
    /// Whether the search terminated at a stationary point.
    pub converged: bool,
}

impl QuasiNewton {
    /// Objective value with non-finite results replaced by a large constant.
    fn value<F>(f: &F, x: &[f64]) -> f64
    where
        F: Fn(&[f64]) -> f64,
    {
        let v = f(x);
        if v.is_finite() {
            v
        } else {
            PENALTY
        }
    }

    /// Central-difference gradient of `f` at `x`.
    pub fn gradient<F>(&self, f: &F, x: &[f64]) -> Vec<f64>
    where
        F: Fn(&[f64]) -> f64,
    {
        let mut point = x.to_vec();
        (0..x.len())
            .map(|i| {
                let h = self.gradient_step * x[i].abs().max(1.0);
                point[i] = x[i] + h;
                let up = Self::value(f, &point);
                point[i] = x[i] - h;
                let down = Self::value(f, &point);
                point[i] = x[i];
                (up - down) / (2.0 * h)
            })
            .collect()
    }

    fn gradient_norm<F>(&self, f: &F, x: &[f64]) -> f64
    where
        F: Fn(&[f64]) -> f64,
    {
        self.gradient(f, x).iter().map(|g| g * g).sum::<f64>().sqrt()
    }

    /// Minimize `f` starting from `x0`.
    ///
    /// Running out of iterations is not an error: the last point is
    /// returned with `converged == false`.
    pub fn minimize<F>(&self, f: F, x0: &[f64]) -> Result<Minimum>
    where
        F: Fn(&[f64]) -> f64,
    {
        if x0.is_empty() {
            return Ok(Minimum {
                x: Vec::new(),
                f: Self::value(&f, x0),
                iterations: 0,
                converged: true,
            });
        }

        let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
            let point = x.to_vec();
            let cost = Self::value(&f, &point);
            (cost, Array1::from(self.gradient(&f, &point)))
        };

        let outcome = Bfgs::new(Array1::from(x0.to_vec()), cost_and_grad)
            .with_tolerance(self.tol)
            .with_max_iterations(self.max_iter)
            .run();

        let (solution, converged): (BfgsSolution, bool) = match outcome {
            Ok(solution) => (solution, true),
            Err(BfgsError::MaxIterationsReached { last_solution, .. }) => {
                warn!("BFGS stopped at its limit of {} iterations", self.max_iter);
                (*last_solution, false)
            }
            Err(BfgsError::LineSearchFailed { last_solution, .. }) => {
                let norm = self.gradient_norm(&f, &last_solution.final_point.to_vec());
                debug!("BFGS line search failed with gradient norm {:.3e}", norm);
                (*last_solution, norm <= self.stationarity_tol)
            }
            Err(e) => {
                return Err(LmmError::Numerical(format!("BFGS failed: {:?}", e)));
            }
        };

        let BfgsSolution {
            final_point,
            final_value,
            iterations,
            ..
        } = solution;
        debug!(
            "BFGS finished after {} iterations with objective {:.6}",
            iterations, final_value
        );

        Ok(Minimum {
            x: final_point.to_vec(),
            f: final_value,
            iterations,
            converged,
        })
    }
}
