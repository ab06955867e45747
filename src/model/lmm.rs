//! Linear mixed models for longitudinal/repeated measures data.
//!
//! Fits `y = Xβ + Zb + ε` with `b_i ~ N(0, G)` independently per group and
//! `ε ~ N(0, σ²I)`. The random-effects covariance is parameterized as
//! `G = σ² ΛΛᵀ` with `Λ` lower triangular, which keeps `G` positive
//! semi-definite for every parameter value. For fixed `Λ`, β and σ² have
//! closed forms, so only the entries of `Λ` are optimized.
//!
//! Estimation is by maximum likelihood by default (required for comparing
//! models that differ in their random part with a likelihood-ratio test);
//! REML is available through [`Criterion::Reml`].
//!
//! # Example
//! ```ignore
//! use longitudinal_lmm::model::lmm::{fit_model, ModelSpec};
//!
//! let spec = ModelSpec::new("vsae ~ age + C(sicdegp) + (1 | childid)");
//! let fit = fit_model(&cleaned.table, &spec)?;
//! println!("log-likelihood = {:.4}", fit.log_likelihood);
//! ```

use crate::data::{DesignMatrix, MixedFormula, RandomDesignMatrix, Table};
use crate::error::{LmmError, Result};
use crate::model::optim::QuasiNewton;
use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, SymmetricEigen};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Estimation criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Criterion {
    /// Full maximum likelihood.
    #[default]
    #[serde(rename = "ml")]
    MaximumLikelihood,
    /// Restricted maximum likelihood.
    #[serde(rename = "reml")]
    Reml,
}

impl std::fmt::Display for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criterion::MaximumLikelihood => write!(f, "ML"),
            Criterion::Reml => write!(f, "REML"),
        }
    }
}

/// Configuration for LMM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmmConfig {
    /// Maximum BFGS iterations.
    pub max_iter: usize,
    /// Gradient-norm tolerance for convergence.
    pub tol: f64,
    /// Relative central-difference step for the deviance gradient.
    pub gradient_step: f64,
    /// Gradient norm under which a failed line search still counts as
    /// converged.
    pub stationarity_tol: f64,
    /// Relative eigenvalue threshold below which the random-effects
    /// covariance is reported as singular.
    pub singular_tol: f64,
    /// Relative finite-difference step for the observed information.
    pub hessian_step: f64,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-6,
            gradient_step: 1e-5,
            stationarity_tol: 1e-3,
            singular_tol: 1e-6,
            hessian_step: 1e-3,
        }
    }
}

/// Non-fatal problems found while fitting. The estimates are still
/// returned as computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Diagnostic {
    /// The optimizer hit its iteration limit.
    NotConverged { iterations: usize },
    /// The random-effects covariance is on the boundary of the parameter
    /// space (a variance near zero or perfectly correlated effects).
    SingularCovariance { min_eigenvalue: f64 },
    /// The observed information for the variance components is not positive
    /// definite; their standard errors are NaN.
    InformationNotPositiveDefinite,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::NotConverged { iterations } => write!(
                f,
                "Optimizer did not converge after {} iterations",
                iterations
            ),
            Diagnostic::SingularCovariance { min_eigenvalue } => write!(
                f,
                "Random effects covariance is singular (smallest eigenvalue {:.3e})",
                min_eigenvalue
            ),
            Diagnostic::InformationNotPositiveDefinite => write!(
                f,
                "Observed information for variance components is not positive definite"
            ),
        }
    }
}

/// A fitted linear mixed model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LmmFit {
    /// Formula the model was fitted from (empty when fitted from matrices).
    pub formula: String,
    /// Response column name.
    pub response: String,
    /// Estimation criterion.
    pub criterion: Criterion,
    /// Fixed effect coefficient names.
    pub coefficient_names: Vec<String>,
    /// Estimated fixed effects.
    pub coefficients: Vec<f64>,
    /// Standard errors of fixed effects.
    pub std_errors: Vec<f64>,
    /// Covariance matrix of the fixed-effect estimates.
    #[serde(skip)]
    pub coefficient_covariance: Vec<Vec<f64>>,
    /// Grouping variable.
    pub grouping: String,
    /// Random effect term names ("1" for the intercept).
    pub random_terms: Vec<String>,
    /// Random effects covariance matrix G (q × q).
    pub random_covariance: Vec<Vec<f64>>,
    /// Standard errors of the entries of G.
    pub random_covariance_se: Vec<Vec<f64>>,
    /// Residual variance σ².
    pub residual_variance: f64,
    /// Standard error of σ².
    pub residual_variance_se: f64,
    /// Maximized log-likelihood (ML or REML, per `criterion`).
    pub log_likelihood: f64,
    /// Number of observations.
    pub n_obs: usize,
    /// Number of groups.
    pub n_groups: usize,
    /// Smallest group size.
    pub min_group_size: usize,
    /// Largest group size.
    pub max_group_size: usize,
    /// Mean group size.
    pub mean_group_size: f64,
    /// Optimizer iterations.
    pub iterations: usize,
    /// Whether the optimizer converged.
    pub converged: bool,
    /// Non-fatal fitting problems.
    pub diagnostics: Vec<Diagnostic>,
    /// Optimized relative covariance factor, `vech(Λ)`.
    pub theta: Vec<f64>,
    /// Group identifiers, in the order of `random_effects`.
    #[serde(skip)]
    pub group_ids: Vec<String>,
    /// Predicted random effects (BLUPs), one vector of length q per group.
    #[serde(skip)]
    pub random_effects: Vec<Vec<f64>>,
}

impl LmmFit {
    /// Get coefficient index by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Get a coefficient by name.
    pub fn get_coefficient(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name)
            .and_then(|i| self.coefficients.get(i).copied())
    }

    /// Get a standard error by name.
    pub fn get_std_error(&self, name: &str) -> Option<f64> {
        self.coefficient_index(name)
            .and_then(|i| self.std_errors.get(i).copied())
    }

    /// Wald z statistic for a coefficient.
    pub fn z_statistic(&self, index: usize) -> Option<f64> {
        let coef = self.coefficients.get(index)?;
        let se = self.std_errors.get(index)?;
        if *se > 0.0 {
            Some(coef / se)
        } else {
            None
        }
    }

    /// Number of fixed effect coefficients.
    pub fn n_coefficients(&self) -> usize {
        self.coefficient_names.len()
    }

    /// Number of random effect terms per group.
    pub fn n_random_terms(&self) -> usize {
        self.random_terms.len()
    }

    /// Number of free parameters in G.
    pub fn n_covariance_params(&self) -> usize {
        let q = self.n_random_terms();
        q * (q + 1) / 2
    }

    /// Total number of estimated parameters: fixed effects, G and σ².
    pub fn n_params(&self) -> usize {
        self.n_coefficients() + self.n_covariance_params() + 1
    }

    /// Variance of the first random effect (the random intercept when present).
    pub fn tau_squared(&self) -> f64 {
        self.random_covariance
            .first()
            .and_then(|row| row.first())
            .copied()
            .unwrap_or(0.0)
    }

    /// Residual variance σ².
    pub fn sigma_squared(&self) -> f64 {
        self.residual_variance
    }

    /// G as a matrix.
    pub fn covariance_matrix(&self) -> DMatrix<f64> {
        let q = self.n_random_terms();
        DMatrix::from_fn(q, q, |i, j| self.random_covariance[i][j])
    }

    /// Correlation between random effects `i` and `j`.
    pub fn random_correlation(&self, i: usize, j: usize) -> Option<f64> {
        let gii = *self.random_covariance.get(i)?.get(i)?;
        let gjj = *self.random_covariance.get(j)?.get(j)?;
        let gij = *self.random_covariance.get(i)?.get(j)?;
        let denom = (gii * gjj).sqrt();
        if denom > 0.0 {
            Some(gij / denom)
        } else {
            None
        }
    }

    /// Intraclass correlation τ² / (τ² + σ²), defined for intercept-only models.
    pub fn icc(&self) -> Option<f64> {
        if self.random_terms.len() != 1 || self.random_terms[0] != "1" {
            return None;
        }
        let tau2 = self.tau_squared();
        Some(tau2 / (tau2 + self.residual_variance))
    }

    /// Whether any diagnostic flagged a singular covariance.
    pub fn is_singular(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::SingularCovariance { .. }))
    }

    /// Predicted random effects for a group.
    pub fn random_effect(&self, group_id: &str) -> Option<&[f64]> {
        let idx = self.group_ids.iter().position(|g| g == group_id)?;
        self.random_effects.get(idx).map(|v| v.as_slice())
    }
}

/// A linear mixed model estimator.
pub trait MixedModelSolver {
    /// Fit `y ~ fixed + random` under the given criterion.
    fn fit(
        &self,
        fixed: &DesignMatrix,
        random: &RandomDesignMatrix,
        y: &DVector<f64>,
        criterion: Criterion,
    ) -> Result<LmmFit>;
}

/// Profiled-likelihood solver with a BFGS search over `vech(Λ)`.
#[derive(Debug, Clone, Default)]
pub struct ProfiledSolver {
    config: LmmConfig,
}

impl ProfiledSolver {
    pub fn new(config: LmmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmmConfig {
        &self.config
    }
}

/// Per-group slices of the data.
struct GroupBlock {
    x: DMatrix<f64>,
    z: DMatrix<f64>,
    y: DVector<f64>,
}

/// Quantities profiled out at a fixed Λ.
struct Profile {
    deviance: f64,
    beta: DVector<f64>,
    sigma2: f64,
    xtwx: DMatrix<f64>,
}

/// Everything the objective needs, split by group.
struct Problem {
    groups: Vec<GroupBlock>,
    n: usize,
    p: usize,
    q: usize,
    criterion: Criterion,
}

impl Problem {
    fn new(
        fixed: &DesignMatrix,
        random: &RandomDesignMatrix,
        y: &DVector<f64>,
        criterion: Criterion,
    ) -> Self {
        let x = fixed.matrix();
        let zc = &random.covariates;
        let groups = random
            .group_rows()
            .into_iter()
            .map(|rows| GroupBlock {
                x: DMatrix::from_fn(rows.len(), x.ncols(), |i, j| x[(rows[i], j)]),
                z: DMatrix::from_fn(rows.len(), zc.ncols(), |i, j| zc[(rows[i], j)]),
                y: DVector::from_fn(rows.len(), |i, _| y[rows[i]]),
            })
            .collect();
        Self {
            groups,
            n: y.len(),
            p: x.ncols(),
            q: zc.ncols(),
            criterion,
        }
    }

    /// Residual degrees of freedom used in σ̂² and the objective.
    fn df(&self) -> f64 {
        match self.criterion {
            Criterion::MaximumLikelihood => self.n as f64,
            Criterion::Reml => (self.n - self.p) as f64,
        }
    }

    /// Profile β and σ² out at `theta`. `None` when a factorization fails.
    fn profile(&self, theta: &[f64]) -> Option<Profile> {
        let lambda = lower_triangular(theta, self.q);
        let mut xtwx = DMatrix::zeros(self.p, self.p);
        let mut xtwy = DVector::zeros(self.p);
        let mut log_det_w = 0.0;
        let mut factors = Vec::with_capacity(self.groups.len());

        for g in &self.groups {
            let a = &g.z * &lambda;
            let w = DMatrix::identity(g.y.len(), g.y.len()) + &a * a.transpose();
            let chol = w.cholesky()?;
            log_det_w += log_det_cholesky(chol.l_dirty());
            let w_inv_x = chol.solve(&g.x);
            xtwx += g.x.transpose() * &w_inv_x;
            xtwy += w_inv_x.transpose() * &g.y;
            factors.push(chol);
        }

        let xtwx_chol = xtwx.clone().cholesky()?;
        let beta = xtwx_chol.solve(&xtwy);

        let mut rss = 0.0;
        for (g, chol) in self.groups.iter().zip(&factors) {
            let r = &g.y - &g.x * &beta;
            rss += r.dot(&chol.solve(&r));
        }

        let df = self.df();
        let sigma2 = rss / df;
        if !(sigma2 > 0.0 && sigma2.is_finite()) {
            return None;
        }

        let mut deviance = df * (2.0 * PI * sigma2).ln() + log_det_w + df;
        if self.criterion == Criterion::Reml {
            deviance += log_det_cholesky(xtwx_chol.l_dirty());
        }

        Some(Profile {
            deviance,
            beta,
            sigma2,
            xtwx,
        })
    }

    /// Log-likelihood at explicit variance components `(vech(G), σ²)` with
    /// β at its GLS estimate.
    fn log_likelihood_at(&self, psi: &[f64]) -> Option<f64> {
        let k = psi.len() - 1;
        let g_mat = symmetric_from_vech(&psi[..k], self.q);
        let sigma2 = psi[k];
        if sigma2 <= 0.0 {
            return None;
        }

        let mut xtvx = DMatrix::zeros(self.p, self.p);
        let mut xtvy = DVector::zeros(self.p);
        let mut log_det_v = 0.0;
        let mut factors = Vec::with_capacity(self.groups.len());

        for g in &self.groups {
            let m = g.y.len();
            let v = &g.z * &g_mat * g.z.transpose() + DMatrix::identity(m, m) * sigma2;
            let chol = v.cholesky()?;
            log_det_v += log_det_cholesky(chol.l_dirty());
            let v_inv_x = chol.solve(&g.x);
            xtvx += g.x.transpose() * &v_inv_x;
            xtvy += v_inv_x.transpose() * &g.y;
            factors.push(chol);
        }

        let xtvx_chol = xtvx.cholesky()?;
        let beta = xtvx_chol.solve(&xtvy);

        let mut quad = 0.0;
        for (g, chol) in self.groups.iter().zip(&factors) {
            let r = &g.y - &g.x * &beta;
            quad += r.dot(&chol.solve(&r));
        }

        let minus_two_ll = match self.criterion {
            Criterion::MaximumLikelihood => self.n as f64 * (2.0 * PI).ln() + log_det_v + quad,
            Criterion::Reml => {
                (self.n - self.p) as f64 * (2.0 * PI).ln()
                    + log_det_v
                    + log_det_cholesky(xtvx_chol.l_dirty())
                    + quad
            }
        };
        Some(-0.5 * minus_two_ll)
    }

    /// BLUPs `ΛΛᵀ Z_iᵀ W_i⁻¹ r_i` for every group.
    fn blups(&self, theta: &[f64], beta: &DVector<f64>) -> Vec<Vec<f64>> {
        let lambda = lower_triangular(theta, self.q);
        let llt = &lambda * lambda.transpose();
        self.groups
            .iter()
            .map(|g| {
                let m = g.y.len();
                let a = &g.z * &lambda;
                let w = DMatrix::identity(m, m) + &a * a.transpose();
                let r = &g.y - &g.x * beta;
                match w.cholesky() {
                    Some(chol) => (&llt * g.z.transpose() * chol.solve(&r))
                        .iter()
                        .copied()
                        .collect(),
                    None => vec![f64::NAN; self.q],
                }
            })
            .collect()
    }
}

impl MixedModelSolver for ProfiledSolver {
    fn fit(
        &self,
        fixed: &DesignMatrix,
        random: &RandomDesignMatrix,
        y: &DVector<f64>,
        criterion: Criterion,
    ) -> Result<LmmFit> {
        let n = y.len();
        let p = fixed.n_coefficients();
        let q = random.n_random_per_group;

        if n == 0 {
            return Err(LmmError::EmptyData("No observations to fit".to_string()));
        }
        if fixed.n_samples() != n {
            return Err(LmmError::DimensionMismatch {
                expected: n,
                actual: fixed.n_samples(),
            });
        }
        if random.n_samples() != n {
            return Err(LmmError::DimensionMismatch {
                expected: n,
                actual: random.n_samples(),
            });
        }
        if n <= p {
            return Err(LmmError::Numerical(
                "Model is saturated (n_obs <= n_fixed_effects)".to_string(),
            ));
        }
        check_full_rank(fixed)?;

        let problem = Problem::new(fixed, random, y, criterion);
        let theta0 = identity_vech(q);

        let optimizer = QuasiNewton {
            max_iter: self.config.max_iter,
            tol: self.config.tol,
            gradient_step: self.config.gradient_step,
            stationarity_tol: self.config.stationarity_tol,
        };
        let minimum = optimizer.minimize(
            |theta| {
                problem
                    .profile(theta)
                    .map(|pr| pr.deviance)
                    .unwrap_or(f64::INFINITY)
            },
            &theta0,
        )?;

        let profile = problem.profile(&minimum.x).ok_or_else(|| {
            LmmError::Numerical(
                "Profiled likelihood could not be evaluated at the optimum".to_string(),
            )
        })?;

        let mut diagnostics = Vec::new();
        if !minimum.converged {
            diagnostics.push(Diagnostic::NotConverged {
                iterations: minimum.iterations,
            });
        }

        // Fixed effects
        let sigma2 = profile.sigma2;
        let xtwx_inv = profile
            .xtwx
            .clone()
            .cholesky()
            .map(|c| c.inverse())
            .ok_or_else(|| {
                LmmError::Numerical("X'W^-1X is not positive definite".to_string())
            })?;
        let cov_beta = xtwx_inv * sigma2;
        let coefficients: Vec<f64> = profile.beta.iter().copied().collect();
        let std_errors: Vec<f64> = (0..p).map(|j| cov_beta[(j, j)].max(0.0).sqrt()).collect();

        // Random effects covariance
        let lambda = lower_triangular(&minimum.x, q);
        let relative = &lambda * lambda.transpose();
        let g_mat = symmetrize(&(&relative * sigma2));

        let eigen = SymmetricEigen::new(relative.clone());
        let min_eig = eigen.eigenvalues.min();
        let max_eig = eigen.eigenvalues.max();
        let singular = if q == 1 {
            max_eig < self.config.singular_tol
        } else {
            max_eig < self.config.singular_tol || min_eig <= self.config.singular_tol * max_eig
        };
        if singular {
            diagnostics.push(Diagnostic::SingularCovariance {
                min_eigenvalue: min_eig * sigma2,
            });
        }

        // Variance component standard errors from the observed information
        let mut psi = vech(&g_mat);
        psi.push(sigma2);
        let (vc_se, information_ok) =
            variance_component_se(&problem, &psi, sigma2, self.config.hessian_step);
        if !information_ok {
            diagnostics.push(Diagnostic::InformationNotPositiveDefinite);
        }
        let random_covariance_se = symmetric_from_vech(&vc_se[..vc_se.len() - 1], q);

        let random_effects = problem.blups(&minimum.x, &profile.beta);

        let sizes = random.observations_per_group();
        let log_likelihood = -0.5 * profile.deviance;

        for d in &diagnostics {
            warn!("{}", d);
        }
        debug!(
            "Fitted LMM: logLik={:.6}, sigma2={:.6}, iterations={}",
            log_likelihood, sigma2, minimum.iterations
        );

        Ok(LmmFit {
            formula: String::new(),
            response: String::new(),
            criterion,
            coefficient_names: fixed.coefficient_names().to_vec(),
            coefficients,
            std_errors,
            coefficient_covariance: to_rows(&cov_beta),
            grouping: random.grouping.clone(),
            random_terms: random.term_names.clone(),
            random_covariance: to_rows(&g_mat),
            random_covariance_se: to_rows(&random_covariance_se),
            residual_variance: sigma2,
            residual_variance_se: vc_se[vc_se.len() - 1],
            log_likelihood,
            n_obs: n,
            n_groups: random.n_groups,
            min_group_size: sizes.iter().copied().min().unwrap_or(0),
            max_group_size: sizes.iter().copied().max().unwrap_or(0),
            mean_group_size: n as f64 / random.n_groups.max(1) as f64,
            iterations: minimum.iterations,
            converged: minimum.converged,
            diagnostics,
            theta: minimum.x,
            group_ids: random.group_ids.clone(),
            random_effects,
        })
    }
}

/// Rank check on the fixed design via singular values.
fn check_full_rank(fixed: &DesignMatrix) -> Result<()> {
    let x = fixed.matrix();
    let singular_values = x.clone().svd(false, false).singular_values;
    let max_sv = singular_values.max();
    let tol = max_sv * 1e-10 * x.nrows().max(x.ncols()) as f64;
    let rank = singular_values.iter().filter(|&&s| s > tol).count();
    if rank < x.ncols() {
        return Err(LmmError::Numerical(format!(
            "Fixed effects design is rank deficient (rank {} < {} columns)",
            rank,
            x.ncols()
        )));
    }
    Ok(())
}

/// Standard errors of `(vech(G), σ²)` from a central-difference Hessian of
/// the log-likelihood. Returns NaNs and `false` if the observed information
/// cannot be inverted.
fn variance_component_se(
    problem: &Problem,
    psi: &[f64],
    sigma2: f64,
    step: f64,
) -> (Vec<f64>, bool) {
    let k = psi.len();
    let nan = (vec![f64::NAN; k], false);

    let f0 = match problem.log_likelihood_at(psi) {
        Some(v) => v,
        None => return nan,
    };
    let h: Vec<f64> = psi
        .iter()
        .map(|v| step * v.abs().max(sigma2 * 1e-3).max(1e-8))
        .collect();
    let eval = |shifts: &[(usize, f64)]| -> Option<f64> {
        let mut x = psi.to_vec();
        for &(i, d) in shifts {
            x[i] += d;
        }
        problem.log_likelihood_at(&x)
    };

    let mut hessian = DMatrix::zeros(k, k);
    for i in 0..k {
        let fp = eval(&[(i, h[i])]);
        let fm = eval(&[(i, -h[i])]);
        match (fp, fm) {
            (Some(fp), Some(fm)) => hessian[(i, i)] = (fp - 2.0 * f0 + fm) / (h[i] * h[i]),
            _ => return nan,
        }
        for j in 0..i {
            let fpp = eval(&[(i, h[i]), (j, h[j])]);
            let fpm = eval(&[(i, h[i]), (j, -h[j])]);
            let fmp = eval(&[(i, -h[i]), (j, h[j])]);
            let fmm = eval(&[(i, -h[i]), (j, -h[j])]);
            match (fpp, fpm, fmp, fmm) {
                (Some(a), Some(b), Some(c), Some(d)) => {
                    let v = (a - b - c + d) / (4.0 * h[i] * h[j]);
                    hessian[(i, j)] = v;
                    hessian[(j, i)] = v;
                }
                _ => return nan,
            }
        }
    }

    let information = -hessian;
    match information.cholesky() {
        Some(chol) => {
            let cov = chol.inverse();
            let se: Vec<f64> = (0..k).map(|i| cov[(i, i)].sqrt()).collect();
            if se.iter().all(|s| s.is_finite()) {
                (se, true)
            } else {
                nan
            }
        }
        None => nan,
    }
}

fn log_det_cholesky(l: &DMatrix<f64>) -> f64 {
    2.0 * l.diagonal().iter().map(|d| d.ln()).sum::<f64>()
}

/// Lower-triangular matrix from its row-major `vech`.
fn lower_triangular(theta: &[f64], q: usize) -> DMatrix<f64> {
    let mut l = DMatrix::zeros(q, q);
    let mut k = 0;
    for i in 0..q {
        for j in 0..=i {
            l[(i, j)] = theta[k];
            k += 1;
        }
    }
    l
}

fn symmetric_from_vech(v: &[f64], q: usize) -> DMatrix<f64> {
    let l = lower_triangular(v, q);
    DMatrix::from_fn(q, q, |i, j| if i >= j { l[(i, j)] } else { l[(j, i)] })
}

fn vech(m: &DMatrix<f64>) -> Vec<f64> {
    let q = m.nrows();
    (0..q).flat_map(|i| (0..=i).map(move |j| (i, j))).map(|ij| m[ij]).collect()
}

fn identity_vech(q: usize) -> Vec<f64> {
    (0..q)
        .flat_map(|i| (0..=i).map(move |j| if i == j { 1.0 } else { 0.0 }))
        .collect()
}

fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    (m + m.transpose()) * 0.5
}

fn to_rows(m: &DMatrix<f64>) -> Vec<Vec<f64>> {
    (0..m.nrows())
        .map(|i| (0..m.ncols()).map(|j| m[(i, j)]).collect())
        .collect()
}

/// A model to fit: mixed formula plus estimation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Mixed formula, e.g. `vsae ~ age + C(sicdegp) + (1 | childid)`.
    pub formula: String,
    /// Estimation criterion.
    #[serde(default)]
    pub criterion: Criterion,
    /// Solver settings.
    #[serde(default)]
    pub config: LmmConfig,
}

impl ModelSpec {
    /// ML fit of `formula` with default settings.
    pub fn new(formula: impl Into<String>) -> Self {
        Self {
            formula: formula.into(),
            criterion: Criterion::default(),
            config: LmmConfig::default(),
        }
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_config(mut self, config: LmmConfig) -> Self {
        self.config = config;
        self
    }
}

/// Fit a mixed model described by `spec` to `table` with the default
/// [`ProfiledSolver`].
///
/// Parses the formula, builds the fixed and random designs, and fits.
pub fn fit_model(table: &Table, spec: &ModelSpec) -> Result<LmmFit> {
    let solver = ProfiledSolver::new(spec.config.clone());
    fit_model_with(table, spec, &solver)
}

/// Fit a mixed model with an explicit solver.
pub fn fit_model_with(
    table: &Table,
    spec: &ModelSpec,
    solver: &dyn MixedModelSolver,
) -> Result<LmmFit> {
    let mixed_formula = MixedFormula::parse(&spec.formula)?;

    if mixed_formula.random.is_empty() {
        return Err(LmmError::InvalidParameter(
            "Formula must contain a random effect term such as (1 | group)".to_string(),
        ));
    }
    if mixed_formula.random.len() > 1 {
        return Err(LmmError::NotImplemented(
            "Multiple random effect terms not yet supported".to_string(),
        ));
    }

    let response = mixed_formula.fixed.response.clone().ok_or_else(|| {
        LmmError::FormulaParse("Mixed model formula needs a response (y ~ ...)".to_string())
    })?;
    for var in mixed_formula.all_variables() {
        if !table.has_column(var) {
            return Err(LmmError::MissingColumn(var.to_string()));
        }
    }

    let random_effect = &mixed_formula.random[0];
    let design = DesignMatrix::from_formula(table, &mixed_formula.fixed)?;
    let random_design = RandomDesignMatrix::from_random_effect(table, random_effect)?;
    let y = DVector::from_vec(table.numeric_column(&response)?);

    info!(
        "Fitting {} by {} ({} observations, {} groups)",
        spec.formula,
        spec.criterion,
        y.len(),
        random_design.n_groups
    );

    let mut fit = solver.fit(&design, &random_design, &y, spec.criterion)?;
    fit.formula = spec.formula.clone();
    fit.response = response;

    info!(
        "Finished {}: log-likelihood {:.4}, converged={}",
        spec.formula, fit.log_likelihood, fit.converged
    );
    Ok(fit)
}
