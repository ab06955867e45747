//! Likelihood Ratio Test (LRT) for nested mixed model comparison.
//!
//! LRT compares a full model to a reduced model by comparing their
//! log-likelihoods. The statistic `2 * (LL_full - LL_reduced)` is referred
//! to a chi-squared distribution with df equal to the difference in the
//! number of estimated parameters.
//!
//! When the extra parameters are variance components, the null hypothesis
//! puts a variance on the boundary of its parameter space and the plain
//! chi-squared p-value is conservative. A boundary-corrected p-value using
//! the 50:50 mixture of chi-squared(df - 1) and chi-squared(df) is reported
//! alongside it.

use crate::error::{LmmError, Result};
use crate::model::lmm::{Criterion, LmmFit};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Result of comparing two nested mixed models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrtResult {
    /// Formula of the reduced model.
    pub reduced_model: String,
    /// Formula of the full model.
    pub full_model: String,
    /// Log-likelihood of the reduced model.
    pub ll_reduced: f64,
    /// Log-likelihood of the full model.
    pub ll_full: f64,
    /// LRT statistic: 2 * (ll_full - ll_reduced), clamped at zero.
    pub statistic: f64,
    /// Degrees of freedom (difference in parameter counts).
    pub df: usize,
    /// P-value from chi-squared(df).
    pub p_value: f64,
    /// P-value from the 50:50 mixture of chi-squared(df - 1) and chi-squared(df).
    pub p_value_boundary: f64,
}

impl LrtResult {
    /// Whether the full model is significantly better at level `alpha`.
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}

impl std::fmt::Display for LrtResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Likelihood ratio test")?;
        writeln!(f, "  reduced: {} (logLik {:.4})", self.reduced_model, self.ll_reduced)?;
        writeln!(f, "  full:    {} (logLik {:.4})", self.full_model, self.ll_full)?;
        write!(
            f,
            "  Chi2 = {:.4}, df = {}, p = {:.4e} (boundary-corrected p = {:.4e})",
            self.statistic, self.df, self.p_value, self.p_value_boundary
        )
    }
}

/// Upper tail probability of chi-squared(df) at `x`; df = 0 is a point mass at zero.
fn chi_squared_sf(x: f64, df: usize) -> Result<f64> {
    if df == 0 {
        return Ok(if x > 0.0 { 0.0 } else { 1.0 });
    }
    let dist = ChiSquared::new(df as f64)
        .map_err(|e| LmmError::Numerical(format!("Chi-squared distribution: {}", e)))?;
    Ok(dist.sf(x))
}

/// Likelihood ratio test of `reduced` against `full`.
///
/// The models must be fitted to the same observations and grouping, with
/// the reduced model's fixed effects and random terms a subset of the full
/// model's. Under REML the fixed effects must be identical, since REML
/// likelihoods of models with different fixed effects are not comparable.
pub fn test_lrt_lmm(reduced: &LmmFit, full: &LmmFit) -> Result<LrtResult> {
    if reduced.criterion != full.criterion {
        return Err(LmmError::InvalidParameter(format!(
            "Cannot compare a {} fit with a {} fit",
            reduced.criterion, full.criterion
        )));
    }
    if reduced.n_obs != full.n_obs {
        return Err(LmmError::DimensionMismatch {
            expected: full.n_obs,
            actual: reduced.n_obs,
        });
    }
    if reduced.grouping != full.grouping {
        return Err(LmmError::InvalidParameter(format!(
            "Models use different grouping variables ('{}' vs '{}')",
            reduced.grouping, full.grouping
        )));
    }

    let fixed_nested = reduced
        .coefficient_names
        .iter()
        .all(|name| full.coefficient_names.contains(name));
    let random_nested = reduced
        .random_terms
        .iter()
        .all(|term| full.random_terms.contains(term));
    if !fixed_nested || !random_nested {
        return Err(LmmError::InvalidParameter(
            "Reduced model is not nested in the full model".to_string(),
        ));
    }
    if full.criterion == Criterion::Reml && reduced.coefficient_names != full.coefficient_names {
        return Err(LmmError::InvalidParameter(
            "REML fits with different fixed effects cannot be compared; refit by ML".to_string(),
        ));
    }

    let (k_reduced, k_full) = (reduced.n_params(), full.n_params());
    if k_full <= k_reduced {
        return Err(LmmError::InvalidParameter(format!(
            "Full model must have more parameters than the reduced model ({} vs {})",
            k_full, k_reduced
        )));
    }
    let df = k_full - k_reduced;

    let statistic = (2.0 * (full.log_likelihood - reduced.log_likelihood)).max(0.0);
    let (p_value, p_value_boundary) = if statistic.is_finite() {
        let p = chi_squared_sf(statistic, df)?;
        let p_lower = chi_squared_sf(statistic, df - 1)?;
        (p, 0.5 * (p + p_lower))
    } else {
        (f64::NAN, f64::NAN)
    };

    Ok(LrtResult {
        reduced_model: reduced.formula.clone(),
        full_model: full.formula.clone(),
        ll_reduced: reduced.log_likelihood,
        ll_full: full.log_likelihood,
        statistic,
        df,
        p_value,
        p_value_boundary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_fit(formula: &str, coefs: &[&str], random_terms: &[&str], ll: f64) -> LmmFit {
        let q = random_terms.len();
        LmmFit {
            formula: formula.to_string(),
            response: "vsae".to_string(),
            criterion: Criterion::MaximumLikelihood,
            coefficient_names: coefs.iter().map(|s| s.to_string()).collect(),
            coefficients: vec![0.0; coefs.len()],
            std_errors: vec![1.0; coefs.len()],
            coefficient_covariance: Vec::new(),
            grouping: "childid".to_string(),
            random_terms: random_terms.iter().map(|s| s.to_string()).collect(),
            random_covariance: vec![vec![1.0; q]; q],
            random_covariance_se: vec![vec![0.1; q]; q],
            residual_variance: 1.0,
            residual_variance_se: 0.1,
            log_likelihood: ll,
            n_obs: 610,
            n_groups: 158,
            min_group_size: 1,
            max_group_size: 5,
            mean_group_size: 3.9,
            iterations: 10,
            converged: true,
            diagnostics: Vec::new(),
            theta: vec![1.0; q * (q + 1) / 2],
            group_ids: Vec::new(),
            random_effects: Vec::new(),
        }
    }

    const FIXED: [&str; 4] = ["(Intercept)", "age", "sicdegp2", "sicdegp3"];

    #[test]
    fn test_lrt_random_slope() {
        let reduced = make_fit("m1", &FIXED, &["1"], -2500.0);
        let full = make_fit("m2", &FIXED, &["1", "age_cen"], -2400.0);

        let result = test_lrt_lmm(&reduced, &full).unwrap();
        assert_eq!(result.df, 2);
        assert_relative_eq!(result.statistic, 200.0);
        assert!(result.p_value < 1e-10);
        assert!(result.is_significant(0.05));
        assert!(result.p_value_boundary <= result.p_value);
    }

    #[test]
    fn test_lrt_statistic_clamped() {
        let reduced = make_fit("m1", &FIXED, &["1"], -2500.0);
        let full = make_fit("m2", &FIXED, &["1", "age_cen"], -2500.0 - 1e-9);

        let result = test_lrt_lmm(&reduced, &full).unwrap();
        assert_eq!(result.statistic, 0.0);
        assert_relative_eq!(result.p_value, 1.0);
        assert_relative_eq!(result.p_value_boundary, 1.0);
    }

    #[test]
    fn test_lrt_known_p_value() {
        // chi2(2) survival at x is exp(-x/2)
        let reduced = make_fit("m1", &FIXED, &["1"], -100.0);
        let full = make_fit("m2", &FIXED, &["1", "age_cen"], -97.0);
        let result = test_lrt_lmm(&reduced, &full).unwrap();
        assert_relative_eq!(result.p_value, (-3.0f64).exp(), epsilon = 1e-10);
    }

    #[test]
    fn test_lrt_rejects_non_nested() {
        let reduced = make_fit("m1", &["(Intercept)", "age"], &["1"], -100.0);
        let full = make_fit("m2", &["(Intercept)", "sicdegp2"], &["1", "age_cen"], -90.0);
        assert!(matches!(
            test_lrt_lmm(&reduced, &full),
            Err(LmmError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_lrt_requires_more_parameters() {
        let a = make_fit("m1", &FIXED, &["1"], -100.0);
        let b = make_fit("m2", &FIXED, &["1"], -90.0);
        assert!(test_lrt_lmm(&a, &b).is_err());
    }

    #[test]
    fn test_lrt_rejects_reml_with_different_fixed_effects() {
        let mut reduced = make_fit("m1", &["(Intercept)", "age"], &["1"], -100.0);
        let mut full = make_fit("m2", &FIXED, &["1"], -90.0);
        reduced.criterion = Criterion::Reml;
        full.criterion = Criterion::Reml;
        assert!(test_lrt_lmm(&reduced, &full).is_err());

        // Same fixed effects under REML is fine
        let mut full = make_fit("m2", &["(Intercept)", "age"], &["1", "age_cen"], -90.0);
        full.criterion = Criterion::Reml;
        assert!(test_lrt_lmm(&reduced, &full).is_ok());
    }

    #[test]
    fn test_lrt_rejects_mixed_criteria() {
        let reduced = make_fit("m1", &FIXED, &["1"], -100.0);
        let mut full = make_fit("m2", &FIXED, &["1", "age_cen"], -90.0);
        full.criterion = Criterion::Reml;
        assert!(test_lrt_lmm(&reduced, &full).is_err());
    }
}
