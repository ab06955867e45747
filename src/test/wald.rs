//! Wald z tests and confidence intervals for fixed effects.
//!
//! Mixed model fixed effects are tested with `z = β / SE(β)` against the
//! standard normal, as in statsmodels' MixedLM summaries.

use crate::error::{LmmError, Result};
use crate::model::lmm::LmmFit;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Wald test of a single fixed effect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldRow {
    /// Coefficient name.
    pub coefficient: String,
    /// Estimated coefficient value.
    pub estimate: f64,
    /// Standard error.
    pub std_error: f64,
    /// Wald z statistic.
    pub statistic: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Lower confidence bound.
    pub ci_lower: f64,
    /// Upper confidence bound.
    pub ci_upper: f64,
}

/// Wald tests for every fixed effect of a fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaldResult {
    /// One row per coefficient, in design order.
    pub rows: Vec<WaldRow>,
    /// Confidence level of the intervals (e.g. 0.95).
    pub confidence_level: f64,
}

impl WaldResult {
    /// Number of tests.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Get p-values for all coefficients.
    pub fn p_values(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.p_value).collect()
    }

    /// Get the row for a coefficient.
    pub fn get(&self, coefficient: &str) -> Option<&WaldRow> {
        self.rows.iter().find(|r| r.coefficient == coefficient)
    }
}

/// Wald tests with 95% intervals for all fixed effects.
pub fn test_wald(fit: &LmmFit) -> Result<WaldResult> {
    test_wald_with_level(fit, 0.95)
}

/// Wald tests with intervals at `confidence_level`.
pub fn test_wald_with_level(fit: &LmmFit, confidence_level: f64) -> Result<WaldResult> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(LmmError::InvalidParameter(format!(
            "Confidence level must be in (0, 1), got {}",
            confidence_level
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| LmmError::Numerical(format!("Normal distribution: {}", e)))?;
    let z_crit = normal.inverse_cdf(0.5 + confidence_level / 2.0);

    let rows = fit
        .coefficient_names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            let estimate = fit.coefficients.get(i).copied().unwrap_or(f64::NAN);
            let std_error = fit.std_errors.get(i).copied().unwrap_or(f64::NAN);

            let statistic = if std_error > 0.0 {
                estimate / std_error
            } else {
                f64::NAN
            };
            let p_value = if statistic.is_finite() {
                2.0 * normal.sf(statistic.abs())
            } else {
                f64::NAN
            };

            WaldRow {
                coefficient: name.clone(),
                estimate,
                std_error,
                statistic,
                p_value,
                ci_lower: estimate - z_crit * std_error,
                ci_upper: estimate + z_crit * std_error,
            }
        })
        .collect();

    Ok(WaldResult {
        rows,
        confidence_level,
    })
}

/// Wald test of one named coefficient.
pub fn test_wald_coefficient(fit: &LmmFit, coefficient: &str) -> Result<WaldRow> {
    let result = test_wald(fit)?;
    result
        .rows
        .into_iter()
        .find(|r| r.coefficient == coefficient)
        .ok_or_else(|| {
            LmmError::InvalidParameter(format!(
                "Coefficient '{}' not found. Available: {:?}",
                coefficient, fit.coefficient_names
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::lmm::Criterion;
    use approx::assert_relative_eq;

    fn make_fit() -> LmmFit {
        LmmFit {
            formula: "vsae ~ age + (1 | childid)".to_string(),
            response: "vsae".to_string(),
            criterion: Criterion::MaximumLikelihood,
            coefficient_names: vec!["(Intercept)".into(), "age".into(), "flat".into()],
            coefficients: vec![2.0, 1.96, 0.0],
            std_errors: vec![1.0, 1.0, 0.0],
            coefficient_covariance: Vec::new(),
            grouping: "childid".to_string(),
            random_terms: vec!["1".into()],
            random_covariance: vec![vec![1.0]],
            random_covariance_se: vec![vec![0.1]],
            residual_variance: 1.0,
            residual_variance_se: 0.1,
            log_likelihood: -10.0,
            n_obs: 12,
            n_groups: 4,
            min_group_size: 3,
            max_group_size: 3,
            mean_group_size: 3.0,
            iterations: 5,
            converged: true,
            diagnostics: Vec::new(),
            theta: vec![1.0],
            group_ids: Vec::new(),
            random_effects: Vec::new(),
        }
    }

    #[test]
    fn test_wald_z_and_p() {
        let result = test_wald(&make_fit()).unwrap();
        assert_eq!(result.len(), 3);

        let age = result.get("age").unwrap();
        assert_relative_eq!(age.statistic, 1.96);
        assert_relative_eq!(age.p_value, 0.05, epsilon = 1e-3);
        assert_relative_eq!(age.ci_lower, 0.0, epsilon = 1e-3);
        assert_relative_eq!(age.ci_upper, 3.92, epsilon = 1e-3);
    }

    #[test]
    fn test_wald_zero_se_is_nan() {
        let result = test_wald(&make_fit()).unwrap();
        let flat = result.get("flat").unwrap();
        assert!(flat.statistic.is_nan());
        assert!(flat.p_value.is_nan());
    }

    #[test]
    fn test_wald_other_level() {
        let result = test_wald_with_level(&make_fit(), 0.90).unwrap();
        let intercept = result.get("(Intercept)").unwrap();
        assert_relative_eq!(intercept.ci_lower, 2.0 - 1.6449, epsilon = 1e-3);
        assert!(test_wald_with_level(&make_fit(), 1.5).is_err());
    }

    #[test]
    fn test_wald_unknown_coefficient() {
        assert!(test_wald_coefficient(&make_fit(), "height").is_err());
        assert!(test_wald_coefficient(&make_fit(), "age").is_ok());
    }
}
