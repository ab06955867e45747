//! Information criteria for mixed model fits.
//!
//! With deviance `D = -2ℓ`, `k` estimated parameters (fixed effects, free
//! entries of G and σ²) and `n` observations:
//!
//! - AIC = D + 2k
//! - BIC = D + k ln(n)
//! - AICc = AIC + 2k(k + 1) / (n - k - 1)
//!
//! Smaller is better. Only fits of the same response to the same rows under
//! the same criterion (ML vs REML) are comparable.

use crate::model::lmm::LmmFit;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Information criteria for one model fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCriteria {
    pub model: String,
    pub log_likelihood: f64,
    /// `-2 * log_likelihood`.
    pub deviance: f64,
    pub n_params: usize,
    pub n_obs: usize,
    pub aic: f64,
    pub bic: f64,
    /// Infinite when `n <= k + 1`.
    pub aicc: f64,
}

impl ModelCriteria {
    pub fn new(model: &str, log_likelihood: f64, n_params: usize, n_obs: usize) -> Self {
        let deviance = -2.0 * log_likelihood;
        let k = n_params as f64;
        let n = n_obs as f64;
        let aic = deviance + 2.0 * k;
        let denom = n - k - 1.0;

        Self {
            model: model.to_string(),
            log_likelihood,
            deviance,
            n_params,
            n_obs,
            aic,
            bic: deviance + k * n.ln(),
            aicc: if denom > 0.0 {
                aic + 2.0 * k * (k + 1.0) / denom
            } else {
                f64::INFINITY
            },
        }
    }

    /// Criteria for a fitted mixed model.
    pub fn from_fit(model: &str, fit: &LmmFit) -> Self {
        Self::new(model, fit.log_likelihood, fit.n_params(), fit.n_obs)
    }

    /// Value of one criterion.
    pub fn value(&self, criterion: SelectionCriterion) -> f64 {
        match criterion {
            SelectionCriterion::Aic => self.aic,
            SelectionCriterion::Bic => self.bic,
            SelectionCriterion::Aicc => self.aicc,
        }
    }
}

/// Two models side by side.
///
/// Deltas are `model1 - model2`, so a negative delta favours `model1`. Ties
/// go to `model2`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriteriaComparison {
    pub model1: ModelCriteria,
    pub model2: ModelCriteria,
    pub delta_aic: f64,
    pub delta_bic: f64,
    pub preferred_aic: String,
    pub preferred_bic: String,
}

impl CriteriaComparison {
    pub fn new(model1: ModelCriteria, model2: ModelCriteria) -> Self {
        let delta_aic = model1.aic - model2.aic;
        let delta_bic = model1.bic - model2.bic;
        let preferred_aic = Self::pick(delta_aic, &model1, &model2).to_string();
        let preferred_bic = Self::pick(delta_bic, &model1, &model2).to_string();

        Self {
            model1,
            model2,
            delta_aic,
            delta_bic,
            preferred_aic,
            preferred_bic,
        }
    }

    fn pick<'a>(delta: f64, model1: &'a ModelCriteria, model2: &'a ModelCriteria) -> &'a str {
        if delta < 0.0 {
            &model1.model
        } else {
            &model2.model
        }
    }

    /// Preferred model under the given criterion.
    pub fn preferred(&self, criterion: SelectionCriterion) -> &str {
        let delta = self.model1.value(criterion) - self.model2.value(criterion);
        Self::pick(delta, &self.model1, &self.model2)
    }

    /// Evidence for the AIC-preferred model (Burnham & Anderson cutoffs 2, 4, 7).
    pub fn evidence_strength_aic(&self) -> EvidenceStrength {
        EvidenceStrength::from_delta(self.delta_aic, [2.0, 4.0, 7.0])
    }

    /// Evidence for the BIC-preferred model (Kass & Raftery cutoffs 2, 6, 10).
    pub fn evidence_strength_bic(&self) -> EvidenceStrength {
        EvidenceStrength::from_delta(self.delta_bic, [2.0, 6.0, 10.0])
    }
}

impl fmt::Display for CriteriaComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<36} {:>6} {:>12} {:>12} {:>12}",
            "Model", "Df", "logLik", "AIC", "BIC"
        )?;
        for m in [&self.model1, &self.model2] {
            writeln!(
                f,
                "{:<36} {:>6} {:>12.4} {:>12.4} {:>12.4}",
                m.model, m.n_params, m.log_likelihood, m.aic, m.bic
            )?;
        }
        writeln!(
            f,
            "AIC prefers {} ({} evidence, dAIC = {:.2})",
            self.preferred_aic,
            self.evidence_strength_aic(),
            self.delta_aic.abs()
        )?;
        write!(
            f,
            "BIC prefers {} ({} evidence, dBIC = {:.2})",
            self.preferred_bic,
            self.evidence_strength_bic(),
            self.delta_bic.abs()
        )
    }
}

/// Strength of evidence for model preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceStrength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl EvidenceStrength {
    /// Grade `|delta|` against three increasing cutoffs.
    pub fn from_delta(delta: f64, cutoffs: [f64; 3]) -> Self {
        let d = delta.abs();
        match cutoffs.iter().position(|&c| d < c) {
            Some(0) => EvidenceStrength::Weak,
            Some(1) => EvidenceStrength::Moderate,
            Some(_) => EvidenceStrength::Strong,
            None => EvidenceStrength::VeryStrong,
        }
    }
}

impl fmt::Display for EvidenceStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EvidenceStrength::Weak => "weak",
            EvidenceStrength::Moderate => "moderate",
            EvidenceStrength::Strong => "strong",
            EvidenceStrength::VeryStrong => "very strong",
        };
        f.write_str(s)
    }
}

/// Criterion for model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionCriterion {
    Aic,
    Bic,
    /// Small-sample corrected AIC.
    Aicc,
}

/// Compare two fitted models by information criteria.
pub fn compare_fits(name1: &str, fit1: &LmmFit, name2: &str, fit2: &LmmFit) -> CriteriaComparison {
    CriteriaComparison::new(
        ModelCriteria::from_fit(name1, fit1),
        ModelCriteria::from_fit(name2, fit2),
    )
}
