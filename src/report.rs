//! Text, JSON and YAML renderings of fitted models and analysis reports.
//!
//! The text layout follows the familiar mixed-model regression summary:
//! a header block of fit statistics, one row per fixed effect with its
//! Wald test, then one row per variance or covariance parameter.

use crate::data::RANDOM_INTERCEPT;
use crate::error::{LmmError, Result};
use crate::model::lmm::LmmFit;
use crate::pipeline::{AnalysisReport, ModelComparison, NamedFit};
use crate::test::WaldResult;
use serde::{Deserialize, Serialize};
use std::fmt;

const RULE_WIDTH: usize = 78;

/// Output format for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl std::str::FromStr for OutputFormat {
    type Err = LmmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => Err(LmmError::InvalidParameter(format!(
                "Unknown output format '{}'. Use text, json or yaml",
                other
            ))),
        }
    }
}

/// Label of a random term in variance rows; the intercept reads as "Group".
fn random_label(term: &str) -> &str {
    if term == RANDOM_INTERCEPT {
        "Group"
    } else {
        term
    }
}

fn fmt_num(v: f64) -> String {
    if v.is_finite() {
        format!("{:.3}", v)
    } else {
        String::new()
    }
}

fn fmt_p(p: f64) -> String {
    if !p.is_finite() {
        String::new()
    } else if p < 0.001 {
        "0.000".to_string()
    } else {
        format!("{:.3}", p)
    }
}

/// Summary table of one fitted mixed model with its Wald tests.
pub struct FitSummary<'a> {
    pub fit: &'a LmmFit,
    pub wald: &'a WaldResult,
}

impl fmt::Display for FitSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (fit, wald) = (self.fit, self.wald);
        let thick = "=".repeat(RULE_WIDTH);
        let thin = "-".repeat(RULE_WIDTH);
        let converged = if fit.converged { "Yes" } else { "No" };

        writeln!(f, "{:^w$}", "Mixed Linear Model Regression Results", w = RULE_WIDTH)?;
        writeln!(f, "{}", thick)?;
        let header = [
            ("Model:", "MixedLM".to_string(), "Dependent Variable:", fit.response.clone()),
            (
                "No. Observations:",
                fit.n_obs.to_string(),
                "Method:",
                fit.criterion.to_string(),
            ),
            (
                "No. Groups:",
                fit.n_groups.to_string(),
                "Scale:",
                format!("{:.4}", fit.residual_variance),
            ),
            (
                "Min. group size:",
                fit.min_group_size.to_string(),
                "Log-Likelihood:",
                format!("{:.4}", fit.log_likelihood),
            ),
            (
                "Max. group size:",
                fit.max_group_size.to_string(),
                "Converged:",
                converged.to_string(),
            ),
            (
                "Mean group size:",
                format!("{:.1}", fit.mean_group_size),
                "Iterations:",
                fit.iterations.to_string(),
            ),
        ];
        for (l1, v1, l2, v2) in header {
            writeln!(f, "{:<18}{:<20}{:<20}{:>20}", l1, v1, l2, v2)?;
        }
        writeln!(f, "{}", thin)?;

        let level = wald.confidence_level;
        let lo = format!("[{:.3}", (1.0 - level) / 2.0);
        let hi = format!("{:.3}]", 1.0 - (1.0 - level) / 2.0);
        writeln!(
            f,
            "{:<28}{:>8}{:>10}{:>8}{:>8}{:>8}{:>8}",
            "", "Coef.", "Std.Err.", "z", "P>|z|", lo, hi
        )?;
        writeln!(f, "{}", thin)?;
        for row in &wald.rows {
            writeln!(
                f,
                "{:<28}{:>8}{:>10}{:>8}{:>8}{:>8}{:>8}",
                row.coefficient,
                fmt_num(row.estimate),
                fmt_num(row.std_error),
                if row.statistic.is_finite() {
                    format!("{:.2}", row.statistic)
                } else {
                    String::new()
                },
                fmt_p(row.p_value),
                fmt_num(row.ci_lower),
                fmt_num(row.ci_upper),
            )?;
        }

        let q = fit.n_random_terms();
        for i in 0..q {
            for j in 0..=i {
                let name = if i == j {
                    format!("{} Var", random_label(&fit.random_terms[i]))
                } else {
                    format!(
                        "{} x {} Cov",
                        random_label(&fit.random_terms[j]),
                        random_label(&fit.random_terms[i])
                    )
                };
                let value = fit.random_covariance[i][j];
                let se = fit
                    .random_covariance_se
                    .get(i)
                    .and_then(|r| r.get(j))
                    .copied()
                    .unwrap_or(f64::NAN);
                writeln!(f, "{:<28}{:>8}{:>10}", name, fmt_num(value), fmt_num(se))?;
            }
        }
        writeln!(f, "{}", thick)?;

        if let Some(icc) = fit.icc() {
            writeln!(f, "Intraclass correlation: {:.4}", icc)?;
        }
        if q > 1 {
            for i in 0..q {
                for j in 0..i {
                    if let Some(r) = fit.random_correlation(i, j) {
                        writeln!(
                            f,
                            "Corr({}, {}): {:.4}",
                            random_label(&fit.random_terms[j]),
                            random_label(&fit.random_terms[i]),
                            r
                        )?;
                    }
                }
            }
        }
        for d in &fit.diagnostics {
            writeln!(f, "Warning: {}", d)?;
        }
        Ok(())
    }
}

/// Summary table of one fitted mixed model.
pub fn format_fit(fit: &LmmFit, wald: &WaldResult) -> String {
    FitSummary { fit, wald }.to_string()
}

impl fmt::Display for ModelComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}\n\n{}", self.lrt, self.criteria)
    }
}

/// Likelihood ratio test and information criteria for one comparison.
pub fn format_comparison(comparison: &ModelComparison) -> String {
    comparison.to_string()
}

impl fmt::Display for NamedFit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        write!(
            f,
            "{}",
            FitSummary {
                fit: &self.fit,
                wald: &self.wald
            }
        )
    }
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Analysis: {}", self.name)?;
        if let Some(path) = &self.data_path {
            writeln!(f, "Data: {}", path)?;
        }
        writeln!(
            f,
            "Rows: {} read, {} dropped for missing values, {} used ({} columns)",
            self.n_rows_raw, self.n_dropped, self.n_rows, self.n_columns
        )?;
        writeln!(f, "\n{}", self.preview)?;

        for path in &self.plots {
            writeln!(f, "Plot written to {}", path.display())?;
        }
        for c in &self.centering {
            writeln!(f, "Centered {} at mean {:.4} as {}", c.source, c.mean, c.column)?;
        }
        for model in &self.models {
            writeln!(f, "\n{}", model)?;
        }
        for comparison in &self.comparisons {
            writeln!(f, "{}", comparison)?;
        }
        Ok(())
    }
}

/// Full text report of an analysis run.
pub fn format_report(report: &AnalysisReport) -> String {
    report.to_string()
}

/// Render an analysis report in the requested format.
pub fn render_report(report: &AnalysisReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_report(report)),
        OutputFormat::Json => serde_json::to_string_pretty(report).map_err(LmmError::from),
        OutputFormat::Yaml => serde_yaml::to_string(report).map_err(LmmError::from),
    }
}

/// Render a single fitted model in the requested format.
pub fn render_fit(model: &NamedFit, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(model.to_string()),
        OutputFormat::Json => serde_json::to_string_pretty(model).map_err(LmmError::from),
        OutputFormat::Yaml => serde_yaml::to_string(model).map_err(LmmError::from),
    }
}
