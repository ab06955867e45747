//! Pipeline runner for composing and executing analysis steps.

use crate::data::{load_and_clean, CleanedTable, Table};
use crate::error::{LmmError, Result};
use crate::model::compare::{compare_fits, CriteriaComparison};
use crate::model::lmm::{fit_model, LmmFit, ModelSpec};
use crate::pipeline::config::AnalysisConfig;
use crate::plot::{render_all, PlotConfig};
use crate::test::{test_lrt_lmm, test_wald, LrtResult, WaldResult};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Rows shown in the data preview.
const PREVIEW_ROWS: usize = 5;

/// A step in the analysis pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineStep {
    /// Write the scatter and box plots of `y` against `x`.
    RenderPlots {
        x: String,
        y: String,
        options: PlotConfig,
    },
    /// Derive `name = source - mean(source)`.
    CenterColumn { source: String, name: String },
    /// Fit a mixed model and keep it under `name`.
    FitModel { name: String, spec: ModelSpec },
    /// Compare two previously fitted models.
    CompareModels { reduced: String, full: String },
}

/// Pipeline configuration for serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Name of the pipeline.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Steps to execute.
    pub steps: Vec<PipelineStep>,
}

impl PipelineConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(LmmError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(LmmError::from)
    }
}

/// Builder for constructing and running analysis pipelines.
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<PipelineStep>,
    name: String,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Create a new empty pipeline.
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            name: "unnamed".to_string(),
        }
    }

    /// Create from a config.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            steps: config.steps.clone(),
            name: config.name.clone(),
        }
    }

    /// Set the pipeline name.
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[PipelineStep] {
        &self.steps
    }

    /// Add plot rendering.
    pub fn render_plots(mut self, x: &str, y: &str, options: &PlotConfig) -> Self {
        self.steps.push(PipelineStep::RenderPlots {
            x: x.to_string(),
            y: y.to_string(),
            options: options.clone(),
        });
        self
    }

    /// Add a centered copy of a numeric column.
    pub fn center_column(mut self, source: &str, name: &str) -> Self {
        self.steps.push(PipelineStep::CenterColumn {
            source: source.to_string(),
            name: name.to_string(),
        });
        self
    }

    /// Add a model fit.
    pub fn fit_model(mut self, name: &str, spec: ModelSpec) -> Self {
        self.steps.push(PipelineStep::FitModel {
            name: name.to_string(),
            spec,
        });
        self
    }

    /// Add a comparison of two fitted models.
    pub fn compare_models(mut self, reduced: &str, full: &str) -> Self {
        self.steps.push(PipelineStep::CompareModels {
            reduced: reduced.to_string(),
            full: full.to_string(),
        });
        self
    }

    /// Convert to config for serialization.
    pub fn to_config(&self, description: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            name: self.name.clone(),
            description: description.map(String::from),
            steps: self.steps.clone(),
        }
    }

    /// Run the pipeline on a cleaned table.
    pub fn run(&self, data: &CleanedTable) -> Result<AnalysisReport> {
        let mut state = PipelineState::new(data.table.clone());

        for (i, step) in self.steps.iter().enumerate() {
            state = state.apply(step).map_err(|e| {
                LmmError::Pipeline(format!("Step {} ({}) failed: {}", i + 1, step_label(step), e))
            })?;
        }

        Ok(state.finalize(&self.name, data))
    }
}

fn step_label(step: &PipelineStep) -> String {
    match step {
        PipelineStep::RenderPlots { x, y, .. } => format!("plot {} vs {}", y, x),
        PipelineStep::CenterColumn { source, name } => format!("center {} as {}", source, name),
        PipelineStep::FitModel { name, .. } => format!("fit {}", name),
        PipelineStep::CompareModels { reduced, full } => {
            format!("compare {} with {}", reduced, full)
        }
    }
}

/// A centered column added during the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Centering {
    pub source: String,
    pub column: String,
    /// Mean subtracted from the source column.
    pub mean: f64,
}

/// A fitted model with its fixed-effect tests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedFit {
    pub name: String,
    pub fit: LmmFit,
    pub wald: WaldResult,
}

/// Likelihood ratio test and information criteria for one pair of models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    pub lrt: LrtResult,
    pub criteria: CriteriaComparison,
}

/// Everything the analysis produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub name: String,
    /// Input file, if the table came from one.
    pub data_path: Option<String>,
    pub n_rows_raw: usize,
    pub n_rows: usize,
    pub n_columns: usize,
    /// Rows removed for missing values.
    pub n_dropped: usize,
    /// First rows of the cleaned table, as text.
    pub preview: String,
    pub plots: Vec<PathBuf>,
    pub centering: Vec<Centering>,
    pub models: Vec<NamedFit>,
    pub comparisons: Vec<ModelComparison>,
}

impl AnalysisReport {
    /// Get a fitted model by name.
    pub fn model(&self, name: &str) -> Option<&NamedFit> {
        self.models.iter().find(|m| m.name == name)
    }
}

/// Internal state during pipeline execution.
struct PipelineState {
    table: Table,
    plots: Vec<PathBuf>,
    centering: Vec<Centering>,
    models: Vec<NamedFit>,
    comparisons: Vec<ModelComparison>,
}

impl PipelineState {
    fn new(table: Table) -> Self {
        Self {
            table,
            plots: Vec::new(),
            centering: Vec::new(),
            models: Vec::new(),
            comparisons: Vec::new(),
        }
    }

    fn fitted(&self, name: &str) -> Result<&LmmFit> {
        self.models
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.fit)
            .ok_or_else(|| {
                LmmError::Pipeline(format!("Model '{}' must be fitted before comparison", name))
            })
    }

    fn apply(mut self, step: &PipelineStep) -> Result<Self> {
        match step {
            PipelineStep::RenderPlots { x, y, options } => {
                let paths = render_all(&self.table, x, y, options)?;
                self.plots.extend(paths);
            }
            PipelineStep::CenterColumn { source, name } => {
                let mean = self.table.add_centered_column(source, name)?;
                info!("Centered {} at its mean {:.4} as {}", source, mean, name);
                self.centering.push(Centering {
                    source: source.clone(),
                    column: name.clone(),
                    mean,
                });
            }
            PipelineStep::FitModel { name, spec } => {
                if self.models.iter().any(|m| &m.name == name) {
                    return Err(LmmError::Pipeline(format!(
                        "Model '{}' is fitted twice",
                        name
                    )));
                }
                let fit = fit_model(&self.table, spec)?;
                let wald = test_wald(&fit)?;
                self.models.push(NamedFit {
                    name: name.clone(),
                    fit,
                    wald,
                });
            }
            PipelineStep::CompareModels { reduced, full } => {
                let reduced_fit = self.fitted(reduced)?;
                let full_fit = self.fitted(full)?;
                let lrt = test_lrt_lmm(reduced_fit, full_fit)?;
                let criteria = compare_fits(reduced, reduced_fit, full, full_fit);
                info!(
                    "LRT {} vs {}: Chi2 = {:.4}, df = {}, p = {:.4e}",
                    reduced, full, lrt.statistic, lrt.df, lrt.p_value
                );
                self.comparisons.push(ModelComparison { lrt, criteria });
            }
        }

        Ok(self)
    }

    fn finalize(self, name: &str, data: &CleanedTable) -> AnalysisReport {
        AnalysisReport {
            name: name.to_string(),
            data_path: None,
            n_rows_raw: data.n_rows_raw,
            n_rows: data.table.n_rows(),
            n_columns: data.table.n_columns(),
            n_dropped: data.n_dropped,
            preview: data.table.head(PREVIEW_ROWS),
            plots: self.plots,
            centering: self.centering,
            models: self.models,
            comparisons: self.comparisons,
        }
    }
}

/// Run the full analysis described by `config`.
///
/// Loads and cleans the data file, checks the configured columns, then runs
/// [`AnalysisConfig::pipeline`].
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisReport> {
    info!("Loading data from {}", config.data_path);
    let data = load_and_clean(&config.data_path, config.delimiter_byte()?)?;
    config.check_columns(&data.table)?;

    let mut report = config.pipeline().run(&data)?;
    report.data_path = Some(config.data_path.clone());
    Ok(report)
}
