//! Analysis configuration.

use crate::data::{MixedFormula, Table};
use crate::error::{LmmError, Result};
use crate::model::lmm::{Criterion, LmmConfig, ModelSpec};
use crate::pipeline::runner::Pipeline;
use crate::plot::PlotConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name under which the random-intercept model is reported.
pub const MODEL1_NAME: &str = "Model 1 (random intercept)";
/// Name under which the random intercept and slope model is reported.
pub const MODEL2_NAME: &str = "Model 2 (random intercept + slope)";

/// Everything needed to run the longitudinal analysis.
///
/// The defaults reproduce the standard VSAE analysis: `autism.csv`, fixed
/// effects `age + C(sicdegp)`, children grouped by `childid`, and a random
/// slope on centered age in the second model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Name of the analysis.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Input file.
    pub data_path: String,
    /// Field delimiter; inferred from the extension when absent.
    pub delimiter: Option<char>,
    pub subject_column: String,
    pub age_column: String,
    pub group_column: String,
    pub outcome_column: String,
    /// Name of the derived centered-age column.
    pub centered_column: String,
    /// Random-intercept model.
    pub model1_formula: String,
    /// Random intercept and slope model.
    pub model2_formula: String,
    pub criterion: Criterion,
    pub solver: LmmConfig,
    pub plots: PlotConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            name: "vsae-longitudinal".to_string(),
            description: Some(
                "Socialization (VSAE) trajectories by age and expressive language group"
                    .to_string(),
            ),
            data_path: "autism.csv".to_string(),
            delimiter: None,
            subject_column: "childid".to_string(),
            age_column: "age".to_string(),
            group_column: "sicdegp".to_string(),
            outcome_column: "vsae".to_string(),
            centered_column: "age_cen".to_string(),
            model1_formula: "vsae ~ age + C(sicdegp) + (1 | childid)".to_string(),
            model2_formula: "vsae ~ age + C(sicdegp) + (1 + age_cen | childid)".to_string(),
            criterion: Criterion::MaximumLikelihood,
            solver: LmmConfig::default(),
            plots: PlotConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(LmmError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(LmmError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(LmmError::DataFileNotFound(path.to_path_buf()));
        }
        Self::from_yaml(&std::fs::read_to_string(path)?)
    }

    /// Delimiter as a byte, if one is configured.
    pub fn delimiter_byte(&self) -> Result<Option<u8>> {
        match self.delimiter {
            None => Ok(None),
            Some(c) if c.is_ascii() => Ok(Some(c as u8)),
            Some(c) => Err(LmmError::InvalidParameter(format!(
                "Delimiter must be a single ASCII character, got '{}'",
                c
            ))),
        }
    }

    /// Columns the analysis reads directly.
    pub fn required_columns(&self) -> Vec<&str> {
        vec![
            self.subject_column.as_str(),
            self.age_column.as_str(),
            self.group_column.as_str(),
            self.outcome_column.as_str(),
        ]
    }

    /// Fail with [`LmmError::MissingColumn`] for the first absent column among
    /// the configured columns and those named by either formula.
    ///
    /// The centered column is created before model 2 is fitted, so model 2
    /// may use it without the file providing it.
    pub fn check_columns(&self, table: &Table) -> Result<()> {
        let model1 = MixedFormula::parse(&self.model1_formula)?;
        let model2 = MixedFormula::parse(&self.model2_formula)?;
        let model2_inputs = model2
            .all_variables()
            .into_iter()
            .filter(|v| *v != self.centered_column);

        let missing = self
            .required_columns()
            .into_iter()
            .chain(model1.all_variables())
            .chain(model2_inputs)
            .find(|c| !table.has_column(c));
        match missing {
            Some(column) => Err(LmmError::MissingColumn(column.to_string())),
            None => Ok(()),
        }
    }

    fn model_spec(&self, formula: &str) -> ModelSpec {
        ModelSpec::new(formula)
            .with_criterion(self.criterion)
            .with_config(self.solver.clone())
    }

    /// The analysis as a pipeline: plots, model 1, centering, model 2, comparison.
    pub fn pipeline(&self) -> Pipeline {
        let mut pipeline = Pipeline::new().name(&self.name);
        if self.plots.enabled {
            pipeline = pipeline.render_plots(&self.age_column, &self.outcome_column, &self.plots);
        }
        pipeline
            .fit_model(MODEL1_NAME, self.model_spec(&self.model1_formula))
            .center_column(&self.age_column, &self.centered_column)
            .fit_model(MODEL2_NAME, self.model_spec(&self.model2_formula))
            .compare_models(MODEL1_NAME, MODEL2_NAME)
    }
}
