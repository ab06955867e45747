//! Longitudinal Linear Mixed Model Library
//!
//! This library provides the building blocks for exploratory analysis and
//! multilevel modeling of repeated-measures data, such as socialization
//! scores of children measured at several ages.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Typed tables, complete-case filtering, formulas and design matrices
//! - **plot**: Scatter and box plots written as SVG
//! - **model**: Linear mixed models fitted by ML or REML, information criteria
//! - **test**: Wald tests for fixed effects, likelihood ratio tests between fits
//! - **report**: Text, JSON and YAML summaries
//! - **pipeline**: The full analysis as configurable steps
//! - **benchmark**: Synthetic longitudinal data with known parameters
//!
//! # Example
//!
//! ```no_run
//! use longitudinal_lmm::prelude::*;
//!
//! // Load data, dropping incomplete rows
//! let mut data = load_and_clean("autism.csv", None).unwrap();
//!
//! // Random intercept per child
//! let model1 = fit_model(
//!     &data.table,
//!     &ModelSpec::new("vsae ~ age + C(sicdegp) + (1 | childid)"),
//! )
//! .unwrap();
//!
//! // Random intercept and slope on centered age
//! data.table.add_centered_column("age", "age_cen").unwrap();
//! let model2 = fit_model(
//!     &data.table,
//!     &ModelSpec::new("vsae ~ age + C(sicdegp) + (1 + age_cen | childid)"),
//! )
//! .unwrap();
//!
//! let lrt = test_lrt_lmm(&model1, &model2).unwrap();
//! println!("{}", lrt);
//! ```

pub mod benchmark;
pub mod data;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::benchmark::{
        generate_longitudinal, GroundTruth, LongitudinalConfig, LongitudinalData,
    };
    pub use crate::data::{
        load_and_clean, CleanedTable, DesignMatrix, Formula, MixedFormula, RandomDesignMatrix,
        RandomEffect, Table, Term, Variable, VariableType,
    };
    pub use crate::error::{LmmError, Result};
    pub use crate::model::{
        compare_fits, fit_model, fit_model_with, Criterion, CriteriaComparison, Diagnostic,
        LmmConfig, LmmFit, MixedModelSolver, ModelCriteria, ModelSpec, QuasiNewton,
        ProfiledSolver, SelectionCriterion,
    };
    pub use crate::pipeline::{
        run_analysis, AnalysisConfig, AnalysisReport, Pipeline, PipelineConfig, PipelineStep,
    };
    pub use crate::plot::{box_summary, render_all, render_boxplot, render_scatter, PlotConfig};
    pub use crate::report::{format_fit, format_report, render_report, OutputFormat};
    pub use crate::test::{test_lrt_lmm, test_wald, LrtResult, WaldResult};
}
