//! Pipeline composition and execution for the longitudinal analysis.

pub mod config;
mod runner;

pub use config::{AnalysisConfig, MODEL1_NAME, MODEL2_NAME};
pub use runner::{
    run_analysis, AnalysisReport, Centering, ModelComparison, NamedFit, Pipeline, PipelineConfig,
    PipelineStep,
};
