//! Linear mixed models and model comparison.

pub mod compare;
pub mod lmm;
pub mod optim;

pub use compare::{
    compare_fits, CriteriaComparison, EvidenceStrength, ModelCriteria, SelectionCriterion,
};
pub use lmm::{
    fit_model, fit_model_with, Criterion, Diagnostic, LmmConfig, LmmFit, MixedModelSolver,
    ModelSpec, ProfiledSolver,
};
pub use optim::{Minimum, QuasiNewton};
