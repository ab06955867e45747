//! Data structures for longitudinal mixed-model analysis.

mod design_matrix;
pub mod formula;
mod random_effects;
mod table;

pub use design_matrix::{encode_factor, DesignMatrix, INTERCEPT};
pub use formula::{Formula, Term};
pub use random_effects::{MixedFormula, RandomDesignMatrix, RandomEffect, RANDOM_INTERCEPT};
pub use table::{load_and_clean, CleanedTable, Table, Variable, VariableType};
