//! Hypothesis tests for fitted mixed models.

pub mod lrt;
pub mod wald;

pub use lrt::{test_lrt_lmm, LrtResult};
pub use wald::{test_wald, test_wald_coefficient, test_wald_with_level, WaldResult, WaldRow};
