//! Benchmarking utilities for evaluating the mixed-model fitter.
//!
//! This module generates synthetic longitudinal datasets with known
//! parameters so fits can be checked against the truth.

mod generate;

pub use generate::{generate_longitudinal, GroundTruth, LongitudinalConfig, LongitudinalData};
