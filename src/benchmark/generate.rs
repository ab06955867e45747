//! Synthetic longitudinal data generation for benchmarking and testing.
//!
//! Generates repeated-measures tables shaped like the VSAE study (children
//! measured at a fixed set of ages, a severity group per child) from a
//! random intercept and slope model with known parameters.

use crate::data::{Table, Variable};
use crate::error::{LmmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for synthetic data generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongitudinalConfig {
    /// Name/identifier for this dataset.
    pub name: String,
    /// Number of subjects in each severity group.
    pub n_subjects_per_group: usize,
    /// Number of severity groups, coded 1..=n_groups.
    pub n_groups: usize,
    /// Measurement ages, shared by all subjects.
    pub ages: Vec<f64>,
    /// Population intercept.
    pub intercept: f64,
    /// Population change in outcome per year of age.
    pub age_slope: f64,
    /// Shift of groups 2..=n_groups relative to group 1.
    pub group_effects: Vec<f64>,
    /// Standard deviation of subject intercepts.
    pub intercept_sd: f64,
    /// Standard deviation of subject slopes on centered age.
    pub slope_sd: f64,
    /// Correlation between subject intercepts and slopes.
    pub correlation: f64,
    /// Residual standard deviation.
    pub residual_sd: f64,
    /// Probability that an outcome is recorded as missing.
    pub missing_rate: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
}

impl Default for LongitudinalConfig {
    fn default() -> Self {
        Self {
            name: "synthetic".to_string(),
            n_subjects_per_group: 12,
            n_groups: 3,
            ages: vec![2.0, 3.0, 5.0, 9.0, 13.0],
            intercept: 10.0,
            age_slope: 3.0,
            group_effects: vec![4.0, 12.0],
            intercept_sd: 4.0,
            slope_sd: 1.5,
            correlation: 0.3,
            residual_sd: 3.0,
            missing_rate: 0.0,
            seed: 42,
        }
    }
}

impl LongitudinalConfig {
    /// Create a new config with the given name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Set subjects per group.
    pub fn with_subjects(mut self, n_subjects_per_group: usize) -> Self {
        self.n_subjects_per_group = n_subjects_per_group;
        self
    }

    /// Set measurement ages.
    pub fn with_ages(mut self, ages: &[f64]) -> Self {
        self.ages = ages.to_vec();
        self
    }

    /// Set the population intercept, age slope and group shifts.
    pub fn with_fixed_effects(mut self, intercept: f64, age_slope: f64, group_effects: &[f64]) -> Self {
        self.intercept = intercept;
        self.age_slope = age_slope;
        self.n_groups = group_effects.len() + 1;
        self.group_effects = group_effects.to_vec();
        self
    }

    /// Set subject-level standard deviations and their correlation.
    pub fn with_random_effects(mut self, intercept_sd: f64, slope_sd: f64, correlation: f64) -> Self {
        self.intercept_sd = intercept_sd;
        self.slope_sd = slope_sd;
        self.correlation = correlation;
        self
    }

    /// Set residual standard deviation.
    pub fn with_residual_sd(mut self, residual_sd: f64) -> Self {
        self.residual_sd = residual_sd;
        self
    }

    /// Set the proportion of outcomes blanked out.
    pub fn with_missing_rate(mut self, missing_rate: f64) -> Self {
        self.missing_rate = missing_rate;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Subjects differ only in their intercepts.
    pub fn intercept_only() -> Self {
        Self::new("intercept_only").with_random_effects(4.0, 0.0, 0.0)
    }

    /// Large subject-specific slopes, where the slope model should win clearly.
    pub fn divergent_slopes() -> Self {
        Self::new("divergent_slopes").with_random_effects(4.0, 3.0, 0.5)
    }

    /// The VSAE design with gaps, for exercising complete-case filtering.
    pub fn with_gaps() -> Self {
        Self::new("with_gaps").with_missing_rate(0.1)
    }

    fn validate(&self) -> Result<()> {
        if self.n_subjects_per_group == 0 || self.n_groups == 0 || self.ages.is_empty() {
            return Err(LmmError::InvalidParameter(
                "Synthetic data needs at least one subject, group and age".to_string(),
            ));
        }
        if self.group_effects.len() + 1 != self.n_groups {
            return Err(LmmError::DimensionMismatch {
                expected: self.n_groups - 1,
                actual: self.group_effects.len(),
            });
        }
        if !(-1.0..=1.0).contains(&self.correlation) {
            return Err(LmmError::InvalidParameter(format!(
                "Correlation must be in [-1, 1], got {}",
                self.correlation
            )));
        }
        if !(0.0..1.0).contains(&self.missing_rate) {
            return Err(LmmError::InvalidParameter(format!(
                "Missing rate must be in [0, 1), got {}",
                self.missing_rate
            )));
        }
        if self.intercept_sd < 0.0 || self.slope_sd < 0.0 || self.residual_sd < 0.0 {
            return Err(LmmError::InvalidParameter(
                "Standard deviations must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Parameters the data were generated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruth {
    /// Population intercept.
    pub intercept: f64,
    /// Population age slope.
    pub age_slope: f64,
    /// Shifts of groups 2..=n_groups.
    pub group_effects: Vec<f64>,
    /// Subject-level covariance of (intercept, slope).
    pub random_covariance: [[f64; 2]; 2],
    /// Residual variance.
    pub residual_variance: f64,
    /// Mean age used to center the slopes.
    pub age_mean: f64,
    /// Drawn (intercept, slope) deviation of each subject, by subject id.
    pub subject_effects: Vec<(String, [f64; 2])>,
}

impl GroundTruth {
    /// Drawn deviations for one subject.
    pub fn subject_effect(&self, subject_id: &str) -> Option<[f64; 2]> {
        self.subject_effects
            .iter()
            .find(|(id, _)| id == subject_id)
            .map(|(_, b)| *b)
    }
}

/// Synthetic dataset with ground truth.
#[derive(Debug, Clone)]
pub struct LongitudinalData {
    /// Columns `childid`, `age`, `sicdegp`, `vsae`.
    pub table: Table,
    /// Known parameters.
    pub ground_truth: GroundTruth,
    /// Configuration used.
    pub config: LongitudinalConfig,
    /// Outcomes recorded as missing.
    pub n_missing: usize,
}

impl LongitudinalData {
    /// Render the table as CSV, with missing cells left empty.
    pub fn to_csv_string(&self) -> Result<String> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record(self.table.column_names())?;
        for row in 0..self.table.n_rows() {
            let record: Vec<String> = self
                .table
                .column_names()
                .iter()
                .map(|c| match self.table.get(row, c) {
                    Some(Variable::Missing) | None => String::new(),
                    Some(v) => v.level_label().unwrap_or_default(),
                })
                .collect();
            writer.write_record(&record)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| LmmError::Io(e.into_error()))?;
        String::from_utf8(bytes).map_err(|e| LmmError::InvalidParameter(e.to_string()))
    }

    /// Write the table to `path` as CSV.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_csv_string()?)?;
        Ok(())
    }

    /// Write the CSV, ground truth and config to a directory.
    pub fn write_to_dir(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.write_csv(&dir.join("data.csv"))?;
        std::fs::write(
            dir.join("ground_truth.json"),
            serde_json::to_string_pretty(&self.ground_truth)?,
        )?;
        std::fs::write(dir.join("config.yaml"), serde_yaml::to_string(&self.config)?)?;
        Ok(())
    }
}

/// Simple deterministic RNG (xorshift64).
struct Rng {
    state: u64,
}

impl Rng {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() as f64) / (u64::MAX as f64)
    }

    /// Standard normal draw (Box-Muller).
    fn next_standard_normal(&mut self) -> f64 {
        let u1 = self.next_f64().max(1e-10);
        let u2 = self.next_f64();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }
}

/// Generate a balanced longitudinal dataset with known parameters.
///
/// Subject `i` in group `g` has outcome
/// `intercept + age_slope * age + shift_g + b0_i + b1_i * (age - mean_age) + e`
/// at every configured age, where `(b0_i, b1_i)` is bivariate normal.
pub fn generate_longitudinal(config: &LongitudinalConfig) -> Result<LongitudinalData> {
    config.validate()?;
    let mut rng = Rng::new(config.seed);

    let age_mean = config.ages.iter().sum::<f64>() / config.ages.len() as f64;
    let rho = config.correlation;
    let cov01 = rho * config.intercept_sd * config.slope_sd;

    let mut childid = Vec::new();
    let mut age = Vec::new();
    let mut sicdegp = Vec::new();
    let mut vsae = Vec::new();
    let mut subject_effects = Vec::new();
    let mut n_missing = 0;

    let mut subject = 0;
    for group in 1..=config.n_groups {
        let shift = if group == 1 {
            0.0
        } else {
            config.group_effects[group - 2]
        };
        for _ in 0..config.n_subjects_per_group {
            subject += 1;
            let z0 = rng.next_standard_normal();
            let z1 = rng.next_standard_normal();
            let b0 = config.intercept_sd * z0;
            let b1 = config.slope_sd * (rho * z0 + (1.0 - rho * rho).sqrt() * z1);
            subject_effects.push((subject.to_string(), [b0, b1]));

            for &a in &config.ages {
                let mean = config.intercept + config.age_slope * a + shift + b0 + b1 * (a - age_mean);
                let y = mean + config.residual_sd * rng.next_standard_normal();

                childid.push(Variable::Continuous(subject as f64));
                age.push(Variable::Continuous(a));
                sicdegp.push(Variable::Continuous(group as f64));
                if rng.next_f64() < config.missing_rate {
                    vsae.push(Variable::Missing);
                    n_missing += 1;
                } else {
                    vsae.push(Variable::Continuous(y));
                }
            }
        }
    }

    let table = Table::from_columns(vec![
        ("childid".to_string(), childid),
        ("age".to_string(), age),
        ("sicdegp".to_string(), sicdegp),
        ("vsae".to_string(), vsae),
    ])?;

    let ground_truth = GroundTruth {
        intercept: config.intercept,
        age_slope: config.age_slope,
        group_effects: config.group_effects.clone(),
        random_covariance: [
            [config.intercept_sd.powi(2), cov01],
            [cov01, config.slope_sd.powi(2)],
        ],
        residual_variance: config.residual_sd.powi(2),
        age_mean,
        subject_effects,
    };

    Ok(LongitudinalData {
        table,
        ground_truth,
        config: config.clone(),
        n_missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::load_and_clean;
    use tempfile::TempDir;

    #[test]
    fn test_generate_shape() {
        let config = LongitudinalConfig::new("shape").with_subjects(5);
        let data = generate_longitudinal(&config).unwrap();

        assert_eq!(data.table.n_rows(), 5 * 3 * 5);
        assert_eq!(data.table.column_names(), ["childid", "age", "sicdegp", "vsae"]);
        assert_eq!(data.table.levels("sicdegp").unwrap(), vec!["1", "2", "3"]);
        assert_eq!(data.ground_truth.subject_effects.len(), 15);
        assert_eq!(data.n_missing, 0);
        assert!((data.ground_truth.age_mean - 6.4).abs() < 1e-12);
    }

    #[test]
    fn test_generate_deterministic() {
        let config = LongitudinalConfig::new("seeded").with_seed(99);
        let a = generate_longitudinal(&config).unwrap();
        let b = generate_longitudinal(&config).unwrap();
        assert_eq!(a.table.numeric_column("vsae").unwrap(), b.table.numeric_column("vsae").unwrap());

        let c = generate_longitudinal(&config.clone().with_seed(100)).unwrap();
        assert_ne!(a.table.numeric_column("vsae").unwrap(), c.table.numeric_column("vsae").unwrap());
    }

    #[test]
    fn test_intercept_only_has_no_slopes() {
        let data = generate_longitudinal(&LongitudinalConfig::intercept_only()).unwrap();
        assert!(data
            .ground_truth
            .subject_effects
            .iter()
            .all(|(_, b)| b[1] == 0.0));
        assert_eq!(data.ground_truth.random_covariance[1][1], 0.0);
    }

    #[test]
    fn test_missing_values_survive_csv() {
        let dir = TempDir::new().unwrap();
        let data = generate_longitudinal(&LongitudinalConfig::with_gaps()).unwrap();
        assert!(data.n_missing > 0);

        let path = dir.path().join("gaps.csv");
        data.write_csv(&path).unwrap();
        let cleaned = load_and_clean(&path, None).unwrap();
        assert_eq!(cleaned.n_rows_raw, data.table.n_rows());
        assert_eq!(cleaned.n_dropped, data.n_missing);
    }

    #[test]
    fn test_write_to_dir() {
        let dir = TempDir::new().unwrap();
        let data = generate_longitudinal(&LongitudinalConfig::new("dir").with_subjects(2)).unwrap();
        data.write_to_dir(dir.path()).unwrap();

        assert!(dir.path().join("data.csv").exists());
        assert!(dir.path().join("ground_truth.json").exists());
        assert!(dir.path().join("config.yaml").exists());
    }

    #[test]
    fn test_invalid_config() {
        let config = LongitudinalConfig {
            group_effects: vec![1.0],
            ..Default::default()
        };
        assert!(matches!(
            generate_longitudinal(&config),
            Err(LmmError::DimensionMismatch { .. })
        ));
        assert!(generate_longitudinal(&LongitudinalConfig::new("x").with_missing_rate(1.0)).is_err());
        assert!(generate_longitudinal(&LongitudinalConfig::new("x").with_subjects(0)).is_err());
    }
}
