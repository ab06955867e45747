//! Random effects specification for mixed models.
//!
//! Supports lme4-style syntax for specifying random effects:
//! - `(1 | subject)` - random intercept per subject
//! - `(1 + time | subject)` - correlated random intercept and slope
//! - `(0 + time | subject)` - random slope only (no intercept)

use crate::data::{Formula, Table, Variable};
use crate::error::{LmmError, Result};
use nalgebra::DMatrix;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Label used for the random intercept term.
pub const RANDOM_INTERCEPT: &str = "1";

/// A single random effect term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Terms in the random effect (e.g., ["1"] for intercept, ["1", "time"] for intercept + slope).
    pub terms: Vec<String>,
    /// Grouping variable (e.g., "childid").
    pub grouping: String,
    /// Whether to include a random intercept.
    pub has_intercept: bool,
}

impl RandomEffect {
    /// Parse a random effect specification string.
    ///
    /// Supports lme4-style syntax:
    /// - `(1 | subject)` -> intercept only
    /// - `(1 + time | subject)` -> intercept + slope
    /// - `(0 + time | subject)` -> slope only
    /// - `(time | subject)` -> intercept + slope (implicit intercept)
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();

        if !spec.starts_with('(') || !spec.ends_with(')') {
            return Err(LmmError::FormulaParse(format!(
                "Random effect must be wrapped in parentheses: {}",
                spec
            )));
        }

        let inner = spec[1..spec.len() - 1].trim();

        let parts: Vec<&str> = inner.split('|').collect();
        if parts.len() != 2 {
            return Err(LmmError::FormulaParse(format!(
                "Random effect must have exactly one '|': {}",
                spec
            )));
        }

        let terms_str = parts[0].trim();
        let grouping = parts[1].trim().to_string();

        if grouping.is_empty() {
            return Err(LmmError::FormulaParse(
                "Random effect grouping variable cannot be empty".to_string(),
            ));
        }

        let mut terms = Vec::new();
        let mut has_intercept = true;

        for term in terms_str.split('+') {
            let term = term.trim();
            match term {
                "" | RANDOM_INTERCEPT => {}
                "0" | "-1" => has_intercept = false,
                _ => {
                    if !terms.iter().any(|t| t == term) {
                        terms.push(term.to_string());
                    }
                }
            }
        }

        if has_intercept {
            terms.insert(0, RANDOM_INTERCEPT.to_string());
        }

        if terms.is_empty() {
            return Err(LmmError::FormulaParse(
                "Random effect must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            terms,
            grouping,
            has_intercept,
        })
    }

    /// Check if this is a random intercept only.
    pub fn is_intercept_only(&self) -> bool {
        self.terms.len() == 1 && self.terms[0] == RANDOM_INTERCEPT
    }

    /// Number of random effect terms per group.
    pub fn n_terms(&self) -> usize {
        self.terms.len()
    }

    /// Slope variables (all terms except the intercept).
    pub fn slope_variables(&self) -> Vec<&str> {
        self.terms
            .iter()
            .filter(|t| *t != RANDOM_INTERCEPT)
            .map(|t| t.as_str())
            .collect()
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let terms = if self.has_intercept {
            self.terms.join(" + ")
        } else {
            format!("0 + {}", self.terms.join(" + "))
        };
        write!(f, "({} | {})", terms, self.grouping)
    }
}

/// A formula with both fixed and random effects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixedFormula {
    /// Fixed effects formula (carries the response).
    pub fixed: Formula,
    /// Random effects.
    pub random: Vec<RandomEffect>,
    /// Original formula string.
    pub formula_str: String,
}

impl MixedFormula {
    /// Parse a mixed model formula.
    ///
    /// # Examples
    /// ```
    /// use longitudinal_lmm::data::MixedFormula;
    /// let f = MixedFormula::parse("vsae ~ age + C(sicdegp) + (1 | childid)").unwrap();
    /// assert_eq!(f.fixed.response.as_deref(), Some("vsae"));
    /// assert_eq!(f.random.len(), 1);
    /// assert!(f.random[0].is_intercept_only());
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();

        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            LmmError::FormulaParse("Formula must contain '~'".to_string())
        })?;
        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(LmmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let re = Regex::new(r"\([^()]+\|[^()]+\)")
            .map_err(|e| LmmError::FormulaParse(e.to_string()))?;
        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();

        let random: Vec<RandomEffect> = random_strs
            .iter()
            .map(|s| RandomEffect::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replace(re_str, "");
        }

        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");

        // "0 + (x | g)" leaves a bare "0", which still means no intercept
        let fixed_rhs = match fixed_str.as_str() {
            "" => "1".to_string(),
            "0" | "-1" => {
                return Err(LmmError::FormulaParse(
                    "Fixed part must have at least one term".to_string(),
                ))
            }
            _ => fixed_str,
        };
        let fixed = Formula::parse(&format!("{} ~ {}", lhs.trim(), fixed_rhs))?;

        Ok(Self {
            fixed,
            random,
            formula_str,
        })
    }

    /// Build from separately specified fixed and random parts, the way
    /// `groups=` and `re_formula=` are given in statsmodels.
    pub fn from_parts(fixed: &str, grouping: &str, re_formula: Option<&str>) -> Result<Self> {
        let re_terms = match re_formula {
            None => RANDOM_INTERCEPT.to_string(),
            Some(s) => s.trim().trim_start_matches('~').trim().to_string(),
        };
        let combined = format!("{} + ({} | {})", fixed.trim(), re_terms, grouping.trim());
        Self::parse(&combined)
    }

    /// Check if the formula has any random effects.
    pub fn has_random_effects(&self) -> bool {
        !self.random.is_empty()
    }

    /// Get all grouping variables.
    pub fn grouping_variables(&self) -> Vec<&str> {
        self.random.iter().map(|r| r.grouping.as_str()).collect()
    }

    /// Get all variables used (response + fixed + random grouping + random slope terms).
    pub fn all_variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.fixed.variables();
        if let Some(response) = &self.fixed.response {
            vars.push(response);
        }

        for re in &self.random {
            vars.push(&re.grouping);
            vars.extend(re.slope_variables());
        }

        vars.sort();
        vars.dedup();
        vars
    }

    /// Total number of random effects (sum of terms across all random effect specifications).
    pub fn total_random_effects(&self) -> usize {
        self.random.iter().map(|r| r.n_terms()).sum()
    }
}

impl std::fmt::Display for MixedFormula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.formula_str)
    }
}

/// Random effects design, partitioned by group.
///
/// Each observation carries a row of `q` random-effect covariates (a 1 for
/// the intercept, the covariate value for each slope) and the index of the
/// group it belongs to. The full block-structured Z matrix
/// (observations × groups·q) is available from [`Self::expanded_matrix`].
#[derive(Debug, Clone)]
pub struct RandomDesignMatrix {
    /// Per-observation random-effect covariates (observations × q).
    pub covariates: DMatrix<f64>,
    /// Group index for each observation.
    pub group_indices: Vec<usize>,
    /// Unique group IDs, in order of first appearance.
    pub group_ids: Vec<String>,
    /// Number of groups.
    pub n_groups: usize,
    /// Number of random effect terms per group.
    pub n_random_per_group: usize,
    /// Names of the random effect terms ("1" for the intercept).
    pub term_names: Vec<String>,
    /// Name of the grouping variable.
    pub grouping: String,
}

impl RandomDesignMatrix {
    /// Build the random effects design from a table and a random effect.
    pub fn from_random_effect(table: &Table, random_effect: &RandomEffect) -> Result<Self> {
        let n_rows = table.n_rows();
        let group_column = table.column(&random_effect.grouping)?;

        let mut group_map: HashMap<String, usize> = HashMap::new();
        let mut group_ids: Vec<String> = Vec::new();
        let mut group_indices: Vec<usize> = Vec::with_capacity(n_rows);

        for val in group_column {
            let group_str = match val {
                Variable::Missing => {
                    return Err(LmmError::InvalidParameter(
                        "Missing values not allowed in grouping variable".to_string(),
                    ));
                }
                other => other.level_label().unwrap_or_default(),
            };

            let idx = match group_map.get(&group_str) {
                Some(&idx) => idx,
                None => {
                    let idx = group_ids.len();
                    group_map.insert(group_str.clone(), idx);
                    group_ids.push(group_str);
                    idx
                }
            };
            group_indices.push(idx);
        }

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(random_effect.n_terms());
        for term in &random_effect.terms {
            if term == RANDOM_INTERCEPT {
                columns.push(vec![1.0; n_rows]);
            } else {
                columns.push(table.numeric_column(term).map_err(|e| match e {
                    LmmError::InvalidVariableType { column, .. } => LmmError::NotImplemented(
                        format!("Random slope on non-numeric column '{}'", column),
                    ),
                    other => other,
                })?);
            }
        }

        let q = columns.len();
        let covariates = DMatrix::from_fn(n_rows, q, |i, j| columns[j][i]);

        Ok(Self {
            covariates,
            n_groups: group_ids.len(),
            group_indices,
            group_ids,
            n_random_per_group: q,
            term_names: random_effect.terms.clone(),
            grouping: random_effect.grouping.clone(),
        })
    }

    /// Number of observations.
    pub fn n_samples(&self) -> usize {
        self.covariates.nrows()
    }

    /// Total number of random effects (columns in the expanded Z).
    pub fn n_random_effects(&self) -> usize {
        self.n_groups * self.n_random_per_group
    }

    /// Observation indices belonging to each group.
    pub fn group_rows(&self) -> Vec<Vec<usize>> {
        let mut rows = vec![Vec::new(); self.n_groups];
        for (i, &g) in self.group_indices.iter().enumerate() {
            rows[g].push(i);
        }
        rows
    }

    /// Block-structured Z matrix: column `g * q + k` holds term `k` for group `g`.
    pub fn expanded_matrix(&self) -> DMatrix<f64> {
        let q = self.n_random_per_group;
        let mut z = DMatrix::zeros(self.n_samples(), self.n_random_effects());
        for (i, &g) in self.group_indices.iter().enumerate() {
            for k in 0..q {
                z[(i, g * q + k)] = self.covariates[(i, k)];
            }
        }
        z
    }

    /// Get number of observations per group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_table() -> Table {
        let subjects = ["A", "A", "B", "B", "C", "C", "D", "D"];
        let ages = [2.0, 3.0, 2.0, 3.0, 2.0, 3.0, 2.0, 3.0];
        Table::from_columns(vec![
            (
                "childid".to_string(),
                subjects
                    .iter()
                    .map(|s| Variable::Categorical(s.to_string()))
                    .collect(),
            ),
            (
                "age".to_string(),
                ages.iter().map(|&a| Variable::Continuous(a)).collect(),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_parse_random_intercept() {
        let re = RandomEffect::parse("(1 | childid)").unwrap();
        assert_eq!(re.grouping, "childid");
        assert!(re.has_intercept);
        assert!(re.is_intercept_only());
        assert_eq!(re.terms, vec!["1"]);
    }

    #[test]
    fn test_parse_random_slope() {
        let re = RandomEffect::parse("(1 + age_cen | childid)").unwrap();
        assert!(re.has_intercept);
        assert!(!re.is_intercept_only());
        assert_eq!(re.terms, vec!["1", "age_cen"]);
        assert_eq!(re.slope_variables(), vec!["age_cen"]);
    }

    #[test]
    fn test_parse_random_slope_no_intercept() {
        let re = RandomEffect::parse("(0 + age | childid)").unwrap();
        assert!(!re.has_intercept);
        assert_eq!(re.terms, vec!["age"]);
        assert_eq!(re.to_string(), "(0 + age | childid)");
    }

    #[test]
    fn test_parse_implicit_intercept() {
        let re = RandomEffect::parse("(age | childid)").unwrap();
        assert!(re.has_intercept);
        assert_eq!(re.terms, vec!["1", "age"]);
        assert_eq!(re.to_string(), "(1 + age | childid)");
    }

    #[test]
    fn test_mixed_formula_with_factor_term() {
        let f = MixedFormula::parse("vsae ~ age + C(sicdegp) + (1 + age_cen | childid)").unwrap();
        assert_eq!(f.fixed.response.as_deref(), Some("vsae"));
        assert_eq!(f.fixed.terms.len(), 2);
        assert_eq!(f.random.len(), 1);
        assert_eq!(f.random[0].terms, vec!["1", "age_cen"]);
        assert_eq!(
            f.all_variables(),
            vec!["age", "age_cen", "childid", "sicdegp", "vsae"]
        );
    }

    #[test]
    fn test_mixed_formula_from_parts() {
        let f = MixedFormula::from_parts("vsae ~ age + C(sicdegp)", "childid", None).unwrap();
        assert!(f.random[0].is_intercept_only());

        let f = MixedFormula::from_parts("vsae ~ age + C(sicdegp)", "childid", Some("~ age_cen"))
            .unwrap();
        assert_eq!(f.random[0].terms, vec!["1", "age_cen"]);
    }

    #[test]
    fn test_mixed_formula_multiple_random() {
        let f = MixedFormula::parse("~ group + (1 | subject) + (1 | batch)").unwrap();
        assert_eq!(f.fixed.terms.len(), 1);
        assert_eq!(f.grouping_variables(), vec!["subject", "batch"]);
        assert_eq!(f.total_random_effects(), 2);
    }

    #[test]
    fn test_mixed_formula_random_only() {
        let f = MixedFormula::parse("y ~ (1 | subject)").unwrap();
        assert!(f.fixed.intercept);
        assert!(f.fixed.terms.is_empty());
    }

    #[test]
    fn test_invalid_random_effect() {
        assert!(RandomEffect::parse("1 | subject").is_err());
        assert!(RandomEffect::parse("(1 subject)").is_err());
        assert!(RandomEffect::parse("(1 | )").is_err());
        assert!(RandomEffect::parse("(0 | subject)").is_err());
    }

    #[test]
    fn test_random_design_intercept() {
        let table = create_test_table();
        let re = RandomEffect::parse("(1 | childid)").unwrap();
        let z = RandomDesignMatrix::from_random_effect(&table, &re).unwrap();

        assert_eq!(z.n_samples(), 8);
        assert_eq!(z.n_groups, 4);
        assert_eq!(z.n_random_per_group, 1);
        assert_eq!(z.n_random_effects(), 4);
        assert_eq!(z.group_ids, vec!["A", "B", "C", "D"]);

        let expanded = z.expanded_matrix();
        for i in 0..z.n_samples() {
            let row_sum: f64 = (0..z.n_random_effects()).map(|j| expanded[(i, j)]).sum();
            assert_eq!(row_sum, 1.0);
        }
        assert!(z.observations_per_group().iter().all(|&n| n == 2));
    }

    #[test]
    fn test_random_design_slope() {
        let table = create_test_table();
        let re = RandomEffect::parse("(1 + age | childid)").unwrap();
        let z = RandomDesignMatrix::from_random_effect(&table, &re).unwrap();

        assert_eq!(z.n_random_per_group, 2);
        assert_eq!(z.covariates[(1, 0)], 1.0);
        assert_eq!(z.covariates[(1, 1)], 3.0);

        let expanded = z.expanded_matrix();
        assert_eq!(expanded.ncols(), 8);
        // Row 2 is subject B: columns 2 (intercept) and 3 (slope)
        assert_eq!(expanded[(2, 2)], 1.0);
        assert_eq!(expanded[(2, 3)], 2.0);
        assert_eq!(expanded[(2, 0)], 0.0);

        let rows = z.group_rows();
        assert_eq!(rows[0], vec![0, 1]);
        assert_eq!(rows[3], vec![6, 7]);
    }

    #[test]
    fn test_random_slope_on_categorical_rejected() {
        let table = create_test_table();
        let re = RandomEffect::parse("(1 + childid | childid)").unwrap();
        assert!(matches!(
            RandomDesignMatrix::from_random_effect(&table, &re),
            Err(LmmError::NotImplemented(_))
        ));
    }
}
