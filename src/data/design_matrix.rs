//! Fixed-effects design matrix construction from a table and formula.

use crate::data::formula::parse_atom;
use crate::data::{Formula, Table, Term, Variable, VariableType};
use crate::error::{LmmError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Name of the intercept column.
pub const INTERCEPT: &str = "(Intercept)";

/// Dummy-code a factor into indicator columns.
///
/// One column `{name}{level}` is produced per level. When `drop_reference`
/// is set, the first entry of `levels` is the reference level and gets no
/// column; its effect is absorbed into the intercept. Missing cells code as
/// all zeros.
pub fn encode_factor(
    name: &str,
    values: &[Variable],
    levels: &[String],
    drop_reference: bool,
) -> Vec<(String, Vec<f64>)> {
    let skip = usize::from(drop_reference);
    levels
        .iter()
        .skip(skip)
        .map(|level| {
            let col = values
                .iter()
                .map(|v| {
                    if v.level_label().as_deref() == Some(level.as_str()) {
                        1.0
                    } else {
                        0.0
                    }
                })
                .collect();
            (format!("{}{}", name, level), col)
        })
        .collect()
}

/// A design matrix for the fixed part of a model.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (observations × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Reference levels for factor variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    pub fn from_matrix(matrix: DMatrix<f64>, coefficient_names: Vec<String>) -> Result<Self> {
        if matrix.ncols() != coefficient_names.len() {
            return Err(LmmError::DimensionMismatch {
                expected: matrix.ncols(),
                actual: coefficient_names.len(),
            });
        }
        Ok(Self {
            matrix,
            coefficient_names,
            reference_levels: HashMap::new(),
        })
    }

    /// Build a design matrix from a table and formula.
    ///
    /// Numeric columns enter as a single column; categorical columns and
    /// `C(x)` terms are expanded with [`encode_factor`], using the first
    /// level from [`Table::levels`] as reference.
    pub fn from_formula(table: &Table, formula: &Formula) -> Result<Self> {
        let n_rows = table.n_rows();

        for var in formula.variables() {
            if !table.has_column(var) {
                return Err(LmmError::MissingColumn(var.to_string()));
            }
        }

        let mut reference_levels = HashMap::new();
        for term in &formula.terms {
            for (name, forced) in Self::term_atoms(term) {
                if Self::is_factor(table, name, forced) && !reference_levels.contains_key(name) {
                    let levels = table.levels(name)?;
                    if let Some(first) = levels.first() {
                        reference_levels.insert(name.to_string(), first.clone());
                    }
                }
            }
        }

        let mut coefficient_names = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if formula.intercept {
            coefficient_names.push(INTERCEPT.to_string());
            columns.push(vec![1.0; n_rows]);
        }

        for term in &formula.terms {
            match term {
                Term::Intercept => {}
                Term::Main(name) | Term::Factor(name) => {
                    let forced = matches!(term, Term::Factor(_));
                    for (col_name, col) in
                        Self::atom_columns(table, name, forced, formula.intercept)?
                    {
                        coefficient_names.push(col_name);
                        columns.push(col);
                    }
                }
                Term::Interaction(atom1, atom2) => {
                    let (name1, forced1) = parse_atom(atom1);
                    let (name2, forced2) = parse_atom(atom2);
                    let cols1 = Self::atom_columns(table, name1, forced1, true)?;
                    let cols2 = Self::atom_columns(table, name2, forced2, true)?;

                    for (n1, c1) in &cols1 {
                        for (n2, c2) in &cols2 {
                            coefficient_names.push(format!("{}:{}", n1, n2));
                            columns.push(c1.iter().zip(c2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
        }

        let n_coef = columns.len();
        let matrix = DMatrix::from_fn(n_rows, n_coef, |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            reference_levels,
        })
    }

    fn term_atoms(term: &Term) -> Vec<(&str, bool)> {
        match term {
            Term::Intercept => vec![],
            Term::Main(v) => vec![(v.as_str(), false)],
            Term::Factor(v) => vec![(v.as_str(), true)],
            Term::Interaction(a, b) => vec![parse_atom(a), parse_atom(b)],
        }
    }

    fn is_factor(table: &Table, name: &str, forced: bool) -> bool {
        forced
            || matches!(
                table.column_type(name),
                Some(VariableType::Categorical) | None
            )
    }

    /// Columns contributed by one atom of a term.
    fn atom_columns(
        table: &Table,
        name: &str,
        forced_factor: bool,
        drop_reference: bool,
    ) -> Result<Vec<(String, Vec<f64>)>> {
        let values = table.column(name)?;
        if Self::is_factor(table, name, forced_factor) {
            let levels = table.levels(name)?;
            if levels.is_empty() {
                return Err(LmmError::EmptyData(format!(
                    "Factor '{}' has no observed levels",
                    name
                )));
            }
            Ok(encode_factor(name, values, &levels, drop_reference))
        } else {
            Ok(vec![(name.to_string(), table.numeric_column(name)?)])
        }
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Number of observations (rows).
    pub fn n_samples(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a factor variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(|s| s.as_str()) == Some(INTERCEPT)
    }
}
