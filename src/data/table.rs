//! Tabular observation data for longitudinal analyses.
//!
//! A [`Table`] is a column-oriented frame of typed [`Variable`] cells loaded
//! from a delimited file. Column types are inferred on load: a column whose
//! non-missing cells all parse as numbers is continuous, anything else is
//! categorical.

use crate::error::{LmmError, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric value of a continuous or ordinal cell.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Try to get as ordinal i64.
    pub fn as_ordinal(&self) -> Option<i64> {
        match self {
            Variable::Ordinal(v) => Some(*v),
            _ => None,
        }
    }

    /// Level label used when the value is treated as a factor.
    ///
    /// Integral numbers print without a decimal point, so a severity code
    /// stored as `2.0` becomes the level `"2"`.
    pub fn level_label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Continuous(v) => {
                if v.fract() == 0.0 && v.abs() < 1e15 {
                    Some(format!("{}", *v as i64))
                } else {
                    Some(v.to_string())
                }
            }
            Variable::Missing => None,
        }
    }
}

/// Type hint for columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// Cell contents read as missing, matching the default `na_values` of
/// pandas' `read_csv`.
const MISSING_TOKENS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn is_missing_token(raw: &str) -> bool {
    MISSING_TOKENS.contains(&raw)
}

/// Column-oriented table of observations.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Column names in file order.
    column_names: Vec<String>,
    /// Cells stored per column.
    columns: HashMap<String, Vec<Variable>>,
    /// Type hints for each column.
    column_types: HashMap<String, VariableType>,
    /// Number of rows.
    n_rows: usize,
}

impl Table {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from named columns of equal length.
    ///
    /// Column types follow the first non-missing cell of each column.
    pub fn from_columns(columns: Vec<(String, Vec<Variable>)>) -> Result<Self> {
        let n_rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
        let mut table = Self {
            n_rows,
            ..Self::default()
        };
        for (name, values) in columns {
            if values.len() != n_rows {
                return Err(LmmError::DimensionMismatch {
                    expected: n_rows,
                    actual: values.len(),
                });
            }
            if table.columns.contains_key(&name) {
                return Err(LmmError::InvalidParameter(format!(
                    "Duplicate column '{}'",
                    name
                )));
            }
            let var_type = values
                .iter()
                .find_map(|v| match v {
                    Variable::Categorical(_) => Some(VariableType::Categorical),
                    Variable::Continuous(_) => Some(VariableType::Continuous),
                    Variable::Ordinal(_) => Some(VariableType::Ordinal),
                    Variable::Missing => None,
                })
                .unwrap_or(VariableType::Continuous);
            table.column_types.insert(name.clone(), var_type);
            table.column_names.push(name.clone());
            table.columns.insert(name, values);
        }
        Ok(table)
    }

    /// Load a comma-separated file (tab-separated when the extension is `.tsv`).
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let delimiter = match path.extension().and_then(|e| e.to_str()) {
            Some("tsv") | Some("tab") => b'\t',
            _ => b',',
        };
        Self::from_delimited(path, delimiter)
    }

    /// Load a delimited file with a header row.
    pub fn from_delimited<P: AsRef<Path>>(path: P, delimiter: u8) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LmmError::DataFileNotFound(path.to_path_buf())
            } else {
                LmmError::Io(e)
            }
        })?;
        debug!("Reading {:?} with delimiter {:?}", path, delimiter as char);
        Self::from_reader(file, delimiter)
    }

    /// Parse delimited text from any reader.
    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let column_names: Vec<String> = csv_reader
            .headers()?
            .iter()
            .map(|h| h.to_string())
            .collect();
        if column_names.is_empty() || column_names.iter().all(|c| c.is_empty()) {
            return Err(LmmError::EmptyData("Data file has no header".to_string()));
        }

        // First pass: collect raw strings to infer types
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); column_names.len()];
        let mut n_rows = 0;
        for record in csv_reader.records() {
            let record = record?;
            if record.iter().all(|f| f.is_empty()) {
                continue;
            }
            for (col_idx, col) in raw.iter_mut().enumerate() {
                col.push(record.get(col_idx).unwrap_or("").to_string());
            }
            n_rows += 1;
        }

        if n_rows == 0 {
            return Err(LmmError::EmptyData("No rows in data file".to_string()));
        }

        let mut table = Self {
            n_rows,
            ..Self::default()
        };
        for (idx, (name, cells)) in column_names.into_iter().zip(raw).enumerate() {
            // pandas writes an unnamed index column; give it a stable name
            let name = if name.is_empty() {
                format!("column_{}", idx)
            } else {
                name
            };
            let all_numeric = cells
                .iter()
                .all(|c| is_missing_token(c) || c.parse::<f64>().is_ok());
            let var_type = if all_numeric {
                VariableType::Continuous
            } else {
                VariableType::Categorical
            };
            let values: Vec<Variable> = cells
                .into_iter()
                .map(|c| {
                    if is_missing_token(&c) {
                        Variable::Missing
                    } else if all_numeric {
                        c.parse::<f64>()
                            .map(Variable::Continuous)
                            .unwrap_or(Variable::Missing)
                    } else {
                        Variable::Categorical(c)
                    }
                })
                .collect();
            table.column_types.insert(name.clone(), var_type);
            table.column_names.push(name.clone());
            table.columns.insert(name, values);
        }

        Ok(table)
    }

    /// Set type hints for specific columns, re-interpreting their values.
    pub fn with_column_types(mut self, types: HashMap<String, VariableType>) -> Result<Self> {
        for (col_name, var_type) in &types {
            let values = self
                .columns
                .get_mut(col_name)
                .ok_or_else(|| LmmError::MissingColumn(col_name.clone()))?;
            for var in values.iter_mut() {
                *var = match (&*var, var_type) {
                    (Variable::Missing, _) => Variable::Missing,
                    (Variable::Categorical(s), VariableType::Continuous) => s
                        .trim()
                        .parse::<f64>()
                        .map(Variable::Continuous)
                        .unwrap_or(Variable::Missing),
                    (Variable::Categorical(s), VariableType::Ordinal) => s
                        .trim()
                        .parse::<i64>()
                        .map(Variable::Ordinal)
                        .unwrap_or(Variable::Missing),
                    (Variable::Continuous(v), VariableType::Ordinal) => Variable::Ordinal(*v as i64),
                    (Variable::Ordinal(v), VariableType::Continuous) => {
                        Variable::Continuous(*v as f64)
                    }
                    (other, VariableType::Categorical) => match other.level_label() {
                        Some(label) => Variable::Categorical(label),
                        None => Variable::Missing,
                    },
                    (other, _) => other.clone(),
                };
            }
            self.column_types.insert(col_name.clone(), *var_type);
        }
        Ok(self)
    }

    /// Column names.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Get the type of a column.
    pub fn column_type(&self, column: &str) -> Option<VariableType> {
        self.column_types.get(column).copied()
    }

    /// Get a single cell.
    pub fn get(&self, row: usize, column: &str) -> Option<&Variable> {
        self.columns.get(column).and_then(|c| c.get(row))
    }

    /// Get all values for a column.
    pub fn column(&self, column: &str) -> Result<&[Variable]> {
        self.columns
            .get(column)
            .map(|c| c.as_slice())
            .ok_or_else(|| LmmError::MissingColumn(column.to_string()))
    }

    /// Get a column as numbers. Fails on categorical or missing cells.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<f64>> {
        self.column(column)?
            .iter()
            .enumerate()
            .map(|(row, v)| {
                v.as_f64().ok_or_else(|| LmmError::InvalidVariableType {
                    column: column.to_string(),
                    reason: format!("row {} is not numeric ({:?})", row, v),
                })
            })
            .collect()
    }

    /// Distinct non-missing levels of a column.
    ///
    /// Numeric columns sort by value, text columns lexicographically. The
    /// first level is the reference level used in dummy coding.
    pub fn levels(&self, column: &str) -> Result<Vec<String>> {
        let values = self.column(column)?;
        match self.column_type(column) {
            Some(VariableType::Continuous) | Some(VariableType::Ordinal) => {
                let mut numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
                numbers.sort_by(|a, b| a.total_cmp(b));
                numbers.dedup();
                Ok(numbers
                    .into_iter()
                    .filter_map(|x| Variable::Continuous(x).level_label())
                    .collect())
            }
            _ => {
                let mut levels: Vec<String> = values
                    .iter()
                    .filter_map(|v| v.level_label())
                    .collect::<HashSet<_>>()
                    .into_iter()
                    .collect();
                levels.sort();
                Ok(levels)
            }
        }
    }

    /// Whether any column of the given row is missing.
    pub fn row_has_missing(&self, row: usize) -> bool {
        self.columns
            .values()
            .any(|c| c.get(row).map_or(true, Variable::is_missing))
    }

    /// Keep only the given rows, in the given order.
    pub fn select_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(LmmError::InvalidParameter(format!(
                "Row index {} out of range ({} rows)",
                bad, self.n_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                (
                    name.clone(),
                    rows.iter().map(|&r| values[r].clone()).collect(),
                )
            })
            .collect();
        Ok(Self {
            column_names: self.column_names.clone(),
            columns,
            column_types: self.column_types.clone(),
            n_rows: rows.len(),
        })
    }

    /// Complete-case filtering: drop every row with a missing cell.
    ///
    /// Returns the filtered table and the number of rows removed.
    pub fn drop_missing(&self) -> (Self, usize) {
        let keep: Vec<usize> = (0..self.n_rows)
            .filter(|&r| !self.row_has_missing(r))
            .collect();
        let dropped = self.n_rows - keep.len();
        let filtered = Self {
            column_names: self.column_names.clone(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| {
                    (
                        name.clone(),
                        keep.iter().map(|&r| values[r].clone()).collect(),
                    )
                })
                .collect(),
            column_types: self.column_types.clone(),
            n_rows: keep.len(),
        };
        (filtered, dropped)
    }

    /// Append `source - mean(source)` as a new continuous column.
    ///
    /// Returns the mean that was subtracted.
    pub fn add_centered_column(&mut self, source: &str, name: &str) -> Result<f64> {
        if self.has_column(name) {
            return Err(LmmError::InvalidParameter(format!(
                "Column '{}' already exists",
                name
            )));
        }
        let values = self.numeric_column(source)?;
        if values.is_empty() {
            return Err(LmmError::EmptyData(format!(
                "Cannot center empty column '{}'",
                source
            )));
        }
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let centered = values
            .into_iter()
            .map(|v| Variable::Continuous(v - mean))
            .collect();
        self.column_names.push(name.to_string());
        self.columns.insert(name.to_string(), centered);
        self.column_types
            .insert(name.to_string(), VariableType::Continuous);
        Ok(mean)
    }

    /// Render the first `n` rows as aligned text.
    pub fn head(&self, n: usize) -> String {
        let n = n.min(self.n_rows);
        let cells: Vec<Vec<String>> = (0..n)
            .map(|r| {
                self.column_names
                    .iter()
                    .map(|c| match self.get(r, c) {
                        Some(Variable::Continuous(v)) => format!("{}", v),
                        Some(Variable::Ordinal(v)) => v.to_string(),
                        Some(Variable::Categorical(s)) => s.clone(),
                        Some(Variable::Missing) | None => "NA".to_string(),
                    })
                    .collect()
            })
            .collect();
        let widths: Vec<usize> = self
            .column_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                cells
                    .iter()
                    .map(|row| row[i].len())
                    .chain(std::iter::once(name.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let header: Vec<String> = self
            .column_names
            .iter()
            .zip(&widths)
            .map(|(name, w)| format!("{:>w$}", name, w = w))
            .collect();
        out.push_str(&format!("{:>5}  {}\n", "", header.join("  ")));
        for (r, row) in cells.iter().enumerate() {
            let line: Vec<String> = row
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:>w$}", cell, w = w))
                .collect();
            out.push_str(&format!("{:>5}  {}\n", r, line.join("  ")));
        }
        out
    }
}

/// A table after complete-case filtering, with bookkeeping about the cleanup.
#[derive(Debug, Clone)]
pub struct CleanedTable {
    /// The filtered table.
    pub table: Table,
    /// Rows read from the file.
    pub n_rows_raw: usize,
    /// Rows removed for having a missing cell.
    pub n_dropped: usize,
}

/// Load a delimited file and drop incomplete rows.
///
/// A path that does not resolve to a file yields
/// [`LmmError::DataFileNotFound`].
pub fn load_and_clean<P: AsRef<Path>>(path: P, delimiter: Option<u8>) -> Result<CleanedTable> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(LmmError::DataFileNotFound(path.to_path_buf()));
    }
    let raw = match delimiter {
        Some(d) => Table::from_delimited(path, d)?,
        None => Table::from_csv(path)?,
    };
    let n_rows_raw = raw.n_rows();
    let (table, n_dropped) = raw.drop_missing();
    info!(
        "Loaded {} rows x {} columns from {:?}; {} remain after dropping {} incomplete rows",
        n_rows_raw,
        table.n_columns(),
        path,
        table.n_rows(),
        n_dropped
    );
    if table.n_rows() == 0 {
        return Err(LmmError::EmptyData(
            "No complete rows remain after dropping missing values".to_string(),
        ));
    }
    Ok(CleanedTable {
        table,
        n_rows_raw,
        n_dropped,
    })
}
