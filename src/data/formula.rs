//! Formula parsing for fixed-effects model specification.

use crate::error::{LmmError, Result};
use serde::{Deserialize, Serialize};

/// Split a formula atom into its column name and whether it is wrapped in
/// `C(...)`, which forces nominal (dummy-coded) treatment.
pub fn parse_atom(atom: &str) -> (&str, bool) {
    let atom = atom.trim();
    if let Some(inner) = atom
        .strip_prefix("C(")
        .and_then(|rest| rest.strip_suffix(')'))
    {
        (inner.trim(), true)
    } else {
        (atom, false)
    }
}

/// Strip a leading `0 +` or `-1 +`. Returns whether the intercept is kept.
fn split_intercept(rhs: &str) -> (bool, &str) {
    for marker in ["0", "-1"] {
        if rhs == marker {
            return (false, "");
        }
        if let Some(rest) = rhs.strip_prefix(marker) {
            if let Some(rest) = rest.trim_start().strip_prefix('+') {
                return (false, rest.trim());
            }
        }
    }
    (true, rhs)
}

/// Split `a<sep>b` into its two atoms, `None` when `sep` does not occur.
fn split_pair(piece: &str, sep: char) -> Result<Option<(&str, &str)>> {
    if !piece.contains(sep) {
        return Ok(None);
    }
    let parts: Vec<&str> = piece.split(sep).map(str::trim).collect();
    match parts.as_slice() {
        [a, b] if !a.is_empty() && !b.is_empty() => Ok(Some((a, b))),
        _ => Err(LmmError::FormulaParse(format!(
            "Invalid interaction term: {}",
            piece
        ))),
    }
}

fn push_unique(term: Term, terms: &mut Vec<Term>) {
    if !terms.contains(&term) {
        terms.push(term);
    }
}

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a variable, coded according to its column type.
    Main(String),
    /// Variable forced to be a nominal factor: `C(x)`.
    Factor(String),
    /// Interaction between two atoms (each possibly `C(x)`).
    Interaction(String, String),
}

impl Term {
    fn from_atom(atom: &str) -> Self {
        match parse_atom(atom) {
            (name, true) => Term::Factor(name.to_string()),
            (name, false) => Term::Main(name.to_string()),
        }
    }

    /// Get the column names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(v) | Term::Factor(v) => vec![v.as_str()],
            Term::Interaction(a1, a2) => vec![parse_atom(a1).0, parse_atom(a2).0],
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(v) => write!(f, "{}", v),
            Term::Factor(v) => write!(f, "C({})", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// A parsed formula specifying the fixed part of a model.
///
/// Supports R/patsy-style syntax:
/// - `y ~ age` - response y, intercept + age
/// - `~ age + C(group)` - intercept + age + dummies for group
/// - `~ group * age` - intercept + group + age + group:age
/// - `~ 0 + group` - no intercept, group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Response column, if written on the left of `~`.
    pub response: Option<String>,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept).
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use longitudinal_lmm::data::Formula;
    /// let f = Formula::parse("vsae ~ age + C(sicdegp)").unwrap();
    /// assert_eq!(f.response.as_deref(), Some("vsae"));
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 2);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.to_string();

        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            LmmError::FormulaParse("Formula must contain '~'".to_string())
        })?;
        let lhs = lhs.trim();
        let response = if lhs.is_empty() {
            None
        } else if lhs.contains(|c: char| c.is_whitespace() || "+*:()".contains(c)) {
            return Err(LmmError::FormulaParse(format!(
                "Response must be a single column name, got '{}'",
                lhs
            )));
        } else {
            Some(lhs.to_string())
        };

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(LmmError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }
        let (intercept, rhs) = split_intercept(rhs);

        let mut terms: Vec<Term> = Vec::new();
        for piece in rhs.split('+').map(str::trim).filter(|p| !p.is_empty()) {
            if let Some((a, b)) = split_pair(piece, '*')? {
                push_unique(Term::from_atom(a), &mut terms);
                push_unique(Term::from_atom(b), &mut terms);
                push_unique(Term::Interaction(a.to_string(), b.to_string()), &mut terms);
            } else if let Some((a, b)) = split_pair(piece, ':')? {
                push_unique(Term::Interaction(a.to_string(), b.to_string()), &mut terms);
            } else if piece == "1" {
                continue;
            } else if piece.contains(&['(', ')', '|'][..]) && !parse_atom(piece).1 {
                return Err(LmmError::FormulaParse(format!(
                    "Unsupported term '{}'",
                    piece
                )));
            } else {
                push_unique(Term::from_atom(piece), &mut terms);
            }
        }

        if terms.is_empty() && !intercept {
            return Err(LmmError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            response,
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all column names used on the right-hand side.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check if a variable is used in the formula.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(response) = &self.response {
            write!(f, "{} ", response)?;
        }
        write!(f, "~ ")?;
        if !self.intercept {
            write!(f, "0 + ")?;
        }
        if self.terms.is_empty() {
            return write!(f, "1");
        }
        let term_strs: Vec<String> = self.terms.iter().map(|t| t.to_string()).collect();
        write!(f, "{}", term_strs.join(" + "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let f = Formula::parse("~ age").unwrap();
        assert!(f.response.is_none());
        assert!(f.intercept);
        assert_eq!(f.terms, vec![Term::Main("age".to_string())]);
    }

    #[test]
    fn test_parse_with_response_and_factor() {
        let f = Formula::parse("vsae ~ age + C(sicdegp)").unwrap();
        assert_eq!(f.response.as_deref(), Some("vsae"));
        assert_eq!(
            f.terms,
            vec![
                Term::Main("age".to_string()),
                Term::Factor("sicdegp".to_string())
            ]
        );
        assert_eq!(f.variables(), vec!["age", "sicdegp"]);
        assert_eq!(f.to_string(), "vsae ~ age + C(sicdegp)");
    }

    #[test]
    fn test_parse_no_intercept() {
        let f = Formula::parse("y ~ 0 + group").unwrap();
        assert!(!f.intercept);
        assert_eq!(f.terms.len(), 1);

        let f = Formula::parse("y ~ -1 + group").unwrap();
        assert!(!f.intercept);
    }

    #[test]
    fn test_parse_intercept_only() {
        let f = Formula::parse("y ~ 1").unwrap();
        assert!(f.intercept);
        assert!(f.terms.is_empty());
        assert_eq!(f.to_string(), "y ~ 1");
    }

    #[test]
    fn test_parse_star_expansion() {
        let f = Formula::parse("~ C(group) * age").unwrap();
        assert_eq!(f.terms.len(), 3);
        assert!(f.terms.contains(&Term::Factor("group".to_string())));
        assert!(f.terms.contains(&Term::Main("age".to_string())));
        assert!(f.terms.contains(&Term::Interaction(
            "C(group)".to_string(),
            "age".to_string()
        )));
        assert_eq!(f.variables(), vec!["age", "group"]);
    }

    #[test]
    fn test_parse_atom() {
        assert_eq!(parse_atom("C(sicdegp)"), ("sicdegp", true));
        assert_eq!(parse_atom(" age "), ("age", false));
    }

    #[test]
    fn test_invalid_formula() {
        assert!(Formula::parse("vsae age").is_err()); // missing ~
        assert!(Formula::parse("~").is_err()); // empty RHS
        assert!(Formula::parse("~ 0").is_err()); // no terms
        assert!(Formula::parse("a + b ~ age").is_err()); // compound response
        assert!(Formula::parse("y ~ log(age)").is_err()); // unsupported function
    }
}
